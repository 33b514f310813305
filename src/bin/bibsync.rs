// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use bibsync::{
    config::{Link, OverleafProject, WorkDir, ZoteroSource, DEFAULT_BIB_PATH},
    overleaf::OverleafClient,
    session::SyncSession,
    store::LinkStore,
    zotero::{LibraryRef, ZoteroClient},
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use inquire::{Confirm, Password, Select, Text};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  bibsync [options] [<bibsync-command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Use link store at path instead of the default location.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let store = match self.config {
            Some(path) => LinkStore::open(path),
            None => LinkStore::open_default()?,
        };

        match self.command {
            Some(Command::Add(opts)) => run_add(&store, opts.project).map(|_| ()),
            Some(Command::Sync(opts)) => run_sync(&store, opts).await,
            Some(Command::List) => run_list(&store),
            Some(Command::Remove(opts)) => run_remove(&store, opts),
            None => run_sync(&store, SyncOptions::default()).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Link Overleaf project to Zotero library, or update existing link.
    #[command(override_usage = "bibsync add [options] [<project>]")]
    Add(AddOptions),

    /// Sync bibliography of linked Overleaf project.
    #[command(override_usage = "bibsync sync [options] [<project>]")]
    Sync(SyncOptions),

    /// List linked projects.
    #[command(override_usage = "bibsync list [options]")]
    List,

    /// Remove links from link store.
    #[command(override_usage = "bibsync remove [options] <project>...")]
    Remove(RemoveOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Name of project to file link under.
    #[arg(value_name = "project")]
    pub project: Option<String>,
}

#[derive(Parser, Clone, Debug, Default)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Name of project to sync, prompted for if left out.
    #[arg(value_name = "project")]
    pub project: Option<String>,

    /// Overwrite bibliography even if it was edited by hand.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Names of projects to unlink.
    #[arg(required = true, value_name = "project")]
    pub projects: Vec<String>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_add(store: &LinkStore, project: Option<String>) -> Result<Link> {
    let name = match project {
        Some(name) => name,
        None => Text::new("Project name:").prompt()?,
    };
    let current = store.load_links()?.remove(&name);

    let git_url = prompt_with_current(
        "Overleaf Git URL:",
        current.as_ref().map(|link| link.overleaf.git_url.clone()),
        "Overleaf project menu, Integrations, Git",
    )?;
    let token = prompt_secret(
        "Overleaf Git token:",
        current.as_ref().map(|link| link.overleaf.token.clone()),
        false,
    )?
    .ok_or_else(|| anyhow!("an overleaf git token is required"))?;

    let library = loop {
        let url = prompt_with_current(
            "Zotero library URL:",
            current.as_ref().map(|link| link.zotero.library.to_string()),
            "library or collection URL from zotero.org",
        )?;
        match url.parse::<LibraryRef>() {
            Ok(library) => break library,
            Err(err) => warn!("{err}"),
        }
    };
    let api_key = prompt_secret(
        "Zotero API key (empty for public libraries):",
        current.as_ref().and_then(|link| link.zotero.api_key.clone()),
        true,
    )?;

    let bib_path = prompt_with_current(
        "Bibliography path:",
        Some(
            current
                .as_ref()
                .map(|link| link.overleaf.bib_path.display().to_string())
                .unwrap_or_else(|| DEFAULT_BIB_PATH.to_string()),
        ),
        "path of the .bib file inside of the project",
    )?;
    let work_dir = prompt_with_current(
        "Working copy directory (empty for a temporary one):",
        current
            .as_ref()
            .and_then(|link| link.overleaf.work_dir.as_ref())
            .map(ToString::to_string),
        "keeps a clone of the project around between syncs",
    )?;

    let mut overleaf = OverleafProject::new(git_url, token);
    overleaf.bib_path = PathBuf::from(bib_path);
    overleaf.work_dir = (!work_dir.is_empty()).then(|| WorkDir::new(work_dir));
    let link = Link::new(name, overleaf, ZoteroSource { library, api_key });

    warn!(
        "credentials of {:?} are stored in plaintext at {:?}",
        link.name,
        store.path().display()
    );
    store.save_link(link.clone())?;

    Ok(link)
}

async fn run_sync(store: &LinkStore, opts: SyncOptions) -> Result<()> {
    let mut links = store.load_links()?;
    let link = match opts.project {
        Some(name) => links
            .remove(&name)
            .ok_or_else(|| anyhow!("no link named {name:?}, run `bibsync add {name}` first"))?,
        None if links.is_empty() => {
            let create = Confirm::new("No projects are linked yet. Link one now?")
                .with_default(true)
                .prompt()?;
            if !create {
                return Ok(());
            }
            run_add(store, None)?
        }
        None => {
            let names = links.keys().cloned().collect::<Vec<_>>();
            let name = Select::new("Project to sync:", names).prompt()?;
            links
                .remove(&name)
                .ok_or_else(|| anyhow!("no link named {name:?}"))?
        }
    };

    let overleaf = OverleafClient::new()
        .with_force(opts.force)
        .with_progress(ProgressBar::no_length());
    let session = SyncSession::new(ZoteroClient::new()?, overleaf);

    let report = match session.run(&link).await {
        Ok(report) => report,
        Err(err) => {
            let context = match err.hint() {
                Some(hint) => format!("failed to sync {:?}, {hint}", link.name),
                None => format!("failed to sync {:?}", link.name),
            };
            return Err(err).context(context);
        }
    };

    info!(
        "{}: {} entries, {} skipped, {}",
        report.project,
        report.entries,
        report.warnings.len(),
        report.outcome
    );

    Ok(())
}

fn run_list(store: &LinkStore) -> Result<()> {
    let links = store.load_links()?;
    if links.is_empty() {
        info!("no projects linked in {:?}", store.path().display());
        return Ok(());
    }

    for (name, link) in links {
        println!(
            "{name}\n  overleaf: {} ({})\n  zotero:   {}",
            link.overleaf.git_url,
            link.overleaf.bib_path.display(),
            link.zotero.library,
        );
    }

    Ok(())
}

fn run_remove(store: &LinkStore, opts: RemoveOptions) -> Result<()> {
    for project in opts.projects {
        store.remove_link(&project)?;
    }

    Ok(())
}

fn prompt_with_current(message: &str, current: Option<String>, help: &str) -> Result<String> {
    let mut prompt = Text::new(message).with_help_message(help);
    if let Some(current) = current.as_deref() {
        prompt = prompt.with_default(current);
    }

    Ok(prompt.prompt()?.trim().to_string())
}

/// Answer that removes a stored secret.
const CLEAR_SECRET: &str = "-";

/// Prompt for secret, keeping current one on empty input.
///
/// Secrets marked `clearable` are removed when answered with [`CLEAR_SECRET`].
fn prompt_secret(message: &str, current: Option<String>, clearable: bool) -> Result<Option<String>> {
    let help = match (current.is_some(), clearable) {
        (true, true) => "leave empty to keep the current one, enter - to remove it",
        (true, false) => "leave empty to keep the current one",
        (false, _) => "input is hidden",
    };
    let secret = Password::new(message)
        .without_confirmation()
        .with_help_message(help)
        .prompt()?;

    Ok(resolve_secret(&secret, current, clearable))
}

fn resolve_secret(input: &str, current: Option<String>, clearable: bool) -> Option<String> {
    match input.trim() {
        "" => current,
        CLEAR_SECRET if clearable => None,
        secret => Some(secret.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use simple_test_case::test_case;

    #[test_case("", Some("old"), true, Some("old"); "empty keeps current")]
    #[test_case("  ", None, true, None; "empty without current")]
    #[test_case(" new ", Some("old"), true, Some("new"); "replaces current")]
    #[test_case("-", Some("old"), true, None; "dash clears current")]
    #[test_case("-", Some("old"), false, Some("-"); "dash is literal when not clearable")]
    #[test]
    fn resolve_secret_answers(input: &str, current: Option<&str>, clearable: bool, expect: Option<&str>) {
        let result = resolve_secret(input, current.map(String::from), clearable);
        pretty_assertions::assert_eq!(result.as_deref(), expect);
    }
}
