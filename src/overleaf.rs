// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Overleaf project synchronization.
//!
//! Overleaf exposes every project as a plain Git repository served over
//! HTTPS. Bibsync uses that access path to write the generated bibliography
//! into a project: clone or refresh a working copy, replace the bibliography
//! file, commit, and push.
//!
//! # Authentication
//!
//! Overleaf authenticates Git access through personal tokens. The token is
//! handed to libgit2 as the password of the fixed user name "git" for the host
//! of the project URL. Nothing is prompted for, so a bad token surfaces as
//! [`OverleafError::Auth`] instead of blocking on user input.
//!
//! # Working Copies
//!
//! A link may name a directory to keep a working copy in. That copy is reused
//! on the next sync, after being reset to the current state of the remote
//! branch. Without such a directory the project is cloned into a temporary
//! directory that is deleted once the sync is done.
//!
//! # Empty Commits and Manual Edits
//!
//! If the bibliography in the project already matches the generated content
//! byte for byte, nothing is committed or pushed. If the bibliography was last
//! changed by anything other than bibsync, e.g., someone edited it in the
//! Overleaf editor, the sync is refused with [`OverleafError::ManualEdit`]
//! unless forced, so manual work is never silently overwritten.

use crate::config::{ConfigError, OverleafProject};

use auth_git2::GitAuthenticator;
use git2::{
    build::RepoBuilder, Commit, Config, ErrorClass, ErrorCode, FetchOptions, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature,
};
use indicatif::{ProgressBar, ProgressStyle};
use mkdirp::mkdirp;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::write,
    path::{Component, Path, PathBuf},
    time,
};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Summary line of every commit bibsync creates.
pub const SYNC_COMMIT_MESSAGE: &str = "Sync Zotero .bib";

/// User name Overleaf expects alongside a Git token.
const TOKEN_USERNAME: &str = "git";

/// Result of syncing a bibliography into a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Project already holds the exact same bibliography.
    UpToDate,

    /// Bibliography was committed and pushed.
    Pushed { commit: Oid },
}

impl Display for SyncOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UpToDate => fmt.write_str("up to date"),
            Self::Pushed { commit } => write!(fmt, "pushed commit {commit}"),
        }
    }
}

/// Destination of generated bibliographies.
pub trait BibliographySink {
    /// Write bibliography content into project, and publish it.
    fn sync(&self, project: &OverleafProject, content: &str) -> Result<SyncOutcome>;
}

/// Overleaf sync through libgit2.
#[derive(Debug, Clone)]
pub struct OverleafClient {
    force: bool,
    bar: ProgressBar,
}

impl Default for OverleafClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OverleafClient {
    /// Construct new client that refuses to overwrite manual edits, and does
    /// not display transfer progress.
    pub fn new() -> Self {
        Self {
            force: false,
            bar: ProgressBar::hidden(),
        }
    }

    /// Overwrite the bibliography even if it was edited by hand.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Display clone and fetch progress through a progress bar.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    fn checkout(
        &self,
        project: &OverleafProject,
        authenticator: &GitAuthenticator,
        config: &Config,
    ) -> Result<Checkout> {
        let Some(work_dir) = &project.work_dir else {
            let scratch = tempfile::Builder::new()
                .prefix("bibsync-")
                .tempdir()
                .map_err(|source| OverleafError::WorkDir {
                    source,
                    path: std::env::temp_dir(),
                })?;
            let repo = self.clone_into(project, scratch.path(), authenticator, config)?;
            return Ok(Checkout {
                repo,
                _scratch: Some(scratch),
            });
        };

        let path = work_dir.resolve()?;
        let repo = if path.join(".git").exists() {
            let repo = Repository::open(&path)?;
            self.refresh(&repo, project, authenticator, config)?;
            repo
        } else {
            mkdirp(&path).map_err(|source| OverleafError::WorkDir {
                source,
                path: path.clone(),
            })?;
            self.clone_into(project, &path, authenticator, config)?
        };

        Ok(Checkout {
            repo,
            _scratch: None,
        })
    }

    #[instrument(skip(self, project, authenticator, config), level = "debug")]
    fn clone_into(
        &self,
        project: &OverleafProject,
        path: &Path,
        authenticator: &GitAuthenticator,
        config: &Config,
    ) -> Result<Repository> {
        info!("clone {} into {:?}", project.git_url, path.display());
        self.start_progress(&project.git_url)?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.remote_callbacks(authenticator, config));
        let repo = RepoBuilder::new()
            .fetch_options(fo)
            .clone(&project.git_url, path)
            .map_err(classify);
        self.bar.finish_and_clear();

        repo
    }

    #[instrument(skip(self, repo, project, authenticator, config), level = "debug")]
    fn refresh(
        &self,
        repo: &Repository,
        project: &OverleafProject,
        authenticator: &GitAuthenticator,
        config: &Config,
    ) -> Result<()> {
        info!("update working copy of {}", project.git_url);

        // INVARIANT: Always talk to the URL stored in the link, even if it changed.
        repo.remote_set_url("origin", &project.git_url)?;
        let branch = head_branch(repo)?;
        let mut remote = repo.find_remote("origin")?;
        self.start_progress(&project.git_url)?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.remote_callbacks(authenticator, config));
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let fetched = remote
            .fetch(&[refspec.as_str()], Some(&mut fo), None)
            .map_err(classify);
        self.bar.finish_and_clear();
        fetched?;

        // INVARIANT: Remote state wins over leftovers of earlier runs.
        //   - Drops local commits that never made it to the remote.
        //   - Drops uncommitted changes to tracked files.
        let target = repo
            .find_reference(&format!("refs/remotes/origin/{branch}"))?
            .peel_to_commit()?;
        repo.reset(target.as_object(), ResetType::Hard, None)?;
        debug!("reset {branch} to {}", target.id());

        Ok(())
    }

    fn commit(
        &self,
        repo: &Repository,
        parent: Option<&Commit<'_>>,
        bib_path: &Path,
        content: &str,
    ) -> Result<Oid> {
        let workdir = repo.workdir().ok_or(OverleafError::NoWorkTree)?;
        let full_path = workdir.join(bib_path);
        if let Some(dir) = full_path.parent() {
            mkdirp(dir).map_err(|source| OverleafError::WorkDir {
                source,
                path: dir.to_path_buf(),
            })?;
        }
        write(&full_path, content).map_err(|source| OverleafError::WriteBibliography {
            source,
            path: full_path.clone(),
        })?;

        let mut index = repo.index()?;
        index.add_path(bib_path)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;

        // INVARIANT: Always provide valid name and email.
        //   - Machines without Git identity still need to be able to commit.
        let signature = repo
            .signature()
            .or_else(|_| Signature::now("bibsync", "bibsync@localhost"))?;
        let parents = parent.into_iter().collect::<Vec<_>>();
        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            SYNC_COMMIT_MESSAGE,
            &tree,
            &parents,
        )?;
        info!("commit {oid} updates {:?}", bib_path.display());

        Ok(oid)
    }

    #[instrument(skip(self, repo, project, authenticator, config), level = "debug")]
    fn push(
        &self,
        repo: &Repository,
        project: &OverleafProject,
        branch: &str,
        authenticator: &GitAuthenticator,
        config: &Config,
    ) -> Result<()> {
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mut rejection = None;

        {
            let mut rc = self.remote_callbacks(authenticator, config);
            rc.push_update_reference(|reference, status| {
                if let Some(status) = status {
                    rejection = Some(format!("{reference}: {status}"));
                }
                Ok(())
            });
            let mut po = PushOptions::new();
            po.remote_callbacks(rc);
            remote
                .push(&[refspec.as_str()], Some(&mut po))
                .map_err(classify)?;
        }

        if let Some(reason) = rejection {
            return Err(OverleafError::Conflict { reason });
        }

        info!("pushed {branch} to {}", project.git_url);
        Ok(())
    }

    fn remote_callbacks<'a>(
        &self,
        authenticator: &'a GitAuthenticator,
        config: &'a Config,
    ) -> RemoteCallbacks<'a> {
        let bar = self.bar.clone();
        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(config));
        rc.transfer_progress(move |progress| {
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(progress.total_objects() as u64);
                bar.set_position(progress.received_objects() as u64);
            }
            true
        });

        rc
    }

    fn start_progress(&self, message: &str) -> Result<()> {
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        self.bar.set_style(style);
        self.bar.set_message(message.to_string());
        self.bar.enable_steady_tick(time::Duration::from_millis(100));

        Ok(())
    }
}

impl BibliographySink for OverleafClient {
    /// Sync bibliography content into Overleaf project.
    ///
    /// Clones or refreshes the project, writes the content to the link's
    /// bibliography path, commits, and pushes. Skips commit and push entirely
    /// if the project already holds the exact same content.
    ///
    /// # Errors
    ///
    /// - Return [`OverleafError::Auth`] if the token is rejected.
    /// - Return [`OverleafError::ManualEdit`] if the bibliography was last
    ///   changed outside of bibsync, and the client is not forced.
    /// - Return [`OverleafError::Conflict`] if another writer pushed first.
    /// - Return [`OverleafError::Transient`] on network failure.
    /// - Return [`OverleafError::Git2`] if libgit2 operations fail otherwise.
    #[instrument(skip(self, project, content), fields(url = %project.git_url), level = "debug")]
    fn sync(&self, project: &OverleafProject, content: &str) -> Result<SyncOutcome> {
        let bib_path = normalize_bib_path(&project.bib_path)?;
        let authenticator = authenticator(project);
        let config = Config::open_default()?;
        let checkout = self.checkout(project, &authenticator, &config)?;
        let repo = &checkout.repo;

        let branch = head_branch(repo)?;
        let head = head_commit(repo)?;
        let current = match &head {
            Some(head) => blob_at(repo, head, &bib_path)?,
            None => None,
        };

        if current.as_deref() == Some(content.as_bytes()) {
            info!("{:?} is up to date", bib_path.display());
            return Ok(SyncOutcome::UpToDate);
        }

        if let (Some(head), Some(_)) = (&head, &current) {
            if let Some(commit) = last_change(head, &bib_path)? {
                if commit.summary() != Some(SYNC_COMMIT_MESSAGE) {
                    if !self.force {
                        return Err(OverleafError::ManualEdit {
                            path: bib_path,
                            commit: commit.id().to_string(),
                        });
                    }
                    warn!(
                        "overwrite manual edit of {:?} from commit {}",
                        bib_path.display(),
                        commit.id()
                    );
                }
            }
        }

        let commit = self.commit(repo, head.as_ref(), &bib_path, content)?;
        self.push(repo, project, &branch, &authenticator, &config)?;

        Ok(SyncOutcome::Pushed { commit })
    }
}

/// Working copy of a project.
struct Checkout {
    repo: Repository,

    // INVARIANT: Dropped after the repository that lives inside of it.
    _scratch: Option<TempDir>,
}

fn authenticator(project: &OverleafProject) -> GitAuthenticator {
    let domain = Url::parse(&project.git_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "*".into());

    GitAuthenticator::new_empty().add_plaintext_credentials(
        domain,
        TOKEN_USERNAME,
        project.token.clone(),
    )
}

/// Reduce bibliography path to plain components relative to project root.
fn normalize_bib_path(path: &Path) -> Result<PathBuf> {
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => continue,
            _ => {
                return Err(OverleafError::InvalidBibPath {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    if normal.as_os_str().is_empty() {
        return Err(OverleafError::InvalidBibPath {
            path: path.to_path_buf(),
        });
    }

    Ok(normal)
}

fn head_branch(repo: &Repository) -> Result<String> {
    let head = repo.find_reference("HEAD")?;
    head.symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .ok_or(OverleafError::DetachedHead)
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn entry_id(commit: &Commit<'_>, path: &Path) -> Result<Option<Oid>> {
    match commit.tree()?.get_path(path) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn blob_at(repo: &Repository, commit: &Commit<'_>, path: &Path) -> Result<Option<Vec<u8>>> {
    match entry_id(commit, path)? {
        Some(oid) => Ok(Some(repo.find_blob(oid)?.content().to_vec())),
        None => Ok(None),
    }
}

/// Find the commit that last changed a file, following first parents.
fn last_change<'r>(head: &Commit<'r>, path: &Path) -> Result<Option<Commit<'r>>> {
    let id = entry_id(head, path)?;
    if id.is_none() {
        return Ok(None);
    }

    let mut commit = head.clone();
    while commit.parent_count() > 0 {
        let parent = commit.parent(0)?;
        if entry_id(&parent, path)? != id {
            return Ok(Some(commit));
        }
        commit = parent;
    }

    Ok(Some(commit))
}

/// Sort libgit2 failures of network operations into error kinds.
fn classify(err: git2::Error) -> OverleafError {
    let message = err.message().to_ascii_lowercase();
    let reason = err.message().to_string();

    match (err.code(), err.class()) {
        (ErrorCode::Auth, _) => OverleafError::Auth { reason },
        (ErrorCode::NotFastForward, _) => OverleafError::Conflict { reason },
        _ if message.contains("authenticat")
            || message.contains("credentials")
            || message.contains("401")
            || message.contains("403") =>
        {
            OverleafError::Auth { reason }
        }
        _ if message.contains("non-fast-forward") || message.contains("fetch first") => {
            OverleafError::Conflict { reason }
        }
        (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Os) => {
            OverleafError::Transient { reason }
        }
        _ => OverleafError::Git2(err),
    }
}

/// Overleaf sync error types.
#[derive(Debug, thiserror::Error)]
pub enum OverleafError {
    /// Git token is missing, invalid, or expired.
    #[error("overleaf rejected the git token: {reason}")]
    Auth { reason: String },

    /// Push was rejected because someone else pushed first.
    #[error("push rejected because the project changed concurrently: {reason}")]
    Conflict { reason: String },

    /// Bibliography was last changed by hand.
    #[error("{:?} was edited outside of bibsync in commit {commit}", path.display())]
    ManualEdit { path: PathBuf, commit: String },

    /// Network failure.
    #[error("temporary failure talking to overleaf: {reason}")]
    Transient { reason: String },

    /// Bibliography path escapes the project, or is empty.
    #[error("bibliography path {:?} must stay inside of the project", path.display())]
    InvalidBibPath { path: PathBuf },

    /// Working copy HEAD does not point at a branch.
    #[error("working copy HEAD does not point at a branch")]
    DetachedHead,

    /// Working copy has no work tree.
    #[error("working copy has no work tree")]
    NoWorkTree,

    /// Working copy directory cannot be created.
    #[error("failed to create working copy directory {:?}", path.display())]
    WorkDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Bibliography file cannot be written.
    #[error("failed to write bibliography to {:?}", path.display())]
    WriteBibliography {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Working copy directory cannot be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

impl OverleafError {
    /// Check if retrying the same sync may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if the project changed in a way the sync must not override.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::ManualEdit { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = OverleafError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkDir;
    use git2::RepositoryInitOptions;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    /// Bare repository on `main` with one seed commit.
    fn bare_remote(path: &Path) -> anyhow::Result<Repository> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        opts.bare(true);
        let remote = Repository::init_opts(path, &opts)?;

        let signature = Signature::now("John Doe", "john@doe.com")?;
        let tree_id = {
            let mut builder = remote.treebuilder(None)?;
            let blob = remote.blob(b"\\bibliography{references}\n")?;
            builder.insert("main.tex", blob, 0o100644)?;
            builder.write()?
        };
        {
            let tree = remote.find_tree(tree_id)?;
            remote.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])?;
        }

        Ok(remote)
    }

    #[test]
    fn normalize_bib_paths() -> anyhow::Result<()> {
        assert_eq!(
            normalize_bib_path(Path::new("references.bib"))?,
            PathBuf::from("references.bib")
        );
        assert_eq!(
            normalize_bib_path(Path::new("./bib/./zotero.bib"))?,
            PathBuf::from("bib/zotero.bib")
        );

        for bad in ["/etc/passwd", "../outside.bib", "bib/../../x.bib", "", "."] {
            assert!(
                matches!(
                    normalize_bib_path(Path::new(bad)),
                    Err(OverleafError::InvalidBibPath { .. })
                ),
                "{bad:?} should be rejected"
            );
        }

        Ok(())
    }

    #[test]
    fn classify_git_errors() {
        let auth = git2::Error::new(ErrorCode::Auth, ErrorClass::Http, "authentication required");
        let replay = git2::Error::new(
            ErrorCode::GenericError,
            ErrorClass::Http,
            "too many redirects or authentication replays",
        );
        let rejected = git2::Error::new(
            ErrorCode::NotFastForward,
            ErrorClass::Reference,
            "cannot push non-fastforwardable reference",
        );
        let offline = git2::Error::new(
            ErrorCode::GenericError,
            ErrorClass::Net,
            "failed to resolve address for git.overleaf.com",
        );
        let corrupt = git2::Error::new(ErrorCode::GenericError, ErrorClass::Odb, "object is corrupt");

        assert!(matches!(classify(auth), OverleafError::Auth { .. }));
        assert!(matches!(classify(replay), OverleafError::Auth { .. }));
        assert!(classify(rejected).is_conflict());
        assert!(classify(offline).is_transient());
        assert!(matches!(classify(corrupt), OverleafError::Git2(_)));
    }

    #[test]
    fn push_from_stale_working_copy_is_conflict() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let remote_path = dir.path().join("project.git");
        let remote = bare_remote(&remote_path)?;
        let client = OverleafClient::new();

        let mut stale = OverleafProject::new(remote_path.to_string_lossy(), "olp_token");
        stale.work_dir = Some(WorkDir::new(dir.path().join("a")));
        let mut fresh = stale.clone();
        fresh.work_dir = Some(WorkDir::new(dir.path().join("b")));

        client.sync(&stale, "@misc{first}\n")?;
        let winner = match client.sync(&fresh, "@misc{second}\n")? {
            SyncOutcome::Pushed { commit } => commit,
            SyncOutcome::UpToDate => anyhow::bail!("second working copy pushed nothing"),
        };

        // Commit on top of the outdated state of the first working copy.
        let repo = Repository::open(dir.path().join("a"))?;
        let head = repo.head()?.peel_to_commit()?;
        client.commit(&repo, Some(&head), Path::new("references.bib"), "@misc{third}\n")?;

        let authenticator = authenticator(&stale);
        let config = Config::open_default()?;
        let result = client.push(&repo, &stale, "main", &authenticator, &config);

        assert!(result.is_err_and(|err| err.is_conflict()));
        assert_eq!(remote.head()?.peel_to_commit()?.id(), winner);

        Ok(())
    }

    #[test]
    fn manual_edits_are_conflicts() {
        let err = OverleafError::ManualEdit {
            path: PathBuf::from("references.bib"),
            commit: "abc".into(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }
}
