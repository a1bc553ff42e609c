#![allow(async_fn_in_trait)]

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use tracing::debug;

use crate::backends::git;
use crate::backends::git::GitRepository;
use crate::command::ProcessRunner;
use crate::config::Config;
use crate::error::RepoError;
use crate::error::RepoResult;
use crate::watch::Watch;
use crate::watch::WatchId;

// -----------------------------------------------------------------------------
// Types

/// Version control systems with a backend in this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VcsKind {
    Git,
}

/// Name -> kind lookup, built once on first use and never modified.
static REGISTRY: LazyLock<BTreeMap<&'static str, VcsKind>> =
    LazyLock::new(|| VcsKind::ALL.iter().map(|kind| (kind.name(), *kind)).collect());

#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    /// Directory name to clone into, relative to the root directory.
    pub new_dir: Option<String>,
    /// Branch to switch to once the working copy exists.
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub rev: Option<String>,
    pub files: Option<Vec<String>>,
    /// Restrict the log to this branch instead of scanning all of them.
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Zero, one (`rev`) or two (`from..to`) revisions; extras are ignored.
    pub revs: Vec<String>,
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct BlameOptions {
    pub rev: Option<String>,
    /// Only the first file is blamed.
    pub files: Vec<String>,
    /// Detect lines moved or copied from other files.
    pub detect_moves: bool,
    /// Inclusive line range.
    pub lines: Option<(u32, u32)>,
}

/// Operations every backend provides.
///
/// Paths passed in must lie inside the working copy this handle was created
/// for; operations fail with an invalid working copy error otherwise.
pub trait Repository {
    fn uri(&self) -> &str;

    fn kind(&self) -> VcsKind;

    /// Repository URI for a local path.
    fn uri_for_path(&self, _path: &Path) -> &str {
        self.uri()
    }

    fn add_watch(
        &mut self,
        watch: Watch,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> WatchId;

    fn remove_watch(&mut self, watch: Watch, id: WatchId);

    /// Check out `module` below `root_dir`, or update it if it is already there.
    async fn checkout(
        &self,
        module: &str,
        root_dir: &Path,
        options: &CheckoutOptions,
    ) -> RepoResult<()>;

    /// Bring a working copy up to date, switching to `rev` first if given.
    async fn update(&self, path: &Path, rev: Option<&str>) -> RepoResult<()>;

    async fn cat(&self, path: &Path, rev: Option<&str>) -> RepoResult<String>;

    /// Size in bytes of a file at a revision.
    async fn size(&self, path: &Path, rev: Option<&str>) -> RepoResult<u64>;

    async fn log(&self, path: &Path, options: &LogOptions) -> RepoResult<String>;

    async fn diff(&self, path: &Path, options: &DiffOptions) -> RepoResult<String>;

    /// The diff introduced by a single revision.
    async fn show(&self, path: &Path, rev: Option<&str>) -> RepoResult<String>;

    async fn blame(&self, path: &Path, options: &BlameOptions) -> RepoResult<String>;

    /// List every file below `path`, recursively.
    async fn ls(&self, path: &Path, rev: Option<&str>) -> RepoResult<Vec<String>>;

    fn modules(&self) -> Vec<String>;

    /// The commit before `rev` that touched `file_name`.
    async fn previous_commit(
        &self,
        path: &Path,
        rev: &str,
        file_name: &str,
        follow: bool,
    ) -> RepoResult<Option<String>>;

    async fn last_revision(&self, path: &Path) -> RepoResult<Option<String>>;
}

// -----------------------------------------------------------------------------
// VcsKind impl

impl VcsKind {
    pub const ALL: &'static [VcsKind] = &[VcsKind::Git];

    pub fn name(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
        }
    }
}

impl Display for VcsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VcsKind {
    type Err = RepoError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .get(name)
            .copied()
            .ok_or_else(|| RepoError::UnknownRepository(name.to_string()))
    }
}

/// Names of every registered backend.
pub fn registered_kinds() -> impl Iterator<Item = &'static str> {
    REGISTRY.keys().copied()
}

// -----------------------------------------------------------------------------
// AnyRepository

/// A repository handle of any registered kind.
#[derive(Debug)]
pub enum AnyRepository {
    Git(GitRepository),
}

macro_rules! dispatch {
    ($self:expr, $repo:ident => $body:expr) => {
        match $self {
            AnyRepository::Git($repo) => $body,
        }
    };
}

/// Create a repository handle for `uri` using the backend registered as `kind`.
pub fn create_repository(
    kind: &str,
    uri: impl Into<String>,
    config: &Config,
) -> RepoResult<AnyRepository> {
    match kind.parse::<VcsKind>()? {
        VcsKind::Git => Ok(AnyRepository::Git(GitRepository::new(uri, config))),
    }
}

/// Create a repository handle for the working copy containing `path`.
pub async fn create_repository_from_path(
    path: &Path,
    config: &Config,
) -> RepoResult<AnyRepository> {
    let runner = ProcessRunner::new(config.timeout);
    for kind in VcsKind::ALL {
        let found = match kind {
            VcsKind::Git => git::repository_from_path(path, &runner, &config.git_program).await,
        };
        match found {
            Ok(uri) => return create_repository(kind.name(), uri, config),
            Err(err) => debug!(%kind, %err, "not a working copy of this kind"),
        }
    }

    Err(RepoError::UnrecognizedPath(path.display().to_string()))
}

impl AnyRepository {
    /// A fresh handle for the same kind and URI, without any watches.
    pub fn copy(&self) -> AnyRepository {
        dispatch!(self, repo => AnyRepository::Git(repo.copy()))
    }
}

impl Repository for AnyRepository {
    fn uri(&self) -> &str {
        dispatch!(self, repo => repo.uri())
    }

    fn kind(&self) -> VcsKind {
        dispatch!(self, repo => repo.kind())
    }

    fn add_watch(
        &mut self,
        watch: Watch,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> WatchId {
        dispatch!(self, repo => repo.add_watch(watch, callback))
    }

    fn remove_watch(&mut self, watch: Watch, id: WatchId) {
        dispatch!(self, repo => repo.remove_watch(watch, id))
    }

    async fn checkout(
        &self,
        module: &str,
        root_dir: &Path,
        options: &CheckoutOptions,
    ) -> RepoResult<()> {
        dispatch!(self, repo => repo.checkout(module, root_dir, options).await)
    }

    async fn update(&self, path: &Path, rev: Option<&str>) -> RepoResult<()> {
        dispatch!(self, repo => repo.update(path, rev).await)
    }

    async fn cat(&self, path: &Path, rev: Option<&str>) -> RepoResult<String> {
        dispatch!(self, repo => repo.cat(path, rev).await)
    }

    async fn size(&self, path: &Path, rev: Option<&str>) -> RepoResult<u64> {
        dispatch!(self, repo => repo.size(path, rev).await)
    }

    async fn log(&self, path: &Path, options: &LogOptions) -> RepoResult<String> {
        dispatch!(self, repo => repo.log(path, options).await)
    }

    async fn diff(&self, path: &Path, options: &DiffOptions) -> RepoResult<String> {
        dispatch!(self, repo => repo.diff(path, options).await)
    }

    async fn show(&self, path: &Path, rev: Option<&str>) -> RepoResult<String> {
        dispatch!(self, repo => repo.show(path, rev).await)
    }

    async fn blame(&self, path: &Path, options: &BlameOptions) -> RepoResult<String> {
        dispatch!(self, repo => repo.blame(path, options).await)
    }

    async fn ls(&self, path: &Path, rev: Option<&str>) -> RepoResult<Vec<String>> {
        dispatch!(self, repo => repo.ls(path, rev).await)
    }

    fn modules(&self) -> Vec<String> {
        dispatch!(self, repo => repo.modules())
    }

    async fn previous_commit(
        &self,
        path: &Path,
        rev: &str,
        file_name: &str,
        follow: bool,
    ) -> RepoResult<Option<String>> {
        dispatch!(self, repo => repo.previous_commit(path, rev, file_name, follow).await)
    }

    async fn last_revision(&self, path: &Path) -> RepoResult<Option<String>> {
        dispatch!(self, repo => repo.last_revision(path).await)
    }
}
