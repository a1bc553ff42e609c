use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::instrument;

use crate::command::CommandRunner;
use crate::command::Invocation;
use crate::command::ProcessRunner;
use crate::config::Config;
use crate::error::RepoError;
use crate::error::RepoResult;
use crate::repository::BlameOptions;
use crate::repository::CheckoutOptions;
use crate::repository::DiffOptions;
use crate::repository::LogOptions;
use crate::repository::Repository;
use crate::repository::VcsKind;
use crate::watch::Watch;
use crate::watch::WatchId;
use crate::watch::Watchers;

/// Metadata directory marking the root of a working copy.
pub const GIT_DIR: &str = ".git";

static CURRENT_BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\* (.*)$").unwrap());

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:git version )?(\d+)\.(\d+)(?:\.(\d+))?").unwrap()
});

// -----------------------------------------------------------------------------
// Types

/// Git backend. Every operation shells out to the git CLI.
pub struct GitRepository<R = ProcessRunner> {
    uri: String,
    config: Config,
    runner: R,
    /// Resolved on first use.
    version: OnceCell<GitVersion>,
    watchers: Watchers,
}

/// Local branches as listed by `git branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchListing {
    /// Index into `names` of the checked out branch.
    pub current: usize,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

// -----------------------------------------------------------------------------
// Free functions

/// Find the root of the working copy containing `path`.
///
/// Files start the search from their directory. The filesystem root itself is
/// never considered a working copy.
pub async fn find_root(path: &Path) -> RepoResult<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut dir = if is_file(&absolute).await {
        absolute.parent().map(Path::to_path_buf)
    } else {
        Some(absolute)
    };

    while let Some(candidate) = dir {
        if candidate.parent().is_none() {
            break;
        }
        if is_dir(&candidate.join(GIT_DIR)).await {
            return Ok(candidate);
        }
        dir = candidate.parent().map(Path::to_path_buf);
    }

    Err(invalid_working_copy(path))
}

/// Identify the repository a local path belongs to.
///
/// This is the `remote.origin.url` of its working copy, or the working copy
/// root for repositories without an origin.
pub async fn repository_from_path<R: CommandRunner>(
    path: &Path,
    runner: &R,
    git_program: &str,
) -> RepoResult<String> {
    let root = find_root(path).await?;
    let uri = match origin_url_at(runner, git_program, &root).await? {
        Some(url) => url,
        None => root.to_string_lossy().into_owned(),
    };

    if uri.is_empty() {
        return Err(invalid_working_copy(path));
    }

    Ok(uri)
}

async fn origin_url_at<R: CommandRunner>(
    runner: &R,
    git_program: &str,
    path: &Path,
) -> RepoResult<Option<String>> {
    let invocation = config_invocation(git_program, path, Some("remote.origin.url")).await;
    match runner.run(&invocation, None).await {
        Ok(out) => Ok(Some(trim_value(&out).to_string())),
        Err(RepoError::CommandFailed { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

async fn config_invocation(git_program: &str, path: &Path, key: Option<&str>) -> Invocation {
    let invocation = Invocation::new(git_program).arg("config");
    let invocation = match key {
        Some(key) => invocation.args(["--get", key]),
        None => invocation.arg("-l"),
    };
    invocation
        .current_dir(containing_dir(path).await)
        .without_pager()
}

/// Parse `git config -l` output. Keys are lower-cased.
///
/// Returns `None` rather than an empty map when there is nothing to parse.
pub fn parse_config_listing(output: &str) -> Option<BTreeMap<String, String>> {
    let values: BTreeMap<String, String> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_lowercase(), trim_value(value).to_string()))
        .collect();

    (!values.is_empty()).then_some(values)
}

/// Parse `git branch` output, skipping lines that restate `uri`.
pub fn parse_branches(output: &str, uri: &str) -> BranchListing {
    let mut current = 0;
    let mut names = Vec::new();
    for line in output.lines() {
        if !uri.is_empty() && line.starts_with(uri) {
            continue;
        }

        match CURRENT_BRANCH_RE.captures(line) {
            Some(captures) => {
                current = names.len();
                names.push(captures[1].trim_matches(' ').to_string());
            }
            None => names.push(line.trim_matches(' ').to_string()),
        }
    }

    BranchListing { current, names }
}

fn trim_value(value: &str) -> &str {
    value.trim_matches(['\n', '\t', ' '])
}

/// `rev:path`, defaulting to `HEAD`.
fn revision_target(rev: Option<&str>, target: &str) -> String {
    format!("{}:{}", rev.unwrap_or("HEAD"), target)
}

/// `path` relative to `root`, with `/` separators.
fn relative_target(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .filter(|component| component != "/")
        .collect::<Vec<_>>()
        .join("/")
}

fn join_uri(uri: &str, module: &str) -> String {
    if uri.ends_with('/') {
        format!("{}{}", uri, module)
    } else {
        format!("{}/{}", uri, module)
    }
}

fn last_segment(uri: &str) -> String {
    let trimmed = uri.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn invalid_working_copy(path: &Path) -> RepoError {
    RepoError::InvalidWorkingCopy {
        path: path.display().to_string(),
        kind: "Git",
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_dir())
}

/// The directory itself, or the parent of anything else.
async fn containing_dir(path: &Path) -> PathBuf {
    if is_dir(path).await {
        return path.to_path_buf();
    }
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

// -----------------------------------------------------------------------------
// BranchListing / GitVersion impl

impl BranchListing {
    pub fn current_name(&self) -> Option<&str> {
        self.names.get(self.current).map(String::as_str)
    }

    pub fn position(&self, branch: &str) -> Option<usize> {
        self.names.iter().position(|name| name == branch)
    }
}

impl GitVersion {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Parse `git --version` output. A missing micro component reads as 0.
    pub fn parse(output: &str) -> Option<Self> {
        let captures = VERSION_RE.captures(output.trim())?;
        let number = |index: usize| -> Option<u32> {
            captures
                .get(index)
                .map_or(Some(0), |m| m.as_str().parse().ok())
        };
        Some(Self::new(number(1)?, number(2)?, number(3)?))
    }

    /// Git up to 1.6.4 only understands the bare flag.
    pub fn decorate_flag(&self) -> &'static str {
        if *self <= GitVersion::new(1, 6, 4) {
            "--decorate"
        } else {
            "--decorate=full"
        }
    }
}

impl Display for GitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

// -----------------------------------------------------------------------------
// GitRepository impl

impl GitRepository {
    pub fn new(uri: impl Into<String>, config: &Config) -> Self {
        Self::with_runner(uri, config, ProcessRunner::new(config.timeout))
    }
}

impl<R: CommandRunner + Clone> GitRepository<R> {
    /// A fresh handle for the same URI, without any watches.
    pub fn copy(&self) -> Self {
        Self::with_runner(self.uri.clone(), &self.config, self.runner.clone())
    }
}

impl<R: CommandRunner> GitRepository<R> {
    pub fn with_runner(uri: impl Into<String>, config: &Config, runner: R) -> Self {
        Self {
            uri: uri.into(),
            config: config.clone(),
            runner,
            version: OnceCell::new(),
            watchers: Watchers::default(),
        }
    }

    pub fn is_watched(&self, watch: Watch) -> bool {
        self.watchers.is_watched(watch)
    }

    /// Installed git version, queried once per handle.
    pub async fn git_version(&self) -> RepoResult<GitVersion> {
        self.version
            .get_or_try_init(|| async {
                let invocation = self.git().arg("--version");
                let command = invocation.to_string();
                let out = self.run(invocation).await?;
                GitVersion::parse(&out).ok_or(RepoError::UnexpectedOutput {
                    command,
                    output: out,
                })
            })
            .await
            .copied()
    }

    /// All `git config -l` entries visible from `path`.
    pub async fn config(&self, path: &Path) -> RepoResult<Option<BTreeMap<String, String>>> {
        let invocation = config_invocation(&self.config.git_program, path, None).await;
        let out = self.run(invocation).await?;
        Ok(parse_config_listing(&out))
    }

    /// A single config value. Fails if the key is unset.
    pub async fn config_value(&self, path: &Path, key: &str) -> RepoResult<String> {
        let invocation = config_invocation(&self.config.git_program, path, Some(key)).await;
        let out = self.run(invocation).await?;
        Ok(trim_value(&out).to_string())
    }

    /// `remote.origin.url`, or `None` when no origin is configured.
    pub async fn origin_url(&self, path: &Path) -> RepoResult<Option<String>> {
        origin_url_at(&self.runner, &self.config.git_program, path).await
    }

    pub async fn branches(&self, path: &Path) -> RepoResult<BranchListing> {
        let invocation = self
            .git()
            .arg("branch")
            .current_dir(containing_dir(path).await);
        let out = self.run(invocation).await?;
        Ok(parse_branches(&out, &self.uri))
    }

    fn git(&self) -> Invocation {
        Invocation::new(&self.config.git_program)
    }

    async fn run(&self, invocation: Invocation) -> RepoResult<String> {
        self.runner.run(&invocation, None).await
    }

    /// Run while feeding each output line to the callbacks watching `watch`.
    async fn run_watched(&self, invocation: Invocation, watch: Watch) -> RepoResult<String> {
        if !self.watchers.is_watched(watch) {
            return self.run(invocation).await;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let deliver = async {
            while let Some(line) = rx.recv().await {
                self.watchers.notify(watch, &line);
            }
        };
        let (result, ()) = tokio::join!(self.runner.run(&invocation, Some(tx)), deliver);
        result
    }

    /// Fail unless `path` belongs to this repository.
    async fn check_uri(&self, path: &Path) -> RepoResult<()> {
        let actual = repository_from_path(path, &self.runner, &self.config.git_program).await?;
        if !actual.starts_with(&self.uri) {
            return Err(RepoError::UriMismatch {
                path: path.display().to_string(),
                expected: self.uri.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Root of the working copy holding `path`, falling back to the URI.
    async fn root_dir(&self, path: &Path) -> PathBuf {
        if path.as_os_str() == self.uri.as_str() {
            return PathBuf::from(&self.uri);
        }
        match find_root(path).await {
            Ok(root) => root,
            Err(_) => PathBuf::from(&self.uri),
        }
    }

    /// Whether the working copy holding `path` has an origin remote.
    ///
    /// Asked from the root, since `path` itself may no longer exist.
    async fn has_origin(&self, path: &Path) -> RepoResult<bool> {
        let root = self.root_dir(path).await;
        Ok(self.origin_url(&root).await?.is_some())
    }

    /// The tracking ref, when an origin exists.
    async fn default_rev(&self, path: &Path) -> RepoResult<Option<String>> {
        if self.has_origin(path).await? {
            return Ok(Some(self.config.tracking_ref.clone()));
        }
        Ok(None)
    }

    async fn switch_branch(&self, path: &Path, branch: &str) -> RepoResult<()> {
        self.check_uri(path).await?;

        let listing = self.branches(path).await?;
        let invocation = match listing.position(branch) {
            Some(index) if index == listing.current => {
                debug!(branch, "already on branch");
                return Ok(());
            }
            Some(_) => self.git().args(["checkout", branch]),
            None => self
                .git()
                .args(["checkout", "-b", branch, &format!("origin/{}", branch)]),
        };

        self.run(invocation.current_dir(containing_dir(path).await))
            .await?;
        Ok(())
    }
}

impl<R: CommandRunner> Repository for GitRepository<R> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn add_watch(
        &mut self,
        watch: Watch,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> WatchId {
        self.watchers.add(watch, callback)
    }

    fn remove_watch(&mut self, watch: Watch, id: WatchId) {
        self.watchers.remove(watch, id)
    }

    #[instrument(level = "debug", skip(self), fields(uri = %self.uri))]
    async fn checkout(
        &self,
        module: &str,
        root_dir: &Path,
        options: &CheckoutOptions,
    ) -> RepoResult<()> {
        let (target, dest) = match &options.new_dir {
            Some(new_dir) => (new_dir.clone(), root_dir.join(new_dir)),
            None if module == "." => {
                let name = last_segment(&self.uri);
                let dest = root_dir.join(&name);
                (name, dest)
            }
            None => (module.to_string(), root_dir.join(module)),
        };

        if tokio::fs::try_exists(&dest).await? {
            match self.update(&dest, options.branch.as_deref()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_invalid_working_copy() => {
                    debug!(dest = %dest.display(), %err, "not a working copy, cloning");
                }
                Err(err) => return Err(err),
            }
        }

        let source = if module == "." {
            self.uri.clone()
        } else {
            join_uri(&self.uri, module)
        };
        let invocation = self
            .git()
            .args(["clone", &source, &target])
            .current_dir(root_dir);
        self.run_watched(invocation, Watch::Checkout).await?;

        if let Some(branch) = &options.branch {
            self.switch_branch(&dest, branch).await?;
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(uri = %self.uri))]
    async fn update(&self, path: &Path, rev: Option<&str>) -> RepoResult<()> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        if let Some(branch) = rev {
            self.switch_branch(&path, branch).await?;
        }

        let invocation = self
            .git()
            .arg("pull")
            .current_dir(containing_dir(&path).await);
        self.run_watched(invocation, Watch::Update).await?;
        Ok(())
    }

    async fn cat(&self, path: &Path, rev: Option<&str>) -> RepoResult<String> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let root = self.root_dir(&path).await;
        let target = revision_target(rev, &relative_target(&path, &root));
        let invocation = self
            .git()
            .args(["show", &target])
            .current_dir(root)
            .without_pager();
        self.run_watched(invocation, Watch::Cat).await
    }

    async fn size(&self, path: &Path, rev: Option<&str>) -> RepoResult<u64> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let root = self.root_dir(&path).await;
        let target = revision_target(rev, &relative_target(&path, &root));
        let invocation = self
            .git()
            .args(["cat-file", "-s", &target])
            .current_dir(root)
            .without_pager();
        let command = invocation.to_string();
        let out = self.run_watched(invocation, Watch::Size).await?;

        out.trim()
            .parse()
            .map_err(|_| RepoError::UnexpectedOutput {
                command,
                output: out,
            })
    }

    #[instrument(level = "debug", skip(self), fields(uri = %self.uri))]
    async fn log(&self, path: &Path, options: &LogOptions) -> RepoResult<String> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let mut files = options.files.clone();
        let cwd = if is_file(&path).await {
            files = Some(vec![file_name(&path)]);
            containing_dir(&path).await
        } else if is_dir(&path).await {
            path.clone()
        } else {
            std::env::current_dir()?
        };

        let mut invocation = self.git().args([
            "log",
            "--topo-order",
            "--pretty=fuller",
            "--parents",
            "--name-status",
            "-M",
            "-C",
            "--cc",
        ]);

        // Decoration and --all only make sense when no branch is requested
        match &options.branch {
            Some(branch) => invocation = invocation.arg(branch),
            None => {
                let version = self.git_version().await?;
                invocation = invocation.args([version.decorate_flag(), "--all"]);
                if self.has_origin(&path).await? {
                    invocation = invocation.arg("origin");
                }
            }
        }

        if let Some(rev) = &options.rev {
            invocation = invocation.arg(rev);
        }

        match files {
            Some(files) => invocation = invocation.args(files),
            None if cwd != path => invocation = invocation.arg(path.to_string_lossy()),
            None => {}
        }

        self.run_watched(invocation.current_dir(cwd).without_pager(), Watch::Log)
            .await
    }

    async fn diff(&self, path: &Path, options: &DiffOptions) -> RepoResult<String> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let (cwd, files) = if is_file(&path).await {
            let root = self.root_dir(&path).await;
            let file = relative_target(&path, &root);
            (root, Some(vec![file]))
        } else if is_dir(&path).await {
            (path.clone(), options.files.clone())
        } else {
            (std::env::current_dir()?, options.files.clone())
        };

        let mut invocation = self.git().arg("diff");
        match options.revs.as_slice() {
            [] => {}
            [rev] => invocation = invocation.arg(rev),
            [from, to, ..] => invocation = invocation.arg(format!("{}..{}", from, to)),
        }
        invocation = invocation.arg("--");
        if let Some(files) = files {
            invocation = invocation.args(files);
        }

        self.run_watched(invocation.current_dir(cwd).without_pager(), Watch::Diff)
            .await
    }

    async fn show(&self, path: &Path, rev: Option<&str>) -> RepoResult<String> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let (cwd, target) = if is_file(&path).await {
            let root = self.root_dir(&path).await;
            let target = relative_target(&path, &root);
            (root, Some(target))
        } else if is_dir(&path).await {
            (path.clone(), None)
        } else {
            (std::env::current_dir()?, None)
        };

        let mut invocation = self
            .git()
            .args(["show", "--find-copies", "--pretty=format:"]);
        if let Some(rev) = rev {
            invocation = invocation.arg(rev);
        }
        invocation = invocation.arg("--");
        if let Some(target) = target {
            invocation = invocation.arg(target);
        }

        self.run_watched(invocation.current_dir(cwd).without_pager(), Watch::Diff)
            .await
    }

    async fn blame(&self, path: &Path, options: &BlameOptions) -> RepoResult<String> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let root = self.root_dir(&path).await;
        // Git blames one file at a time
        let file = if path.starts_with(&root) && path != root {
            relative_target(&path, &root)
        } else {
            options
                .files
                .first()
                .cloned()
                .unwrap_or_else(|| path.to_string_lossy().into_owned())
        };

        let mut invocation = self.git().args(["blame", "--root", "-l", "-t", "-f"]);
        if options.detect_moves {
            invocation = invocation.args(["-M", "-C"]);
        }
        if let Some((start, end)) = options.lines {
            invocation = invocation.args(["-L".to_string(), format!("{},{}", start, end)]);
        }

        let rev = match &options.rev {
            Some(rev) => Some(rev.clone()),
            None => self.default_rev(&path).await?,
        };
        if let Some(rev) = rev {
            invocation = invocation.arg(rev);
        }
        invocation = invocation.args(["--".to_string(), file]);

        self.run_watched(invocation.current_dir(root).without_pager(), Watch::Blame)
            .await
    }

    async fn ls(&self, path: &Path, rev: Option<&str>) -> RepoResult<Vec<String>> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let (cwd, target) = if is_file(&path).await {
            (containing_dir(&path).await, Some(file_name(&path)))
        } else if is_dir(&path).await {
            (path.clone(), None)
        } else {
            (std::env::current_dir()?, None)
        };

        let rev = match rev {
            Some(rev) => rev.to_string(),
            None => self
                .default_rev(&path)
                .await?
                .unwrap_or_else(|| "HEAD".to_string()),
        };

        let mut invocation = self
            .git()
            .args(["ls-tree", "--name-only", "--full-name", "-r", &rev]);
        if let Some(target) = target {
            invocation = invocation.arg(target);
        }

        let out = self
            .run_watched(invocation.current_dir(cwd).without_pager(), Watch::Ls)
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn modules(&self) -> Vec<String> {
        Vec::new()
    }

    async fn previous_commit(
        &self,
        path: &Path,
        rev: &str,
        file_name: &str,
        follow: bool,
    ) -> RepoResult<Option<String>> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let mut invocation = self.git().args(["log", "--format=%H"]);
        if follow {
            invocation = invocation.arg("--follow");
        }
        invocation = invocation
            .args([rev, "--", file_name])
            .current_dir(containing_dir(&path).await)
            .without_pager();

        match self.run(invocation).await {
            Ok(out) => Ok(out
                .lines()
                .nth(1)
                .map(trim_value)
                .filter(|commit| !commit.is_empty())
                .map(str::to_string)),
            Err(RepoError::CommandFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn last_revision(&self, path: &Path) -> RepoResult<Option<String>> {
        let path = std::path::absolute(path)?;
        self.check_uri(&path).await?;

        let invocation = self
            .git()
            .args(["rev-list", "HEAD^..HEAD"])
            .current_dir(containing_dir(&path).await)
            .without_pager();

        match self.run(invocation).await {
            // A merge lists the merged commits too; the newest comes first
            Ok(out) => Ok(out
                .lines()
                .map(trim_value)
                .find(|line| !line.is_empty())
                .map(str::to_string)),
            Err(RepoError::CommandFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<R> std::fmt::Debug for GitRepository<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("uri", &self.uri)
            .field("version", &self.version.get())
            .field("watchers", &self.watchers)
            .finish_non_exhaustive()
    }
}
