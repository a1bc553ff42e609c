use std::path::Path;

use anyhow::Context;
use anyhow::Result;

use crate::backends::git::GitRepository;
use crate::config::Config;
use crate::repository::AnyRepository;
use crate::repository::create_repository_from_path;

pub struct App {
    pub config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

/// Shared helper methods for App
impl App {
    /// Open the repository whose working copy contains `path`.
    pub(crate) async fn open(&self, path: &Path) -> Result<AnyRepository> {
        create_repository_from_path(path, &self.config)
            .await
            .with_context(|| format!("Failed to open repository at {}", path.display()))
    }

    /// Open `path` as a Git working copy, for commands that only Git supports.
    pub(crate) async fn open_git(&self, path: &Path) -> Result<GitRepository> {
        match self.open(path).await? {
            AnyRepository::Git(repo) => Ok(repo),
        }
    }
}
