use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use colored::Colorize;

use crate::App;
use crate::repository::CheckoutOptions;
use crate::repository::Repository;
use crate::repository::create_repository;

impl App {
    pub async fn cmd_checkout(
        &self,
        kind: &str,
        uri: &str,
        module: &str,
        root_dir: &Path,
        options: &CheckoutOptions,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = create_repository(kind, uri, &self.config)?;
        repo.checkout(module, root_dir, options)
            .await
            .with_context(|| format!("Failed to check out {} from {}", module, uri))?;

        writeln!(stdout, "Checked out {} from {}", module.cyan(), uri)?;
        if let Some(branch) = &options.branch {
            writeln!(stdout, "On branch {}", branch.green())?;
        }
        Ok(())
    }

    pub async fn cmd_update(
        &self,
        path: &Path,
        rev: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        repo.update(path, rev)
            .await
            .with_context(|| format!("Failed to update {}", path.display()))?;

        writeln!(stdout, "Updated {}", path.display())?;
        Ok(())
    }
}
