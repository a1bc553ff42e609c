use std::path::Path;

use anyhow::Result;

use crate::App;
use crate::repository::Repository;

impl App {
    pub async fn cmd_cat(
        &self,
        path: &Path,
        rev: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        let content = repo.cat(path, rev).await?;
        stdout.write_all(content.as_bytes())?;
        Ok(())
    }

    pub async fn cmd_size(
        &self,
        path: &Path,
        rev: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        let size = repo.size(path, rev).await?;
        writeln!(stdout, "{}", size)?;
        Ok(())
    }

    pub async fn cmd_ls(
        &self,
        path: &Path,
        rev: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        for file in repo.ls(path, rev).await? {
            writeln!(stdout, "{}", file)?;
        }
        Ok(())
    }
}
