use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::App;
use crate::repository::BlameOptions;
use crate::repository::DiffOptions;
use crate::repository::LogOptions;
use crate::repository::Repository;

impl App {
    pub async fn cmd_log(
        &self,
        path: &Path,
        options: &LogOptions,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        let log = repo.log(path, options).await?;
        stdout.write_all(log.as_bytes())?;
        Ok(())
    }

    pub async fn cmd_diff(
        &self,
        path: &Path,
        options: &DiffOptions,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        let diff = repo.diff(path, options).await?;
        stdout.write_all(diff.as_bytes())?;
        Ok(())
    }

    pub async fn cmd_show(
        &self,
        path: &Path,
        rev: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        let diff = repo.show(path, rev).await?;
        stdout.write_all(diff.as_bytes())?;
        Ok(())
    }

    pub async fn cmd_blame(
        &self,
        path: &Path,
        options: &BlameOptions,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        let blame = repo.blame(path, options).await?;
        stdout.write_all(blame.as_bytes())?;
        Ok(())
    }

    pub async fn cmd_last_revision(
        &self,
        path: &Path,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        match repo.last_revision(path).await? {
            Some(rev) => writeln!(stdout, "{}", rev)?,
            None => writeln!(stdout, "{}", "none".dimmed())?,
        }
        Ok(())
    }

    pub async fn cmd_previous_commit(
        &self,
        path: &Path,
        rev: &str,
        file_name: &str,
        follow: bool,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open(path).await?;
        match repo.previous_commit(path, rev, file_name, follow).await? {
            Some(commit) => writeln!(stdout, "{}", commit)?,
            None => writeln!(stdout, "{}", "none".dimmed())?,
        }
        Ok(())
    }
}
