use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::App;

impl App {
    pub async fn cmd_branches(
        &self,
        path: &Path,
        json: bool,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open_git(path).await?;
        let listing = repo.branches(path).await?;

        if json {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&listing)?)?;
            return Ok(());
        }

        for (index, name) in listing.names.iter().enumerate() {
            if index == listing.current {
                writeln!(stdout, "* {}", name.green().bold())?;
            } else {
                writeln!(stdout, "  {}", name)?;
            }
        }
        Ok(())
    }
}
