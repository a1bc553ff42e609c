use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use futures_util::future::try_join3;
use serde::Serialize;

use crate::App;
use crate::repository::Repository;

#[derive(Debug, Serialize)]
struct Info<'a> {
    uri: &'a str,
    kind: String,
    origin: Option<String>,
    branch: Option<String>,
    last_revision: Option<String>,
}

impl App {
    /// Summarise the working copy containing `path`.
    pub async fn cmd_info(
        &self,
        path: &Path,
        json: bool,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open_git(path).await?;

        // Independent lookups, so run them together
        let (listing, last_revision, origin) = try_join3(
            repo.branches(path),
            repo.last_revision(path),
            repo.origin_url(path),
        )
        .await?;

        let info = Info {
            uri: repo.uri(),
            kind: repo.kind().to_string(),
            origin,
            branch: listing.current_name().map(str::to_string),
            last_revision,
        };

        if json {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&info)?)?;
            return Ok(());
        }

        let none = || "none".dimmed().to_string();
        writeln!(stdout, "URI: {}", info.uri)?;
        writeln!(stdout, "Kind: {}", info.kind)?;
        writeln!(stdout, "Origin: {}", info.origin.unwrap_or_else(none))?;
        writeln!(
            stdout,
            "Branch: {}",
            info.branch.map_or_else(none, |branch| branch.green().to_string())
        )?;
        writeln!(
            stdout,
            "Last revision: {}",
            info.last_revision.unwrap_or_else(none)
        )?;
        Ok(())
    }
}
