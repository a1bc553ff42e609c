use std::path::Path;

use anyhow::Context;
use anyhow::Result;

use crate::App;

impl App {
    /// Print one config value, or every entry when no key is given.
    pub async fn cmd_config(
        &self,
        path: &Path,
        key: Option<&str>,
        json: bool,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let repo = self.open_git(path).await?;

        if let Some(key) = key {
            let value = repo
                .config_value(path, key)
                .await
                .with_context(|| format!("Config key {} is not set", key))?;
            if json {
                writeln!(stdout, "{}", serde_json::to_string(&value)?)?;
            } else {
                writeln!(stdout, "{}", value)?;
            }
            return Ok(());
        }

        let values = repo.config(path).await?.unwrap_or_default();
        if json {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&values)?)?;
        } else {
            for (key, value) in &values {
                writeln!(stdout, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}
