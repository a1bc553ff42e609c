use std::time::Duration;

use anyhow::Context;
use anyhow::Result;

/// Tracking ref used by blame and ls when an origin remote exists.
pub const DEFAULT_TRACKING_REF: &str = "origin/HEAD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Git binary to run.
    pub git_program: String,
    /// Kill external commands that run longer than this.
    pub timeout: Option<Duration>,
    pub tracking_ref: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
            timeout: None,
            tracking_ref: DEFAULT_TRACKING_REF.to_string(),
        }
    }
}

impl Config {
    /// Load config from the environment and git config (`repokit.*` keys).
    ///
    /// Missing keys keep their defaults.
    pub fn load() -> Result<Self> {
        let git_program = std::env::var("REPOKIT_GIT").unwrap_or_else(|_| "git".to_string());

        let timeout = read_git_config(&git_program, "repokit.timeout")?
            .map(|value| parse_timeout(&value))
            .transpose()?;

        let tracking_ref = read_git_config(&git_program, "repokit.trackingRef")?
            .unwrap_or_else(|| DEFAULT_TRACKING_REF.to_string());

        Ok(Self {
            git_program,
            timeout,
            tracking_ref,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.timeout = timeout;
        }
        self
    }
}

fn read_git_config(git_program: &str, key: &str) -> Result<Option<String>> {
    let output = std::process::Command::new(git_program)
        .args(["config", "--get", key])
        .output()
        .with_context(|| format!("Failed to execute {} config", git_program))?;

    // Exit status 1 means the key is unset
    if !output.status.success() {
        return Ok(None);
    }

    let value = String::from_utf8(output.stdout)?.trim().to_string();
    Ok((!value.is_empty()).then_some(value))
}

/// Parse a timeout given in whole seconds.
pub fn parse_timeout(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid timeout {:?}: expected a number of seconds", value))?;
    Ok(Duration::from_secs(secs))
}
