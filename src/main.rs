use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use repokit::App;
use repokit::Config;
use repokit::config::parse_timeout;
use repokit::repository::BlameOptions;
use repokit::repository::CheckoutOptions;
use repokit::repository::DiffOptions;
use repokit::repository::LogOptions;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "repokit")]
#[command(about = "Query and update version-controlled working copies through one interface", long_about = None)]
pub struct Cli {
    /// Kill git commands that run longer than this many seconds
    #[arg(long, global = true, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Log every command that is run
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check out a module, or update it if it is already there
    Checkout {
        /// Repository to check out from
        uri: String,
        /// Module to check out ("." for the whole repository)
        #[arg(default_value = ".")]
        module: String,
        /// Directory to check out into
        #[arg(long, default_value = ".")]
        root_dir: PathBuf,
        /// Name of the new working copy directory
        #[arg(long)]
        new_dir: Option<String>,
        /// Branch to switch to afterwards
        #[arg(short, long)]
        branch: Option<String>,
        /// Repository type
        #[arg(long, default_value = "git")]
        kind: String,
    },
    /// Pull the latest changes into a working copy
    Update {
        path: PathBuf,
        /// Branch to switch to before pulling
        #[arg(short, long)]
        rev: Option<String>,
    },
    /// Print a file as of a revision
    Cat {
        path: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
    },
    /// Print the size of a file in bytes
    Size {
        path: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
    },
    /// Print the changes introduced by a revision
    Show {
        path: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
    },
    /// List files recursively
    Ls {
        path: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
    },
    /// Print the history of a path
    Log {
        path: PathBuf,
        /// Revision or range
        #[arg(short, long)]
        rev: Option<String>,
        /// Only show this branch
        #[arg(short, long)]
        branch: Option<String>,
        files: Vec<String>,
    },
    /// Print a diff against one revision, or between two
    Diff {
        path: PathBuf,
        #[arg(short, long, num_args = 1..=2)]
        rev: Vec<String>,
        files: Vec<String>,
    },
    /// Print who last changed each line of a file
    Blame {
        path: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
        /// Detect lines moved or copied from other files
        #[arg(short = 'M', long)]
        detect_moves: bool,
        /// Line range as START,END
        #[arg(short = 'L', long, value_parser = parse_line_range)]
        lines: Option<(u32, u32)>,
    },
    /// Print the most recent revision
    LastRevision { path: PathBuf },
    /// Print the commit before REV that touched FILE
    PreviousCommit {
        path: PathBuf,
        rev: String,
        file: String,
        /// Do not follow renames
        #[arg(long)]
        no_follow: bool,
    },
    /// List local branches
    Branches {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print config values
    Config {
        path: PathBuf,
        key: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Summarise a working copy
    Info {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn parse_line_range(value: &str) -> Result<(u32, u32)> {
    let Some((start, end)) = value.split_once(',') else {
        bail!("Expected START,END but got {:?}", value);
    };
    let start = start.trim().parse().context("Invalid start line")?;
    let end = end.trim().parse().context("Invalid end line")?;
    if start > end {
        bail!("Start line {} is after end line {}", start, end);
    }
    Ok((start, end))
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let timer = tracing_subscriber::fmt::time::ChronoLocal::new("%H:%M:%S%.3f".into());
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;
    tracing_subscriber::fmt()
        .with_timer(timer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = Config::load()?.with_timeout(cli.timeout);
    let app = App::new(config);
    let stdout = &mut std::io::stdout();

    match cli.command {
        Commands::Checkout {
            uri,
            module,
            root_dir,
            new_dir,
            branch,
            kind,
        } => {
            let options = CheckoutOptions { new_dir, branch };
            app.cmd_checkout(&kind, &uri, &module, &root_dir, &options, stdout)
                .await?
        }
        Commands::Update { path, rev } => app.cmd_update(&path, rev.as_deref(), stdout).await?,
        Commands::Cat { path, rev } => app.cmd_cat(&path, rev.as_deref(), stdout).await?,
        Commands::Size { path, rev } => app.cmd_size(&path, rev.as_deref(), stdout).await?,
        Commands::Show { path, rev } => app.cmd_show(&path, rev.as_deref(), stdout).await?,
        Commands::Ls { path, rev } => app.cmd_ls(&path, rev.as_deref(), stdout).await?,
        Commands::Log {
            path,
            rev,
            branch,
            files,
        } => {
            let options = LogOptions {
                rev,
                files: (!files.is_empty()).then_some(files),
                branch,
            };
            app.cmd_log(&path, &options, stdout).await?
        }
        Commands::Diff { path, rev, files } => {
            let options = DiffOptions {
                revs: rev,
                files: (!files.is_empty()).then_some(files),
            };
            app.cmd_diff(&path, &options, stdout).await?
        }
        Commands::Blame {
            path,
            rev,
            detect_moves,
            lines,
        } => {
            let options = BlameOptions {
                rev,
                files: Vec::new(),
                detect_moves,
                lines,
            };
            app.cmd_blame(&path, &options, stdout).await?
        }
        Commands::LastRevision { path } => app.cmd_last_revision(&path, stdout).await?,
        Commands::PreviousCommit {
            path,
            rev,
            file,
            no_follow,
        } => {
            app.cmd_previous_commit(&path, &rev, &file, !no_follow, stdout)
                .await?
        }
        Commands::Branches { path, json } => app.cmd_branches(&path, json, stdout).await?,
        Commands::Config { path, key, json } => {
            app.cmd_config(&path, key.as_deref(), json, stdout).await?
        }
        Commands::Info { path, json } => app.cmd_info(&path, json, stdout).await?,
    }

    Ok(())
}
