//! mrt - merge pull requests with state-aware retries

mod cli;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use cli::context::{CommandContext, RepoTarget};
use merge_retry::types::{Platform, PrId, PrSpec};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mrt")]
#[command(about = "Merge pull requests with state-aware retries")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    repo: RepoArgs,

    /// Config file (default: ~/.config/merge-retry/config.toml)
    #[arg(long, global = true, env = "MRT_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// More logging on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RepoArgs {
    /// Repository as owner/repo (GitLab: group/sub/project)
    #[arg(long, global = true, env = "MRT_REPO")]
    repo: Option<String>,

    /// Git remote URL to detect the repository from
    #[arg(long, global = true, conflicts_with = "repo")]
    remote_url: Option<String>,

    /// Platform for --repo
    #[arg(long, global = true, value_enum)]
    platform: Option<PlatformArg>,

    /// Self-hosted GitHub Enterprise / GitLab host
    #[arg(long, global = true)]
    host: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Github,
    Gitlab,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Github => Self::GitHub,
            PlatformArg::Gitlab => Self::GitLab,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge one PR, retrying until it lands or needs a human
    Merge {
        /// PR number, #number, !number, or URL
        pr: PrId,

        /// Watch the PR until it is ready before merging
        #[arg(long)]
        watch: bool,

        /// How long to watch (e.g. 10m)
        #[arg(long, value_parser = humantime::parse_duration, requires = "watch")]
        watch_for: Option<Duration>,
    },

    /// Merge several PRs with bounded concurrency
    Batch {
        /// PR numbers, #numbers, !numbers, or URLs
        #[arg(required = true)]
        prs: Vec<PrId>,

        /// Merge one at a time
        #[arg(long)]
        sequential: bool,

        /// Concurrent sessions
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Prompt before starting
        #[arg(long)]
        confirm: bool,
    },

    /// Watch PRs and print state transitions until Ctrl-C
    Monitor {
        /// PR numbers, #numbers, !numbers, or URLs
        #[arg(required = true)]
        prs: Vec<PrId>,

        /// Merge each PR as soon as it is ready
        #[arg(long)]
        auto_merge: bool,

        /// Time between polls (e.g. 30s)
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },

    /// Show what the retry engine would do with a PR, without touching it
    Recommend {
        /// PR number, #number, !number, or URL
        pr: PrId,
    },

    /// Create a PR, optionally merging it right away
    Create {
        /// Source branch
        #[arg(long)]
        head: String,

        /// Target branch
        #[arg(long, default_value = "main")]
        base: String,

        /// Title
        #[arg(long)]
        title: String,

        /// Description
        #[arg(long)]
        body: Option<String>,

        /// Open as draft
        #[arg(long)]
        draft: bool,

        /// Merge after creating
        #[arg(long)]
        merge: bool,

        /// Watch until ready before merging
        #[arg(long, requires = "merge")]
        watch: bool,
    },

    /// Show the effective configuration and retry policies
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{level},merge_retry={level}"))
    });
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let target = RepoTarget {
        repo: cli.repo.repo,
        remote_url: cli.repo.remote_url,
        platform: cli.repo.platform.map(Platform::from),
        host: cli.repo.host,
    };
    let config_path = cli.config.as_deref();
    let json = cli.json;

    let success = match cli.command {
        Commands::Config { init } => {
            cli::config::run_config(config_path, init, json)?;
            true
        }
        Commands::Merge {
            pr,
            watch,
            watch_for,
        } => {
            let ctx = CommandContext::new(&target, config_path)?;
            cli::merge::run_merge(
                &ctx,
                pr,
                cli::merge::MergeCommandOptions {
                    watch,
                    watch_duration: watch_for,
                    json,
                },
            )
            .await?
        }
        Commands::Batch {
            prs,
            sequential,
            max_concurrent,
            confirm,
        } => {
            let ctx = CommandContext::new(&target, config_path)?;
            cli::batch::run_batch(
                &ctx,
                &prs,
                cli::batch::BatchCommandOptions {
                    sequential,
                    max_concurrent,
                    confirm,
                    json,
                },
            )
            .await?
        }
        Commands::Monitor {
            prs,
            auto_merge,
            interval,
        } => {
            let ctx = CommandContext::new(&target, config_path)?;
            cli::monitor::run_monitor(
                &ctx,
                &prs,
                cli::monitor::MonitorCommandOptions {
                    auto_merge,
                    poll_interval: interval,
                    json,
                },
            )
            .await?;
            true
        }
        Commands::Recommend { pr } => {
            let ctx = CommandContext::new(&target, config_path)?;
            cli::recommend::run_recommend(&ctx, pr, json).await?;
            true
        }
        Commands::Create {
            head,
            base,
            title,
            body,
            draft,
            merge,
            watch,
        } => {
            let ctx = CommandContext::new(&target, config_path)?;
            let spec = PrSpec {
                head,
                base,
                title,
                body,
                draft,
            };
            cli::create::run_create(
                &ctx,
                &spec,
                cli::create::CreateCommandOptions { merge, watch, json },
            )
            .await?
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
