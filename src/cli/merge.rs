//! Merge command - merge one PR, retrying until it lands or needs a human

use crate::cli::context::CommandContext;
use crate::cli::style::{self, Stylize};
use crate::cli::{CliProgress, cancel_on_ctrl_c, print_history, print_json};
use anstream::println;
use merge_retry::error::Result;
use merge_retry::orchestrator::MergeExistingOptions;
use merge_retry::retry::{MergeOptions, NoopProgress, ProgressCallback, RetrySession};
use merge_retry::types::PrId;
use std::sync::Arc;
use std::time::Duration;

/// Options for the merge command
#[derive(Debug, Clone, Default)]
pub struct MergeCommandOptions {
    /// Watch the PR until it is ready before merging
    pub watch: bool,
    /// How long to watch (config default when unset)
    pub watch_duration: Option<Duration>,
    /// Print the session as JSON
    pub json: bool,
}

/// Run the merge command; returns whether the PR was merged
pub async fn run_merge(ctx: &CommandContext, pr: PrId, options: MergeCommandOptions) -> Result<bool> {
    if !options.json {
        println!(
            "{} {} in {}",
            "Merging".emphasis(),
            pr.accent(),
            ctx.repo_name().emphasis()
        );
    }

    let progress: Arc<dyn ProgressCallback> = if options.json {
        Arc::new(NoopProgress)
    } else {
        Arc::new(CliProgress::spinner())
    };
    let merge_options = MergeExistingOptions {
        monitor_before_merge: options.watch,
        monitor_duration: options.watch_duration,
        poll_interval: Some(ctx.config.monitor.poll_interval),
        merge: MergeOptions {
            overrides: None,
            cancel: Some(cancel_on_ctrl_c()),
            progress,
        },
    };

    let session = ctx.orchestrator.merge_existing(pr, merge_options).await?;
    if options.json {
        print_json(&session)?;
    } else {
        print_session_summary(&session);
    }
    Ok(session.is_merged())
}

/// Print the outcome and history of a session
pub fn print_session_summary(session: &RetrySession) {
    println!();
    if let Some(outcome) = &session.outcome {
        println!("{} {}", session.pr.accent(), style::outcome(outcome));
    }
    print_history(session);
    println!(
        "   {}",
        format!(
            "{} retries, {} elapsed",
            session.retries,
            humantime::format_duration(Duration::from_secs(session.elapsed.as_secs()))
        )
        .muted()
    );
}
