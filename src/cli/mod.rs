//! CLI commands

pub mod batch;
pub mod config;
pub mod context;
pub mod create;
pub mod merge;
pub mod monitor;
pub mod recommend;
pub mod style;

use crate::cli::style::{Stylize, spinner_style};
use anstream::eprintln;
use async_trait::async_trait;
use indicatif::ProgressBar;
use merge_retry::retry::{
    AttemptAction, AttemptOutcome, AttemptRecord, ProgressCallback, RetrySession,
};
use merge_retry::types::{MergeableState, PrId};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Renders engine progress on stderr
///
/// With a spinner for single-PR commands; plain lines for batches, where
/// several sessions report at once.
pub struct CliProgress {
    spinner: Option<ProgressBar>,
}

impl CliProgress {
    /// One spinner, for a single session
    pub fn spinner() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner: Some(spinner),
        }
    }

    /// Plain lines, for concurrent sessions
    pub const fn compact() -> Self {
        Self { spinner: None }
    }

    fn line(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(message),
            None => eprintln!("{message}"),
        }
    }
}

#[async_trait]
impl ProgressCallback for CliProgress {
    async fn on_attempt(&self, pr: PrId, record: &AttemptRecord) {
        let label = match (&record.action, &record.outcome) {
            (AttemptAction::Wait, _) => return,
            (AttemptAction::Merge, AttemptOutcome::Succeeded) => "merged".success(),
            (AttemptAction::UpdateBranch, AttemptOutcome::Succeeded) => {
                "branch update requested".accent()
            }
            (action, AttemptOutcome::Rejected(reason)) => format!("{action} rejected: {reason}").warn(),
            (action, AttemptOutcome::Failed(reason)) => format!("{action} failed: {reason}").warn(),
            (action, _) => action.to_string(),
        };
        self.line(&format!(
            "  {} attempt {} ({}): {label}",
            pr.accent(),
            record.attempt_number,
            style::state(record.observed_state)
        ));
    }

    async fn on_wait(&self, pr: PrId, state: MergeableState, delay: Duration) {
        let delay = humantime::format_duration(Duration::from_secs(delay.as_secs()));
        let message = format!("{} is {}; re-checking in {delay}", pr.accent(), style::state(state));
        match &self.spinner {
            Some(spinner) => spinner.set_message(message),
            None => eprintln!("  {}", message.muted()),
        }
    }

    async fn on_finished(&self, _session: &RetrySession) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping...".muted());
            trigger.cancel();
        }
    });
    token
}

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: serde::Serialize>(value: &T) -> merge_retry::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| merge_retry::Error::Internal(format!("failed to serialize output: {e}")))?;
    anstream::println!("{json}");
    Ok(())
}

/// Print a session's attempt history
pub fn print_history(session: &RetrySession) {
    for record in &session.attempts {
        let delay = if record.delay.is_zero() {
            String::new()
        } else {
            format!(
                " after {}",
                humantime::format_duration(Duration::from_secs(record.delay.as_secs()))
            )
        };
        anstream::println!(
            "  {:>2}. {:<12} {:<20} {}{}",
            record.attempt_number,
            style::state(record.observed_state),
            record.action.to_string(),
            record.outcome.muted(),
            delay.muted()
        );
    }
}
