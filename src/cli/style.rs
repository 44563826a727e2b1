//! Terminal styling helpers
//!
//! Colors are stripped automatically by `anstream` when stdout is not a TTY.

use indicatif::ProgressStyle;
use merge_retry::retry::SessionOutcome;
use merge_retry::types::MergeableState;
use owo_colors::OwoColorize;
use std::fmt::Display;

/// Semantic styles used across commands
pub trait Stylize: Display {
    /// Secondary information
    fn muted(&self) -> String {
        format!("{}", self.dimmed())
    }

    /// Headings and key nouns
    fn emphasis(&self) -> String {
        format!("{}", self.bold())
    }

    /// Identifiers (PR numbers, branches)
    fn accent(&self) -> String {
        format!("{}", self.cyan())
    }

    /// Good news
    fn success(&self) -> String {
        format!("{}", self.green())
    }

    /// Needs attention
    fn warn(&self) -> String {
        format!("{}", self.yellow())
    }

    /// Failure
    fn error(&self) -> String {
        format!("{}", self.red())
    }
}

impl<T: Display + ?Sized> Stylize for T {}

/// Green check mark
pub fn check() -> String {
    "✓".success()
}

/// Red cross
pub fn cross() -> String {
    "✗".error()
}

/// Spinner used while a session waits
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
}

/// State name colored by how close it is to mergeable
pub fn state(state: MergeableState) -> String {
    match state {
        MergeableState::Clean => state.success(),
        MergeableState::Unstable | MergeableState::Behind | MergeableState::Blocked => {
            state.warn()
        }
        MergeableState::Dirty => state.error(),
        MergeableState::Unknown => state.muted(),
    }
}

/// Outcome with a leading marker
pub fn outcome(outcome: &SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Merged { .. } => format!("{} {}", check(), outcome.success()),
        SessionOutcome::NeedsHuman { .. } | SessionOutcome::Exhausted { .. } => {
            format!("{} {}", "!".warn(), outcome.warn())
        }
        SessionOutcome::Error { .. } => format!("{} {}", cross(), outcome.error()),
        SessionOutcome::Cancelled => format!("{} {}", "-".muted(), outcome.muted()),
    }
}
