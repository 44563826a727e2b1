//! Create command - open a PR and optionally merge it

use crate::cli::context::CommandContext;
use crate::cli::merge::print_session_summary;
use crate::cli::style::{Stylize, check};
use crate::cli::print_json;
use anstream::println;
use merge_retry::error::Result;
use merge_retry::types::PrSpec;
use serde_json::json;

/// Options for the create command
#[derive(Debug, Clone, Default)]
pub struct CreateCommandOptions {
    /// Merge right after creating
    pub merge: bool,
    /// Watch until ready before merging
    pub watch: bool,
    /// Print the result as JSON
    pub json: bool,
}

/// Run the create command; returns false only when a requested merge did
/// not land
pub async fn run_create(
    ctx: &CommandContext,
    spec: &PrSpec,
    options: CreateCommandOptions,
) -> Result<bool> {
    let result = ctx
        .orchestrator
        .create_and_merge(spec, options.merge, options.watch && options.merge)
        .await?;

    if options.json {
        print_json(&json!({ "pull_request": result.pr, "session": result.session }))?;
    } else {
        println!(
            "{} Created {}: {}",
            check(),
            result.pr.id.accent(),
            result.pr.title
        );
        println!("   {}", result.pr.html_url.muted());
        if let Some(session) = &result.session {
            print_session_summary(session);
        }
    }
    Ok(result.session.as_ref().is_none_or(|s| s.is_merged()))
}
