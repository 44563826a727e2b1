//! Recommend command - read-only diagnosis of a PR

use crate::cli::context::CommandContext;
use crate::cli::print_json;
use crate::cli::style::{self, Stylize};
use anstream::println;
use merge_retry::error::Result;
use merge_retry::types::PrId;

/// Print what the engine would do with `pr` right now
pub async fn run_recommend(ctx: &CommandContext, pr: PrId, json: bool) -> Result<()> {
    let rec = ctx.orchestrator.get_retry_recommendations(pr).await?;
    if json {
        return print_json(&rec);
    }

    println!("{} {}", "Pull request".emphasis(), rec.pr.accent());
    println!("  State:        {}", style::state(rec.current_state));
    if let Some(checks) = rec.check_status {
        let label = if checks.all_green() {
            "passing".success()
        } else if checks.pending {
            "pending".warn()
        } else {
            "failing".error()
        };
        println!("  Checks:       {label}");
    }
    println!("  Recommended:  {}", rec.recommended_action.emphasis());
    println!("  Policy:       {}", rec.policy_summary.muted());
    if !rec.estimated_wait.is_zero() {
        println!(
            "  Worst case:   {}",
            humantime::format_duration(rec.estimated_wait)
        );
    }
    Ok(())
}
