//! Batch command - merge several PRs with bounded concurrency

use crate::cli::context::CommandContext;
use crate::cli::style::{self, Stylize, check};
use crate::cli::{CliProgress, cancel_on_ctrl_c, print_json};
use anstream::println;
use dialoguer::Confirm;
use merge_retry::error::{Error, Result};
use merge_retry::orchestrator::{BatchOptions, BatchResults};
use merge_retry::retry::{MergeOptions, NoopProgress, ProgressCallback};
use merge_retry::types::PrId;
use serde_json::json;
use std::sync::Arc;

/// Options for the batch command
#[derive(Debug, Clone, Default)]
pub struct BatchCommandOptions {
    /// Force sequential execution
    pub sequential: bool,
    /// Override `[batch] max_concurrent`
    pub max_concurrent: Option<usize>,
    /// Prompt before starting
    pub confirm: bool,
    /// Print results as JSON
    pub json: bool,
}

/// Run the batch command; returns whether every PR merged
pub async fn run_batch(
    ctx: &CommandContext,
    prs: &[PrId],
    options: BatchCommandOptions,
) -> Result<bool> {
    let defaults = ctx.config.batch_options();
    let batch = BatchOptions {
        parallel: defaults.parallel && !options.sequential,
        max_concurrent: options.max_concurrent.unwrap_or(defaults.max_concurrent).max(1),
    };

    if options.confirm {
        let list: Vec<String> = prs.iter().map(ToString::to_string).collect();
        println!("{} {}", "Will merge:".emphasis(), list.join(", ").accent());
        if !Confirm::new()
            .with_prompt("Proceed with merge?")
            .default(true)
            .interact()
            .map_err(|e| Error::Internal(format!("Failed to read confirmation: {e}")))?
        {
            println!("{}", "Aborted".muted());
            return Ok(false);
        }
    }

    if !options.json {
        let mode = if batch.parallel {
            format!("up to {} at a time", batch.max_concurrent)
        } else {
            "sequentially".to_string()
        };
        println!(
            "{} {} {}",
            "Merging".emphasis(),
            format!("{} PR(s)", prs.len()).accent(),
            mode.muted()
        );
    }

    let progress: Arc<dyn ProgressCallback> = if options.json {
        Arc::new(NoopProgress)
    } else {
        Arc::new(CliProgress::compact())
    };
    let merge = MergeOptions {
        overrides: None,
        cancel: Some(cancel_on_ctrl_c()),
        progress,
    };
    let results = ctx.orchestrator.batch_merge_with(prs, batch, merge).await;

    let all_merged = results
        .values()
        .all(|result| result.as_ref().is_ok_and(|session| session.is_merged()));
    if options.json {
        print_json(&results_json(&results))?;
    } else {
        print_batch_summary(&results);
    }
    Ok(all_merged)
}

/// JSON shape: `{ "145": { session } | { "error": "..." } }`
fn results_json(results: &BatchResults) -> serde_json::Value {
    let map = results
        .iter()
        .map(|(pr, result)| {
            let value = match result {
                Ok(session) => serde_json::to_value(session)
                    .unwrap_or_else(|e| json!({ "error": e.to_string() })),
                Err(e) => json!({ "error": e.to_string() }),
            };
            (pr.number().to_string(), value)
        })
        .collect();
    serde_json::Value::Object(map)
}

fn print_batch_summary(results: &BatchResults) {
    println!();
    let merged = results
        .values()
        .filter(|result| result.as_ref().is_ok_and(|s| s.is_merged()))
        .count();
    for (pr, result) in results {
        match result {
            Ok(session) => {
                if let Some(outcome) = &session.outcome {
                    println!("  {} {}", pr.accent(), style::outcome(outcome));
                }
            }
            Err(e) => println!("  {} {} {}", pr.accent(), style::cross(), e.error()),
        }
    }
    println!();
    if merged == results.len() {
        println!("{} All {} PR(s) merged", check(), merged);
    } else {
        println!(
            "{} {}/{} PR(s) merged",
            "!".warn(),
            merged,
            results.len()
        );
    }
}
