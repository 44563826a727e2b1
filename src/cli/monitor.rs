//! Monitor command - print state transitions until interrupted

use crate::cli::cancel_on_ctrl_c;
use crate::cli::context::CommandContext;
use crate::cli::style::{self, Stylize};
use anstream::println;
use merge_retry::error::Result;
use merge_retry::monitor::{EventKind, EventRegistry, MonitorEvent};
use merge_retry::retry::{RetrySession, SessionOutcome};
use merge_retry::types::PrId;
use serde_json::json;
use std::time::Duration;

/// Options for the monitor command
#[derive(Debug, Clone, Default)]
pub struct MonitorCommandOptions {
    /// Start a merge session when a PR turns CLEAN
    pub auto_merge: bool,
    /// Override `[monitor] poll_interval`
    pub poll_interval: Option<Duration>,
    /// Print events as JSON lines
    pub json: bool,
}

/// Run the monitor command until Ctrl-C or every subscription ends, then
/// report auto-merges still in flight
pub async fn run_monitor(
    ctx: &CommandContext,
    prs: &[PrId],
    options: MonitorCommandOptions,
) -> Result<()> {
    let interval = options.poll_interval.unwrap_or(ctx.config.monitor.poll_interval);
    if !options.json {
        println!(
            "{} {} PR(s) in {} every {}{}",
            "Watching".emphasis(),
            prs.len(),
            ctx.repo_name().emphasis(),
            humantime::format_duration(interval),
            if options.auto_merge {
                ", merging when ready".muted()
            } else {
                String::new()
            }
        );
    }

    let mut printer = EventRegistry::new();
    for kind in EventKind::ALL {
        let json = options.json;
        printer.register_fn(kind, move |event| async move {
            print_event(&event, json);
            Ok(())
        });
    }
    let mut set =
        ctx.orchestrator
            .monitor_multiple_with(prs, options.auto_merge, Some(interval), &printer);
    let handles = set.handles.clone();

    let cancel = cancel_on_ctrl_c();
    // Ctrl-C also ends merge sessions, including while waiting for them below
    let cancel_sessions = {
        let orchestrator = ctx.orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            orchestrator.engine().cancel_all();
        })
    };
    let all_stopped = futures::future::join_all(handles.values().map(|h| h.stopped()));
    tokio::pin!(all_stopped);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = &mut all_stopped => break,
            Some((pr, outcome)) = set.next_merge() => print_merge(pr, &outcome, options.json),
        }
    }

    if set.merges_pending() > 0 && !options.json {
        println!("{}", "Waiting for merges in progress".muted());
    }
    for (pr, outcome) in set.shutdown().await {
        print_merge(pr, &outcome, options.json);
    }
    cancel_sessions.abort();
    for (pr, handle) in &handles {
        if let Some(error) = handle.last_error()
            && !options.json
        {
            println!("  {} stopped: {}", pr.accent(), error.error());
        }
    }
    Ok(())
}

fn print_merge(pr: PrId, outcome: &Result<RetrySession>, json: bool) {
    if json {
        let line = match outcome {
            Ok(session) => json!({
                "event": "merge_finished",
                "pr": pr,
                "outcome": session.outcome.as_ref().map(SessionOutcome::label),
                "retries": session.retries,
            }),
            Err(e) => json!({ "event": "merge_not_started", "pr": pr, "error": e.to_string() }),
        };
        println!("{line}");
        return;
    }
    match outcome {
        Ok(session) => {
            if let Some(outcome) = &session.outcome {
                println!("  {} {}", pr.accent(), style::outcome(outcome));
            }
        }
        Err(e) => println!("  {} {}", pr.accent(), format!("merge not started: {e}").muted()),
    }
}

fn print_event(event: &MonitorEvent, json: bool) {
    if json {
        let line = match event {
            MonitorEvent::StateChange { pr, old, new } => {
                json!({ "event": "state_change", "pr": pr, "old": old, "new": new })
            }
            other => json!({ "event": other.kind().as_str(), "pr": other.pr() }),
        };
        println!("{line}");
        return;
    }
    match event {
        MonitorEvent::StateChange { pr, old, new } => {
            let old = old.map_or_else(|| "-".muted(), style::state);
            println!("  {} {} -> {}", pr.accent(), old, style::state(*new));
        }
        MonitorEvent::MergeReady { pr } => {
            println!("  {} {}", pr.accent(), "ready to merge".success());
        }
        MonitorEvent::ConflictDetected { pr } => {
            println!("  {} {}", pr.accent(), "conflict detected".error());
        }
        MonitorEvent::ChecksPassed { pr } => {
            println!("  {} {}", pr.accent(), "checks passed".success());
        }
    }
}
