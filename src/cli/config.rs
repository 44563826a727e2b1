//! Config command - show the effective configuration or write a default file

use crate::cli::print_json;
use crate::cli::style::{Stylize, check};
use anstream::println;
use merge_retry::config::{Config, default_config_path, load_config, save_config};
use merge_retry::error::{Error, Result};
use std::path::Path;

/// Print the effective config and strategy table, or write defaults with
/// `init`
pub fn run_config(config_path: Option<&Path>, init: bool, json: bool) -> Result<()> {
    if init {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()
                .ok_or_else(|| Error::Config("no config directory on this system".to_string()))?,
        };
        if path.exists() {
            return Err(Error::Config(format!(
                "{} already exists",
                path.display()
            )));
        }
        save_config(&path, &Config::default())?;
        println!("{} Wrote {}", check(), path.display().accent());
        return Ok(());
    }

    let config = load_config(config_path)?;
    let table = config.strategy_table()?;
    if json {
        let policies: serde_json::Map<String, serde_json::Value> = table
            .iter()
            .map(|(state, policy)| {
                (
                    state.as_str().to_string(),
                    serde_json::to_value(policy).unwrap_or_default(),
                )
            })
            .collect();
        return print_json(&serde_json::json!({ "config": config, "policies": policies }));
    }

    println!("{}", "Settings".emphasis());
    println!("  merge method:    {}", config.engine.merge_method.accent());
    println!(
        "  poll interval:   {}",
        humantime::format_duration(config.monitor.poll_interval)
    );
    println!(
        "  watch window:    {}",
        humantime::format_duration(config.monitor.monitor_duration)
    );
    println!(
        "  batch:           {}, max {} at a time",
        if config.batch.parallel { "parallel" } else { "sequential" },
        config.batch.max_concurrent
    );
    println!();
    println!("{}", "Retry policies".emphasis());
    for (state, policy) in table.iter() {
        println!("  {:<9} {}", state.as_str().accent(), policy.muted());
    }
    Ok(())
}
