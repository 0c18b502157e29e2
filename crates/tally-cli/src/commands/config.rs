//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use tally_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:        {}", config.data_dir.display());
            println!("  sync_url:        {}", or_unset(config.sync_url.as_deref()));
            println!("  sync_enabled:    {}", config.sync_enabled);
            println!("  log_level:       {}", config.log_level);
            println!(
                "  log_file:        {}",
                or_unset(
                    config
                        .log_file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .as_deref()
                )
            );
            println!(
                "  quota_bytes:     {}",
                or_unset(config.quota_bytes.map(|q| q.to_string()).as_deref())
            );
            println!("  prewarm_views:   {}", config.prewarm_views.join(", "));
            println!();
            println!("Health:");
            println!("  probe_interval_secs:         {}", config.health.probe_interval_secs);
            println!(
                "  unhealthy_failure_threshold: {}",
                config.health.unhealthy_failure_threshold
            );
            println!(
                "  quota_warning_percent:       {}",
                config.health.quota_warning_percent
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let path = Config::config_file_path();
    let mut config = Config::load_from_path(&path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    config
        .save_to_path(&path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Set one key on a config
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = PathBuf::from(value),
        "sync_url" => config.sync_url = optional(value).map(String::from),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "log_level" => config.log_level = value.to_string(),
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        "quota_bytes" => {
            config.quota_bytes = optional(value)
                .map(str::parse::<u64>)
                .transpose()
                .context("Invalid value for quota_bytes. Use a number of bytes.")?;
        }
        "prewarm_views" => {
            config.prewarm_views = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "probe_interval_secs" => {
            config.health.probe_interval_secs = value
                .parse()
                .context("Invalid value for probe_interval_secs")?;
        }
        "unhealthy_failure_threshold" => {
            config.health.unhealthy_failure_threshold = value
                .parse()
                .context("Invalid value for unhealthy_failure_threshold")?;
        }
        "quota_warning_percent" => {
            config.health.quota_warning_percent = value
                .parse()
                .context("Invalid value for quota_warning_percent")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, sync_url, sync_enabled, log_level, log_file, \
                 quota_bytes, prewarm_views, probe_interval_secs, \
                 unhealthy_failure_threshold, quota_warning_percent",
                key
            );
        }
    }
    Ok(())
}

/// Empty or "none" clears an optional value
fn optional(value: &str) -> Option<&str> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value)
    }
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}
