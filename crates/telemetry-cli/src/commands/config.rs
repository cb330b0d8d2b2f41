use clap::Subcommand;
use serde_json::json;
use telemetry_core::{TelemetryConfig, TimingConfig};

use super::CliResult;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "channel", "referral.host", "timing.max_retries")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List config values with the resolved referral timing
    List,
    /// Reset config to defaults
    Reset,
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let config = TelemetryConfig::load()?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("unknown key: {key}");
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = TelemetryConfig::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = TelemetryConfig::load()?;
            let out = json!({
                "config": config,
                "effective_timing": timing_json(&config.timing()),
                "referral_enabled": config.referral.validate().is_ok(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        ConfigAction::Reset => {
            let config = TelemetryConfig::default();
            config.save()?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}

fn timing_json(timing: &TimingConfig) -> serde_json::Value {
    json!({
        "first_check_delay_secs": timing.first_check_delay.num_seconds(),
        "retry_interval_secs": timing.retry_interval.num_seconds(),
        "code_expiry_secs": timing.code_expiry.num_seconds(),
        "max_retries": timing.max_retries,
    })
}
