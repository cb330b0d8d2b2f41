use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use telemetry_core::{PingReport, RetryOutcome};

use super::CliResult;

pub fn run(at: Option<DateTime<Utc>>) -> CliResult {
    let scheduler = super::open_scheduler(at)?;
    let report = super::runtime()?.block_on(scheduler.on_tick());

    let out = json!({
        "ping": ping_json(&report.ping),
        "retry": report.retry.as_ref().map(retry_json),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn ping_json(ping: &PingReport) -> Value {
    match ping {
        PingReport::NotDue => json!({ "status": "not_due" }),
        PingReport::Sent { url } => json!({ "status": "sent", "url": url.as_str() }),
        PingReport::Failed { url, error } => json!({
            "status": "failed",
            "url": url.as_str(),
            "error": error.to_string(),
        }),
        PingReport::Skipped { reason } => json!({ "status": "skipped", "reason": reason }),
    }
}

fn retry_json(retry: &RetryOutcome) -> Value {
    match retry {
        RetryOutcome::NotTracking => json!({ "status": "not_tracking" }),
        RetryOutcome::NotDue => json!({ "status": "not_due" }),
        RetryOutcome::Offline => json!({ "status": "offline" }),
        RetryOutcome::InFlight => json!({ "status": "in_flight" }),
        RetryOutcome::Rescheduled {
            retries_remaining,
            next_check_epoch_secs,
        } => json!({
            "status": "rescheduled",
            "retries_remaining": retries_remaining,
            "next_check_epoch_secs": next_check_epoch_secs,
        }),
        RetryOutcome::Finished(reason) => json!({
            "status": "finished",
            "reason": format!("{reason:?}"),
        }),
        RetryOutcome::Skipped { reason } => json!({ "status": "skipped", "reason": reason }),
    }
}
