use chrono::{DateTime, Utc};
use serde_json::json;
use telemetry_core::LookupOutcome;

use super::CliResult;

pub fn run(at: Option<DateTime<Utc>>, referral_code: Option<String>) -> CliResult {
    let scheduler = super::open_scheduler(at)?;
    let outcome = super::runtime()?.block_on(scheduler.on_launch(referral_code.as_deref()))?;

    let out = match outcome {
        None => json!({ "lookup": "disabled" }),
        Some(LookupOutcome::AlreadyPerformed) => json!({ "lookup": "already_performed" }),
        Some(LookupOutcome::InFlight) => json!({ "lookup": "in_flight" }),
        Some(LookupOutcome::NoReferral) => json!({ "lookup": "no_referral" }),
        Some(LookupOutcome::Deferred) => json!({ "lookup": "deferred" }),
        Some(LookupOutcome::Extended { offer_page }) => {
            json!({ "lookup": "extended", "offer_page": offer_page })
        }
        Some(LookupOutcome::Tracking { next_check }) => {
            json!({ "lookup": "tracking", "next_check": next_check.to_rfc3339() })
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
