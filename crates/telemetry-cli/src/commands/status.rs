use telemetry_core::SqliteStore;

use super::CliResult;

pub fn run() -> CliResult {
    let store = SqliteStore::open()?;
    let entries: serde_json::Map<String, serde_json::Value> = store
        .entries()?
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
