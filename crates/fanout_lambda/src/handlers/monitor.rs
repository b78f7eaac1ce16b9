use fanout_core::contract::{IteratorPayload, ValidationError};
use fanout_core::error::FanoutError;
use fanout_core::monitor::{poll_run, PollOutcome};
use fanout_core::store::StatusStore;
use serde_json::Value;

/// Reads the iterator payload from a monitor event. State machines pass it
/// either bare or under an `iterator` key.
pub fn decode_iterator_payload(event: Value) -> Result<IteratorPayload, FanoutError> {
    let payload = match event {
        Value::Object(mut object) if object.contains_key("iterator") => object
            .remove("iterator")
            .unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value::<IteratorPayload>(payload).map_err(|error| {
        ValidationError::new(format!("Malformed iterator payload: {error}")).into()
    })
}

pub fn handle_monitor_event(
    event: Value,
    store: &dyn StatusStore,
    update_time: &str,
) -> Result<PollOutcome, FanoutError> {
    let payload = decode_iterator_payload(event)?;
    poll_run(payload, store, update_time)
}
