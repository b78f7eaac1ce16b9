use fanout_core::contract::{IteratorPayload, LaunchRequest, ValidationError};
use fanout_core::error::FanoutError;
use fanout_core::launcher::{launch_run, LaunchOptions, TaskSubmitter};
use fanout_core::store::StatusStore;
use serde_json::{json, Value};

/// Accepts the request either as the event itself or wrapped in an API
/// Gateway style `body` (object or JSON string).
pub fn decode_launch_request(event: Value) -> Result<LaunchRequest, FanoutError> {
    let payload = unwrap_body(event).map_err(ValidationError::new)?;
    serde_json::from_value::<LaunchRequest>(payload)
        .map_err(|error| ValidationError::new(format!("Malformed launch request: {error}")).into())
}

pub fn handle_launch_event(
    event: Value,
    submitter: &dyn TaskSubmitter,
    store: &dyn StatusStore,
    options: &LaunchOptions,
) -> Result<IteratorPayload, FanoutError> {
    let request = decode_launch_request(event)?;
    launch_run(request, submitter, store, options)
}

fn unwrap_body(event: Value) -> Result<Value, String> {
    let Some(object) = event.as_object() else {
        return Err("Launch payload must be a JSON object".to_string());
    };

    let Some(body) = object.get("body") else {
        return Ok(event);
    };

    match body {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(body.clone()),
        Value::String(text) => {
            serde_json::from_str(text).map_err(|error| format!("Malformed JSON body: {error}"))
        }
        _ => Err("Request body must be a JSON object".to_string()),
    }
}
