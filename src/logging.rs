use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

/// Timed log scope around one named operation. Emits an `enter` record on
/// creation and one outcome record with `duration_ms`.
pub struct OperationScope {
    cmd: &'static str,
    customer_id: Option<String>,
    start: Instant,
}

impl OperationScope {
    pub fn new(cmd: &'static str, customer_id: Option<String>) -> Self {
        let scope = Self {
            cmd,
            customer_id,
            start: Instant::now(),
        };
        let details = json!({ "stage": "enter" });
        debug!(
            target: "garagedesk",
            cmd = scope.cmd,
            customer_id = scope.customer_id.as_deref(),
            details = %details
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn success(&self, details: Value) {
        let details = wrap_details(details);
        info!(
            target: "garagedesk",
            cmd = self.cmd,
            customer_id = self.customer_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }

    pub fn warn(&self, details: Value) {
        let details = wrap_details(details);
        warn!(
            target: "garagedesk",
            cmd = self.cmd,
            customer_id = self.customer_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }

    /// Validation failures are the caller's problem and log at warn; anything
    /// else logs at error.
    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err.context()) {
            map.insert("context".into(), context);
        }

        let details = Value::Object(map);
        if err.is_caller_error() {
            self.warn(details);
            return;
        }

        error!(
            target: "garagedesk",
            cmd = self.cmd,
            customer_id = self.customer_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
