//! Last-known engine status: merged fields, error surface, CPU history ring.
//!
//! The cache persists across reconnects so read-only status queries keep
//! returning the last-known view while the link is down.

use std::collections::VecDeque;

use serde_json::{Map, Value, json};

/// Number of CPU samples kept. The ring starts zero-filled so the series is
/// always exactly this long.
pub const CPU_HISTORY_LEN: usize = 200;

/// Cached view of one engine's state, folded together from every status and
/// command response the engine sends.
#[derive(Debug)]
pub struct StatusCache {
    /// Merged status fields, last write wins.
    fields: Map<String, Value>,
    /// Most recent application error; JSON null once cleared by an ok reply.
    error: Option<Value>,
    errordetail: Option<Value>,
    /// Rolling CPU samples, oldest first, shift-and-append.
    cpu_history: VecDeque<f64>,
    connected: bool,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            fields: Map::new(),
            error: None,
            errordetail: None,
            cpu_history: std::iter::repeat(0.0).take(CPU_HISTORY_LEN).collect(),
            connected: false,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Fold one decoded engine message into the cache.
    ///
    /// A non-ok result captures `error`/`errordetail` and touches nothing
    /// else. An ok result echoing a query clears the error surface, records
    /// a CPU sample for status polls, and merges the reported status fields.
    pub fn apply_message(&mut self, msg: &Value) {
        // Any complete message proves the link is alive.
        self.connected = true;

        let Some(response) = msg.get("response") else {
            return;
        };

        match response.get("result").and_then(Value::as_str) {
            Some(result) if result != "ok" => {
                self.error = Some(response.get("error").cloned().unwrap_or(Value::Null));
                self.errordetail = Some(
                    response
                        .get("errordetail")
                        .cloned()
                        .unwrap_or(Value::Null),
                );
            }
            Some(_) if msg.get("query").is_some() => {
                self.error = Some(Value::Null);
                self.errordetail = Some(Value::Null);

                let query = msg["query"].get("query").and_then(Value::as_str);
                if matches!(query, Some("fullstatus") | Some("dynamicstatus")) {
                    if let Some(cpu) = response
                        .get("status")
                        .and_then(|s| s.get("cpu"))
                        .and_then(Value::as_f64)
                    {
                        self.push_cpu_sample(cpu);
                    }
                    // Published before the merge so an engine-reported field
                    // of the same name wins, as it always has.
                    self.fields.insert(
                        "cpuhistory".to_string(),
                        json!(self.cpu_history.iter().copied().collect::<Vec<_>>()),
                    );
                }

                if let Some(Value::Object(status)) = response.get("status") {
                    for (key, value) in status {
                        self.fields.insert(key.clone(), value.clone());
                    }
                }
            }
            _ => {}
        }
    }

    /// Append one sample, evicting the oldest. Samples keep two decimals.
    pub fn push_cpu_sample(&mut self, sample: f64) {
        self.cpu_history.pop_front();
        self.cpu_history.push_back((sample * 100.0).round() / 100.0);
    }

    /// Owned snapshot of the whole cache as one JSON object.
    pub fn snapshot(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert("connected".to_string(), Value::Bool(self.connected));
        if let Some(error) = &self.error {
            out.insert("error".to_string(), error.clone());
        }
        if let Some(detail) = &self.errordetail {
            out.insert("errordetail".to_string(), detail.clone());
        }
        Value::Object(out)
    }
}
