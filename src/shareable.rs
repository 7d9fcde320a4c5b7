//! C1 — Shareable & Context. The only thing that crosses the server/client
//! boundary for task and aux traffic: an ordered header map plus a typed
//! payload. Grounded in the teacher's `Envelope`/`Payload` pair
//! (`component_communication/protocol.rs`), generalized from a fixed TCP
//! envelope into the header-carrying, payload-agnostic container spec.md
//! describes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::return_code::ReturnCode;

/// Reserved header names (spec.md §3).
pub mod headers {
    pub const TASK_ID: &str = "task_id";
    pub const TASK_NAME: &str = "task_name";
    pub const CURRENT_ROUND: &str = "current_round";
    pub const RETURN_CODE: &str = "return_code";
    pub const AUDIT_EVENT_ID: &str = "audit_event_id";
    pub const COOKIE_JAR: &str = "cookie_jar";
}

/// An insertion-ordered header map. Small (a handful of entries per
/// message) so a linear-scan `Vec` beats pulling in an extra map crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Headers(Vec<(String, Value)>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }
}

/// Ordered header map + typed payload. The payload is an opaque JSON value
/// from this crate's point of view: the controller/executor never
/// interprets it, only routes and filters it (spec.md §3, §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Shareable {
    headers: Headers,
    payload: Value,
}

impl Shareable {
    pub fn new(payload: Value) -> Self {
        Shareable { headers: Headers::new(), payload }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.headers.set(key, value);
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn task_id(&self) -> Option<&str> {
        self.header(headers::TASK_ID).and_then(Value::as_str)
    }

    pub fn set_task_id(&mut self, task_id: &str) {
        self.set_header(headers::TASK_ID, task_id);
    }

    pub fn return_code(&self) -> ReturnCode {
        match self.header(headers::RETURN_CODE).and_then(Value::as_str) {
            Some(s) => serde_json::from_value(Value::String(s.to_string())).unwrap_or(ReturnCode::Ok),
            None => ReturnCode::Ok,
        }
    }

    pub fn set_return_code(&mut self, rc: ReturnCode) {
        let v = serde_json::to_value(rc).expect("ReturnCode always serializes");
        self.set_header(headers::RETURN_CODE, v);
    }

    pub fn cookie_jar(&self) -> Option<&Value> {
        self.header(headers::COOKIE_JAR)
    }

    pub fn set_cookie_jar(&mut self, jar: Value) {
        self.set_header(headers::COOKIE_JAR, jar);
    }

    /// Builds an error reply carrying only a return code — used throughout
    /// the executor loop whenever a suspension point aborts a reply early.
    pub fn error_reply(rc: ReturnCode) -> Self {
        let mut s = Shareable::new(Value::Null);
        s.set_return_code(rc);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_preserve_insertion_order() {
        let mut h = Headers::new();
        h.set("b", 1);
        h.set("a", 2);
        let keys: Vec<_> = h.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn set_overwrites_in_place_without_reordering() {
        let mut h = Headers::new();
        h.set("a", 1);
        h.set("b", 2);
        h.set("a", 3);
        let keys: Vec<_> = h.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(h.get("a"), Some(&Value::from(3)));
    }

    #[test]
    fn return_code_round_trips_through_header() {
        let mut s = Shareable::new(Value::Null);
        s.set_return_code(ReturnCode::TaskAborted);
        assert_eq!(s.return_code(), ReturnCode::TaskAborted);
    }

    #[test]
    fn default_return_code_is_ok() {
        let s = Shareable::new(Value::Null);
        assert_eq!(s.return_code(), ReturnCode::Ok);
    }
}
