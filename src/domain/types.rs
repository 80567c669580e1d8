use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ─── Generation Input ─────────────────────────────────────────────────────────

/// The most recent live execution of an API operation, as captured by the
/// embedding viewer. One per (path, method) pair; read-only seed for test
/// generation.
///
/// Headers are a flat string map. Whatever container the viewer keeps them in
/// must be flattened before it reaches this type, so the payload serializes
/// deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// `api_info` section of the generation request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInfo {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Set only when the raw body parsed as JSON and the method permits a
    /// request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<Value>,
}

/// Body of the POST to the streaming generation endpoint. Built once per
/// generation request, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPayload {
    pub machine_id: String,
    pub api_info: ApiInfo,
    pub test_suite_name: String,
}

// ─── Generated Tests ──────────────────────────────────────────────────────────

/// One generated test case as decoded off the wire. Uuids are assigned
/// server-side and unique within a generation; records are never mutated
/// after arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    pub uuid: String,
    pub description: String,
    pub request: TestRequest,
}

/// The replayable request carried by a test case. Executed against its own
/// `url`, which is not necessarily the generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<Value>,
}
