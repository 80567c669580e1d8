use crate::domain::TestRequest;
use crate::engine::payload::allows_body;
use crate::error::EngineError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::HashMap;

/// The shape a failed run is stored under in the execution state.
pub fn error_value(message: impl Into<String>) -> Value {
    serde_json::json!({ "error": message.into() })
}

pub fn build_headers(input: &HashMap<String, String>) -> Result<HeaderMap, EngineError> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        if key.is_empty() {
            continue;
        }

        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| EngineError::InvalidRequest(format!("invalid header name `{key}`: {err}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|err| {
            EngineError::InvalidRequest(format!("invalid header value for `{key}`: {err}"))
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Replays one generated test case against its own target URL and returns
/// the JSON the endpoint answered with.
///
/// Method and headers are taken verbatim from the record. The serialized
/// `json_body` is attached only when present and the method is not GET/HEAD;
/// for GET/HEAD no body is ever sent, whatever the record carries. The
/// response body is parsed as JSON regardless of status code, matching what
/// a viewer wants to show for a 4xx probe.
pub async fn execute_test_impl(client: &Client, request: &TestRequest) -> Result<Value, EngineError> {
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|err| EngineError::InvalidRequest(format!("invalid HTTP method: {err}")))?;

    let mut headers = build_headers(&request.headers)?;

    let mut builder = client.request(method, &request.url);

    if let Some(ref json_body) = request.json_body {
        if allows_body(&request.method) {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            let body = serde_json::to_string(json_body)
                .map_err(|err| EngineError::InvalidRequest(format!("unserializable body: {err}")))?;
            builder = builder.body(body);
        }
    }

    let response = builder
        .headers(headers)
        .send()
        .await
        .map_err(|err| EngineError::Execution(format!("request failed: {err}")))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|err| EngineError::Execution(format!("failed to read response: {err}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|err| EngineError::Execution(format!("response is not valid JSON: {err}")))
}
