use crate::domain::{ApiInfo, CapturedExchange, GenerationPayload};
use crate::error::EngineError;

/// Builds the generation request body from the last captured exchange.
///
/// Pure transformation, no I/O. The only failure is the absence of an
/// exchange; a body that does not parse as JSON is kept raw and generation
/// proceeds best-effort.
pub fn build_generation_payload(
    exchange: Option<&CapturedExchange>,
    suite_name: &str,
    machine_id: &str,
) -> Result<GenerationPayload, EngineError> {
    let exchange = exchange.ok_or(EngineError::MissingExchange)?;

    let json_body = match exchange.body.as_deref() {
        Some(raw) if allows_body(&exchange.method) => match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("captured body is not valid JSON, leaving as-is: {err}");
                None
            }
        },
        _ => None,
    };

    Ok(GenerationPayload {
        machine_id: machine_id.to_string(),
        api_info: ApiInfo {
            method: exchange.method.clone(),
            url: exchange.url.clone(),
            headers: exchange.headers.clone(),
            body: exchange.body.clone(),
            json_body,
        },
        test_suite_name: suite_name.to_string(),
    })
}

/// Whether a method may carry a request body. GET and HEAD never do,
/// regardless of what the exchange or record says.
pub(crate) fn allows_body(method: &str) -> bool {
    !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("HEAD")
}
