use crate::domain::{GenerationPayload, TestCaseRecord};
use crate::engine::wire::{FrameDecoder, StreamEvent};
use crate::error::EngineError;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use tokio::sync::broadcast;

/// Header identifying which surface a generation request came from.
pub const SOURCE_HEADER: &str = "x-testforge-source";

/// Path of the streaming endpoint, relative to the configured base URL.
pub const STREAMING_PATH: &str = "/generate/streaming";

/// Where and on whose behalf generation requests are made.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub machine_id: String,
    pub source: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.testforge.dev".to_string(),
            machine_id: "docs-viewer".to_string(),
            source: "docs-viewer".to_string(),
        }
    }
}

/// Lazy, finite sequence of generated test cases. An `Err` item is terminal;
/// the stream yields nothing after it.
pub type TestCaseStream = Pin<Box<dyn Stream<Item = Result<TestCaseRecord, EngineError>> + Send>>;

pub struct GenerationClient {
    client: Client,
    config: GenerationConfig,
}

impl GenerationClient {
    pub fn new(client: Client, config: GenerationConfig) -> Self {
        Self { client, config }
    }

    pub fn machine_id(&self) -> &str {
        &self.config.machine_id
    }

    /// Opens the generation stream for `payload`.
    ///
    /// Resolves once response headers are in hand, so the caller can clear
    /// its "requesting" affordance before the first record arrives. Connect
    /// failures and non-2xx statuses fail here; mid-stream read failures
    /// surface as a terminal `Err` item. Records are yielded in network
    /// arrival order, one per decoded frame, as soon as each is decodable.
    ///
    /// Dropping the stream, or a message on `cancel_rx`, releases the
    /// connection; no decoding continues in the background.
    pub async fn generate(
        &self,
        payload: &GenerationPayload,
        mut cancel_rx: broadcast::Receiver<()>,
    ) -> Result<TestCaseStream, EngineError> {
        let url = format!("{}{STREAMING_PATH}", self.config.base_url.trim_end_matches('/'));

        let request = self
            .client
            .post(&url)
            .header(SOURCE_HEADER, &self.config.source)
            .json(payload);

        let response = tokio::select! {
            result = request.send() => result
                .map_err(|err| EngineError::Generation(format!("request failed: {err}")))?,
            _ = cancel_rx.recv() => {
                return Err(EngineError::Generation("generation cancelled".to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Generation(format!(
                "generation endpoint returned {status}"
            )));
        }

        tracing::debug!(%url, "generation stream open");
        let mut body = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut decoder = FrameDecoder::new();

            'read: loop {
                let chunk = tokio::select! {
                    chunk = body.next() => chunk,
                    _ = cancel_rx.recv() => {
                        tracing::debug!("generation cancelled, dropping stream");
                        break 'read;
                    }
                };

                let events = match chunk {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(err)) => {
                        yield Err(EngineError::Generation(format!("stream read failed: {err}")));
                        break 'read;
                    }
                    None => {
                        // transport closed without the sentinel's delimiter
                        if let Some(StreamEvent::TestCase(record)) = decoder.finish() {
                            yield Ok(record);
                        }
                        break 'read;
                    }
                };

                for event in events {
                    match event {
                        StreamEvent::TestCase(record) => yield Ok(record),
                        StreamEvent::Done => break 'read,
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
