//! testforge — streaming test-generation engine for API documentation viewers.
//!
//! Given the last executed request of an API operation, the engine asks a
//! remote generation service for test cases, decodes them off a streaming
//! response as they arrive, and replays any of them against the live API on
//! demand. The embedding viewer drives a [`Session`] and renders the
//! snapshots it publishes; nothing here renders anything.

pub mod domain;
pub mod engine;
pub mod error;
pub mod session;

pub use domain::{ApiInfo, CapturedExchange, GenerationPayload, TestCaseRecord, TestRequest};
pub use engine::stream::{GenerationClient, GenerationConfig, TestCaseStream};
pub use error::EngineError;
pub use session::{Session, SessionSnapshot};
