use thiserror::Error;

/// Failures the engine can surface. Only `MissingExchange` is a blocking,
/// user-facing error; everything network-shaped is converted into session
/// state at the boundary that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation was never executed, so there is no exchange to seed
    /// generation with.
    #[error("no captured request for this operation; execute the API first")]
    MissingExchange,

    /// The generation stream failed before the server signalled completion.
    #[error("test generation failed: {0}")]
    Generation(String),

    /// A generated record carries a method, header, or body that cannot be
    /// turned into a real request.
    #[error("invalid test request: {0}")]
    InvalidRequest(String),

    /// A single test run failed. Stored as that run's response value, never
    /// raised past the session.
    #[error("test execution failed: {0}")]
    Execution(String),
}
