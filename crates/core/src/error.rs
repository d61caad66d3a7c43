use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file part")]
    MissingFilePart,

    #[error("No selected file")]
    EmptyFileName,

    #[error("Unsupported file type")]
    UnsupportedFileType,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid analysis endpoint: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {status}")]
    BackendResponse { backend: String, status: u16 },

    #[error("analysis response carried no operation location")]
    MissingOperationLocation,

    #[error("document analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("document analysis did not finish within {0:?}")]
    Timeout(Duration),

    #[error("unrecognized analysis result: {0}")]
    UnrecognizedResult(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {status}")]
    BackendResponse { backend: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("embedding dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {status}")]
    BackendResponse { backend: String, status: u16 },

    #[error("model returned no content: {0}")]
    EmptyResponse(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("vector store failure: {0}")]
    Store(#[from] StoreError),

    #[error("model provider failure: {0}")]
    Model(#[from] ModelError),

    #[error("ambiguous answer from language model: {0}")]
    AmbiguousAnswer(String),
}

impl PipelineError {
    /// Stable code reported to HTTP clients next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction_failed",
            Self::Store(StoreError::Unavailable(_)) => "store_unavailable",
            Self::Store(_) => "store_failed",
            Self::Model(_) => "model_failed",
            Self::AmbiguousAnswer(_) => "ambiguous_answer",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Extraction(ExtractionError::Http(error))
            | Self::Store(StoreError::Http(error))
            | Self::Model(ModelError::Http(error)) => transient_http(error),
            Self::Extraction(ExtractionError::BackendResponse { status, .. })
            | Self::Store(StoreError::BackendResponse { status, .. })
            | Self::Model(ModelError::BackendResponse { status, .. }) => transient_status(*status),
            Self::Extraction(ExtractionError::Timeout(_)) => true,
            Self::Store(StoreError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

fn transient_http(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    error
        .status()
        .map(|status| transient_status(status.as_u16()))
        .unwrap_or(false)
}

fn transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
