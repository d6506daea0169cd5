use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Scaler,
    Classifier,
    Policy,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Scaler => "scaler",
            ArtifactKind::Classifier => "classifier",
            ArtifactKind::Policy => "policy",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that end processing for a single ticker.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No price data returned for {ticker}")]
    DataUnavailable { ticker: String },

    #[error("Unable to extract OHLCV for {ticker}: missing {missing:?}; have {available:?}")]
    Schema {
        ticker: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("Missing required features for {ticker}: {missing:?}")]
    MissingFeature {
        ticker: String,
        missing: Vec<String>,
    },

    #[error("{kind} artifact not found at {}", path.display())]
    ArtifactNotFound { kind: ArtifactKind, path: PathBuf },

    #[error("Not enough rows ({rows}) to form a sequence of length {required}")]
    InsufficientHistory { rows: usize, required: usize },

    #[error("Invalid artifact {}: {reason}", path.display())]
    InvalidArtifact { path: PathBuf, reason: String },
}

impl PipelineError {
    pub fn invalid_artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::InvalidArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
