use std::path::PathBuf;

use thiserror::Error;

/// What a registry lookup was resolving when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Loss,
    Metric,
    Optimizer,
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKind::Loss => write!(f, "loss"),
            IdentifierKind::Metric => write!(f, "metric"),
            IdentifierKind::Optimizer => write!(f, "optimizer"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Channel index {index} is out of range for a tensor with {channels} channels")]
    InvalidChannelIndex { index: isize, channels: usize },

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unknown {kind} identifier: `{name}`")]
    UnknownIdentifier { kind: IdentifierKind, name: String },

    #[error("Invalid {kind} registration `{key}`: {reason}")]
    InvalidRegistration {
        kind: IdentifierKind,
        key: String,
        reason: String,
    },

    #[error("Model must be compiled before calling `{0}`")]
    NotCompiled(&'static str),

    #[error("Loss became non-finite ({value}) at epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        value: f64,
        epoch: usize,
        batch: usize,
    },

    #[error("No batches were produced by the data source")]
    EmptyDataset,

    #[error("Invalid color map: {0}")]
    InvalidColorMap(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Directory does not exist: {0:?}")]
    DirectoryNotFound(PathBuf),

    #[error("No valid image/mask pairs found in {images:?} and {masks:?}")]
    NoValidPairs { images: PathBuf, masks: PathBuf },

    #[error("Unsupported file extension: `{0}`")]
    UnsupportedExtension(String),

    #[cfg(feature = "dataset")]
    #[error("Failed to process image {path:?}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
