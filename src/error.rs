use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown genre `{label}` in file name {path}")]
    UnknownLabel { path: PathBuf, label: String },
    #[error("no spectrogram images found in {0}")]
    EmptySplit(PathBuf),
    #[error("backbone id {0} is not supported")]
    UnsupportedBackbone(i64),
    #[error("record error at {path}: {message}")]
    Record { path: PathBuf, message: String },
    #[error("no checkpoint to evaluate: pass --do-train or --checkpoint")]
    MissingCheckpoint,
    #[error("{split} epoch produced no items")]
    EmptyEpoch { split: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn record(path: impl Into<PathBuf>, error: impl std::fmt::Debug) -> Self {
        Self::Record {
            path: path.into(),
            message: format!("{error:?}"),
        }
    }
}
