use thiserror::Error;

#[derive(Debug, Error)]
pub enum SketchError {
    /// Raised for internal errors in the library. Should not happen.
    #[error("internal error: {message:?}")]
    Internal { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid cached artifact at {path}: {message}")]
    CacheInvalid { path: String, message: String },

    #[error(transparent)]
    SequenceParse(#[from] needletail::errors::ParseError),

    #[error(transparent)]
    NifflerError(#[from] niffler::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl SketchError {
    /// Attach a file path to a bare I/O error.
    pub fn io_at<P: AsRef<std::path::Path>>(path: P) -> impl FnOnce(std::io::Error) -> SketchError {
        let path = path.as_ref().display().to_string();
        move |source| SketchError::Io { path, source }
    }

    pub fn config<S: Into<String>>(message: S) -> SketchError {
        SketchError::Config {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> SketchError {
        SketchError::Internal {
            message: message.into(),
        }
    }
}
