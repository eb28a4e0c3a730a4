use thiserror::Error;

/// Failures raised by a `Store` backend for a single operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Listing failed: {0}")]
    Listing(String),
}

impl StoreError {
    /// Classifies a filesystem error against the store-relative path it concerns.
    pub fn from_io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_string()),
            _ => StoreError::Io {
                path: path.to_string(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Verification failed: {0} consistency violation(s)")]
    Verification(usize),
}
