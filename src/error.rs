use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Page structure did not match. Callers treat this as "zero records".
    #[error("unexpected page structure at {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("invalid settings: {0}")]
    Config(String),
}

impl Error {
    pub fn fetch(url: impl Into<String>, source: FetchError) -> Self {
        Error::Fetch {
            url: url.into(),
            source,
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("transport: {0}")]
    Transport(String),

    /// The renderer answered but returned no usable page.
    #[error("navigation: {0}")]
    Navigation(String),
}

impl FetchError {
    /// `deadline` is the timeout the reqwest client was built with.
    pub fn from_reqwest(e: reqwest::Error, deadline: Duration) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None if e.is_timeout() => FetchError::Timeout(deadline),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
