#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store reported stale state, lease must be reacquired")]
    StaleState,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("encoding error: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, Error>;
