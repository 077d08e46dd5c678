#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unable to resolve real symbol: {0}")]
    MissingSymbol(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
