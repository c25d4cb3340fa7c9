use thiserror::Error;

/// Application errors for the price-estimation pipeline.
///
/// `Rpc` is retried with exponential backoff before it ever reaches a
/// caller (see [`crate::rpc::RpcClient`]); by the time one surfaces here the
/// retry budget has been exhausted.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid estimation request: {0}")]
    Validation(String),

    #[error("bitcoin RPC error: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),

    #[error("internal invariant violated: {0}")]
    Logic(String),

    #[error("RPC task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, OracleError>;
