use thiserror::Error;

/// Errors produced by the unlock pipeline.
///
/// Only a subset of these ever reaches the caller: per-asset and
/// per-transaction failures are logged and folded into the run report
/// instead of being propagated.
#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry error {code}: {message}")]
    Registry { code: i64, message: String },

    #[error("registry returned no result and no error")]
    EmptyResponse,

    #[error("asset {asset}: invalid {field} address: {reason}")]
    InvalidAddress {
        asset: String,
        field: &'static str,
        reason: String,
    },

    #[error("asset {0}: unlock instruction alone exceeds the transaction size limit")]
    OversizedInstruction(String),

    #[error("transaction references {0} distinct accounts, more than a message can index")]
    TooManyAccounts(usize),

    #[error("transaction serialization failed: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] solana_rpc_client_api::client_error::Error),

    #[error("transaction {signature} expired: blockhash no longer valid")]
    BlockhashExpired { signature: String },
}
