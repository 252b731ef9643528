//! Error taxonomy for the rotation controller
//!
//! Configuration errors and endpoint exhaustion are fatal. Everything the
//! controller expects to happen during a normal cycle (holds, skips,
//! rejected moves) is modelled as a value, not an error.

use std::time::Duration;

/// Invalid or missing settings; never retried
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("invalid address for {key}: {value}")]
    InvalidAddress { key: String, value: String },

    #[error("unknown venue type '{kind}' for pool {pool_id}")]
    UnknownVenueType { pool_id: String, kind: String },

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Failure talking to a single RPC endpoint
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("chain id {actual} not in allow-list {allowed:?}")]
    ChainMismatch { actual: u64, allowed: Vec<u64> },

    #[error("stale block: age {age_secs}s > {max_secs}s")]
    StaleBlock { age_secs: i64, max_secs: i64 },

    #[error("rpc error {code}: {message}")]
    Response { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Short tag used in failover reasons
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Transport(_) => "transport",
            RpcError::Timeout(_) => "timeout",
            RpcError::ChainMismatch { .. } => "chain_mismatch",
            RpcError::StaleBlock { .. } => "stale_block",
            RpcError::Response { .. } => "rpc_response",
            RpcError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Failure of the resilience layer as a whole
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("RPC_FAILOVER_EXHAUSTED: {}", format_attempts(.attempts))]
    FailoverExhausted { attempts: Vec<(String, String)> },

    #[error("rpc call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RpcError },

    #[error("rpc call rejected without retry: {0}")]
    NonRetryable(RpcError),

    #[error("no rpc endpoints configured")]
    NoEndpoints,
}

fn format_attempts(attempts: &[(String, String)]) -> String {
    attempts
        .iter()
        .map(|(url, reason)| format!("{}: {}", url, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Kill switch refused the cycle
#[derive(Debug, thiserror::Error)]
pub enum KillSwitchError {
    #[error(
        "kill switch triggered after {consecutive_errors} consecutive errors \
         (last error: {last_error}, {age_secs}s ago). Manual reset required"
    )]
    Tripped {
        consecutive_errors: u32,
        last_error: String,
        age_secs: i64,
    },
}

/// Run lock could not be taken
#[derive(Debug, thiserror::Error)]
pub enum RunLockError {
    #[error("another controller cycle is in progress (lock age: {age_secs}s)")]
    Busy { age_secs: i64 },

    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted record could not be read or written
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level failure of a controller cycle
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    KillSwitch(#[from] KillSwitchError),

    #[error(transparent)]
    RunLock(#[from] RunLockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControllerError {
    /// Fatal errors stop the process with a non-zero exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControllerError::Config(_) | ControllerError::Network(_) | ControllerError::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
