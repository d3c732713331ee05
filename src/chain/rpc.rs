use serde::Deserialize;
use std::fmt;
use std::future::IntoFuture;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Closed classification of a failed JSON-RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// The node could not be reached or the connection broke.
    Transport,
    /// The call did not finish within the configured timeout.
    Timeout,
    /// The node answered with a JSON-RPC error object.
    Provider(i64),
    /// The node answered with something that is not the expected shape.
    Malformed,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcErrorKind::Transport => write!(f, "transport"),
            RpcErrorKind::Timeout => write!(f, "timeout"),
            RpcErrorKind::Provider(code) => write!(f, "provider error {}", code),
            RpcErrorKind::Malformed => write!(f, "malformed response"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: RpcErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: RpcErrorKind::Timeout,
            message: format!("no response after {}s", after.as_secs()),
        }
    }

    pub fn provider(code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: RpcErrorKind::Provider(code),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: RpcErrorKind::Malformed,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self {
                kind: RpcErrorKind::Timeout,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::malformed(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

/// Maps an alloy client failure onto the crate's error kinds.
pub fn from_alloy<E>(err: alloy_json_rpc::RpcError<E>) -> RpcError
where
    E: fmt::Display + fmt::Debug,
{
    match err {
        alloy_json_rpc::RpcError::ErrorResp(payload) => {
            RpcError::provider(payload.code, payload.message.to_string())
        }
        alloy_json_rpc::RpcError::Transport(kind) => RpcError::transport(kind.to_string()),
        alloy_json_rpc::RpcError::DeserError { err, .. } => RpcError::malformed(err.to_string()),
        other => RpcError::malformed(format!("{:?}", other)),
    }
}

/// Awaits an alloy call for at most `limit`.
pub async fn with_timeout<F, T, E>(limit: Duration, call: F) -> Result<T, RpcError>
where
    F: IntoFuture<Output = Result<T, alloy_json_rpc::RpcError<E>>>,
    E: fmt::Display + fmt::Debug,
{
    timeout(limit, call)
        .await
        .map_err(|_| RpcError::timeout(limit))?
        .map_err(from_alloy)
}

/// JSON-RPC 2.0 response envelope, for clients that speak the protocol
/// over plain `reqwest`.
#[derive(Debug, Deserialize)]
pub struct JsonRpcEnvelope<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl<T> JsonRpcEnvelope<T> {
    /// Splits the envelope into the optional result or a provider error.
    pub fn into_result(self) -> Result<Option<T>, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::provider(err.code, err.message)),
            None => Ok(self.result),
        }
    }
}
