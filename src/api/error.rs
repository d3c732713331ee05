use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use tracing::error;

use crate::bridge::error::BridgeError;
use crate::chain::VerifyError;
use crate::queue::settlement::SettlementError;

/// JSON error response: `{"error": "...", ...details}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Map<String, Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "Authentication required. Provide X-API-Key header.",
        )
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = self.details;
        body.insert("error".to_string(), Value::String(self.message));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

fn verification_status(err: &VerifyError) -> StatusCode {
    match err {
        VerifyError::Rpc(_) | VerifyError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        VerifyError::ConfirmationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let message = err.to_string();
        match err {
            BridgeError::MalformedReference(_)
            | BridgeError::InvalidAddress(_)
            | BridgeError::InvalidAmount(_)
            | BridgeError::NonPositiveAmount
            | BridgeError::NoBoundWallet { .. }
            | BridgeError::BelowMinimumWithdrawal { .. }
            | BridgeError::AboveMaximumWithdrawal { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, message)
            }
            BridgeError::AlreadyClaimed => ApiError::new(StatusCode::CONFLICT, message),
            BridgeError::Verification(ref verify) => {
                ApiError::new(verification_status(verify), message)
            }
            BridgeError::WrongDestination { expected, got } => {
                ApiError::new(StatusCode::BAD_REQUEST, message)
                    .with_detail("expected_reserve", expected)
                    .with_detail("onchain_destination", got)
            }
            BridgeError::SenderMismatch {
                expected, onchain, ..
            } => ApiError::new(StatusCode::FORBIDDEN, message)
                .with_detail("expected_sender", expected)
                .with_detail("onchain_sender", onchain),
            BridgeError::BelowMinimumDeposit { minimum, amount } => {
                ApiError::new(StatusCode::BAD_REQUEST, message)
                    .with_detail("minimum", minimum)
                    .with_detail("amount", amount)
            }
            BridgeError::CooldownActive { remaining_secs } => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, message)
                    .with_detail("retry_after_secs", remaining_secs)
            }
            BridgeError::InsufficientBalance { balance, required } => {
                ApiError::new(StatusCode::BAD_REQUEST, message)
                    .with_detail("balance", balance)
                    .with_detail("required", required)
            }
            BridgeError::AccountNotFound => ApiError::new(StatusCode::NOT_FOUND, message),
            BridgeError::Database(e) => {
                error!("Database error: {:?}", e);
                ApiError::internal()
            }
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        error!("Settlement run failed: {:?}", err);
        ApiError::internal()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        error!("Database error: {:?}", err);
        ApiError::internal()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Invalid JSON body: {}", rejection.body_text()),
        )
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Invalid query: {}", rejection.body_text()),
        )
    }
}
