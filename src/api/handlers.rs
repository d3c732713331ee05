use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info};

use super::auth::{AdminAuth, AuthenticatedAccount};
use super::error::ApiError;
use super::models::{
    DepositRequest, DepositResponse, DepositView, HistoryItem, HistoryQuery, HistoryResponse,
    InfoResponse, SettlementResponse, StatsResponse, WithdrawRequest, WithdrawResponse,
    WithdrawalView,
};
use super::routes::AppState;
use crate::bridge::error::BridgeError;
use crate::bridge::service::DepositOutcome;
use crate::utils::amount::micros_to_decimal;

pub async fn handle_info(State(state): State<AppState>) -> Result<Json<InfoResponse>, ApiError> {
    let stats = state.service.stats().await?;
    Ok(Json(InfoResponse::new(
        state.service.bridge(),
        &stats,
        state.settlement.is_some(),
    )))
}

pub async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.service.stats().await?;
    Ok(Json(StatsResponse::from(&stats)))
}

pub async fn handle_deposit(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    payload: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<Json<DepositResponse>, ApiError> {
    let Json(payload) = payload?;
    // An absent reference fails the same way as a malformed one.
    let reference = payload.tx_reference.unwrap_or_default();

    let response = match state.service.deposit(&account, &reference).await? {
        DepositOutcome::Credited {
            deposit,
            transfer,
            new_balance_micros,
        } => {
            info!(
                "Account {} credited {} from {}",
                account.name,
                transfer.amount(),
                deposit.tx_reference
            );
            DepositResponse {
                ok: true,
                idempotent: false,
                deposit: DepositView::from(&deposit),
                credited_rtc: Some(micros_to_decimal(deposit.amount_micros)),
                new_rtc_balance: micros_to_decimal(new_balance_micros),
            }
        }
        DepositOutcome::Idempotent {
            deposit,
            balance_micros,
        } => {
            debug!("Deposit {} already credited", deposit.tx_reference);
            DepositResponse {
                ok: true,
                idempotent: true,
                deposit: DepositView::from(&deposit),
                credited_rtc: None,
                new_rtc_balance: micros_to_decimal(balance_micros),
            }
        }
    };
    Ok(Json(response))
}

pub async fn handle_withdraw(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let Json(payload) = payload?;
    let amount = payload.amount.ok_or(BridgeError::NonPositiveAmount)?;

    let outcome = state
        .service
        .withdraw(&account, &payload.to_address, amount)
        .await?;

    Ok(Json(WithdrawResponse {
        ok: true,
        withdrawal: WithdrawalView::from(&outcome.withdrawal),
        new_rtc_balance: micros_to_decimal(outcome.new_balance_micros),
    }))
}

pub async fn handle_history(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query?;
    let rows = state
        .service
        .history(&account, query.limit, query.offset)
        .await?;

    Ok(Json(HistoryResponse {
        ok: true,
        history: rows.into_iter().map(HistoryItem::from).collect(),
    }))
}

pub async fn handle_process_withdrawals(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> Result<Json<SettlementResponse>, ApiError> {
    let Some(sweep) = state.settlement.as_ref() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Settlement is not configured for this bridge",
        ));
    };

    let report = sweep.process_once().await?;
    if !report.lease_acquired {
        return Err(
            ApiError::new(StatusCode::CONFLICT, "Settlement already running elsewhere")
                .with_detail("lease_held", true),
        );
    }
    Ok(Json(SettlementResponse::from(report)))
}
