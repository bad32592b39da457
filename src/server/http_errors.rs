use crate::application::{CheckoutError, LedgerError};
use crate::infrastructure::ProviderError;
use axum::http::StatusCode;

pub(super) fn map_ledger_error(err: &LedgerError) -> (StatusCode, serde_json::Value) {
    match err {
        LedgerError::InsufficientCredits => (
            StatusCode::PAYMENT_REQUIRED,
            serde_json::json!({ "error": "Insufficient credits" }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Ledger operation failed" }),
        ),
    }
}

pub(super) fn map_gate_error(err: &LedgerError) -> (StatusCode, serde_json::Value) {
    match err {
        LedgerError::InsufficientCredits => (
            StatusCode::PAYMENT_REQUIRED,
            serde_json::json!({ "error": "Insufficient credits" }),
        ),
        LedgerError::Provider(ProviderError::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({ "error": "Rate limited by the AI provider, please retry" }),
        ),
        LedgerError::Provider(_) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "AI provider call failed" }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Feature invocation failed" }),
        ),
    }
}

pub(super) fn map_checkout_error(err: &CheckoutError) -> (StatusCode, serde_json::Value) {
    match err {
        CheckoutError::PlanNotFound(plan_id) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": format!("Unknown plan: {}", plan_id),
                "allowed": ["starter", "professional", "enterprise"]
            }),
        ),
        CheckoutError::OrderNotFound(_) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Order not found" }),
        ),
        CheckoutError::AccountNotFound(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Account not found" }),
        ),
        CheckoutError::InvalidTransition { status, .. } => (
            StatusCode::CONFLICT,
            serde_json::json!({
                "error": format!("Order already {}, transition rejected", status)
            }),
        ),
        CheckoutError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Order operation failed" }),
        ),
    }
}
