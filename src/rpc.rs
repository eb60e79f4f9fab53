//! mTLS-terminated JSON RPC surface.
//!
//! Every method except [`ping`] takes a bearer `token` field in its request
//! body and is authenticated against a configured list of bcrypt hashes —
//! any hash in the list authenticates (`check_token_in_list`).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::RpcFault;
use crate::health::{highest, Health};
use crate::helper::{check_token_in_list, cleanup_phone_number};
use crate::pool::ModemPool;
use crate::sms::Sms;
use crate::smtp::MailRelay;

impl IntoResponse for RpcFault {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Per-method bcrypt hash lists, loaded from `[api]` in the main config.
#[derive(Debug, Clone, Default)]
pub struct RpcTokens {
    pub send_sms: Vec<String>,
    pub send_ussd: Vec<String>,
    pub get_health_state: Vec<String>,
    pub get_stats: Vec<String>,
    /// `get_sms` token list, keyed by modem identifier.
    pub get_sms: HashMap<String, Vec<String>>,
}

pub struct RpcState {
    pub pool: Arc<ModemPool>,
    pub mail: Arc<MailRelay>,
    pub tokens: RpcTokens,
    pub sms_enabled: bool,
    pub ussd_enabled: bool,
}

#[derive(Clone)]
struct SharedState(Arc<RpcState>);

pub fn router(state: Arc<RpcState>, max_connections: usize) -> Router {
    Router::new()
        .route("/ping", post(ping))
        .route("/send_sms", post(send_sms))
        .route("/get_delivery_status", post(get_delivery_status))
        .route("/get_sms", post(get_sms))
        .route("/get_health_state", post(get_health_state))
        .route("/send_ussd", post(send_ussd))
        .route("/get_stats", post(get_stats))
        .with_state(SharedState(state))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(max_connections))
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!("OK"))
}

#[derive(Deserialize)]
struct SendSmsRequest {
    token: String,
    sender: String,
    recipient: String,
    message: String,
}

#[derive(Serialize)]
struct SendSmsResponse {
    sms_id: String,
}

async fn send_sms(
    State(state): State<SharedState>,
    Json(req): Json<SendSmsRequest>,
) -> Result<Json<SendSmsResponse>, RpcFault> {
    let state = &state.0;
    if !state.sms_enabled {
        return Err(RpcFault::Disabled);
    }
    if !check_token_in_list(&req.token, &state.tokens.send_sms) {
        return Err(RpcFault::Unauthorized);
    }
    let Some(recipient) = cleanup_phone_number(&req.recipient) else {
        return Err(RpcFault::BadRequest);
    };
    let sender = if req.sender.is_empty() {
        None
    } else {
        match cleanup_phone_number(&req.sender) {
            Some(s) => Some(s),
            None => return Err(RpcFault::BadRequest),
        }
    };

    let sms = Sms::new(None, recipient, req.message, None, sender, None, false);
    // Enqueue only — the gateway event loop drains the outbound queue and
    // actually talks to a modem, so this never blocks on an AT round trip.
    let sms_id = state.pool.send_sms(sms);
    Ok(Json(SendSmsResponse { sms_id }))
}

#[derive(Deserialize)]
struct DeliveryStatusRequest {
    token: String,
    sms_id: String,
}

async fn get_delivery_status(
    State(state): State<SharedState>,
    Json(req): Json<DeliveryStatusRequest>,
) -> Result<Json<bool>, RpcFault> {
    let state = &state.0;
    // Reuses the send_sms token list, by design — not a separate one.
    if !check_token_in_list(&req.token, &state.tokens.send_sms) {
        return Err(RpcFault::Unauthorized);
    }
    Ok(Json(state.pool.get_delivery_status(&req.sms_id).unwrap_or(false)))
}

#[derive(Deserialize)]
struct GetSmsRequest {
    token: String,
    phone_number: Option<String>,
}

async fn get_sms(
    State(state): State<SharedState>,
    Json(req): Json<GetSmsRequest>,
) -> Result<Json<Vec<Sms>>, RpcFault> {
    let state = &state.0;

    let identifiers: Vec<String> = match &req.phone_number {
        Some(phone_number) => state
            .pool
            .workers()
            .iter()
            .filter(|w| w.phone_number() == Some(phone_number.as_str()))
            .map(|w| w.identifier().to_string())
            .collect(),
        None => state.pool.identifiers(),
    };

    for identifier in &identifiers {
        let hashes = state.tokens.get_sms.get(identifier).map_or(&[][..], Vec::as_slice);
        if !check_token_in_list(&req.token, hashes) {
            return Err(RpcFault::Unauthorized);
        }
    }

    state.pool.cleanup();
    let messages: Vec<Sms> = state
        .pool
        .get_buffered_sms()
        .into_iter()
        .filter(|sms| {
            identifiers
                .iter()
                .any(|id| sms.receiving_modem.as_deref() == Some(id.as_str()))
        })
        .collect();
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct HealthStateRequest {
    token: String,
}

#[derive(Serialize)]
struct HealthStateResponse {
    state: String,
    message: Option<String>,
}

async fn get_health_state(
    State(state): State<SharedState>,
    Json(req): Json<HealthStateRequest>,
) -> Result<Json<HealthStateResponse>, RpcFault> {
    let state = &state.0;
    if !check_token_in_list(&req.token, &state.tokens.get_health_state) {
        return Err(RpcFault::Unauthorized);
    }

    let mut readings = vec![state.pool.health(), state.mail.current_health()];
    for identifier in state.pool.identifiers() {
        if !state.tokens.get_sms.contains_key(&identifier) {
            readings.push(Health::warning(format!(
                "modem {identifier} has no get_sms token configured"
            )));
        }
    }

    let combined = highest(&readings);
    Ok(Json(HealthStateResponse {
        state: combined.state.to_string(),
        message: combined.message,
    }))
}

#[derive(Deserialize)]
struct SendUssdRequest {
    token: String,
    sender: String,
    ussd_code: String,
}

#[derive(Serialize)]
struct SendUssdResponse {
    state: String,
    message: String,
}

async fn send_ussd(
    State(state): State<SharedState>,
    Json(req): Json<SendUssdRequest>,
) -> Result<Json<SendUssdResponse>, RpcFault> {
    let state = &state.0;
    if !state.ussd_enabled {
        return Err(RpcFault::Disabled);
    }
    if !check_token_in_list(&req.token, &state.tokens.send_ussd) {
        return Err(RpcFault::Unauthorized);
    }
    let Some(sender) = cleanup_phone_number(&req.sender) else {
        return Err(RpcFault::BadRequest);
    };

    let Some(worker) = state
        .pool
        .workers()
        .iter()
        .find(|w| w.phone_number() == Some(sender.as_str()))
        .cloned()
    else {
        return Ok(Json(SendUssdResponse {
            state: "ERROR".to_string(),
            message: format!("no modem registered for {sender}"),
        }));
    };

    match worker.send_ussd(&req.ussd_code).await {
        Some(response) => Ok(Json(SendUssdResponse {
            state: "OK".to_string(),
            message: response,
        })),
        None => Ok(Json(SendUssdResponse {
            state: "ERROR".to_string(),
            message: "USSD request failed".to_string(),
        })),
    }
}

#[derive(Deserialize)]
struct StatsRequest {
    token: String,
}

async fn get_stats(
    State(state): State<SharedState>,
    Json(req): Json<StatsRequest>,
) -> Result<Json<HashMap<String, serde_json::Value>>, RpcFault> {
    let state = &state.0;
    if !check_token_in_list(&req.token, &state.tokens.get_stats) {
        return Err(RpcFault::Unauthorized);
    }
    Ok(Json(state.pool.get_stats()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_status_codes_match_spec() {
        assert_eq!(RpcFault::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(RpcFault::Disabled.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(RpcFault::BadRequest.status_code(), StatusCode::BAD_REQUEST);
    }
}
