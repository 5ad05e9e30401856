use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    database::models::{Match, Tournament, TournamentParticipant, TournamentStatus},
    payments::webhook::{handle_event, verify_signature, StripeEvent, WebhookOutcome},
    realtime::socket::ws_handler,
    utils::error::ApiError,
    AppState,
};

use super::RoutesContainer;

/// RoutesContainer for the routes anyone may call.
pub struct PublicRoutes;

impl RoutesContainer for PublicRoutes {
    fn get_all() -> Router<AppState> {
        Router::new()
            .route("/api/tournaments", get(list_tournaments))
            .route("/api/tournaments/:id", get(get_tournament))
            .route("/api/tournaments/:id/participants", get(list_participants))
            .route("/api/tournaments/:id/matches", get(list_matches))
            .route("/api/webhook/stripe", post(stripe_webhook))
            .route("/ws", get(ws_handler))
    }
}

#[derive(Debug, Deserialize)]
struct TournamentQuery {
    page: Option<i64>,
    status: Option<TournamentStatus>,
}

async fn list_tournaments(
    State(state): State<AppState>,
    Query(query): Query<TournamentQuery>,
) -> Result<Json<Vec<Tournament>>, ApiError> {
    let tournaments = state
        .database
        .list_tournaments(query.page, query.status)
        .await?;

    Ok(Json(tournaments))
}

async fn get_tournament(
    State(state): State<AppState>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Tournament>, ApiError> {
    let tournament = state
        .database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;

    Ok(Json(tournament))
}

async fn list_participants(
    State(state): State<AppState>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Vec<TournamentParticipant>>, ApiError> {
    state
        .database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;

    Ok(Json(state.database.list_participants(tournament_id).await?))
}

async fn list_matches(
    State(state): State<AppState>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Vec<Match>>, ApiError> {
    state
        .database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;

    Ok(Json(state.database.list_matches(tournament_id).await?))
}

/// Receives payment events from the gateway.
///
/// The raw body is needed for signature verification, so it is parsed only after the signature
/// checks out.
#[instrument(skip_all)]
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or(ApiError::PaymentUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    if let Err(e) = verify_signature(&body, signature, secret, Utc::now().timestamp()) {
        warn!("Rejected webhook with an invalid signature");
        return Err(e);
    }

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed event: {}", e)))?;

    let outcome = handle_event(state.database.as_ref(), &event).await?;
    match &outcome {
        WebhookOutcome::Duplicate => info!("Event {} was already applied", event.id),
        WebhookOutcome::Ignored => {}
        applied => info!("Applied event {}: {:?}", event.id, applied),
    }

    Ok(Json(json!({ "received": true })))
}
