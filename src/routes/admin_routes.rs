use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    database::models::{
        AdminLog, LedgerEntry, LedgerOutcome, Match, MatchReport, MatchUpdate, PlatformSetting,
        PlatformStats, SettlementOutcome, SupportTicket, TicketStatus, Tournament, TournamentDraft,
        TournamentStatus, TransactionKind, TransactionStatus, User, WalletTransaction,
    },
    log::{admin_log_info, notify_user},
    realtime::ServerEvent,
    utils::{error::ApiError, money::positive_amount},
    AppState,
};

use super::{checks::AdminUser, PageQuery, RoutesContainer};

/// Number of entries returned by the admin log listing.
const ADMIN_LOG_LIMIT: i64 = 100;

/// RoutesContainer for the admin back-office.
pub struct AdminRoutes;

impl RoutesContainer for AdminRoutes {
    fn get_all() -> Router<AppState> {
        Router::new()
            .route("/api/admin/users", get(list_users))
            .route("/api/admin/users/:id", patch(set_user_flags))
            .route("/api/admin/users/:id/wallet", post(adjust_wallet))
            .route("/api/admin/tournaments", post(create_tournament))
            .route(
                "/api/admin/tournaments/:id",
                put(update_tournament).delete(delete_tournament),
            )
            .route(
                "/api/admin/tournaments/:id/status",
                patch(set_tournament_status),
            )
            .route("/api/admin/tournaments/:id/matches", post(create_match))
            .route("/api/admin/tournaments/:id/payout", post(payout))
            .route("/api/admin/matches/:id", patch(update_match))
            .route("/api/admin/matches/:id/reports", get(match_reports))
            .route("/api/admin/transactions", get(list_transactions))
            .route(
                "/api/admin/transactions/:id/status",
                patch(set_transaction_status),
            )
            .route("/api/admin/support", get(list_tickets))
            .route("/api/admin/support/:id", patch(answer_ticket))
            .route("/api/admin/settings", get(settings))
            .route("/api/admin/settings/:key", put(set_setting))
            .route("/api/admin/logs", get(admin_logs))
            .route("/api/admin/stats", get(stats))
    }
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.database.list_users(query.page).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFlags {
    is_admin: Option<bool>,
    is_banned: Option<bool>,
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn set_user_flags(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(flags): Json<UserFlags>,
) -> Result<Json<User>, ApiError> {
    if user_id == admin.id && (flags.is_admin == Some(false) || flags.is_banned == Some(true)) {
        return Err(ApiError::BadRequest(
            "Admins cannot demote or ban themselves".to_string(),
        ));
    }

    let user = state
        .database
        .set_user_flags(user_id, flags.is_admin, flags.is_banned)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "update_user_flags",
        json!({
            "userId": user.id,
            "isAdmin": flags.is_admin,
            "isBanned": flags.is_banned,
        }),
    )
    .await;

    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct WalletAdjustment {
    /// Signed: positive credits the wallet, negative debits it.
    amount: Decimal,
    note: String,
}

/// Manually credits or debits a wallet, attributed to the acting admin.
#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn adjust_wallet(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(adjustment): Json<WalletAdjustment>,
) -> Result<(StatusCode, Json<WalletTransaction>), ApiError> {
    if adjustment.note.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "A note is required for manual adjustments".to_string(),
        ));
    }
    let magnitude = positive_amount(adjustment.amount.abs())?;
    let (kind, delta) = if adjustment.amount.is_sign_negative() {
        (TransactionKind::Withdrawal, -magnitude)
    } else {
        (TransactionKind::Deposit, magnitude)
    };

    let mut entry = LedgerEntry::new(user_id, kind, magnitude);
    entry.balance_delta = delta;
    entry.description = Some("Manual adjustment".to_string());
    entry.admin_id = Some(admin.id);
    entry.admin_note = Some(adjustment.note.trim().to_string());

    let row = match state.database.record_transaction(&entry).await? {
        LedgerOutcome::Recorded(row) => row,
        LedgerOutcome::InsufficientFunds => return Err(ApiError::InsufficientFunds),
        LedgerOutcome::UserMissing => return Err(ApiError::NotFound("User")),
        LedgerOutcome::Duplicate => {
            return Err(ApiError::BadRequest(
                "This adjustment was already recorded".to_string(),
            ))
        }
    };

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "adjust_wallet",
        json!({ "userId": user_id, "amount": delta, "transactionId": row.id }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(row)))
}

fn validate_draft(draft: &TournamentDraft) -> Result<(), ApiError> {
    if draft.name.trim().is_empty() || draft.game.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Tournament name and game are required".to_string(),
        ));
    }
    if draft.max_participants < 2 {
        return Err(ApiError::BadRequest(
            "A tournament needs room for at least 2 participants".to_string(),
        ));
    }
    if draft.entry_fee.is_sign_negative() || draft.prize_pool.is_sign_negative() {
        return Err(ApiError::BadRequest(
            "Entry fee and prize pool cannot be negative".to_string(),
        ));
    }
    Ok(())
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn create_tournament(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(draft): Json<TournamentDraft>,
) -> Result<(StatusCode, Json<Tournament>), ApiError> {
    validate_draft(&draft)?;

    let tournament = state.database.create_tournament(&draft, admin.id).await?;
    info!("Created tournament {} ({})", tournament.name, tournament.id);

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "create_tournament",
        json!({ "tournamentId": tournament.id, "name": tournament.name }),
    )
    .await;
    state
        .hub
        .broadcast(&ServerEvent::TournamentCreated(tournament.clone()));

    Ok((StatusCode::CREATED, Json(tournament)))
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn update_tournament(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tournament_id): Path<Uuid>,
    Json(draft): Json<TournamentDraft>,
) -> Result<Json<Tournament>, ApiError> {
    validate_draft(&draft)?;

    let existing = state
        .database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;
    if draft.max_participants < existing.current_participants {
        return Err(ApiError::BadRequest(format!(
            "Capacity cannot drop below the {} participants already registered",
            existing.current_participants
        )));
    }

    let tournament = state
        .database
        .update_tournament(tournament_id, &draft)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "update_tournament",
        json!({ "tournamentId": tournament.id }),
    )
    .await;
    state
        .hub
        .broadcast(&ServerEvent::TournamentUpdated(tournament.clone()));

    Ok(Json(tournament))
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: TournamentStatus,
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn set_tournament_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tournament_id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Tournament>, ApiError> {
    let tournament = state
        .database
        .set_tournament_status(tournament_id, change.status)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;
    info!("Tournament {} is now {}", tournament.id, tournament.status);

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "set_tournament_status",
        json!({ "tournamentId": tournament.id, "status": tournament.status }),
    )
    .await;
    state
        .hub
        .broadcast(&ServerEvent::TournamentUpdated(tournament.clone()));

    Ok(Json(tournament))
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn delete_tournament(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tournament_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.database.delete_tournament(tournament_id).await? {
        return Err(ApiError::NotFound("Tournament"));
    }

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "delete_tournament",
        json!({ "tournamentId": tournament_id }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMatch {
    round: i32,
    participant_a: Uuid,
    participant_b: Option<Uuid>,
    scheduled_at: Option<DateTime<Utc>>,
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn create_match(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tournament_id): Path<Uuid>,
    Json(request): Json<NewMatch>,
) -> Result<(StatusCode, Json<Match>), ApiError> {
    state
        .database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;

    if request.round < 1 {
        return Err(ApiError::BadRequest("Rounds start at 1".to_string()));
    }
    if request.participant_b == Some(request.participant_a) {
        return Err(ApiError::BadRequest(
            "A participant cannot play against themselves".to_string(),
        ));
    }
    let participants = state.database.list_participants(tournament_id).await?;
    let registered = |id: Uuid| participants.iter().any(|p| p.id == id);
    if !registered(request.participant_a) || !request.participant_b.map_or(true, registered) {
        return Err(ApiError::BadRequest(
            "Both sides must be participants of this tournament".to_string(),
        ));
    }

    let game = state
        .database
        .create_match(
            tournament_id,
            request.round,
            request.participant_a,
            request.participant_b,
            request.scheduled_at,
        )
        .await?;

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "create_match",
        json!({ "tournamentId": tournament_id, "matchId": game.id }),
    )
    .await;
    state
        .hub
        .broadcast_to_room(tournament_id, &ServerEvent::MatchUpdated(game.clone()));

    Ok((StatusCode::CREATED, Json(game)))
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn update_match(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(match_id): Path<Uuid>,
    Json(update): Json<MatchUpdate>,
) -> Result<Json<Match>, ApiError> {
    let existing = state
        .database
        .get_match(match_id)
        .await?
        .ok_or(ApiError::NotFound("Match"))?;
    if let Some(winner) = update.winner {
        if !existing.involves(winner) {
            return Err(ApiError::BadRequest(
                "The winner must be one of the match participants".to_string(),
            ));
        }
    }

    let game = state
        .database
        .update_match(match_id, &update)
        .await?
        .ok_or(ApiError::NotFound("Match"))?;

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "update_match",
        json!({
            "matchId": game.id,
            "winner": game.winner,
            "score": game.score,
            "status": game.status,
        }),
    )
    .await;
    state
        .hub
        .broadcast_to_room(game.tournament_id, &ServerEvent::MatchUpdated(game.clone()));

    Ok(Json(game))
}

async fn match_reports(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(match_id): Path<Uuid>,
) -> Result<Json<Vec<MatchReport>>, ApiError> {
    state
        .database
        .get_match(match_id)
        .await?
        .ok_or(ApiError::NotFound("Match"))?;

    Ok(Json(state.database.list_match_reports(match_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payout {
    user_id: Uuid,
    amount: Decimal,
}

/// Credits prize money to a participant of the tournament.
#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn payout(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(tournament_id): Path<Uuid>,
    Json(request): Json<Payout>,
) -> Result<(StatusCode, Json<WalletTransaction>), ApiError> {
    let amount = positive_amount(request.amount)?;
    let tournament = state
        .database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;
    state
        .database
        .get_participant(tournament.id, request.user_id)
        .await?
        .ok_or(ApiError::BadRequest(
            "Prizes can only be paid to participants of this tournament".to_string(),
        ))?;

    let mut entry = LedgerEntry::new(request.user_id, TransactionKind::PrizePayout, amount);
    entry.balance_delta = amount;
    entry.tournament_id = Some(tournament.id);
    entry.description = Some(format!("Prize for {}", tournament.name));
    entry.admin_id = Some(admin.id);

    let row = match state.database.record_transaction(&entry).await? {
        LedgerOutcome::Recorded(row) => row,
        LedgerOutcome::UserMissing => return Err(ApiError::NotFound("User")),
        LedgerOutcome::InsufficientFunds | LedgerOutcome::Duplicate => {
            return Err(ApiError::BadRequest(
                "The payout could not be recorded".to_string(),
            ))
        }
    };
    info!("Paid {} to user {} for tournament {}", amount, request.user_id, tournament.id);

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "prize_payout",
        json!({ "tournamentId": tournament.id, "userId": request.user_id, "amount": amount }),
    )
    .await;
    notify_user(
        state.database.as_ref(),
        request.user_id,
        "Prize received",
        &format!("{} was added to your wallet for {}", amount, tournament.name),
    )
    .await;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn list_transactions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<WalletTransaction>>, ApiError> {
    Ok(Json(state.database.list_transactions(query.page).await?))
}

#[derive(Debug, Deserialize)]
struct TransactionStatusChange {
    status: TransactionStatus,
}

/// Settles a pending transaction.
///
/// Failing a pending withdrawal returns the debited funds through a refund row keyed on the
/// withdrawal, so the refund happens at most once.
#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn set_transaction_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(transaction_id): Path<Uuid>,
    Json(change): Json<TransactionStatusChange>,
) -> Result<Json<WalletTransaction>, ApiError> {
    if change.status == TransactionStatus::Pending {
        return Err(ApiError::BadRequest(
            "A transaction can only be settled as completed or failed".to_string(),
        ));
    }

    let transaction = match state
        .database
        .settle_transaction(transaction_id, change.status, admin.id)
        .await?
    {
        SettlementOutcome::Settled { transaction, refund } => {
            if let Some(row) = refund {
                info!("Refunded withdrawal {} as {}", transaction.id, row.id);
            }
            transaction
        }
        SettlementOutcome::NotPending(status) => {
            return Err(ApiError::BadRequest(format!(
                "Transaction is already {}",
                status
            )))
        }
        SettlementOutcome::Missing => return Err(ApiError::NotFound("Transaction")),
    };

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "set_transaction_status",
        json!({ "transactionId": transaction.id, "status": transaction.status }),
    )
    .await;

    Ok(Json(transaction))
}

#[derive(Debug, Deserialize)]
struct TicketQuery {
    status: Option<TicketStatus>,
}

async fn list_tickets(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<TicketQuery>,
) -> Result<Json<Vec<SupportTicket>>, ApiError> {
    Ok(Json(state.database.list_tickets(query.status).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TicketAnswer {
    status: TicketStatus,
    admin_response: Option<String>,
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn answer_ticket(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(ticket_id): Path<Uuid>,
    Json(answer): Json<TicketAnswer>,
) -> Result<Json<SupportTicket>, ApiError> {
    let ticket = state
        .database
        .update_ticket(ticket_id, answer.status, answer.admin_response.as_deref())
        .await?
        .ok_or(ApiError::NotFound("Support ticket"))?;

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "answer_ticket",
        json!({ "ticketId": ticket.id, "status": ticket.status }),
    )
    .await;
    notify_user(
        state.database.as_ref(),
        ticket.user_id,
        "Support ticket updated",
        &format!("Your ticket \"{}\" is now {}", ticket.subject, ticket.status),
    )
    .await;

    Ok(Json(ticket))
}

async fn settings(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<PlatformSetting>>, ApiError> {
    Ok(Json(state.database.get_settings().await?))
}

#[derive(Debug, Deserialize)]
struct SettingValue {
    value: String,
}

#[instrument(skip(state, admin), fields(admin = %admin.username))]
async fn set_setting(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(key): Path<String>,
    Json(setting): Json<SettingValue>,
) -> Result<Json<PlatformSetting>, ApiError> {
    let setting = state.database.set_setting(&key, &setting.value).await?;

    admin_log_info(
        state.database.as_ref(),
        &admin,
        "set_setting",
        json!({ "key": setting.key, "value": setting.value }),
    )
    .await;

    Ok(Json(setting))
}

async fn admin_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<AdminLog>>, ApiError> {
    Ok(Json(state.database.list_admin_logs(ADMIN_LOG_LIMIT).await?))
}

async fn stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<PlatformStats>, ApiError> {
    let database = state.database.as_ref();
    let (users, tournaments, open_tickets, total_deposits) = tokio::try_join!(
        database.count_users(),
        database.count_tournaments(),
        database.count_open_tickets(),
        database.total_completed_deposits(),
    )?;

    Ok(Json(PlatformStats {
        users,
        tournaments,
        open_tickets,
        total_deposits,
    }))
}
