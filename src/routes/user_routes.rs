use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    database::models::{
        LedgerEntry, LedgerOutcome, MatchReport, MatchStatus, MatchUpdate, Notification,
        SupportTicket, Team, TeamMember, TransactionKind, TransactionStatus, User,
        WalletTransaction,
    },
    payments::IntentRequest,
    realtime::ServerEvent,
    registration::{join_tournament, JoinOutcome},
    utils::{
        error::ApiError,
        money::{positive_amount, to_minor_units},
    },
    AppState,
};

use super::{checks::AuthUser, RoutesContainer};

/// RoutesContainer for the routes any signed-in user may call.
pub struct UserRoutes;

impl RoutesContainer for UserRoutes {
    fn get_all() -> Router<AppState> {
        Router::new()
            .route("/api/me", get(me))
            .route("/api/tournaments/:id/join", post(join))
            .route("/api/create-payment-intent", post(create_payment_intent))
            .route("/api/teams", post(create_team))
            .route("/api/teams/:id", get(get_team))
            .route("/api/my/teams", get(my_teams))
            .route("/api/teams/:id/members", post(add_member))
            .route("/api/teams/:id/members/:user_id", delete(remove_member))
            .route("/api/matches/:id/report", post(report_match))
            .route("/api/wallet", get(wallet))
            .route("/api/wallet/withdraw", post(withdraw))
            .route("/api/notifications", get(notifications))
            .route("/api/notifications/:id/read", post(read_notification))
            .route("/api/support", post(open_ticket).get(my_tickets))
    }
}

async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    team_id: Option<Uuid>,
}

/// The body is optional; a solo entry can be posted without one.
async fn join(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(tournament_id): Path<Uuid>,
    body: Option<Json<JoinRequest>>,
) -> Result<Json<JoinOutcome>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let outcome = join_tournament(&state, &user, tournament_id, request.team_id).await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct DepositRequest {
    amount: Decimal,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientSecret {
    client_secret: Option<String>,
}

/// Starts a wallet deposit. The wallet is credited when the gateway confirms the payment.
#[instrument(skip(state, user), fields(user = %user.username))]
async fn create_payment_intent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<DepositRequest>,
) -> Result<Json<ClientSecret>, ApiError> {
    let gateway = state.payments.as_ref().ok_or(ApiError::PaymentUnavailable)?;
    let amount = positive_amount(request.amount)?;

    let mut metadata = vec![("userId", user.id.to_string())];
    if let Some(description) = &request.description {
        metadata.push(("description", description.clone()));
    }

    let intent = gateway
        .create_intent(&IntentRequest {
            amount: to_minor_units(amount)?,
            currency: state.currency.clone(),
            description: request.description.clone(),
            metadata,
        })
        .await?;
    info!("Created deposit intent {} for {}", intent.id, amount);

    Ok(Json(ClientSecret {
        client_secret: intent.client_secret,
    }))
}

#[derive(Debug, Deserialize)]
struct NewTeam {
    name: String,
    tag: String,
}

#[derive(Debug, Serialize)]
struct TeamDetails {
    team: Team,
    members: Vec<TeamMember>,
}

async fn create_team(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewTeam>,
) -> Result<(StatusCode, Json<Team>), ApiError> {
    let name = request.name.trim();
    let tag = request.tag.trim().to_uppercase();
    if name.is_empty() || tag.is_empty() {
        return Err(ApiError::BadRequest(
            "Team name and tag are required".to_string(),
        ));
    }
    if tag.chars().count() > 5 {
        return Err(ApiError::BadRequest(
            "Team tag can be at most 5 characters".to_string(),
        ));
    }

    let team = state.database.create_team(name, &tag, user.id).await?;
    info!("User {} created team {}", user.id, team.id);

    Ok((StatusCode::CREATED, Json(team)))
}

async fn get_team(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(team_id): Path<Uuid>,
) -> Result<Json<TeamDetails>, ApiError> {
    let team = state
        .database
        .get_team(team_id)
        .await?
        .ok_or(ApiError::NotFound("Team"))?;
    let members = state.database.get_team_members(team_id).await?;

    Ok(Json(TeamDetails { team, members }))
}

async fn my_teams(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Team>>, ApiError> {
    Ok(Json(state.database.get_user_teams(user.id).await?))
}

/// Loads a team and makes sure the caller is its captain.
async fn captained_team(state: &AppState, team_id: Uuid, user: &User) -> Result<Team, ApiError> {
    let team = state
        .database
        .get_team(team_id)
        .await?
        .ok_or(ApiError::NotFound("Team"))?;
    if team.captain_id != user.id {
        return Err(ApiError::Forbidden("Only the team captain can do that"));
    }
    Ok(team)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMember {
    user_id: Uuid,
}

async fn add_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(team_id): Path<Uuid>,
    Json(request): Json<NewMember>,
) -> Result<StatusCode, ApiError> {
    let team = captained_team(&state, team_id, &user).await?;
    state
        .database
        .get_user(request.user_id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    if !state.database.add_team_member(team.id, request.user_id).await? {
        return Err(ApiError::BadRequest(
            "User is already a member of this team".to_string(),
        ));
    }
    crate::log::notify_user(
        state.database.as_ref(),
        request.user_id,
        "Team invitation",
        &format!("You have been added to {} [{}]", team.name, team.tag),
    )
    .await;

    Ok(StatusCode::CREATED)
}

async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((team_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let team = captained_team(&state, team_id, &user).await?;
    if member_id == team.captain_id {
        return Err(ApiError::BadRequest(
            "The captain cannot be removed from their own team".to_string(),
        ));
    }

    if !state.database.remove_team_member(team.id, member_id).await? {
        return Err(ApiError::NotFound("Team member"));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewReport {
    claimed_winner: Uuid,
    score: String,
    evidence_url: Option<String>,
}

/// Files a result claim for a match the caller plays in.
///
/// Two claims naming different winners put the match into `disputed` for an admin to resolve.
#[instrument(skip(state, user, request), fields(user = %user.username))]
async fn report_match(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(match_id): Path<Uuid>,
    Json(request): Json<NewReport>,
) -> Result<(StatusCode, Json<MatchReport>), ApiError> {
    let database = state.database.as_ref();
    let game = database
        .get_match(match_id)
        .await?
        .ok_or(ApiError::NotFound("Match"))?;

    database
        .get_participant(game.tournament_id, user.id)
        .await?
        .filter(|participant| game.involves(participant.id))
        .ok_or(ApiError::Forbidden("You are not playing in this match"))?;

    if !game.involves(request.claimed_winner) {
        return Err(ApiError::BadRequest(
            "The claimed winner is not part of this match".to_string(),
        ));
    }
    if game.status == MatchStatus::Completed {
        return Err(ApiError::BadRequest(
            "This match already has a confirmed result".to_string(),
        ));
    }

    let report = database
        .create_match_report(
            game.id,
            user.id,
            request.claimed_winner,
            request.score.trim(),
            request.evidence_url.as_deref(),
        )
        .await?;

    let reports = database.list_match_reports(game.id).await?;
    let contested = reports
        .iter()
        .any(|other| other.claimed_winner != report.claimed_winner);
    if contested && game.status != MatchStatus::Disputed {
        let update = MatchUpdate {
            status: Some(MatchStatus::Disputed),
            ..Default::default()
        };
        if let Some(disputed) = database.update_match(game.id, &update).await? {
            info!("Match {} is now disputed", game.id);
            state
                .hub
                .broadcast_to_room(disputed.tournament_id, &ServerEvent::MatchUpdated(disputed));
        }
    }

    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Debug, Serialize)]
struct Wallet {
    balance: Decimal,
    transactions: Vec<WalletTransaction>,
}

async fn wallet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Wallet>, ApiError> {
    let transactions = state.database.list_user_transactions(user.id).await?;

    Ok(Json(Wallet {
        balance: user.wallet_balance,
        transactions,
    }))
}

#[derive(Debug, Deserialize)]
struct WithdrawRequest {
    amount: Decimal,
}

/// Requests a payout of wallet funds.
///
/// The balance is debited right away and the withdrawal stays pending until an admin settles it.
#[instrument(skip(state, user), fields(user = %user.username))]
async fn withdraw(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<WalletTransaction>), ApiError> {
    let amount = positive_amount(request.amount)?;

    let mut entry = LedgerEntry::new(user.id, TransactionKind::Withdrawal, amount);
    entry.status = TransactionStatus::Pending;
    entry.balance_delta = -amount;
    entry.description = Some("Withdrawal request".to_string());

    match state.database.record_transaction(&entry).await? {
        LedgerOutcome::Recorded(row) => {
            info!("User {} requested a withdrawal of {}", user.id, amount);
            Ok((StatusCode::CREATED, Json(row)))
        }
        LedgerOutcome::InsufficientFunds => Err(ApiError::InsufficientFunds),
        LedgerOutcome::UserMissing => Err(ApiError::NotFound("User")),
        LedgerOutcome::Duplicate => Err(ApiError::BadRequest(
            "This withdrawal was already requested".to_string(),
        )),
    }
}

async fn notifications(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(state.database.list_notifications(user.id).await?))
}

async fn read_notification(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !state
        .database
        .mark_notification_read(notification_id, user.id)
        .await?
    {
        return Err(ApiError::NotFound("Notification"));
    }

    Ok(Json(json!({ "read": true })))
}

#[derive(Debug, Deserialize)]
struct NewTicket {
    subject: String,
    message: String,
}

async fn open_ticket(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<NewTicket>,
) -> Result<(StatusCode, Json<SupportTicket>), ApiError> {
    if request.subject.trim().is_empty() || request.message.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Subject and message are required".to_string(),
        ));
    }

    let ticket = state
        .database
        .create_ticket(user.id, request.subject.trim(), request.message.trim())
        .await?;

    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn my_tickets(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<SupportTicket>>, ApiError> {
    Ok(Json(state.database.list_user_tickets(user.id).await?))
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use axum::http::StatusCode;
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::{
        database::{memory::MemoryDatabase, MatchDatabase, TournamentDatabase},
        database::models::{MatchStatus, NewParticipant, PaymentStatus},
        routes::{app, test_support::send},
        test_utils::{dummy_tournament, test_state, FakeGateway},
    };

    #[tokio::test]
    async fn requires_a_session() {
        let app = app(test_state(Arc::new(MemoryDatabase::new()), None));

        let (status, body) = send(&app, "GET", "/api/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");

        let (status, _) = send(&app, "GET", "/api/me", Some("nobody"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn join_full_tournament_over_http() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_user("alice", false);
        db.add_user("bob", false);
        let tournament = db.add_tournament(dummy_tournament(2, 1, "0.00"));
        let app = app(test_state(db.clone(), None));
        let uri = format!("/api/tournaments/{}/join", tournament.id);

        let (status, body) = send(&app, "POST", &uri, Some("alice"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["participant"]["paymentStatus"], "completed");
        assert!(body.get("clientSecret").is_none());
        assert_eq!(db.tournament(tournament.id).unwrap().current_participants, 2);

        let (status, body) = send(&app, "POST", &uri, Some("bob"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "tournament_full");
        assert_eq!(body["message"], "Tournament is full");
        assert_eq!(db.participants().len(), 1);
    }

    #[tokio::test]
    async fn paid_join_without_gateway_is_503() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_user("alice", false);
        let tournament = db.add_tournament(dummy_tournament(8, 0, "5.00"));
        let app = app(test_state(db.clone(), None));

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/tournaments/{}/join", tournament.id),
            Some("alice"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "payment_unavailable");
        assert!(db.participants().is_empty());
    }

    #[tokio::test]
    async fn deposit_intent_tags_the_user() {
        let db = Arc::new(MemoryDatabase::new());
        let user = db.add_user("alice", false);
        let gateway = Arc::new(FakeGateway::default());
        let app = app(test_state(db, Some(gateway.clone())));

        let (status, body) = send(
            &app,
            "POST",
            "/api/create-payment-intent",
            Some("alice"),
            Some(json!({ "amount": 20, "description": "Top up" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clientSecret"], "pi_1_secret");
        assert_eq!(gateway.last_metadata("userId"), Some(user.id.to_string()));
        assert_eq!(gateway.last_request.lock().unwrap().as_ref().unwrap().amount, 2000);
    }

    #[tokio::test]
    async fn withdrawal_needs_funds_and_debits_once() {
        let db = Arc::new(MemoryDatabase::new());
        let user = db.add_user("alice", false);
        db.set_balance(user.id, Decimal::from_str("15.00").unwrap());
        let app = app(test_state(db.clone(), None));

        let (status, body) = send(
            &app,
            "POST",
            "/api/wallet/withdraw",
            Some("alice"),
            Some(json!({ "amount": "20.00" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "insufficient_funds");

        let (status, body) = send(
            &app,
            "POST",
            "/api/wallet/withdraw",
            Some("alice"),
            Some(json!({ "amount": "10.00" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(
            db.user(user.id).unwrap().wallet_balance,
            Decimal::from_str("5.00").unwrap()
        );

        let (_, wallet) = send(&app, "GET", "/api/wallet", Some("alice"), None).await;
        assert_eq!(wallet["balance"], "5.00");
        assert_eq!(wallet["transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_the_captain_manages_members() {
        let db = Arc::new(MemoryDatabase::new());
        db.add_user("captain", false);
        let member = db.add_user("member", false);
        let app = app(test_state(db.clone(), None));

        let (status, team) = send(
            &app,
            "POST",
            "/api/teams",
            Some("captain"),
            Some(json!({ "name": "Night Owls", "tag": "owl" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(team["tag"], "OWL");
        let members_uri = format!("/api/teams/{}/members", team["id"].as_str().unwrap());

        let (status, _) = send(
            &app,
            "POST",
            &members_uri,
            Some("member"),
            Some(json!({ "userId": member.id })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            "POST",
            &members_uri,
            Some("captain"),
            Some(json!({ "userId": member.id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, details) = send(
            &app,
            "GET",
            &format!("/api/teams/{}", team["id"].as_str().unwrap()),
            Some("member"),
            None,
        )
        .await;
        assert_eq!(details["members"].as_array().unwrap().len(), 2);

        let (_, notifications) = send(&app, "GET", "/api/notifications", Some("member"), None).await;
        assert_eq!(notifications.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflicting_reports_dispute_the_match() {
        let db = Arc::new(MemoryDatabase::new());
        let alice = db.add_user("alice", false);
        let bob = db.add_user("bob", false);
        let tournament = db.add_tournament(dummy_tournament(2, 0, "0.00"));
        let mut entrants = Vec::new();
        for user in [&alice, &bob] {
            let entry = NewParticipant {
                tournament_id: tournament.id,
                user_id: user.id,
                team_id: None,
                payment_status: PaymentStatus::Completed,
                payment_intent_id: None,
            };
            match db.enter_tournament(&entry).await.unwrap() {
                crate::database::models::EntryOutcome::Entered(p) => entrants.push(p),
                other => panic!("unexpected {:?}", other),
            }
        }
        let game = db
            .create_match(tournament.id, 1, entrants[0].id, Some(entrants[1].id), None)
            .await
            .unwrap();
        let app = app(test_state(db.clone(), None));
        let uri = format!("/api/matches/{}/report", game.id);

        for (token, winner) in [("alice", entrants[0].id), ("bob", entrants[1].id)] {
            let (status, _) = send(
                &app,
                "POST",
                &uri,
                Some(token),
                Some(json!({ "claimedWinner": winner, "score": "2-1" })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let game = db.get_match(game.id).await.unwrap().unwrap();
        assert_eq!(game.status, MatchStatus::Disputed);
    }
}
