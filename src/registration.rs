use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    database::models::{
        EntryOutcome, NewParticipant, PaymentStatus, Tournament, TournamentMode, TournamentParticipant,
        TournamentStatus, User,
    },
    payments::IntentRequest,
    realtime::ServerEvent,
    utils::{error::ApiError, money::to_minor_units},
    AppState,
};

/// What the caller gets back from a successful registration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub participant: TournamentParticipant,
    /// Present when an entry fee has to be paid through the gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Registers a user, optionally on behalf of a team, for a tournament.
///
/// Every precondition is checked before the gateway is called, and the gateway is called before
/// any database write. The slot itself is taken atomically by the database, so losing a race for
/// the last slot still ends in `TournamentFull`, with the already created intent cancelled.
#[instrument(skip(state, user), fields(user = %user.username))]
pub async fn join_tournament(
    state: &AppState,
    user: &User,
    tournament_id: Uuid,
    team_id: Option<Uuid>,
) -> Result<JoinOutcome, ApiError> {
    let database = state.database.as_ref();

    let tournament = database
        .get_tournament(tournament_id)
        .await?
        .ok_or(ApiError::NotFound("Tournament"))?;

    if tournament.is_full() {
        return Err(ApiError::TournamentFull);
    }

    check_eligibility(state, user, &tournament, team_id).await?;

    let intent = if tournament.is_free() {
        None
    } else {
        let gateway = state.payments.as_ref().ok_or(ApiError::PaymentUnavailable)?;
        let request = IntentRequest {
            amount: to_minor_units(tournament.entry_fee)?,
            currency: state.currency.clone(),
            description: Some(format!("Entry fee for {}", tournament.name)),
            metadata: vec![
                ("tournamentId", tournament.id.to_string()),
                ("userId", user.id.to_string()),
                (
                    "teamId",
                    team_id.map(|id| id.to_string()).unwrap_or_default(),
                ),
            ],
        };
        Some(gateway.create_intent(&request).await?)
    };

    let entry = NewParticipant {
        tournament_id: tournament.id,
        user_id: user.id,
        team_id,
        payment_status: match intent {
            Some(_) => PaymentStatus::Pending,
            None => PaymentStatus::Completed,
        },
        payment_intent_id: intent.as_ref().map(|intent| intent.id.clone()),
    };

    let outcome = match database.enter_tournament(&entry).await {
        Ok(outcome) => outcome,
        Err(e) => {
            cancel_orphaned_intent(state, entry.payment_intent_id.as_deref()).await;
            return Err(e.into());
        }
    };

    let participant = match outcome {
        EntryOutcome::Entered(participant) => participant,
        rejected => {
            cancel_orphaned_intent(state, entry.payment_intent_id.as_deref()).await;
            return Err(match rejected {
                EntryOutcome::Full => ApiError::TournamentFull,
                EntryOutcome::AlreadyEntered => ApiError::AlreadyRegistered,
                EntryOutcome::TeamAlreadyEntered => ApiError::TeamAlreadyRegistered,
                _ => ApiError::NotFound("Tournament"),
            });
        }
    };

    let client_secret = match &intent {
        Some(created) => client_secret_for(state, created).await,
        None => None,
    };

    info!(
        "User {} joined tournament {} ({:?})",
        user.id, tournament.id, participant.payment_status
    );
    state.hub.broadcast_to_room(
        tournament.id,
        &ServerEvent::ParticipantJoined(participant.clone()),
    );

    Ok(JoinOutcome {
        participant,
        client_secret,
    })
}

async fn check_eligibility(
    state: &AppState,
    user: &User,
    tournament: &Tournament,
    team_id: Option<Uuid>,
) -> Result<(), ApiError> {
    let database = state.database.as_ref();

    if matches!(
        tournament.status,
        TournamentStatus::Completed | TournamentStatus::Cancelled
    ) {
        return Err(ApiError::BadRequest(format!(
            "Tournament is {} and no longer accepts entries",
            tournament.status
        )));
    }

    match (tournament.mode, team_id) {
        (TournamentMode::Team, None) => {
            return Err(ApiError::BadRequest(
                "This tournament requires a team".to_string(),
            ))
        }
        (_, Some(team_id)) => {
            database
                .get_team(team_id)
                .await?
                .ok_or(ApiError::NotFound("Team"))?;
            if !database.is_team_member(team_id, user.id).await? {
                return Err(ApiError::Forbidden("You are not a member of this team"));
            }
        }
        (TournamentMode::Solo, None) => {}
    }

    if database
        .get_participant(tournament.id, user.id)
        .await?
        .is_some()
    {
        return Err(ApiError::AlreadyRegistered);
    }

    if let Some(team_id) = team_id {
        if database
            .get_team_participant(tournament.id, team_id)
            .await?
            .is_some()
        {
            return Err(ApiError::TeamAlreadyRegistered);
        }
    }

    Ok(())
}

/// Re-fetches the intent for its client secret, falling back to the one returned on creation.
async fn client_secret_for(
    state: &AppState,
    created: &crate::payments::PaymentIntent,
) -> Option<String> {
    let gateway = state.payments.as_ref()?;
    match gateway.retrieve_intent(&created.id).await {
        Ok(intent) => intent.client_secret.or_else(|| created.client_secret.clone()),
        Err(e) => {
            warn!("Could not re-fetch payment intent {}: {:?}", created.id, e);
            created.client_secret.clone()
        }
    }
}

async fn cancel_orphaned_intent(state: &AppState, intent_id: Option<&str>) {
    let (Some(gateway), Some(intent_id)) = (state.payments.as_ref(), intent_id) else {
        return;
    };
    if let Err(e) = gateway.cancel_intent(intent_id).await {
        warn!("Could not cancel orphaned payment intent {}: {:?}", intent_id, e);
    }
}
