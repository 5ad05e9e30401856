use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use super::PaymentIntent;
use crate::{
    database::{
        models::{LedgerEntry, LedgerOutcome, PaymentStatus, TransactionKind, WalletTransaction},
        Database,
    },
    utils::{error::ApiError, money::from_minor_units},
    ServerError,
};

/// Maximum age of a signed event, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verifies a `Stripe-Signature` header against the raw request body.
///
/// The header has the form `t=<unix time>,v1=<hex hmac>[,v1=...]`. The signed payload is
/// `"<t>.<body>"` keyed with the endpoint's signing secret.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), ApiError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ApiError::InvalidSignature)?;
    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(ApiError::InvalidSignature);
    }

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| ApiError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|signature| match hex::decode(signature) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if matched {
        Ok(())
    } else {
        Err(ApiError::InvalidSignature)
    }
}

/// A gateway event, as delivered to the webhook endpoint.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// What a webhook event changed.
#[derive(Debug)]
pub enum WebhookOutcome {
    Deposited(WalletTransaction),
    EntrySettled(WalletTransaction),
    EntryFailed(Uuid),
    /// The event was already applied by an earlier delivery.
    Duplicate,
    Ignored,
}

/// Applies a verified gateway event to the database.
///
/// Entry-fee intents carry a `tournamentId` in their metadata; they settle the participant row
/// and are recorded in the ledger without touching the wallet balance. All other succeeded
/// intents are wallet deposits for the `userId` in their metadata.
pub async fn handle_event(
    database: &dyn Database,
    event: &StripeEvent,
) -> Result<WebhookOutcome, ServerError> {
    match event.kind.as_str() {
        "payment_intent.succeeded" => {
            let intent: PaymentIntent = serde_json::from_value(event.data.object.clone())?;
            match intent.metadata_value("tournamentId") {
                Some(_) => settle_entry(database, &intent).await,
                None => credit_deposit(database, &intent).await,
            }
        }
        "payment_intent.payment_failed" => {
            let intent: PaymentIntent = serde_json::from_value(event.data.object.clone())?;
            match database.get_participant_by_intent(&intent.id).await? {
                Some(participant) => {
                    database
                        .set_participant_payment_status(participant.id, PaymentStatus::Failed)
                        .await?;
                    info!("Entry payment {} failed for participant {}", intent.id, participant.id);
                    Ok(WebhookOutcome::EntryFailed(participant.id))
                }
                None => Ok(WebhookOutcome::Ignored),
            }
        }
        other => {
            info!("Ignoring gateway event {} of type {}", event.id, other);
            Ok(WebhookOutcome::Ignored)
        }
    }
}

async fn settle_entry(
    database: &dyn Database,
    intent: &PaymentIntent,
) -> Result<WebhookOutcome, ServerError> {
    let Some(participant) = database.get_participant_by_intent(&intent.id).await? else {
        warn!(
            "Entry payment {} succeeded but no participant references it",
            intent.id
        );
        return Ok(WebhookOutcome::Ignored);
    };

    let mut entry = LedgerEntry::new(
        participant.user_id,
        TransactionKind::TournamentEntry,
        from_minor_units(intent.settled_amount()),
    );
    entry.tournament_id = Some(participant.tournament_id);
    entry.payment_intent_id = Some(intent.id.clone());
    entry.description = Some("Tournament entry fee".to_string());

    match database.settle_entry_payment(participant.id, &entry).await? {
        LedgerOutcome::Recorded(row) => {
            info!("Settled entry payment {} for participant {}", intent.id, participant.id);
            Ok(WebhookOutcome::EntrySettled(row))
        }
        LedgerOutcome::Duplicate => Ok(WebhookOutcome::Duplicate),
        LedgerOutcome::InsufficientFunds | LedgerOutcome::UserMissing => {
            warn!("Entry payment {} could not be recorded", intent.id);
            Ok(WebhookOutcome::Ignored)
        }
    }
}

async fn credit_deposit(
    database: &dyn Database,
    intent: &PaymentIntent,
) -> Result<WebhookOutcome, ServerError> {
    let Some(user_id) = intent
        .metadata_value("userId")
        .and_then(|id| Uuid::parse_str(id).ok())
    else {
        warn!("Deposit {} carries no usable userId metadata", intent.id);
        return Ok(WebhookOutcome::Ignored);
    };

    let amount = from_minor_units(intent.settled_amount());
    let mut entry = LedgerEntry::new(user_id, TransactionKind::Deposit, amount);
    entry.balance_delta = amount;
    entry.payment_intent_id = Some(intent.id.clone());
    entry.description = intent.metadata_value("description").map(str::to_string);

    match database.record_transaction(&entry).await? {
        LedgerOutcome::Recorded(row) => {
            info!("Credited deposit {} of {} to user {}", intent.id, amount, user_id);
            Ok(WebhookOutcome::Deposited(row))
        }
        LedgerOutcome::Duplicate => Ok(WebhookOutcome::Duplicate),
        LedgerOutcome::UserMissing | LedgerOutcome::InsufficientFunds => {
            warn!("Deposit {} references unknown user {}", intent.id, user_id);
            Ok(WebhookOutcome::Ignored)
        }
    }
}

/// Builds a valid signature header. Used by tests and local tooling that replays events.
#[cfg(test)]
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
