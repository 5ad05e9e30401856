use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum::{Display, EnumString};
use uuid::Uuid;

/// A registered account on the platform.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub is_banned: bool,
    /// Denormalized balance. Only ever changed in the same transaction as a ledger append.
    pub wallet_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Whether a tournament is entered by single players or by teams.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[sqlx(type_name = "tournament_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TournamentMode {
    #[default]
    Solo,
    Team,
}

/// The status of a tournament. Transitions are driven by admins only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[sqlx(type_name = "tournament_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TournamentStatus {
    #[default]
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

/// A tournament within the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: Uuid,
    pub name: String,
    pub game: String,
    pub description: Option<String>,
    pub mode: TournamentMode,
    pub max_participants: i32,
    pub current_participants: i32,
    pub entry_fee: Decimal,
    pub prize_pool: Decimal,
    pub status: TournamentStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    pub fn is_full(&self) -> bool {
        self.current_participants >= self.max_participants
    }

    pub fn is_free(&self) -> bool {
        self.entry_fee <= Decimal::ZERO
    }
}

/// Fields an admin supplies when creating or editing a tournament.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentDraft {
    pub name: String,
    pub game: String,
    pub description: Option<String>,
    #[serde(default)]
    pub mode: TournamentMode,
    pub max_participants: i32,
    pub entry_fee: Decimal,
    #[serde(default)]
    pub prize_pool: Decimal,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// A relational object that links a user (and optionally their team) to a tournament they've joined.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TournamentParticipant {
    pub id: Uuid,
    pub tournament_id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// A participant row that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub tournament_id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
}

/// Outcome of the atomic slot reservation made when entering a tournament.
#[derive(Debug)]
pub enum EntryOutcome {
    Entered(TournamentParticipant),
    /// No free slot was left at the moment of the conditional increment.
    Full,
    AlreadyEntered,
    /// Another member already entered the same team.
    TeamAlreadyEntered,
    /// The tournament disappeared between the read and the write.
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub tag: String,
    pub captain_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "team_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TeamRole {
    Captain,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: TeamRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString, Default,
)]
#[sqlx(type_name = "match_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Disputed,
}

/// A match within the database, associated with a particular tournament.
///
/// Participants are referenced by their participant row id. A missing second participant is a bye.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: Uuid,
    pub tournament_id: Uuid,
    pub round: i32,
    pub participant_a: Uuid,
    pub participant_b: Option<Uuid>,
    pub winner: Option<Uuid>,
    pub score: Option<String>,
    pub status: MatchStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn involves(&self, participant_id: Uuid) -> bool {
        self.participant_a == participant_id || self.participant_b == Some(participant_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchUpdate {
    pub winner: Option<Uuid>,
    pub score: Option<String>,
    pub status: Option<MatchStatus>,
}

/// A result claim submitted by one side of a match.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub id: Uuid,
    pub match_id: Uuid,
    pub reporter_id: Uuid,
    pub claimed_winner: Uuid,
    pub score: String,
    pub evidence_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TournamentEntry,
    PrizePayout,
    Refund,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// An append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub tournament_id: Option<Uuid>,
    pub payment_intent_id: Option<String>,
    pub description: Option<String>,
    pub admin_id: Option<Uuid>,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry that has not been written yet.
///
/// `balance_delta` is applied to the owner's balance in the same transaction as the insert.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub balance_delta: Decimal,
    pub tournament_id: Option<Uuid>,
    pub payment_intent_id: Option<String>,
    pub description: Option<String>,
    pub admin_id: Option<Uuid>,
    pub admin_note: Option<String>,
}

impl LedgerEntry {
    pub fn new(user_id: Uuid, kind: TransactionKind, amount: Decimal) -> Self {
        Self {
            user_id,
            kind,
            amount,
            status: TransactionStatus::Completed,
            balance_delta: Decimal::ZERO,
            tournament_id: None,
            payment_intent_id: None,
            description: None,
            admin_id: None,
            admin_note: None,
        }
    }
}

impl LedgerEntry {
    /// The refund returning the funds of a failed withdrawal, keyed on the withdrawal so it can
    /// only be recorded once.
    pub fn refund_of(withdrawal: &WalletTransaction, admin_id: Uuid) -> Self {
        let mut refund = Self::new(withdrawal.user_id, TransactionKind::Refund, withdrawal.amount);
        refund.balance_delta = withdrawal.amount;
        refund.payment_intent_id = Some(format!("refund:{}", withdrawal.id));
        refund.description = Some("Returned funds from a failed withdrawal".to_string());
        refund.admin_id = Some(admin_id);
        refund
    }
}

/// Outcome of moving a pending transaction to its final status.
#[derive(Debug)]
pub enum SettlementOutcome {
    Settled {
        transaction: WalletTransaction,
        /// Set when a failed withdrawal had its funds returned.
        refund: Option<WalletTransaction>,
    },
    /// The transaction had already left `pending`; nothing was written.
    NotPending(TransactionStatus),
    Missing,
}

/// Outcome of appending a ledger entry.
#[derive(Debug)]
pub enum LedgerOutcome {
    Recorded(WalletTransaction),
    /// A row with the same payment intent already exists; nothing was written.
    Duplicate,
    /// Applying the delta would take the balance below zero; nothing was written.
    InsufficientFunds,
    UserMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, EnumString,
)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub message: String,
    pub status: TicketStatus,
    pub admin_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSetting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminLog {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub users: i64,
    pub tournaments: i64,
    pub open_tickets: i64,
    pub total_deposits: Decimal,
}
