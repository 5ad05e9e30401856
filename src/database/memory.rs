use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    models::*, page_offset, MatchDatabase, NotificationDatabase, SettingsDatabase,
    SupportDatabase, TeamDatabase, TournamentDatabase, UserDatabase, WalletDatabase, PAGE_SIZE,
};
use crate::ServerError;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    sessions: Vec<(String, Uuid)>,
    tournaments: Vec<Tournament>,
    participants: Vec<TournamentParticipant>,
    teams: Vec<Team>,
    team_members: Vec<TeamMember>,
    matches: Vec<Match>,
    match_reports: Vec<MatchReport>,
    transactions: Vec<WalletTransaction>,
    notifications: Vec<Notification>,
    tickets: Vec<SupportTicket>,
    settings: Vec<PlatformSetting>,
    admin_logs: Vec<AdminLog>,
}

/// Every table behind one lock, so each method is as atomic as a single Postgres transaction.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

fn paginate<T: Clone>(rows: impl Iterator<Item = T>, page: Option<i64>) -> Vec<T> {
    rows.skip(page_offset(page) as usize)
        .take(PAGE_SIZE as usize)
        .collect()
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user with a session token equal to the username.
    pub fn add_user(&self, username: &str, is_admin: bool) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            is_admin,
            is_banned: false,
            wallet_balance: Decimal::ZERO,
            created_at: Utc::now(),
        };
        let mut tables = self.tables.lock().unwrap();
        tables.sessions.push((username.to_string(), user.id));
        tables.users.push(user.clone());
        user
    }

    pub fn add_tournament(&self, tournament: Tournament) -> Tournament {
        self.tables
            .lock()
            .unwrap()
            .tournaments
            .push(tournament.clone());
        tournament
    }

    pub fn tournament(&self, tournament_id: Uuid) -> Option<Tournament> {
        self.tables
            .lock()
            .unwrap()
            .tournaments
            .iter()
            .find(|t| t.id == tournament_id)
            .cloned()
    }

    pub fn participants(&self) -> Vec<TournamentParticipant> {
        self.tables.lock().unwrap().participants.clone()
    }

    pub fn transactions(&self) -> Vec<WalletTransaction> {
        self.tables.lock().unwrap().transactions.clone()
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.tables
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
    }

    pub fn set_balance(&self, user_id: Uuid, balance: Decimal) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(user) = tables.users.iter_mut().find(|u| u.id == user_id) {
            user.wallet_balance = balance;
        }
    }

    fn apply_ledger(tables: &mut Tables, entry: &LedgerEntry) -> LedgerOutcome {
        let Some(user) = tables.users.iter().find(|u| u.id == entry.user_id) else {
            return LedgerOutcome::UserMissing;
        };
        if user.wallet_balance + entry.balance_delta < Decimal::ZERO {
            return LedgerOutcome::InsufficientFunds;
        }
        if let Some(intent) = &entry.payment_intent_id {
            if tables
                .transactions
                .iter()
                .any(|t| t.payment_intent_id.as_ref() == Some(intent))
            {
                return LedgerOutcome::Duplicate;
            }
        }

        if let Some(user) = tables.users.iter_mut().find(|u| u.id == entry.user_id) {
            user.wallet_balance += entry.balance_delta;
        }
        let row = WalletTransaction {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            kind: entry.kind,
            amount: entry.amount,
            status: entry.status,
            tournament_id: entry.tournament_id,
            payment_intent_id: entry.payment_intent_id.clone(),
            description: entry.description.clone(),
            admin_id: entry.admin_id,
            admin_note: entry.admin_note.clone(),
            created_at: Utc::now(),
        };
        tables.transactions.push(row.clone());
        LedgerOutcome::Recorded(row)
    }
}

#[async_trait]
impl UserDatabase for MemoryDatabase {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ServerError> {
        Ok(self.user(user_id))
    }

    async fn get_user_by_session(&self, token: &str) -> Result<Option<User>, ServerError> {
        let tables = self.tables.lock().unwrap();
        let user = tables
            .sessions
            .iter()
            .find(|(t, _)| t == token)
            .and_then(|(_, id)| tables.users.iter().find(|u| u.id == *id))
            .cloned();
        Ok(user)
    }

    async fn list_users(&self, page: Option<i64>) -> Result<Vec<User>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(paginate(tables.users.iter().rev().cloned(), page))
    }

    async fn set_user_flags(
        &self,
        user_id: Uuid,
        is_admin: Option<bool>,
        is_banned: Option<bool>,
    ) -> Result<Option<User>, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let user = tables.users.iter_mut().find(|u| u.id == user_id).map(|user| {
            user.is_admin = is_admin.unwrap_or(user.is_admin);
            user.is_banned = is_banned.unwrap_or(user.is_banned);
            user.clone()
        });
        Ok(user)
    }

    async fn count_users(&self) -> Result<i64, ServerError> {
        Ok(self.tables.lock().unwrap().users.len() as i64)
    }
}

#[async_trait]
impl TournamentDatabase for MemoryDatabase {
    async fn list_tournaments(
        &self,
        page: Option<i64>,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, ServerError> {
        let tables = self.tables.lock().unwrap();
        let rows = tables
            .tournaments
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned();
        Ok(paginate(rows, page))
    }

    async fn get_tournament(&self, tournament_id: Uuid) -> Result<Option<Tournament>, ServerError> {
        Ok(self.tournament(tournament_id))
    }

    async fn create_tournament(
        &self,
        draft: &TournamentDraft,
        created_by: Uuid,
    ) -> Result<Tournament, ServerError> {
        let tournament = Tournament {
            id: Uuid::new_v4(),
            name: draft.name.clone(),
            game: draft.game.clone(),
            description: draft.description.clone(),
            mode: draft.mode,
            max_participants: draft.max_participants,
            current_participants: 0,
            entry_fee: draft.entry_fee,
            prize_pool: draft.prize_pool,
            status: TournamentStatus::Upcoming,
            start_time: draft.start_time,
            created_by: Some(created_by),
            created_at: Utc::now(),
        };
        Ok(self.add_tournament(tournament))
    }

    async fn update_tournament(
        &self,
        tournament_id: Uuid,
        draft: &TournamentDraft,
    ) -> Result<Option<Tournament>, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(tournament) = tables.tournaments.iter_mut().find(|t| t.id == tournament_id) else {
            return Ok(None);
        };
        if draft.max_participants < tournament.current_participants {
            return Err(ServerError::msg("max_participants below current_participants"));
        }
        tournament.name = draft.name.clone();
        tournament.game = draft.game.clone();
        tournament.description = draft.description.clone();
        tournament.mode = draft.mode;
        tournament.max_participants = draft.max_participants;
        tournament.entry_fee = draft.entry_fee;
        tournament.prize_pool = draft.prize_pool;
        tournament.start_time = draft.start_time;
        Ok(Some(tournament.clone()))
    }

    async fn set_tournament_status(
        &self,
        tournament_id: Uuid,
        status: TournamentStatus,
    ) -> Result<Option<Tournament>, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let tournament = tables
            .tournaments
            .iter_mut()
            .find(|t| t.id == tournament_id)
            .map(|t| {
                t.status = status;
                t.clone()
            });
        Ok(tournament)
    }

    async fn delete_tournament(&self, tournament_id: Uuid) -> Result<bool, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.tournaments.len();
        tables.tournaments.retain(|t| t.id != tournament_id);
        tables.participants.retain(|p| p.tournament_id != tournament_id);
        Ok(tables.tournaments.len() < before)
    }

    async fn enter_tournament(&self, entry: &NewParticipant) -> Result<EntryOutcome, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(index) = tables
            .tournaments
            .iter()
            .position(|t| t.id == entry.tournament_id)
        else {
            return Ok(EntryOutcome::Missing);
        };
        if tables.tournaments[index].is_full() {
            return Ok(EntryOutcome::Full);
        }
        if tables
            .participants
            .iter()
            .any(|p| p.tournament_id == entry.tournament_id && p.user_id == entry.user_id)
        {
            return Ok(EntryOutcome::AlreadyEntered);
        }
        if entry.team_id.is_some()
            && tables
                .participants
                .iter()
                .any(|p| p.tournament_id == entry.tournament_id && p.team_id == entry.team_id)
        {
            return Ok(EntryOutcome::TeamAlreadyEntered);
        }

        tables.tournaments[index].current_participants += 1;
        let participant = TournamentParticipant {
            id: Uuid::new_v4(),
            tournament_id: entry.tournament_id,
            user_id: entry.user_id,
            team_id: entry.team_id,
            payment_status: entry.payment_status,
            payment_intent_id: entry.payment_intent_id.clone(),
            joined_at: Utc::now(),
        };
        tables.participants.push(participant.clone());
        Ok(EntryOutcome::Entered(participant))
    }

    async fn get_participant(
        &self,
        tournament_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TournamentParticipant>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .participants
            .iter()
            .find(|p| p.tournament_id == tournament_id && p.user_id == user_id)
            .cloned())
    }

    async fn get_team_participant(
        &self,
        tournament_id: Uuid,
        team_id: Uuid,
    ) -> Result<Option<TournamentParticipant>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .participants
            .iter()
            .find(|p| p.tournament_id == tournament_id && p.team_id == Some(team_id))
            .cloned())
    }

    async fn get_participant_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<TournamentParticipant>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .participants
            .iter()
            .find(|p| p.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn set_participant_payment_status(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), ServerError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(p) = tables.participants.iter_mut().find(|p| p.id == participant_id) {
            p.payment_status = status;
        }
        Ok(())
    }

    async fn list_participants(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TournamentParticipant>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect())
    }

    async fn count_tournaments(&self) -> Result<i64, ServerError> {
        Ok(self.tables.lock().unwrap().tournaments.len() as i64)
    }
}

#[async_trait]
impl TeamDatabase for MemoryDatabase {
    async fn create_team(&self, name: &str, tag: &str, captain_id: Uuid) -> Result<Team, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.teams.iter().any(|t| t.name == name) {
            return Err(ServerError::msg("duplicate team name"));
        }
        let team = Team {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tag: tag.to_string(),
            captain_id,
            created_at: Utc::now(),
        };
        tables.teams.push(team.clone());
        tables.team_members.push(TeamMember {
            team_id: team.id,
            user_id: captain_id,
            role: TeamRole::Captain,
            joined_at: Utc::now(),
        });
        Ok(team)
    }

    async fn get_team(&self, team_id: Uuid) -> Result<Option<Team>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.teams.iter().find(|t| t.id == team_id).cloned())
    }

    async fn get_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMember>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .team_members
            .iter()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn get_user_teams(&self, user_id: Uuid) -> Result<Vec<Team>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .teams
            .iter()
            .filter(|t| {
                tables
                    .team_members
                    .iter()
                    .any(|m| m.team_id == t.id && m.user_id == user_id)
            })
            .cloned()
            .collect())
    }

    async fn add_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        if tables
            .team_members
            .iter()
            .any(|m| m.team_id == team_id && m.user_id == user_id)
        {
            return Ok(false);
        }
        tables.team_members.push(TeamMember {
            team_id,
            user_id,
            role: TeamRole::Member,
            joined_at: Utc::now(),
        });
        Ok(true)
    }

    async fn remove_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.team_members.len();
        tables
            .team_members
            .retain(|m| !(m.team_id == team_id && m.user_id == user_id));
        Ok(tables.team_members.len() < before)
    }

    async fn is_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .team_members
            .iter()
            .any(|m| m.team_id == team_id && m.user_id == user_id))
    }
}

#[async_trait]
impl MatchDatabase for MemoryDatabase {
    async fn create_match(
        &self,
        tournament_id: Uuid,
        round: i32,
        participant_a: Uuid,
        participant_b: Option<Uuid>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Match, ServerError> {
        let bracket = Match {
            id: Uuid::new_v4(),
            tournament_id,
            round,
            participant_a,
            participant_b,
            winner: None,
            score: None,
            status: MatchStatus::Scheduled,
            scheduled_at,
        };
        self.tables.lock().unwrap().matches.push(bracket.clone());
        Ok(bracket)
    }

    async fn get_match(&self, match_id: Uuid) -> Result<Option<Match>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.matches.iter().find(|m| m.id == match_id).cloned())
    }

    async fn list_matches(&self, tournament_id: Uuid) -> Result<Vec<Match>, ServerError> {
        let tables = self.tables.lock().unwrap();
        let mut matches: Vec<Match> = tables
            .matches
            .iter()
            .filter(|m| m.tournament_id == tournament_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| m.round);
        Ok(matches)
    }

    async fn update_match(
        &self,
        match_id: Uuid,
        update: &MatchUpdate,
    ) -> Result<Option<Match>, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let bracket = tables.matches.iter_mut().find(|m| m.id == match_id).map(|m| {
            if let Some(winner) = update.winner {
                m.winner = Some(winner);
            }
            if let Some(score) = &update.score {
                m.score = Some(score.clone());
            }
            if let Some(status) = update.status {
                m.status = status;
            }
            m.clone()
        });
        Ok(bracket)
    }

    async fn create_match_report(
        &self,
        match_id: Uuid,
        reporter_id: Uuid,
        claimed_winner: Uuid,
        score: &str,
        evidence_url: Option<&str>,
    ) -> Result<MatchReport, ServerError> {
        let report = MatchReport {
            id: Uuid::new_v4(),
            match_id,
            reporter_id,
            claimed_winner,
            score: score.to_string(),
            evidence_url: evidence_url.map(str::to_string),
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().match_reports.push(report.clone());
        Ok(report)
    }

    async fn list_match_reports(&self, match_id: Uuid) -> Result<Vec<MatchReport>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .match_reports
            .iter()
            .filter(|r| r.match_id == match_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WalletDatabase for MemoryDatabase {
    async fn record_transaction(&self, entry: &LedgerEntry) -> Result<LedgerOutcome, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        Ok(Self::apply_ledger(&mut tables, entry))
    }

    async fn settle_entry_payment(
        &self,
        participant_id: Uuid,
        entry: &LedgerEntry,
    ) -> Result<LedgerOutcome, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let outcome = Self::apply_ledger(&mut tables, entry);
        if let LedgerOutcome::Recorded(_) = outcome {
            if let Some(p) = tables.participants.iter_mut().find(|p| p.id == participant_id) {
                p.payment_status = PaymentStatus::Completed;
            }
        }
        Ok(outcome)
    }

    async fn list_user_transactions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_transactions(&self, page: Option<i64>) -> Result<Vec<WalletTransaction>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(paginate(tables.transactions.iter().rev().cloned(), page))
    }

    async fn settle_transaction(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        admin_id: Uuid,
    ) -> Result<SettlementOutcome, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(transaction) = tables
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
        else {
            return Ok(SettlementOutcome::Missing);
        };
        if transaction.status != TransactionStatus::Pending {
            return Ok(SettlementOutcome::NotPending(transaction.status));
        }
        transaction.status = status;
        let transaction = transaction.clone();

        let mut refund = None;
        if transaction.kind == TransactionKind::Withdrawal && status == TransactionStatus::Failed {
            let entry = LedgerEntry::refund_of(&transaction, admin_id);
            if let LedgerOutcome::Recorded(row) = Self::apply_ledger(&mut tables, &entry) {
                refund = Some(row);
            }
        }

        Ok(SettlementOutcome::Settled { transaction, refund })
    }

    async fn total_completed_deposits(&self) -> Result<Decimal, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Deposit && t.status == TransactionStatus::Completed)
            .map(|t| t.amount)
            .sum())
    }
}

#[async_trait]
impl NotificationDatabase for MemoryDatabase {
    async fn create_notification(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<Notification, ServerError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .notifications
            .push(notification.clone());
        Ok(notification)
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        match tables
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.user_id == user_id)
        {
            Some(n) => {
                n.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SupportDatabase for MemoryDatabase {
    async fn create_ticket(
        &self,
        user_id: Uuid,
        subject: &str,
        message: &str,
    ) -> Result<SupportTicket, ServerError> {
        let ticket = SupportTicket {
            id: Uuid::new_v4(),
            user_id,
            subject: subject.to_string(),
            message: message.to_string(),
            status: TicketStatus::Open,
            admin_response: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.tables.lock().unwrap().tickets.push(ticket.clone());
        Ok(ticket)
    }

    async fn list_user_tickets(&self, user_id: Uuid) -> Result<Vec<SupportTicket>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .tickets
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<SupportTicket>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .tickets
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect())
    }

    async fn update_ticket(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
        admin_response: Option<&str>,
    ) -> Result<Option<SupportTicket>, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let ticket = tables.tickets.iter_mut().find(|t| t.id == ticket_id).map(|t| {
            t.status = status;
            if let Some(response) = admin_response {
                t.admin_response = Some(response.to_string());
            }
            t.updated_at = Utc::now();
            t.clone()
        });
        Ok(ticket)
    }

    async fn count_open_tickets(&self) -> Result<i64, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .tickets
            .iter()
            .filter(|t| matches!(t.status, TicketStatus::Open | TicketStatus::InProgress))
            .count() as i64)
    }
}

#[async_trait]
impl SettingsDatabase for MemoryDatabase {
    async fn get_settings(&self) -> Result<Vec<PlatformSetting>, ServerError> {
        Ok(self.tables.lock().unwrap().settings.clone())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<PlatformSetting, ServerError> {
        let mut tables = self.tables.lock().unwrap();
        let setting = PlatformSetting {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        tables.settings.retain(|s| s.key != key);
        tables.settings.push(setting.clone());
        Ok(setting)
    }

    async fn append_admin_log(
        &self,
        admin_id: Uuid,
        action: &str,
        details: serde_json::Value,
    ) -> Result<(), ServerError> {
        self.tables.lock().unwrap().admin_logs.push(AdminLog {
            id: Uuid::new_v4(),
            admin_id,
            action: action.to_string(),
            details,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_admin_logs(&self, limit: i64) -> Result<Vec<AdminLog>, ServerError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .admin_logs
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
