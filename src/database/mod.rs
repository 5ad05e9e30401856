use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::ServerError;
use models::*;

/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// An in-memory implementation of every database trait, used by the tests.
#[cfg(test)]
pub mod memory;

/// Number of rows returned by every paginated listing.
pub const PAGE_SIZE: i64 = 20;

/// Converts a 1-based page number into a row offset.
///
/// Pages past the last representable offset are clamped to it.
pub fn page_offset(page: Option<i64>) -> i64 {
    (page.unwrap_or(1).clamp(1, i64::MAX / PAGE_SIZE) - 1) * PAGE_SIZE
}

/// Everything the server needs from its storage.
///
/// Changing the implementor only changes which database is used; changing the schema means
/// changing the traits below as well as all their models.
pub trait Database:
    UserDatabase
    + TournamentDatabase
    + TeamDatabase
    + MatchDatabase
    + WalletDatabase
    + NotificationDatabase
    + SupportDatabase
    + SettingsDatabase
    + Send
    + Sync
{
}

impl<T> Database for T where
    T: UserDatabase
        + TournamentDatabase
        + TeamDatabase
        + MatchDatabase
        + WalletDatabase
        + NotificationDatabase
        + SupportDatabase
        + SettingsDatabase
        + Send
        + Sync
{
}

/// The Postgres database used by the platform.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(db_url: &str) -> Result<Self, ServerError> {
        let pool = PgPool::connect(db_url).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), ServerError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
pub trait UserDatabase {
    /// Retrieves a user by id.
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ServerError>;

    /// Resolves an unexpired session token to its user.
    async fn get_user_by_session(&self, token: &str) -> Result<Option<User>, ServerError>;

    /// Retrieves one page of users, newest first.
    async fn list_users(&self, page: Option<i64>) -> Result<Vec<User>, ServerError>;

    /// Updates the admin and ban flags of a user. `None` leaves a flag unchanged.
    async fn set_user_flags(
        &self,
        user_id: Uuid,
        is_admin: Option<bool>,
        is_banned: Option<bool>,
    ) -> Result<Option<User>, ServerError>;

    async fn count_users(&self) -> Result<i64, ServerError>;
}

#[async_trait]
impl UserDatabase for PgDatabase {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ServerError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_user_by_session(&self, token: &str) -> Result<Option<User>, ServerError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT users.*
            FROM sessions
            JOIN users ON sessions.user_id = users.id
            WHERE sessions.token = $1 AND sessions.expires_at > now()
            LIMIT 1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_users(&self, page: Option<i64>) -> Result<Vec<User>, ServerError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(PAGE_SIZE)
        .bind(page_offset(page))
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn set_user_flags(
        &self,
        user_id: Uuid,
        is_admin: Option<bool>,
        is_banned: Option<bool>,
    ) -> Result<Option<User>, ServerError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_admin = COALESCE($2, is_admin),
                is_banned = COALESCE($3, is_banned)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(is_admin)
        .bind(is_banned)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn count_users(&self) -> Result<i64, ServerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
pub trait TournamentDatabase {
    /// Retrieves one page of tournaments, optionally filtered by status, soonest first.
    async fn list_tournaments(
        &self,
        page: Option<i64>,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, ServerError>;

    async fn get_tournament(&self, tournament_id: Uuid) -> Result<Option<Tournament>, ServerError>;

    async fn create_tournament(
        &self,
        draft: &TournamentDraft,
        created_by: Uuid,
    ) -> Result<Tournament, ServerError>;

    /// Replaces the editable fields of a tournament.
    ///
    /// The participant counter is left untouched, so lowering the capacity below the current
    /// participant count is rejected by the database.
    async fn update_tournament(
        &self,
        tournament_id: Uuid,
        draft: &TournamentDraft,
    ) -> Result<Option<Tournament>, ServerError>;

    async fn set_tournament_status(
        &self,
        tournament_id: Uuid,
        status: TournamentStatus,
    ) -> Result<Option<Tournament>, ServerError>;

    /// Returns whether a tournament was deleted.
    async fn delete_tournament(&self, tournament_id: Uuid) -> Result<bool, ServerError>;

    /// Reserves a slot and writes the participant row in one transaction.
    ///
    /// The slot is taken with a conditional increment, so two concurrent entries can never both
    /// take the last slot.
    async fn enter_tournament(&self, entry: &NewParticipant) -> Result<EntryOutcome, ServerError>;

    async fn get_participant(
        &self,
        tournament_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TournamentParticipant>, ServerError>;

    /// Retrieves the entry made on behalf of a team, by whichever member made it.
    async fn get_team_participant(
        &self,
        tournament_id: Uuid,
        team_id: Uuid,
    ) -> Result<Option<TournamentParticipant>, ServerError>;

    async fn get_participant_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<TournamentParticipant>, ServerError>;

    async fn set_participant_payment_status(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), ServerError>;

    async fn list_participants(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TournamentParticipant>, ServerError>;

    async fn count_tournaments(&self) -> Result<i64, ServerError>;
}

#[async_trait]
impl TournamentDatabase for PgDatabase {
    async fn list_tournaments(
        &self,
        page: Option<i64>,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, ServerError> {
        let tournaments = sqlx::query_as::<_, Tournament>(
            r#"
            SELECT * FROM tournaments
            WHERE ($1::tournament_status IS NULL OR status = $1)
            ORDER BY start_time ASC NULLS LAST, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(PAGE_SIZE)
        .bind(page_offset(page))
        .fetch_all(&self.pool)
        .await?;

        Ok(tournaments)
    }

    async fn get_tournament(&self, tournament_id: Uuid) -> Result<Option<Tournament>, ServerError> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            SELECT * FROM tournaments WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(tournament_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn create_tournament(
        &self,
        draft: &TournamentDraft,
        created_by: Uuid,
    ) -> Result<Tournament, ServerError> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            INSERT INTO tournaments (id, name, game, description, mode, max_participants, entry_fee, prize_pool, start_time, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.name)
        .bind(&draft.game)
        .bind(&draft.description)
        .bind(draft.mode)
        .bind(draft.max_participants)
        .bind(draft.entry_fee)
        .bind(draft.prize_pool)
        .bind(draft.start_time)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn update_tournament(
        &self,
        tournament_id: Uuid,
        draft: &TournamentDraft,
    ) -> Result<Option<Tournament>, ServerError> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            UPDATE tournaments
            SET name = $2,
                game = $3,
                description = $4,
                mode = $5,
                max_participants = $6,
                entry_fee = $7,
                prize_pool = $8,
                start_time = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(tournament_id)
        .bind(&draft.name)
        .bind(&draft.game)
        .bind(&draft.description)
        .bind(draft.mode)
        .bind(draft.max_participants)
        .bind(draft.entry_fee)
        .bind(draft.prize_pool)
        .bind(draft.start_time)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn set_tournament_status(
        &self,
        tournament_id: Uuid,
        status: TournamentStatus,
    ) -> Result<Option<Tournament>, ServerError> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            UPDATE tournaments
            SET status = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(tournament_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tournament)
    }

    async fn delete_tournament(&self, tournament_id: Uuid) -> Result<bool, ServerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM tournaments
            WHERE id = $1
            "#,
        )
        .bind(tournament_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn enter_tournament(&self, entry: &NewParticipant) -> Result<EntryOutcome, ServerError> {
        let mut tx = self.pool.begin().await?;

        let reserved: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE tournaments
            SET current_participants = current_participants + 1
            WHERE id = $1 AND current_participants < max_participants
            RETURNING id
            "#,
        )
        .bind(entry.tournament_id)
        .fetch_optional(&mut *tx)
        .await?;

        if reserved.is_none() {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM tournaments WHERE id = $1")
                .bind(entry.tournament_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return Ok(match exists {
                Some(_) => EntryOutcome::Full,
                None => EntryOutcome::Missing,
            });
        }

        let participant = sqlx::query_as::<_, TournamentParticipant>(
            r#"
            INSERT INTO tournament_participants (id, tournament_id, user_id, team_id, payment_status, payment_intent_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.tournament_id)
        .bind(entry.user_id)
        .bind(entry.team_id)
        .bind(entry.payment_status)
        .bind(&entry.payment_intent_id)
        .fetch_optional(&mut *tx)
        .await?;

        match participant {
            Some(participant) => {
                tx.commit().await?;
                Ok(EntryOutcome::Entered(participant))
            }
            None => {
                let user_entered: Option<Uuid> = sqlx::query_scalar(
                    "SELECT id FROM tournament_participants WHERE tournament_id = $1 AND user_id = $2",
                )
                .bind(entry.tournament_id)
                .bind(entry.user_id)
                .fetch_optional(&mut *tx)
                .await?;
                tx.rollback().await?;

                Ok(match (user_entered, entry.team_id) {
                    (None, Some(_)) => EntryOutcome::TeamAlreadyEntered,
                    _ => EntryOutcome::AlreadyEntered,
                })
            }
        }
    }

    async fn get_participant(
        &self,
        tournament_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TournamentParticipant>, ServerError> {
        let participant = sqlx::query_as::<_, TournamentParticipant>(
            r#"
            SELECT * FROM tournament_participants
            WHERE tournament_id = $1 AND user_id = $2
            LIMIT 1
            "#,
        )
        .bind(tournament_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participant)
    }

    async fn get_team_participant(
        &self,
        tournament_id: Uuid,
        team_id: Uuid,
    ) -> Result<Option<TournamentParticipant>, ServerError> {
        let participant = sqlx::query_as::<_, TournamentParticipant>(
            r#"
            SELECT * FROM tournament_participants
            WHERE tournament_id = $1 AND team_id = $2
            LIMIT 1
            "#,
        )
        .bind(tournament_id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participant)
    }

    async fn get_participant_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<TournamentParticipant>, ServerError> {
        let participant = sqlx::query_as::<_, TournamentParticipant>(
            r#"
            SELECT * FROM tournament_participants
            WHERE payment_intent_id = $1
            LIMIT 1
            "#,
        )
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participant)
    }

    async fn set_participant_payment_status(
        &self,
        participant_id: Uuid,
        status: PaymentStatus,
    ) -> Result<(), ServerError> {
        sqlx::query(
            r#"
            UPDATE tournament_participants
            SET payment_status = $2
            WHERE id = $1
            "#,
        )
        .bind(participant_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_participants(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TournamentParticipant>, ServerError> {
        let participants = sqlx::query_as::<_, TournamentParticipant>(
            r#"
            SELECT * FROM tournament_participants
            WHERE tournament_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    async fn count_tournaments(&self) -> Result<i64, ServerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tournaments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
pub trait TeamDatabase {
    /// Creates a team and its captain membership in one transaction.
    async fn create_team(&self, name: &str, tag: &str, captain_id: Uuid) -> Result<Team, ServerError>;

    async fn get_team(&self, team_id: Uuid) -> Result<Option<Team>, ServerError>;

    async fn get_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMember>, ServerError>;

    /// Retrieves every team the user is a member of, captained or not.
    async fn get_user_teams(&self, user_id: Uuid) -> Result<Vec<Team>, ServerError>;

    /// Returns false if the user was already a member.
    async fn add_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError>;

    /// Returns false if the user was not a member.
    async fn remove_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError>;

    async fn is_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError>;
}

#[async_trait]
impl TeamDatabase for PgDatabase {
    async fn create_team(&self, name: &str, tag: &str, captain_id: Uuid) -> Result<Team, ServerError> {
        let mut tx = self.pool.begin().await?;

        let team = sqlx::query_as::<_, Team>(
            r#"
            INSERT INTO teams (id, name, tag, captain_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(tag)
        .bind(captain_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, role)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(team.id)
        .bind(captain_id)
        .bind(TeamRole::Captain)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(team)
    }

    async fn get_team(&self, team_id: Uuid) -> Result<Option<Team>, ServerError> {
        let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = $1 LIMIT 1")
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(team)
    }

    async fn get_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMember>, ServerError> {
        let members = sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT * FROM team_members
            WHERE team_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn get_user_teams(&self, user_id: Uuid) -> Result<Vec<Team>, ServerError> {
        let teams = sqlx::query_as::<_, Team>(
            r#"
            SELECT teams.*
            FROM teams
            INNER JOIN team_members ON teams.id = team_members.team_id
            WHERE team_members.user_id = $1
            ORDER BY teams.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }

    async fn add_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (team_id, user_id) DO NOTHING
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .bind(TeamRole::Member)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM team_members
            WHERE team_id = $1 AND user_id = $2
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_team_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool, ServerError> {
        let member: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM team_members WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member.is_some())
    }
}

#[async_trait]
pub trait MatchDatabase {
    async fn create_match(
        &self,
        tournament_id: Uuid,
        round: i32,
        participant_a: Uuid,
        participant_b: Option<Uuid>,
        scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Match, ServerError>;

    async fn get_match(&self, match_id: Uuid) -> Result<Option<Match>, ServerError>;

    /// Retrieves all matches of a tournament ordered by round.
    async fn list_matches(&self, tournament_id: Uuid) -> Result<Vec<Match>, ServerError>;

    /// Applies the given fields of the update. Unset fields are left unchanged.
    async fn update_match(
        &self,
        match_id: Uuid,
        update: &MatchUpdate,
    ) -> Result<Option<Match>, ServerError>;

    async fn create_match_report(
        &self,
        match_id: Uuid,
        reporter_id: Uuid,
        claimed_winner: Uuid,
        score: &str,
        evidence_url: Option<&str>,
    ) -> Result<MatchReport, ServerError>;

    async fn list_match_reports(&self, match_id: Uuid) -> Result<Vec<MatchReport>, ServerError>;
}

#[async_trait]
impl MatchDatabase for PgDatabase {
    async fn create_match(
        &self,
        tournament_id: Uuid,
        round: i32,
        participant_a: Uuid,
        participant_b: Option<Uuid>,
        scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Match, ServerError> {
        let bracket = sqlx::query_as::<_, Match>(
            r#"
            INSERT INTO matches (id, tournament_id, round, participant_a, participant_b, scheduled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tournament_id)
        .bind(round)
        .bind(participant_a)
        .bind(participant_b)
        .bind(scheduled_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(bracket)
    }

    async fn get_match(&self, match_id: Uuid) -> Result<Option<Match>, ServerError> {
        let bracket = sqlx::query_as::<_, Match>("SELECT * FROM matches WHERE id = $1 LIMIT 1")
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(bracket)
    }

    async fn list_matches(&self, tournament_id: Uuid) -> Result<Vec<Match>, ServerError> {
        let brackets = sqlx::query_as::<_, Match>(
            r#"
            SELECT * FROM matches
            WHERE tournament_id = $1
            ORDER BY round, scheduled_at NULLS LAST
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(brackets)
    }

    async fn update_match(
        &self,
        match_id: Uuid,
        update: &MatchUpdate,
    ) -> Result<Option<Match>, ServerError> {
        let bracket = sqlx::query_as::<_, Match>(
            r#"
            UPDATE matches
            SET winner = COALESCE($2, winner),
                score = COALESCE($3, score),
                status = COALESCE($4, status)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(match_id)
        .bind(update.winner)
        .bind(&update.score)
        .bind(update.status)
        .fetch_optional(&self.pool)
        .await?;

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
        let report = sqlx::query_as::<_, MatchReport>(
            r#"
            INSERT INTO match_reports (id, match_id, reporter_id, claimed_winner, score, evidence_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(match_id)
        .bind(reporter_id)
        .bind(claimed_winner)
        .bind(score)
        .bind(evidence_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(report)
    }

    async fn list_match_reports(&self, match_id: Uuid) -> Result<Vec<MatchReport>, ServerError> {
        let reports = sqlx::query_as::<_, MatchReport>(
            r#"
            SELECT * FROM match_reports
            WHERE match_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reports)
    }
}

#[async_trait]
pub trait WalletDatabase {
    /// Appends a ledger row and applies its balance delta in one transaction.
    ///
    /// A row carrying a payment intent id that was already recorded is reported as a duplicate
    /// and nothing changes.
    async fn record_transaction(&self, entry: &LedgerEntry) -> Result<LedgerOutcome, ServerError>;

    /// Appends the ledger row for a settled entry fee and marks the participant as paid, in one
    /// transaction.
    async fn settle_entry_payment(
        &self,
        participant_id: Uuid,
        entry: &LedgerEntry,
    ) -> Result<LedgerOutcome, ServerError>;

    async fn list_user_transactions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, ServerError>;

    async fn list_transactions(&self, page: Option<i64>) -> Result<Vec<WalletTransaction>, ServerError>;

    /// Moves a pending transaction to `status`. Failing a withdrawal also records its refund
    /// and credits the balance back, all in one transaction.
    async fn settle_transaction(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        admin_id: Uuid,
    ) -> Result<SettlementOutcome, ServerError>;

    async fn total_completed_deposits(&self) -> Result<Decimal, ServerError>;
}

impl PgDatabase {
    async fn insert_ledger_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        entry: &LedgerEntry,
    ) -> Result<Option<WalletTransaction>, ServerError> {
        let row = sqlx::query_as::<_, WalletTransaction>(
            r#"
            INSERT INTO wallet_transactions (id, user_id, kind, amount, status, tournament_id, payment_intent_id, description, admin_id, admin_note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (payment_intent_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.kind)
        .bind(entry.amount)
        .bind(entry.status)
        .bind(entry.tournament_id)
        .bind(&entry.payment_intent_id)
        .bind(&entry.description)
        .bind(entry.admin_id)
        .bind(&entry.admin_note)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row)
    }
}

#[async_trait]
impl WalletDatabase for PgDatabase {
    async fn record_transaction(&self, entry: &LedgerEntry) -> Result<LedgerOutcome, ServerError> {
        let mut tx = self.pool.begin().await?;

        // Takes the row lock on the user, serializing concurrent balance changes.
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET wallet_balance = wallet_balance + $2
            WHERE id = $1 AND wallet_balance + $2 >= 0
            RETURNING id
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.balance_delta)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
                .bind(entry.user_id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return Ok(match exists {
                Some(_) => LedgerOutcome::InsufficientFunds,
                None => LedgerOutcome::UserMissing,
            });
        }

        match Self::insert_ledger_row(&mut tx, entry).await? {
            Some(row) => {
                tx.commit().await?;
                Ok(LedgerOutcome::Recorded(row))
            }
            None => {
                tx.rollback().await?;
                Ok(LedgerOutcome::Duplicate)
            }
        }
    }

    async fn settle_entry_payment(
        &self,
        participant_id: Uuid,
        entry: &LedgerEntry,
    ) -> Result<LedgerOutcome, ServerError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = Self::insert_ledger_row(&mut tx, entry).await? else {
            tx.rollback().await?;
            return Ok(LedgerOutcome::Duplicate);
        };

        sqlx::query(
            r#"
            UPDATE tournament_participants
            SET payment_status = $2
            WHERE id = $1
            "#,
        )
        .bind(participant_id)
        .bind(PaymentStatus::Completed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LedgerOutcome::Recorded(row))
    }

    async fn list_user_transactions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WalletTransaction>, ServerError> {
        let transactions = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT * FROM wallet_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn list_transactions(&self, page: Option<i64>) -> Result<Vec<WalletTransaction>, ServerError> {
        let transactions = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT * FROM wallet_transactions
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(PAGE_SIZE)
        .bind(page_offset(page))
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn settle_transaction(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        admin_id: Uuid,
    ) -> Result<SettlementOutcome, ServerError> {
        let mut tx = self.pool.begin().await?;

        let transaction = sqlx::query_as::<_, WalletTransaction>(
            r#"
            UPDATE wallet_transactions
            SET status = $2
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(status)
        .bind(TransactionStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(transaction) = transaction else {
            let current: Option<TransactionStatus> =
                sqlx::query_scalar("SELECT status FROM wallet_transactions WHERE id = $1")
                    .bind(transaction_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Ok(match current {
                Some(current) => SettlementOutcome::NotPending(current),
                None => SettlementOutcome::Missing,
            });
        };

        let mut refund = None;
        if transaction.kind == TransactionKind::Withdrawal && transaction.status == TransactionStatus::Failed {
            let entry = LedgerEntry::refund_of(&transaction, admin_id);
            refund = Self::insert_ledger_row(&mut tx, &entry).await?;

            if refund.is_some() {
                sqlx::query(
                    r#"
                    UPDATE users
                    SET wallet_balance = wallet_balance + $2
                    WHERE id = $1
                    "#,
                )
                .bind(entry.user_id)
                .bind(entry.balance_delta)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(SettlementOutcome::Settled { transaction, refund })
    }

    async fn total_completed_deposits(&self) -> Result<Decimal, ServerError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount) FROM wallet_transactions
            WHERE kind = 'deposit' AND status = 'completed'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or_default())
    }
}

#[async_trait]
pub trait NotificationDatabase {
    async fn create_notification(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<Notification, ServerError>;

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, ServerError>;

    /// Returns false if the notification does not exist or belongs to someone else.
    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServerError>;
}

#[async_trait]
impl NotificationDatabase for PgDatabase {
    async fn create_notification(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<Notification, ServerError> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, user_id, title, message)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, ServerError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServerError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read = true
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
pub trait SupportDatabase {
    async fn create_ticket(
        &self,
        user_id: Uuid,
        subject: &str,
        message: &str,
    ) -> Result<SupportTicket, ServerError>;

    async fn list_user_tickets(&self, user_id: Uuid) -> Result<Vec<SupportTicket>, ServerError>;

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<SupportTicket>, ServerError>;

    async fn update_ticket(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
        admin_response: Option<&str>,
    ) -> Result<Option<SupportTicket>, ServerError>;

    async fn count_open_tickets(&self) -> Result<i64, ServerError>;
}

#[async_trait]
impl SupportDatabase for PgDatabase {
    async fn create_ticket(
        &self,
        user_id: Uuid,
        subject: &str,
        message: &str,
    ) -> Result<SupportTicket, ServerError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(
            r#"
            INSERT INTO support_tickets (id, user_id, subject, message)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(subject)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        Ok(ticket)
    }

    async fn list_user_tickets(&self, user_id: Uuid) -> Result<Vec<SupportTicket>, ServerError> {
        let tickets = sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT * FROM support_tickets
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tickets)
    }

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<SupportTicket>, ServerError> {
        let tickets = sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT * FROM support_tickets
            WHERE ($1::ticket_status IS NULL OR status = $1)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(tickets)
    }

    async fn update_ticket(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
        admin_response: Option<&str>,
    ) -> Result<Option<SupportTicket>, ServerError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(
            r#"
            UPDATE support_tickets
            SET status = $2,
                admin_response = COALESCE($3, admin_response),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(ticket_id)
        .bind(status)
        .bind(admin_response)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }

    async fn count_open_tickets(&self) -> Result<i64, ServerError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM support_tickets WHERE status IN ('open', 'in_progress')")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
pub trait SettingsDatabase {
    async fn get_settings(&self) -> Result<Vec<PlatformSetting>, ServerError>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<PlatformSetting, ServerError>;

    async fn append_admin_log(
        &self,
        admin_id: Uuid,
        action: &str,
        details: serde_json::Value,
    ) -> Result<(), ServerError>;

    /// Retrieves the most recent admin log entries.
    async fn list_admin_logs(&self, limit: i64) -> Result<Vec<AdminLog>, ServerError>;
}

#[async_trait]
impl SettingsDatabase for PgDatabase {
    async fn get_settings(&self) -> Result<Vec<PlatformSetting>, ServerError> {
        let settings = sqlx::query_as::<_, PlatformSetting>("SELECT * FROM platform_settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(settings)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<PlatformSetting, ServerError> {
        let setting = sqlx::query_as::<_, PlatformSetting>(
            r#"
            INSERT INTO platform_settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key)
            DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        Ok(setting)
    }

    async fn append_admin_log(
        &self,
        admin_id: Uuid,
        action: &str,
        details: serde_json::Value,
    ) -> Result<(), ServerError> {
        sqlx::query(
            r#"
            INSERT INTO admin_logs (id, admin_id, action, details)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(admin_id)
        .bind(action)
        .bind(details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_admin_logs(&self, limit: i64) -> Result<Vec<AdminLog>, ServerError> {
        let logs = sqlx::query_as::<_, AdminLog>(
            r#"
            SELECT * FROM admin_logs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}
