//! Builders and fakes shared by the unit tests.

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    database::{
        memory::MemoryDatabase,
        models::{Tournament, TournamentMode, TournamentStatus},
    },
    payments::{IntentRequest, PaymentGateway, PaymentIntent},
    AppState, ServerError,
};

/// An upcoming solo tournament with the given capacity, occupancy and entry fee.
pub fn dummy_tournament(max: i32, current: i32, fee: &str) -> Tournament {
    Tournament {
        id: Uuid::new_v4(),
        name: "Friday Night Cup".to_string(),
        game: "Rocket League".to_string(),
        description: None,
        mode: TournamentMode::Solo,
        max_participants: max,
        current_participants: current,
        entry_fee: Decimal::from_str(fee).unwrap(),
        prize_pool: Decimal::ZERO,
        status: TournamentStatus::Upcoming,
        start_time: None,
        created_by: None,
        created_at: Utc::now(),
    }
}

/// Gateway double that counts calls and can be told to fail.
#[derive(Default)]
pub struct FakeGateway {
    pub fail: bool,
    pub created: AtomicUsize,
    pub retrieved: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub last_request: Mutex<Option<IntentRequest>>,
}

impl FakeGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn last_metadata(&self, key: &str) -> Option<String> {
        self.last_request
            .lock()
            .unwrap()
            .as_ref()?
            .metadata
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }

    fn intent(id: String, amount: i64, metadata: HashMap<String, String>) -> PaymentIntent {
        PaymentIntent {
            client_secret: Some(format!("{}_secret", id)),
            id,
            amount,
            amount_received: None,
            currency: "usd".to_string(),
            status: "requires_payment_method".to_string(),
            metadata,
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServerError> {
        if self.fail {
            return Err(anyhow!("gateway unreachable"));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        let metadata = request
            .metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Ok(Self::intent(format!("pi_{}", n), request.amount, metadata))
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServerError> {
        if self.fail {
            return Err(anyhow!("gateway unreachable"));
        }
        self.retrieved.fetch_add(1, Ordering::SeqCst);
        Ok(Self::intent(intent_id.to_string(), 0, HashMap::new()))
    }

    async fn cancel_intent(&self, _intent_id: &str) -> Result<(), ServerError> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Application state backed by the in-memory database.
pub fn test_state(db: Arc<MemoryDatabase>, gateway: Option<Arc<FakeGateway>>) -> AppState {
    AppState::new(
        db,
        gateway.map(|g| g as Arc<dyn PaymentGateway>),
        Some("whsec_test".to_string()),
        "usd".to_string(),
    )
}
