//! Bounded ledger of recently submitted faucet transactions

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecentStatus {
    Pending,
    Confirmed,
    Failed,
    /// Confirmation timed out; the transaction may still land
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentTransaction {
    pub hash: H256,
    pub description: String,
    pub status: RecentStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newest-first list of submitted transactions, capped at `capacity`
pub struct RecentTransactions {
    entries: RwLock<VecDeque<RecentTransaction>>,
    capacity: usize,
}

impl RecentTransactions {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a newly submitted transaction. Returns false if the hash is
    /// already present.
    pub async fn record(&self, hash: H256, description: &str) -> bool {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.hash == hash) {
            return false;
        }

        let now = Utc::now();
        entries.push_front(RecentTransaction {
            hash,
            description: description.to_string(),
            status: RecentStatus::Pending,
            submitted_at: now,
            updated_at: now,
        });
        entries.truncate(self.capacity);

        debug!("Recorded recent transaction {:?}", hash);
        true
    }

    /// Update the status of a recorded transaction
    pub async fn update(&self, hash: H256, status: RecentStatus) -> bool {
        let mut entries = self.entries.write().await;
        set_status(&mut entries, hash, status)
    }

    /// [`update`](Self::update) for callers that cannot await. Gives up if
    /// the ledger is locked.
    pub fn try_update(&self, hash: H256, status: RecentStatus) -> bool {
        match self.entries.try_write() {
            Ok(mut entries) => set_status(&mut entries, hash, status),
            Err(_) => {
                warn!("Recent transactions busy, {:?} left unchanged", hash);
                false
            }
        }
    }

    pub async fn get(&self, hash: H256) -> Option<RecentTransaction> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.hash == hash)
            .cloned()
    }

    pub async fn list(&self) -> Vec<RecentTransaction> {
        self.entries.read().await.iter().cloned().collect()
    }
}

fn set_status(entries: &mut VecDeque<RecentTransaction>, hash: H256, status: RecentStatus) -> bool {
    match entries.iter_mut().find(|e| e.hash == hash) {
        Some(entry) => {
            entry.status = status;
            entry.updated_at = Utc::now();
            true
        }
        None => false,
    }
}
