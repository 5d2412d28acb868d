//! Self-issued session tokens.
//!
//! Tokens are opaque random strings bound to the wallet that logged in. They
//! live only in memory and are never expired; a restart forgets them all.

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Token to wallet table.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<String, String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `wallet`. Every call returns a new token.
    pub fn login(&self, wallet: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions.insert(token.clone(), wallet.to_string());
        debug!(wallet, sessions = self.sessions.len(), "Session issued");
        token
    }

    /// Wallet bound to `token`, if the token was issued by this table.
    pub fn wallet_for(&self, token: &str) -> Option<String> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
