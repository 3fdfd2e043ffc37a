//! Win/loss bookkeeping per username.

use log::info;
use std::collections::HashMap;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccountStats {
    pub wins: u32,
    pub losses: u32,
}

/// Persistence boundary for player accounts.
pub trait AccountStore: Send {
    /// Creates the account on first sight; returns its current record.
    fn login_or_create(&mut self, username: &str) -> AccountStats;
    fn record_win(&mut self, username: &str);
    fn record_loss(&mut self, username: &str);
    fn stats(&self, username: &str) -> Option<AccountStats>;
}

/// Accounts kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: HashMap<String, AccountStats>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for InMemoryAccounts {
    fn login_or_create(&mut self, username: &str) -> AccountStats {
        *self
            .accounts
            .entry(username.to_string())
            .or_insert_with(|| {
                info!("Created account for {}", username);
                AccountStats::default()
            })
    }

    fn record_win(&mut self, username: &str) {
        self.accounts.entry(username.to_string()).or_default().wins += 1;
    }

    fn record_loss(&mut self, username: &str) {
        self.accounts.entry(username.to_string()).or_default().losses += 1;
    }

    fn stats(&self, username: &str) -> Option<AccountStats> {
        self.accounts.get(username).copied()
    }
}
