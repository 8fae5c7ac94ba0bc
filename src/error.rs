use std::path::PathBuf;

use thiserror::Error;

use crate::types::PlayerId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("player id must not be blank")]
    InvalidPlayerId,

    #[error("balance overflow for {player}")]
    Overflow { player: String },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize ledger: {0}")]
    Json(#[from] serde_json::Error),
}

/// A credit that could not be applied during a reward pass.
#[derive(Debug, Error)]
#[error("failed to credit {amount} RP to {player}: {source}")]
pub struct RewardError {
    pub player: PlayerId,
    pub amount: u64,
    #[source]
    pub source: LedgerError,
}

#[derive(Debug, Error)]
pub enum ShopError {
    #[error("Reward Points are disabled on this server.")]
    RewardsDisabled,

    #[error("Shop is disabled on this server.")]
    ShopDisabled,

    #[error("Shop has no enabled items.")]
    Empty,

    #[error("That item number is out of range. Use /shop (1-{count}).")]
    UnknownItem { count: usize },

    #[error("Invalid amount.")]
    InvalidAmount,

    #[error("That purchase is too large.")]
    TooLarge,

    #[error("Limit reached for {key}. Allowed: {allowed} total at your level (already bought {bought}).")]
    LimitReached { key: String, allowed: u64, bought: u64 },

    #[error("Not enough RP. Cost: {cost}, You have: {balance}.")]
    InsufficientFunds { cost: u64, balance: u64 },

    #[error("Purchase failed (item/action could not be granted). RP refunded.")]
    GrantFailed,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
