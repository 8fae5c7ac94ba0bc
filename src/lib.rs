pub mod accrual;
pub mod config;
pub mod constants;
pub mod error;
pub mod event_clock;
pub mod kill_aggregator;
pub mod ledger_store;
pub mod notify;
pub mod presence;
pub mod reward_engine;
pub mod server_utils;
pub mod service;
pub mod shop;
pub mod types;
