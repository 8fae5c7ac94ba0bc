use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AccrualConfig;
use crate::ledger_store::PlayerLedger;
use crate::presence::PresenceTracker;
use crate::types::PlayerId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccrualTick {
    pub granted: Vec<(PlayerId, u64)>,
    pub departed: Vec<PlayerId>,
    pub saved: bool,
}

/// Converts connected time into RP. Call once per host update; calls inside
/// the cooldown return immediately.
pub struct AccrualScheduler {
    config: AccrualConfig,
    ledger: Arc<dyn PlayerLedger>,
    presence: Arc<PresenceTracker>,
    next_tick_ms: u64,
    next_save_ms: u64,
}

impl AccrualScheduler {
    pub fn new(
        config: AccrualConfig,
        ledger: Arc<dyn PlayerLedger>,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            config,
            ledger,
            presence,
            next_tick_ms: 0,
            next_save_ms: 0,
        }
    }

    pub fn config(&self) -> &AccrualConfig {
        &self.config
    }

    pub fn tick<I>(&mut self, now_ms: u64, connected: I) -> Option<AccrualTick>
    where
        I: IntoIterator<Item = PlayerId>,
    {
        if !self.config.enabled || now_ms < self.next_tick_ms {
            return None;
        }
        self.next_tick_ms =
            now_ms.saturating_add(self.config.tick_seconds().saturating_mul(1_000));

        let seconds_per_unit = self.config.seconds_per_unit();
        let online: HashSet<PlayerId> = connected.into_iter().collect();
        let mut report = AccrualTick::default();

        let mut ordered: Vec<&PlayerId> = online.iter().collect();
        ordered.sort();
        for player in ordered {
            let mut granted = 0;
            let mut failure = None;
            self.ledger.update(player, &mut |account| {
                if account.session_start_ms.is_none() {
                    account.session_start_ms = Some(now_ms);
                }
                if let Some(last_seen) = account.last_seen_ms {
                    let elapsed = now_ms.saturating_sub(last_seen) / 1_000;
                    account.remainder_seconds = account.remainder_seconds.saturating_add(elapsed);
                    account.total_online_seconds =
                        account.total_online_seconds.saturating_add(elapsed);
                }
                // Whole seconds only; keep the sub-second part for the next tick.
                account.last_seen_ms = Some(match account.last_seen_ms {
                    Some(last_seen) if now_ms > last_seen => {
                        now_ms - (now_ms - last_seen) % 1_000
                    }
                    _ => now_ms,
                });

                let units = account.remainder_seconds / seconds_per_unit;
                if units == 0 {
                    return;
                }
                match account.credit(units) {
                    Ok(_) => {
                        account.remainder_seconds %= seconds_per_unit;
                        granted = units;
                    }
                    Err(error) => failure = Some(error),
                }
            });
            if let Some(error) = failure {
                warn!(%player, %error, "accrual credit failed");
            }
            if granted > 0 {
                debug!(%player, granted, "accrual granted");
                report.granted.push((player.clone(), granted));
            }
        }

        report.departed = self.presence.refresh(online);
        for player in &report.departed {
            self.ledger.update(player, &mut |account| account.clear_session());
        }

        if now_ms >= self.next_save_ms {
            self.next_save_ms =
                now_ms.saturating_add(self.config.save_interval_seconds().saturating_mul(1_000));
            match self.ledger.save() {
                Ok(()) => report.saved = true,
                Err(error) => warn!(%error, "ledger save failed; retrying next interval"),
            }
        }

        Some(report)
    }
}
