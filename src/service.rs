use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::accrual::{AccrualScheduler, AccrualTick};
use crate::config::RewardsConfig;
use crate::constants::WINDOW_OPENED_MESSAGE;
use crate::event_clock::{EventClock, WindowTransition, WindowWatcher};
use crate::kill_aggregator::{KillAggregator, WindowReport};
use crate::ledger_store::PlayerLedger;
use crate::notify::Notifier;
use crate::presence::PresenceTracker;
use crate::shop::Shop;
use crate::types::PlayerId;

/// Entry points the host layer subscribes to: clock changes, kills, and the
/// periodic tick carrying the connected-player snapshot.
pub struct RewardService {
    ledger: Arc<dyn PlayerLedger>,
    notifier: Arc<dyn Notifier>,
    presence: Arc<PresenceTracker>,
    aggregator: KillAggregator,
    scheduler: Mutex<AccrualScheduler>,
    watcher: Mutex<WindowWatcher>,
    shop: Shop,
    refresh_presence_every_tick: bool,
}

#[derive(Debug, Default)]
pub struct ClockOutcome {
    pub transition: Option<WindowTransition>,
    pub report: Option<WindowReport>,
}

impl RewardService {
    pub fn new(
        config: RewardsConfig,
        ledger: Arc<dyn PlayerLedger>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let presence = Arc::new(PresenceTracker::new());
        let refresh_presence_every_tick = config.event_rewards.refresh_presence_every_tick;
        let rewards_enabled = config.accrual.enabled || config.event_rewards.enabled;
        Self {
            aggregator: KillAggregator::new(
                config.event_rewards,
                ledger.clone(),
                notifier.clone(),
                presence.clone(),
            ),
            scheduler: Mutex::new(AccrualScheduler::new(
                config.accrual,
                ledger.clone(),
                presence.clone(),
            )),
            watcher: Mutex::new(WindowWatcher::new()),
            shop: Shop::new(config.shop, rewards_enabled),
            ledger,
            notifier,
            presence,
            refresh_presence_every_tick,
        }
    }

    pub fn ledger(&self) -> &dyn PlayerLedger {
        self.ledger.as_ref()
    }

    pub fn aggregator(&self) -> &KillAggregator {
        &self.aggregator
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn shop(&self) -> &Shop {
        &self.shop
    }

    /// The watcher stays locked until the aggregator has followed the
    /// transition, so concurrent clock reports apply in observation order.
    pub fn on_clock(&self, clock: &dyn EventClock) -> ClockOutcome {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        let transition = watcher.observe(clock);
        let report = match transition {
            Some(WindowTransition::Opened) => {
                self.aggregator.start();
                self.notifier.broadcast(WINDOW_OPENED_MESSAGE);
                None
            }
            Some(WindowTransition::Closed) => self.aggregator.end(),
            None => None,
        };
        drop(watcher);
        if let Some(transition) = transition {
            let (day, hour) = clock.now();
            info!(?transition, day, hour, "blood moon transition");
        }
        ClockOutcome { transition, report }
    }

    pub fn on_kill(&self, killer_id: &str, killer_name: &str, party_id: i64) {
        self.aggregator.add_kill(killer_id, killer_name, party_id);
    }

    /// Ends the accrual session right away instead of waiting for the next
    /// tick to notice; the carried remainder stays.
    pub fn on_disconnect(&self, player: &PlayerId) {
        self.ledger.update(player, &mut |account| account.clear_session());
    }

    /// Runs accrual and, when configured, folds the connected snapshot into
    /// the open window.
    pub fn on_tick(&self, now_ms: u64, connected: Vec<PlayerId>) -> Option<AccrualTick> {
        let (tick, accrual_enabled) = {
            let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
            let tick = scheduler.tick(now_ms, connected.iter().cloned());
            (tick, scheduler.config().enabled)
        };
        if !accrual_enabled {
            // Nobody else publishes the snapshot when accrual is off.
            self.presence.refresh(connected.iter().cloned());
        }
        if self.refresh_presence_every_tick {
            self.aggregator.merge_presence(connected);
        }
        tick
    }
}
