use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EventRewardConfig;
use crate::error::RewardError;
use crate::ledger_store::PlayerLedger;
use crate::notify::Notifier;
use crate::presence::PresenceTracker;
use crate::reward_engine::{
    issue_awards, plan_rewards, rank_parties, rank_players, PartyTotals, RewardAward,
    RewardPlan, WindowSnapshot,
};
use crate::types::{EventState, KillStanding, PartyKey, PartyStanding, PlayerId, Standings};

struct WindowState {
    state: EventState,
    kills: HashMap<PlayerId, u64>,
    parties: HashMap<PartyKey, PartyTotals>,
    present: HashSet<PlayerId>,
    names: HashMap<PlayerId, String>,
}

impl WindowState {
    fn idle() -> Self {
        Self {
            state: EventState::Idle,
            kills: HashMap::new(),
            parties: HashMap::new(),
            present: HashSet::new(),
            names: HashMap::new(),
        }
    }

    fn clear(&mut self) {
        self.kills.clear();
        self.parties.clear();
        self.present.clear();
        self.names.clear();
    }

    fn merge_presence<I: IntoIterator<Item = PlayerId>>(&mut self, ids: I) {
        if self.state != EventState::Active {
            return;
        }
        self.present.extend(ids);
    }

    /// Moves everything out and leaves the window idle.
    fn close(&mut self) -> WindowSnapshot {
        self.state = EventState::Idle;
        WindowSnapshot {
            kills: mem::take(&mut self.kills),
            parties: mem::take(&mut self.parties),
            present: mem::take(&mut self.present),
            names: mem::take(&mut self.names),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WindowReport {
    #[serde(skip)]
    pub snapshot: WindowSnapshot,
    pub plan: RewardPlan,
    pub awarded: Vec<RewardAward>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<RewardError>,
    pub leaderboard: Vec<String>,
}

fn serialize_errors<S>(errors: &[RewardError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

/// Kill and presence tracking for one event window at a time.
pub struct KillAggregator {
    config: EventRewardConfig,
    ledger: Arc<dyn PlayerLedger>,
    notifier: Arc<dyn Notifier>,
    presence: Arc<PresenceTracker>,
    window: Mutex<WindowState>,
}

impl KillAggregator {
    pub fn new(
        config: EventRewardConfig,
        ledger: Arc<dyn PlayerLedger>,
        notifier: Arc<dyn Notifier>,
        presence: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            config,
            ledger,
            notifier,
            presence,
            window: Mutex::new(WindowState::idle()),
        }
    }

    pub fn config(&self) -> &EventRewardConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.lock().state == EventState::Active
    }

    /// Starting an active window throws away what it had tracked so far.
    pub fn start(&self) {
        let connected = self.presence.snapshot();
        let mut window = self.lock();
        if window.state == EventState::Active {
            warn!("blood moon window restarted while active; discarding tallies");
        }
        window.clear();
        window.state = EventState::Active;
        window.merge_presence(connected);
        info!(present = window.present.len(), "blood moon window opened");
    }

    pub fn add_kill(&self, player_id: &str, display_name: &str, party_id: i64) {
        let Some(player) = PlayerId::parse(player_id) else {
            return;
        };
        let mut window = self.lock();
        if window.state != EventState::Active {
            return;
        }

        *window.kills.entry(player.clone()).or_insert(0) += 1;
        let party = window
            .parties
            .entry(PartyKey::resolve(party_id, &player))
            .or_default();
        party.kills += 1;
        party.members.insert(player.clone());
        let name = display_name.trim();
        if !name.is_empty() {
            window.names.insert(player.clone(), name.to_string());
        }
        window.present.insert(player);
    }

    pub fn merge_presence<I: IntoIterator<Item = PlayerId>>(&self, ids: I) {
        self.lock().merge_presence(ids);
    }

    /// Closes the window and pays out. Returns `None` when no window was open.
    pub fn end(&self) -> Option<WindowReport> {
        let connected = self.presence.snapshot();
        let snapshot = {
            let mut window = self.lock();
            if window.state != EventState::Active {
                return None;
            }
            window.merge_presence(connected);
            window.close()
        };

        let plan = plan_rewards(&snapshot, &self.config);
        let outcome = issue_awards(plan.awards(), self.ledger.as_ref(), self.notifier.as_ref());

        for (player, kills) in &snapshot.kills {
            let name = snapshot.names.get(player).map(String::as_str);
            self.ledger.record_window_kills(player, name, *kills);
        }
        if let Err(error) = self.ledger.save() {
            warn!(%error, "ledger save after blood moon failed; will retry on schedule");
        }

        let leaderboard = format_leaderboard(&snapshot);
        for line in &leaderboard {
            self.notifier.broadcast(line);
        }

        info!(
            players = snapshot.kills.len(),
            present = snapshot.present.len(),
            kills = snapshot.total_kills(),
            awarded = outcome.awarded.len(),
            errors = outcome.errors.len(),
            "blood moon window closed"
        );

        Some(WindowReport {
            snapshot,
            plan,
            awarded: outcome.awarded,
            errors: outcome.errors,
            leaderboard,
        })
    }

    pub fn standings(&self) -> Standings {
        let window = self.lock();
        let resolve = |player: &PlayerId| {
            window
                .names
                .get(player)
                .cloned()
                .unwrap_or_else(|| player.to_string())
        };
        let players = rank_players(&window.kills)
            .into_iter()
            .map(|(player, kills)| KillStanding {
                name: resolve(&player),
                player_id: player,
                kills,
            })
            .collect();
        let parties = rank_parties(&window.parties)
            .into_iter()
            .map(|(key, totals)| PartyStanding {
                party: key.clone(),
                label: key.to_string(),
                members: totals.members.iter().map(resolve).collect(),
                kills: totals.kills,
            })
            .collect();
        debug!(state = ?window.state, "standings requested");
        Standings {
            state: window.state,
            players,
            parties,
            present_count: window.present.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn format_leaderboard(snapshot: &WindowSnapshot) -> Vec<String> {
    let ranked = rank_players(&snapshot.kills);
    if ranked.is_empty() {
        return vec!["Blood Moon ended! No kills were recorded.".to_string()];
    }

    let mut lines = vec!["Blood Moon ended!".to_string(), "Total Kills".to_string()];
    for (index, (player, kills)) in ranked.iter().enumerate() {
        lines.push(format!(
            "{}. {} - {} kills",
            index + 1,
            snapshot.display_name(player),
            kills
        ));
    }
    lines.push(format!("Total kills: {}", snapshot.total_kills()));

    lines.push("Party Results".to_string());
    for (party, totals) in rank_parties(&snapshot.parties) {
        let members: Vec<String> = totals
            .members
            .iter()
            .map(|member| snapshot.display_name(member))
            .collect();
        lines.push(format!(
            "{party} ({}) - {} kills",
            members.join(", "),
            totals.kills
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PresenceRewardConfig, RankRewardConfig, StepBonusConfig};
    use crate::error::LedgerError;
    use crate::ledger_store::{JsonLedger, LedgerAccount};
    use crate::notify::{OutboundMessage, Outbox};

    struct Fixture {
        aggregator: KillAggregator,
        ledger: Arc<JsonLedger>,
        outbox: Arc<Outbox>,
        presence: Arc<PresenceTracker>,
    }

    fn id(value: &str) -> PlayerId {
        PlayerId::parse(value).expect("valid id")
    }

    fn scenario_config() -> EventRewardConfig {
        EventRewardConfig {
            enabled: true,
            presence: PresenceRewardConfig { enabled: true, rp: 1 },
            party_rank: RankRewardConfig {
                enabled: true,
                first_place_rp: 5,
                second_place_rp: 0,
            },
            top_kills: RankRewardConfig {
                enabled: false,
                first_place_rp: 0,
                second_place_rp: 0,
            },
            step_bonus: StepBonusConfig {
                enabled: false,
                every_kills: 10,
                rp_per_step: 1,
                max_rp: 0,
            },
            require_presence_for_rank_rewards: true,
            refresh_presence_every_tick: false,
        }
    }

    fn fixture(config: EventRewardConfig) -> Fixture {
        let ledger = Arc::new(JsonLedger::ephemeral());
        let outbox = Arc::new(Outbox::default());
        let presence = Arc::new(PresenceTracker::new());
        let aggregator = KillAggregator::new(
            config,
            ledger.clone(),
            outbox.clone(),
            presence.clone(),
        );
        Fixture {
            aggregator,
            ledger,
            outbox,
            presence,
        }
    }

    fn kill_n(aggregator: &KillAggregator, player: &str, name: &str, party: i64, count: u32) {
        for _ in 0..count {
            aggregator.add_kill(player, name, party);
        }
    }

    fn broadcasts(outbox: &Outbox) -> Vec<String> {
        outbox
            .drain()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Broadcast { text } => Some(text),
                OutboundMessage::Private { .. } => None,
            })
            .collect()
    }

    #[test]
    fn kills_are_ignored_while_idle() {
        let fx = fixture(scenario_config());
        fx.aggregator.add_kill("p1", "Alice", 1);
        fx.aggregator.merge_presence(vec![id("p2")]);
        let standings = fx.aggregator.standings();
        assert_eq!(standings.state, EventState::Idle);
        assert!(standings.players.is_empty());
        assert_eq!(standings.present_count, 0);
        assert!(fx.aggregator.end().is_none());
    }

    #[test]
    fn blank_player_ids_are_ignored() {
        let fx = fixture(scenario_config());
        fx.aggregator.start();
        fx.aggregator.add_kill("", "Ghost", 1);
        fx.aggregator.add_kill("   ", "Ghost", 1);
        assert!(fx.aggregator.standings().players.is_empty());
    }

    #[test]
    fn scenario_party_first_place_and_presence() {
        let fx = fixture(scenario_config());
        fx.aggregator.start();
        kill_n(&fx.aggregator, "A", "Alice", 1, 5);
        kill_n(&fx.aggregator, "B", "Bob", 1, 5);
        kill_n(&fx.aggregator, "C", "Cara", 0, 2);

        let report = fx.aggregator.end().expect("window was active");
        assert!(report.errors.is_empty());
        assert_eq!(fx.ledger.balance(&id("A")), 6);
        assert_eq!(fx.ledger.balance(&id("B")), 6);
        assert_eq!(fx.ledger.balance(&id("C")), 1);
        assert!(!fx.aggregator.is_active());
    }

    #[test]
    fn second_end_is_a_no_op() {
        let fx = fixture(scenario_config());
        fx.aggregator.start();
        kill_n(&fx.aggregator, "A", "Alice", 1, 3);
        assert!(fx.aggregator.end().is_some());
        assert!(fx.aggregator.end().is_none());
        assert_eq!(fx.ledger.balance(&id("A")), 6);
        assert_eq!(fx.ledger.get(&id("A")).lifetime_kills, 3);
    }

    #[test]
    fn restart_while_active_discards_tallies() {
        let fx = fixture(scenario_config());
        fx.aggregator.start();
        kill_n(&fx.aggregator, "A", "Alice", 1, 4);
        fx.aggregator.start();
        assert!(fx.aggregator.is_active());
        assert!(fx.aggregator.standings().players.is_empty());

        kill_n(&fx.aggregator, "B", "Bob", 0, 1);
        let report = fx.aggregator.end().expect("window was active");
        assert_eq!(report.snapshot.kills.len(), 1);
        assert_eq!(fx.ledger.balance(&id("A")), 0);
    }

    #[test]
    fn connected_players_without_kills_get_presence_reward() {
        let fx = fixture(scenario_config());
        fx.presence.refresh(vec![id("idle_at_open")]);
        fx.aggregator.start();
        fx.presence.refresh(vec![id("late_joiner")]);
        kill_n(&fx.aggregator, "A", "Alice", 2, 1);

        let report = fx.aggregator.end().expect("window was active");
        let present = &report.snapshot.present;
        assert!(present.contains(&id("idle_at_open")));
        assert!(present.contains(&id("late_joiner")));
        assert!(present.contains(&id("a")));
        assert!(report
            .snapshot
            .kills
            .keys()
            .all(|player| present.contains(player)));
        assert_eq!(fx.ledger.balance(&id("idle_at_open")), 1);
        assert_eq!(fx.ledger.balance(&id("late_joiner")), 1);
    }

    #[test]
    fn leaderboard_lists_players_then_parties() {
        let fx = fixture(EventRewardConfig::disabled());
        fx.aggregator.start();
        kill_n(&fx.aggregator, "b", "Bob", 4, 2);
        kill_n(&fx.aggregator, "a", "Alice", 4, 2);
        kill_n(&fx.aggregator, "c", "Cara", 0, 3);
        fx.aggregator.add_kill("a", "Alice2", 4);
        fx.aggregator.end().expect("window was active");

        assert_eq!(
            broadcasts(&fx.outbox),
            vec![
                "Blood Moon ended!",
                "Total Kills",
                "1. Alice2 - 3 kills",
                "2. Cara - 3 kills",
                "3. Bob - 2 kills",
                "Total kills: 8",
                "Party Results",
                "Party 4 (Alice2, Bob) - 5 kills",
                "Solo (Cara) - 3 kills",
            ]
        );
    }

    struct RefusingLedger {
        inner: JsonLedger,
    }

    impl PlayerLedger for RefusingLedger {
        fn get(&self, player: &PlayerId) -> LedgerAccount {
            self.inner.get(player)
        }

        fn update(&self, player: &PlayerId, apply: &mut dyn FnMut(&mut LedgerAccount)) {
            self.inner.update(player, apply)
        }

        fn save(&self) -> Result<(), LedgerError> {
            self.inner.save()
        }

        fn add_rp(&self, player: &PlayerId, _amount: u64) -> Result<u64, LedgerError> {
            Err(LedgerError::Overflow {
                player: player.to_string(),
            })
        }
    }

    #[test]
    fn failed_payouts_still_close_the_window() {
        let outbox = Arc::new(Outbox::default());
        let aggregator = KillAggregator::new(
            scenario_config(),
            Arc::new(RefusingLedger {
                inner: JsonLedger::ephemeral(),
            }),
            outbox.clone(),
            Arc::new(PresenceTracker::new()),
        );
        aggregator.start();
        kill_n(&aggregator, "A", "Alice", 1, 2);
        kill_n(&aggregator, "B", "Bob", 0, 1);

        let report = aggregator.end().expect("window was active");
        assert_eq!(report.errors.len(), 2);
        assert!(report.awarded.is_empty());
        assert!(!aggregator.is_active());
        let standings = aggregator.standings();
        assert!(standings.players.is_empty());
        assert!(standings.parties.is_empty());
        assert_eq!(standings.present_count, 0);
        assert!(aggregator.end().is_none());
        assert_eq!(broadcasts(&outbox)[0], "Blood Moon ended!");
    }

    #[test]
    fn empty_window_reports_no_kills() {
        let fx = fixture(EventRewardConfig::disabled());
        fx.aggregator.start();
        let report = fx.aggregator.end().expect("window was active");
        assert_eq!(
            report.leaderboard,
            vec!["Blood Moon ended! No kills were recorded."]
        );
    }

    #[test]
    fn concurrent_kills_are_all_counted() {
        let fx = fixture(EventRewardConfig::disabled());
        fx.aggregator.start();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let aggregator = &fx.aggregator;
                scope.spawn(move || {
                    for _ in 0..250 {
                        aggregator.add_kill(&format!("p{worker}"), "", i64::from(worker % 2) + 1);
                    }
                });
            }
        });
        let report = fx.aggregator.end().expect("window was active");
        assert_eq!(report.snapshot.total_kills(), 1_000);
        let party_total: u64 = report.snapshot.parties.values().map(|party| party.kills).sum();
        assert_eq!(party_total, 1_000);
    }
}
