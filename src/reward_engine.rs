use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::EventRewardConfig;
use crate::error::RewardError;
use crate::ledger_store::PlayerLedger;
use crate::notify::Notifier;
use crate::types::{PartyKey, PlayerId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartyTotals {
    pub kills: u64,
    pub members: BTreeSet<PlayerId>,
}

/// Frozen copy of one window's aggregation, taken when the window closes.
#[derive(Clone, Debug, Default)]
pub struct WindowSnapshot {
    pub kills: HashMap<PlayerId, u64>,
    pub parties: HashMap<PartyKey, PartyTotals>,
    pub present: HashSet<PlayerId>,
    pub names: HashMap<PlayerId, String>,
}

impl WindowSnapshot {
    pub fn display_name(&self, player: &PlayerId) -> String {
        self.names
            .get(player)
            .filter(|name| !name.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| player.to_string())
    }

    pub fn total_kills(&self) -> u64 {
        self.kills.values().sum()
    }
}

/// Kills descending, ties by ascending id.
pub fn rank_players(kills: &HashMap<PlayerId, u64>) -> Vec<(PlayerId, u64)> {
    let mut ranked: Vec<(PlayerId, u64)> = kills
        .iter()
        .map(|(player, count)| (player.clone(), *count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Party totals descending, ties by ascending party key.
pub fn rank_parties(parties: &HashMap<PartyKey, PartyTotals>) -> Vec<(&PartyKey, &PartyTotals)> {
    let mut ranked: Vec<(&PartyKey, &PartyTotals)> = parties.iter().collect();
    ranked.sort_by_key(|(key, totals)| (Reverse(totals.kills), *key));
    ranked
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Presence,
    PartyRank,
    TopKills,
    StepBonus,
}

#[derive(Clone, Debug, Serialize)]
pub struct RewardGrant {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub category: RewardCategory,
    pub amount: u64,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RewardAward {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub amount: u64,
    pub reasons: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RewardPlan {
    pub grants: Vec<RewardGrant>,
}

impl RewardPlan {
    pub fn total(&self) -> u64 {
        self.grants.iter().map(|grant| grant.amount).sum()
    }

    pub fn category_total(&self, category: RewardCategory) -> u64 {
        self.grants
            .iter()
            .filter(|grant| grant.category == category)
            .map(|grant| grant.amount)
            .sum()
    }

    /// One entry per player, reasons in category order, sorted by id.
    pub fn awards(&self) -> Vec<RewardAward> {
        let mut by_player: BTreeMap<&PlayerId, RewardAward> = BTreeMap::new();
        for grant in &self.grants {
            let award = by_player
                .entry(&grant.player_id)
                .or_insert_with(|| RewardAward {
                    player_id: grant.player_id.clone(),
                    amount: 0,
                    reasons: Vec::new(),
                });
            award.amount = award.amount.saturating_add(grant.amount);
            award.reasons.push(grant.reason.clone());
        }
        by_player.into_values().collect()
    }

    fn push(&mut self, player: &PlayerId, category: RewardCategory, amount: u64, reason: String) {
        if amount == 0 {
            return;
        }
        self.grants.push(RewardGrant {
            player_id: player.clone(),
            category,
            amount,
            reason,
        });
    }
}

struct Place(usize);

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            1 => f.write_str("1st"),
            2 => f.write_str("2nd"),
            3 => f.write_str("3rd"),
            n => write!(f, "{n}th"),
        }
    }
}

/// Computes every category against the same snapshot. Pure.
pub fn plan_rewards(snapshot: &WindowSnapshot, config: &EventRewardConfig) -> RewardPlan {
    let mut plan = RewardPlan::default();
    if !config.enabled {
        return plan;
    }

    let gate = |player: &PlayerId| {
        !config.require_presence_for_rank_rewards || snapshot.present.contains(player)
    };

    let presence_rp = config.presence.amount();
    let mut present: Vec<&PlayerId> = snapshot.present.iter().collect();
    present.sort();
    for player in present {
        plan.push(
            player,
            RewardCategory::Presence,
            presence_rp,
            format!("present +{presence_rp}"),
        );
    }

    for (index, (party, totals)) in rank_parties(&snapshot.parties).into_iter().take(2).enumerate() {
        let rank = index + 1;
        let amount = config.party_rank.amount_for_rank(rank);
        for member in totals.members.iter().filter(|member| gate(*member)) {
            plan.push(
                member,
                RewardCategory::PartyRank,
                amount,
                format!("{party} {} place +{amount}", Place(rank)),
            );
        }
    }

    for (index, (player, _)) in rank_players(&snapshot.kills).into_iter().take(2).enumerate() {
        let rank = index + 1;
        if !gate(&player) {
            continue;
        }
        let amount = config.top_kills.amount_for_rank(rank);
        plan.push(
            &player,
            RewardCategory::TopKills,
            amount,
            format!("top killer {} +{amount}", Place(rank)),
        );
    }

    let mut tallies: Vec<(&PlayerId, &u64)> = snapshot.kills.iter().collect();
    tallies.sort();
    for (player, kills) in tallies {
        if !gate(player) {
            continue;
        }
        let amount = config.step_bonus.amount_for_kills(*kills);
        plan.push(
            player,
            RewardCategory::StepBonus,
            amount,
            format!("{kills} kills bonus +{amount}"),
        );
    }

    plan
}

#[derive(Debug, Default)]
pub struct IssueOutcome {
    pub awarded: Vec<RewardAward>,
    pub errors: Vec<RewardError>,
}

/// One credit and one private message per player. A failed credit is
/// collected and the remaining players are still paid.
pub fn issue_awards(
    awards: Vec<RewardAward>,
    ledger: &dyn PlayerLedger,
    notifier: &dyn Notifier,
) -> IssueOutcome {
    let mut outcome = IssueOutcome::default();
    for award in awards {
        match ledger.add_rp(&award.player_id, award.amount) {
            Ok(balance) => {
                notifier.send_private(
                    &award.player_id,
                    &format!(
                        "Blood Moon rewards: +{} RP ({}). Wallet: {} RP",
                        award.amount,
                        award.reasons.join(", "),
                        balance
                    ),
                );
                info!(player = %award.player_id, amount = award.amount, balance, "blood moon reward issued");
                outcome.awarded.push(award);
            }
            Err(source) => {
                let error = RewardError {
                    player: award.player_id.clone(),
                    amount: award.amount,
                    source,
                };
                warn!(%error, "blood moon reward failed");
                outcome.errors.push(error);
            }
        }
    }
    outcome
}
