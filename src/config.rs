use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::constants::{
    seconds_per_unit, DEFAULT_MAX_PER_PURCHASE, DEFAULT_MINUTES_PER_POINT,
    DEFAULT_SAVE_INTERVAL_SECONDS, DEFAULT_TICK_SECONDS, MIN_MINUTES_PER_POINT,
    MIN_SAVE_INTERVAL_SECONDS, MIN_TICK_SECONDS,
};
use crate::error::ConfigError;

fn clamp_non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccrualConfig {
    pub enabled: bool,
    pub tick_seconds: i64,
    pub minutes_per_point: i64,
    pub save_interval_seconds: i64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: DEFAULT_TICK_SECONDS,
            minutes_per_point: DEFAULT_MINUTES_PER_POINT,
            save_interval_seconds: DEFAULT_SAVE_INTERVAL_SECONDS,
        }
    }
}

impl AccrualConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn tick_seconds(&self) -> u64 {
        clamp_non_negative(self.tick_seconds).max(MIN_TICK_SECONDS)
    }

    pub fn seconds_per_unit(&self) -> u64 {
        seconds_per_unit(clamp_non_negative(self.minutes_per_point).max(MIN_MINUTES_PER_POINT))
    }

    pub fn save_interval_seconds(&self) -> u64 {
        clamp_non_negative(self.save_interval_seconds).max(MIN_SAVE_INTERVAL_SECONDS)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PresenceRewardConfig {
    pub enabled: bool,
    pub rp: i64,
}

impl Default for PresenceRewardConfig {
    fn default() -> Self {
        Self { enabled: true, rp: 1 }
    }
}

impl PresenceRewardConfig {
    pub fn amount(&self) -> u64 {
        if self.enabled {
            clamp_non_negative(self.rp)
        } else {
            0
        }
    }
}

/// RP for the first and second place of a ranking.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RankRewardConfig {
    pub enabled: bool,
    pub first_place_rp: i64,
    pub second_place_rp: i64,
}

impl Default for RankRewardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            first_place_rp: 5,
            second_place_rp: 3,
        }
    }
}

impl RankRewardConfig {
    /// Amount for a 1-based rank; zero for disabled or unpaid ranks.
    pub fn amount_for_rank(&self, rank: usize) -> u64 {
        if !self.enabled {
            return 0;
        }
        match rank {
            1 => clamp_non_negative(self.first_place_rp),
            2 => clamp_non_negative(self.second_place_rp),
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StepBonusConfig {
    pub enabled: bool,
    pub every_kills: i64,
    pub rp_per_step: i64,
    pub max_rp: i64,
}

impl Default for StepBonusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_kills: 10,
            rp_per_step: 1,
            max_rp: 5,
        }
    }
}

impl StepBonusConfig {
    pub fn amount_for_kills(&self, kills: u64) -> u64 {
        let every = clamp_non_negative(self.every_kills);
        if !self.enabled || every == 0 {
            return 0;
        }
        let raw = (kills / every).saturating_mul(clamp_non_negative(self.rp_per_step));
        let cap = clamp_non_negative(self.max_rp);
        if cap > 0 {
            raw.min(cap)
        } else {
            raw
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventRewardConfig {
    pub enabled: bool,
    pub presence: PresenceRewardConfig,
    pub party_rank: RankRewardConfig,
    pub top_kills: RankRewardConfig,
    pub step_bonus: StepBonusConfig,
    pub require_presence_for_rank_rewards: bool,
    pub refresh_presence_every_tick: bool,
}

impl Default for EventRewardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            presence: PresenceRewardConfig::default(),
            party_rank: RankRewardConfig::default(),
            top_kills: RankRewardConfig {
                enabled: true,
                first_place_rp: 3,
                second_place_rp: 1,
            },
            step_bonus: StepBonusConfig::default(),
            require_presence_for_rank_rewards: true,
            refresh_presence_every_tick: true,
        }
    }
}

impl EventRewardConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShopItemConfig {
    pub enabled: bool,
    pub cost_rp: i64,
    pub limit_per10_levels: bool,
}

impl Default for ShopItemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cost_rp: 0,
            limit_per10_levels: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShopConfig {
    pub enabled: bool,
    pub log_purchases: bool,
    pub max_per_purchase: i64,
    pub items: BTreeMap<String, ShopItemConfig>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_purchases: true,
            max_per_purchase: DEFAULT_MAX_PER_PURCHASE,
            items: BTreeMap::new(),
        }
    }
}

impl ShopConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn max_per_purchase(&self) -> u64 {
        clamp_non_negative(self.max_per_purchase).max(1)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsConfig {
    pub accrual: AccrualConfig,
    pub event_rewards: EventRewardConfig,
    pub shop: ShopConfig,
}

impl RewardsConfig {
    /// Missing file yields defaults. In an existing file, any section that is
    /// absent or malformed is replaced by its disabled form.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let root: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_value(&root))
    }

    pub fn from_value(root: &Value) -> Self {
        Self {
            accrual: section(root, "accrual", AccrualConfig::disabled),
            event_rewards: section(root, "eventRewards", EventRewardConfig::disabled),
            shop: section(root, "shop", ShopConfig::disabled),
        }
    }
}

fn section<T: DeserializeOwned>(root: &Value, name: &str, disabled: fn() -> T) -> T {
    let Some(raw) = root.get(name) else {
        return disabled();
    };
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(value) => value,
        Err(error) => {
            warn!(section = name, %error, "malformed config section, feature disabled");
            disabled()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_sections_are_disabled() {
        let config = RewardsConfig::from_value(&json!({ "accrual": { "tickSeconds": 5 } }));
        assert!(config.accrual.enabled);
        assert_eq!(config.accrual.tick_seconds(), 5);
        assert!(!config.event_rewards.enabled);
        assert!(!config.shop.enabled);
    }

    #[test]
    fn malformed_section_is_disabled_without_failing() {
        let config = RewardsConfig::from_value(&json!({
            "accrual": { "tickSeconds": "soon" },
            "eventRewards": { "presence": { "rp": 2 } }
        }));
        assert!(!config.accrual.enabled);
        assert!(config.event_rewards.enabled);
        assert_eq!(config.event_rewards.presence.amount(), 2);
    }

    #[test]
    fn negative_values_are_clamped() {
        let config = RewardsConfig::from_value(&json!({
            "accrual": { "tickSeconds": -3, "minutesPerPoint": -1, "saveIntervalSeconds": 1 },
            "eventRewards": {
                "presence": { "rp": -4 },
                "partyRank": { "firstPlaceRp": -1, "secondPlaceRp": 2 },
                "stepBonus": { "everyKills": -10, "rpPerStep": 1 }
            }
        }));
        assert_eq!(config.accrual.tick_seconds(), 1);
        assert_eq!(config.accrual.seconds_per_unit(), 60);
        assert_eq!(config.accrual.save_interval_seconds(), 5);
        assert_eq!(config.event_rewards.presence.amount(), 0);
        assert_eq!(config.event_rewards.party_rank.amount_for_rank(1), 0);
        assert_eq!(config.event_rewards.party_rank.amount_for_rank(2), 2);
        assert_eq!(config.event_rewards.party_rank.amount_for_rank(3), 0);
        assert_eq!(config.event_rewards.step_bonus.amount_for_kills(100), 0);
    }

    #[test]
    fn step_bonus_is_capped() {
        let step = StepBonusConfig {
            enabled: true,
            every_kills: 10,
            rp_per_step: 1,
            max_rp: 2,
        };
        assert_eq!(step.amount_for_kills(9), 0);
        assert_eq!(step.amount_for_kills(25), 2);
        assert_eq!(step.amount_for_kills(80), 2);

        let uncapped = StepBonusConfig { max_rp: 0, ..step };
        assert_eq!(uncapped.amount_for_kills(80), 8);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!(
            "blood-moon-config-missing-{}-{}.json",
            std::process::id(),
            rand::random::<u32>()
        ));
        let config = RewardsConfig::load(&path).expect("defaults");
        assert!(config.accrual.enabled);
        assert_eq!(config.accrual.seconds_per_unit(), 1_800);
        assert!(config.event_rewards.enabled);
    }

    #[test]
    fn load_rejects_unparseable_file() {
        let path = std::env::temp_dir().join(format!(
            "blood-moon-config-broken-{}-{}.json",
            std::process::id(),
            rand::random::<u32>()
        ));
        fs::write(&path, "{ not json").expect("write file");
        assert!(matches!(
            RewardsConfig::load(&path),
            Err(ConfigError::Json { .. })
        ));
        let _ = fs::remove_file(path);
    }
}
