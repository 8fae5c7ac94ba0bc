use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::constants::NO_PARTY;

/// Persistent player identifier ("EOS_..." or "Steam_...").
///
/// Comparison, hashing and ordering are case-insensitive; the spelling that
/// created the id is kept for display and persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerId {
    raw: String,
    key: String,
}

impl PlayerId {
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            raw: trimmed.to_string(),
            key: trimmed.to_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for PlayerId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PlayerId {}

impl Hash for PlayerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for PlayerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlayerId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for PlayerId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PlayerId::parse(&value).ok_or_else(|| "player id must not be blank".to_string())
    }
}

impl From<PlayerId> for String {
    fn from(value: PlayerId) -> Self {
        value.raw
    }
}

/// Bucket a kill is credited to for party ranking.
///
/// Real parties sort before solo buckets; within each variant the id decides.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PartyKey {
    Party(i64),
    Solo(PlayerId),
}

impl PartyKey {
    /// Non-positive party ids mean "no party"; every solo killer gets a
    /// bucket of their own.
    pub fn resolve(party_id: i64, player: &PlayerId) -> Self {
        if party_id <= NO_PARTY {
            Self::Solo(player.clone())
        } else {
            Self::Party(party_id)
        }
    }
}

impl fmt::Display for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Party(id) => write!(f, "Party {id}"),
            Self::Solo(_) => f.write_str("Solo"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Idle,
    Active,
}

#[derive(Clone, Debug, Serialize)]
pub struct KillStanding {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub name: String,
    pub kills: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PartyStanding {
    pub party: PartyKey,
    pub label: String,
    pub members: Vec<String>,
    pub kills: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Standings {
    pub state: EventState,
    pub players: Vec<KillStanding>,
    pub parties: Vec<PartyStanding>,
    #[serde(rename = "presentCount")]
    pub present_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn player_id_rejects_blank_values() {
        assert!(PlayerId::parse("").is_none());
        assert!(PlayerId::parse("   ").is_none());
        assert_eq!(
            PlayerId::parse(" EOS_abc ").map(|id| id.as_str().to_string()),
            Some("EOS_abc".to_string())
        );
    }

    #[test]
    fn player_id_is_case_insensitive() {
        let a = PlayerId::parse("Steam_ABC").expect("valid id");
        let b = PlayerId::parse("steam_abc").expect("valid id");
        assert_eq!(a, b);
        let set: HashSet<PlayerId> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn solo_players_get_distinct_buckets() {
        let a = PlayerId::parse("a").expect("valid id");
        let b = PlayerId::parse("b").expect("valid id");
        assert_ne!(PartyKey::resolve(0, &a), PartyKey::resolve(0, &b));
        assert_ne!(PartyKey::resolve(-7, &a), PartyKey::resolve(0, &b));
        assert_eq!(PartyKey::resolve(3, &a), PartyKey::resolve(3, &b));
    }

    #[test]
    fn parties_sort_before_solo_buckets() {
        let a = PlayerId::parse("a").expect("valid id");
        let mut keys = vec![
            PartyKey::Solo(a.clone()),
            PartyKey::Party(9),
            PartyKey::Party(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![PartyKey::Party(2), PartyKey::Party(9), PartyKey::Solo(a)]
        );
    }

    #[test]
    fn player_id_deserializes_from_string() {
        let id: PlayerId = serde_json::from_str(r#""EOS_x""#).expect("parse");
        assert_eq!(id.as_str(), "EOS_x");
        assert!(serde_json::from_str::<PlayerId>(r#""  ""#).is_err());
    }
}
