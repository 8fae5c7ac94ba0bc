use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::LEDGER_FILE_VERSION;
use crate::error::LedgerError;
use crate::types::PlayerId;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    pub player_id: PlayerId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub total_earned: u64,
    #[serde(default)]
    pub total_spent: u64,
    #[serde(default, alias = "accumulatedOnlineSeconds")]
    pub remainder_seconds: u64,
    #[serde(default)]
    pub total_online_seconds: u64,
    #[serde(default)]
    pub session_start_ms: Option<u64>,
    #[serde(default)]
    pub last_seen_ms: Option<u64>,
    #[serde(default)]
    pub lifetime_kills: u64,
    #[serde(default)]
    pub last_window_kills: u64,
    #[serde(default)]
    pub purchases: BTreeMap<String, u64>,
}

impl LedgerAccount {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            name: None,
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            remainder_seconds: 0,
            total_online_seconds: 0,
            session_start_ms: None,
            last_seen_ms: None,
            lifetime_kills: 0,
            last_window_kills: 0,
            purchases: BTreeMap::new(),
        }
    }

    pub fn credit(&mut self, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Ok(self.balance);
        }
        let overflow = || LedgerError::Overflow {
            player: self.player_id.to_string(),
        };
        let balance = self.balance.checked_add(amount).ok_or_else(overflow)?;
        let earned = self.total_earned.checked_add(amount).ok_or_else(overflow)?;
        self.balance = balance;
        self.total_earned = earned;
        Ok(self.balance)
    }

    /// Debits only when the balance covers the amount.
    pub fn debit(&mut self, amount: u64) -> SpendOutcome {
        if amount > self.balance {
            return SpendOutcome {
                ok: false,
                balance: self.balance,
            };
        }
        self.balance -= amount;
        self.total_spent = self.total_spent.saturating_add(amount);
        SpendOutcome {
            ok: true,
            balance: self.balance,
        }
    }

    /// Undoes a debit made by [`LedgerAccount::debit`].
    pub fn refund(&mut self, amount: u64) {
        self.balance = self.balance.saturating_add(amount);
        self.total_spent = self.total_spent.saturating_sub(amount);
    }

    pub fn purchase_count(&self, item_key: &str) -> u64 {
        self.purchases
            .get(&item_key.trim().to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn add_purchases(&mut self, item_key: &str, amount: u64) -> u64 {
        let count = self
            .purchases
            .entry(item_key.trim().to_lowercase())
            .or_insert(0);
        *count = count.saturating_add(amount);
        *count
    }

    pub fn remove_purchases(&mut self, item_key: &str, amount: u64) {
        let key = item_key.trim().to_lowercase();
        if let Some(count) = self.purchases.get_mut(&key) {
            *count = count.saturating_sub(amount);
            if *count == 0 {
                self.purchases.remove(&key);
            }
        }
    }

    pub fn clear_session(&mut self) {
        self.session_start_ms = None;
        self.last_seen_ms = None;
    }

    fn absorb(&mut self, other: LedgerAccount) {
        self.name = other.name.or(self.name.take());
        self.balance = self.balance.saturating_add(other.balance);
        self.total_earned = self.total_earned.saturating_add(other.total_earned);
        self.total_spent = self.total_spent.saturating_add(other.total_spent);
        self.remainder_seconds = self.remainder_seconds.max(other.remainder_seconds);
        self.total_online_seconds = self
            .total_online_seconds
            .saturating_add(other.total_online_seconds);
        self.lifetime_kills = self.lifetime_kills.saturating_add(other.lifetime_kills);
        self.last_window_kills = self.last_window_kills.max(other.last_window_kills);
        for (key, count) in other.purchases {
            let current = self.purchases.entry(key).or_insert(0);
            *current = current.saturating_add(count);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpendOutcome {
    pub ok: bool,
    pub balance: u64,
}

/// Durable per-player accounts. Every mutation of a single account is atomic.
pub trait PlayerLedger: Send + Sync {
    /// Copy of the account, created empty on first reference.
    fn get(&self, player: &PlayerId) -> LedgerAccount;

    /// Runs `apply` against the account while holding the ledger lock.
    fn update(&self, player: &PlayerId, apply: &mut dyn FnMut(&mut LedgerAccount));

    fn save(&self) -> Result<(), LedgerError>;

    fn add_rp(&self, player: &PlayerId, amount: u64) -> Result<u64, LedgerError> {
        let mut result = Ok(0);
        self.update(player, &mut |account| result = account.credit(amount));
        result
    }

    fn try_spend_rp(&self, player: &PlayerId, amount: u64) -> SpendOutcome {
        let mut outcome = SpendOutcome {
            ok: false,
            balance: 0,
        };
        self.update(player, &mut |account| outcome = account.debit(amount));
        outcome
    }

    fn balance(&self, player: &PlayerId) -> u64 {
        self.get(player).balance
    }

    fn record_window_kills(&self, player: &PlayerId, name: Option<&str>, kills: u64) {
        self.update(player, &mut |account| {
            account.lifetime_kills = account.lifetime_kills.saturating_add(kills);
            account.last_window_kills = kills;
            if let Some(name) = name {
                account.name = Some(name.to_string());
            }
        });
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LedgerFile<'a> {
    version: u8,
    updated_at_iso: String,
    players: BTreeMap<&'a str, &'a LedgerAccount>,
}

#[derive(Clone, Debug, Deserialize)]
struct LedgerFileRaw {
    version: u8,
    players: HashMap<String, serde_json::Value>,
}

/// JSON-file ledger. Writes go through `<path>.tmp` and keep a `.bak` copy of
/// the previous file.
pub struct JsonLedger {
    file_path: Option<PathBuf>,
    accounts: Mutex<HashMap<PlayerId, LedgerAccount>>,
    writer: Mutex<()>,
}

impl JsonLedger {
    pub fn open(file_path: PathBuf) -> Self {
        let accounts = load_accounts(&file_path);
        debug!(path = %file_path.display(), players = accounts.len(), "ledger loaded");
        Self {
            file_path: Some(file_path),
            accounts: Mutex::new(accounts),
            writer: Mutex::new(()),
        }
    }

    /// Ledger that never touches the disk.
    pub fn ephemeral() -> Self {
        Self {
            file_path: None,
            accounts: Mutex::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn player_count(&self) -> usize {
        self.lock_accounts().len()
    }

    fn lock_accounts(&self) -> MutexGuard<'_, HashMap<PlayerId, LedgerAccount>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlayerLedger for JsonLedger {
    fn get(&self, player: &PlayerId) -> LedgerAccount {
        self.lock_accounts()
            .entry(player.clone())
            .or_insert_with(|| LedgerAccount::new(player.clone()))
            .clone()
    }

    fn update(&self, player: &PlayerId, apply: &mut dyn FnMut(&mut LedgerAccount)) {
        let mut accounts = self.lock_accounts();
        let account = accounts
            .entry(player.clone())
            .or_insert_with(|| LedgerAccount::new(player.clone()));
        apply(account);
    }

    fn save(&self) -> Result<(), LedgerError> {
        let Some(path) = self.file_path.as_ref() else {
            return Ok(());
        };

        // Snapshot order must match write order.
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let text = {
            let accounts = self.lock_accounts();
            let payload = LedgerFile {
                version: LEDGER_FILE_VERSION,
                updated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                players: accounts
                    .values()
                    .map(|account| (account.player_id.as_str(), account))
                    .collect(),
            };
            serde_json::to_string_pretty(&payload)?
        };

        write_atomically(path, &text)
    }
}

fn write_atomically(path: &Path, text: &str) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
    }

    let tmp = sibling(path, "tmp");
    fs::write(&tmp, text).map_err(io_error(&tmp))?;

    if path.exists() {
        let bak = sibling(path, "bak");
        if let Err(error) = fs::copy(path, &bak) {
            warn!(path = %bak.display(), %error, "failed to refresh ledger backup");
        }
    }
    fs::rename(&tmp, path).map_err(io_error(path))
}

fn io_error(target: &Path) -> impl FnOnce(std::io::Error) -> LedgerError {
    let path = target.to_path_buf();
    move |source| LedgerError::Io { path, source }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn load_accounts(path: &Path) -> HashMap<PlayerId, LedgerAccount> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "failed to read ledger");
            }
            return HashMap::new();
        }
    };
    if text.trim().is_empty() {
        return HashMap::new();
    }
    let parsed = match serde_json::from_str::<LedgerFileRaw>(&text) {
        Ok(value) if value.version == LEDGER_FILE_VERSION => value,
        Ok(value) => {
            warn!(path = %path.display(), version = value.version, "unsupported ledger version");
            return HashMap::new();
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to parse ledger");
            return HashMap::new();
        }
    };

    let mut sanitized = HashMap::<PlayerId, LedgerAccount>::new();
    for (player_key, mut raw_value) in parsed.players {
        let Some(key) = PlayerId::parse(&player_key) else {
            continue;
        };
        // The map key is authoritative; the body may omit or garble its copy.
        if let serde_json::Value::Object(fields) = &mut raw_value {
            fields.insert(
                "playerId".to_string(),
                serde_json::Value::String(key.as_str().to_string()),
            );
        }
        let mut account: LedgerAccount = match serde_json::from_value(raw_value) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(player = %player_key, %error, "skipping unreadable ledger entry");
                continue;
            }
        };
        // A restart always begins a fresh session.
        account.clear_session();

        match sanitized.get_mut(&key) {
            Some(current) => current.absorb(account),
            None => {
                sanitized.insert(key, account);
            }
        }
    }

    sanitized
}
