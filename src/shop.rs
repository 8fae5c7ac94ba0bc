use serde::Serialize;
use tracing::{info, warn};

use crate::config::ShopConfig;
use crate::constants::level_purchase_allowance;
use crate::error::ShopError;
use crate::ledger_store::{LedgerAccount, PlayerLedger};
use crate::types::PlayerId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShopEntry {
    pub number: usize,
    pub key: String,
    pub cost: u64,
    #[serde(rename = "limitPer10Levels")]
    pub limit_per10_levels: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Purchase {
    pub key: String,
    pub amount: u64,
    pub cost: u64,
    pub balance: u64,
}

#[derive(Clone, Debug)]
pub struct PurchaseRequest<'a> {
    pub player: &'a PlayerId,
    pub item_number: usize,
    pub amount: Option<u64>,
    pub level: u32,
}

pub struct Shop {
    config: ShopConfig,
    rewards_enabled: bool,
}

impl Shop {
    pub fn new(config: ShopConfig, rewards_enabled: bool) -> Self {
        Self {
            config,
            rewards_enabled,
        }
    }

    /// Enabled items, numbered from 1 in case-insensitive key order so the
    /// numbers stay put between listings.
    pub fn listing(&self) -> Vec<ShopEntry> {
        let mut items: Vec<(String, u64, bool)> = self
            .config
            .items
            .iter()
            .filter(|(key, item)| item.enabled && !key.trim().is_empty())
            .map(|(key, item)| {
                (
                    key.trim().to_string(),
                    item.cost_rp.max(0) as u64,
                    item.limit_per10_levels,
                )
            })
            .collect();
        items.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
        items
            .into_iter()
            .enumerate()
            .map(|(index, (key, cost, limit_per10_levels))| ShopEntry {
                number: index + 1,
                key,
                cost,
                limit_per10_levels,
            })
            .collect()
    }

    /// Spends first, then asks `grant` to hand out the goods; a failed grant
    /// refunds the full cost.
    pub fn buy<F>(
        &self,
        ledger: &dyn PlayerLedger,
        request: PurchaseRequest<'_>,
        grant: F,
    ) -> Result<Purchase, ShopError>
    where
        F: FnOnce(&str, u64) -> bool,
    {
        if !self.rewards_enabled {
            return Err(ShopError::RewardsDisabled);
        }
        if !self.config.enabled {
            return Err(ShopError::ShopDisabled);
        }
        let amount = request.amount.unwrap_or(1);
        if amount == 0 {
            return Err(ShopError::InvalidAmount);
        }
        let amount = amount.min(self.config.max_per_purchase());

        let listing = self.listing();
        if listing.is_empty() {
            return Err(ShopError::Empty);
        }
        let entry = request
            .item_number
            .checked_sub(1)
            .and_then(|index| listing.get(index))
            .ok_or(ShopError::UnknownItem {
                count: listing.len(),
            })?;

        let cost = entry
            .cost
            .checked_mul(amount)
            .filter(|total| *total <= i32::MAX as u64)
            .ok_or(ShopError::TooLarge)?;

        let allowance = entry
            .limit_per10_levels
            .then(|| level_purchase_allowance(request.level));

        // Limit check, debit and count share one account lock.
        let mut reserved = Ok(0);
        ledger.update(request.player, &mut |account| {
            reserved = reserve(account, &entry.key, amount, cost, allowance);
        });
        let balance = reserved?;

        if !grant(&entry.key, amount) {
            ledger.update(request.player, &mut |account| {
                account.refund(cost);
                account.remove_purchases(&entry.key, amount);
            });
            return Err(ShopError::GrantFailed);
        }

        if self.config.log_purchases {
            info!(
                player = %request.player,
                item = %entry.key,
                amount,
                cost,
                balance,
                "shop purchase"
            );
        }
        if let Err(error) = ledger.save() {
            warn!(%error, "ledger save after purchase failed; will retry on schedule");
        }

        Ok(Purchase {
            key: entry.key.clone(),
            amount,
            cost,
            balance,
        })
    }
}

fn reserve(
    account: &mut LedgerAccount,
    key: &str,
    amount: u64,
    cost: u64,
    allowance: Option<u64>,
) -> Result<u64, ShopError> {
    if let Some(allowed) = allowance {
        let bought = account.purchase_count(key);
        if bought.saturating_add(amount) > allowed {
            return Err(ShopError::LimitReached {
                key: key.to_string(),
                allowed,
                bought,
            });
        }
    }
    let spent = account.debit(cost);
    if !spent.ok {
        return Err(ShopError::InsufficientFunds {
            cost,
            balance: spent.balance,
        });
    }
    account.add_purchases(key, amount);
    Ok(spent.balance)
}
