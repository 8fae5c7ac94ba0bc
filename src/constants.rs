pub const NO_PARTY: i64 = 0;

pub const HOST_TICK_MS: u64 = 1_000;

pub const MIN_TICK_SECONDS: u64 = 1;
pub const MIN_MINUTES_PER_POINT: u64 = 1;
pub const MIN_SAVE_INTERVAL_SECONDS: u64 = 5;

pub const DEFAULT_TICK_SECONDS: i64 = 10;
pub const DEFAULT_MINUTES_PER_POINT: i64 = 30;
pub const DEFAULT_SAVE_INTERVAL_SECONDS: i64 = 60;

pub const DEFAULT_MAX_PER_PURCHASE: i64 = 5_000;

pub const MAX_DISPLAY_NAME_CHARS: usize = 32;

pub const LEDGER_FILE_VERSION: u8 = 1;

pub const WINDOW_OPENED_MESSAGE: &str = "Blood Moon started! Kill tracking is ON.";

pub fn seconds_per_unit(minutes_per_point: u64) -> u64 {
    minutes_per_point
        .max(MIN_MINUTES_PER_POINT)
        .saturating_mul(60)
}

/// Lifetime purchase allowance for level-limited shop items:
/// levels 1-9 allow 1, 10-19 allow 2, and so on.
pub fn level_purchase_allowance(level: u32) -> u64 {
    (level.max(1) / 10) as u64 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_per_unit_has_a_floor() {
        assert_eq!(seconds_per_unit(30), 1_800);
        assert_eq!(seconds_per_unit(0), 60);
        assert_eq!(seconds_per_unit(u64::MAX), u64::MAX);
    }

    #[test]
    fn level_allowance_steps_every_ten_levels() {
        assert_eq!(level_purchase_allowance(0), 1);
        assert_eq!(level_purchase_allowance(9), 1);
        assert_eq!(level_purchase_allowance(10), 2);
        assert_eq!(level_purchase_allowance(25), 3);
    }
}
