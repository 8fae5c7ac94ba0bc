use serde::{Deserialize, Serialize};

/// Source of blood moon timing, owned by the host.
pub trait EventClock {
    fn is_active(&self) -> bool;
    fn now(&self) -> (u32, u32);
}

/// World time as reported by the game: current day and hour, the scheduled
/// blood moon day, and the dusk/dawn hours that bound the night.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodMoonSchedule {
    pub day: u32,
    pub hour: u32,
    pub blood_moon_day: u32,
    pub dusk_hour: u32,
    pub dawn_hour: u32,
}

impl EventClock for BloodMoonSchedule {
    fn is_active(&self) -> bool {
        if self.blood_moon_day == 0 {
            return false;
        }
        (self.day == self.blood_moon_day && self.hour >= self.dusk_hour)
            || (self
                .blood_moon_day
                .checked_add(1)
                .is_some_and(|next_day| self.day == next_day)
                && self.hour < self.dawn_hour)
    }

    fn now(&self) -> (u32, u32) {
        (self.day, self.hour)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowTransition {
    Opened,
    Closed,
}

/// Edge detector over an [`EventClock`]. The clock is only consulted when
/// the in-game (day, hour) pair moved since the previous observation.
#[derive(Debug, Default)]
pub struct WindowWatcher {
    last_seen: Option<(u32, u32)>,
    was_active: bool,
}

impl WindowWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_active(&self) -> bool {
        self.was_active
    }

    pub fn observe(&mut self, clock: &dyn EventClock) -> Option<WindowTransition> {
        let now = clock.now();
        if self.last_seen == Some(now) {
            return None;
        }
        self.last_seen = Some(now);

        let active = clock.is_active();
        match (self.was_active, active) {
            (false, true) => {
                self.was_active = true;
                Some(WindowTransition::Opened)
            }
            (true, false) => {
                self.was_active = false;
                Some(WindowTransition::Closed)
            }
            _ => None,
        }
    }
}
