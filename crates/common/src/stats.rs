//! Player combat/progression stats.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Level, experience and combat stats, plus an open-ended map of derived
/// modifiers (buffs, equipment bonuses, etc.) that content modules can
/// populate without changing this struct's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub level: u32,
    pub exp: u64,
    pub hp_current: i64,
    pub hp_max: i64,
    pub attack: i64,
    pub defense: i64,
    pub speed: f32,
    pub modifiers: HashMap<String, f32>,
}

impl Stats {
    pub fn new_default() -> Self {
        Self {
            level: 1,
            exp: 0,
            hp_current: 100,
            hp_max: 100,
            attack: 10,
            defense: 10,
            speed: 1.0,
            modifiers: HashMap::new(),
        }
    }

    /// Apply damage, clamping hp to a floor of zero. Returns true if this
    /// damage brought hp to exactly zero (a death).
    pub fn apply_damage(&mut self, amount: i64) -> bool {
        self.hp_current = (self.hp_current - amount).max(0);
        self.hp_current == 0
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_damage_clamps_at_zero() {
        let mut s = Stats::new_default();
        s.hp_current = 50;
        assert!(!s.apply_damage(30));
        assert_eq!(s.hp_current, 20);
        assert!(s.apply_damage(1000));
        assert_eq!(s.hp_current, 0);
    }
}
