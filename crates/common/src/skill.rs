//! Static skill table: a small integer `SkillId` indexes fixed combat
//! parameters (damage base, crit base, cooldown, range). Populated at
//! startup from configuration or content data; read-only at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SkillId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkillDef {
    pub damage_base: i64,
    pub crit_base: f32,
    pub cooldown: Duration,
    pub range: f32,
}

/// Read-only lookup table of skill definitions, shared behind an `Arc` by
/// every player-runtime executor.
#[derive(Debug, Clone, Default)]
pub struct SkillTable {
    defs: HashMap<SkillId, SkillDef>,
}

impl SkillTable {
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: SkillId, def: SkillDef) {
        self.defs.insert(id, def);
    }

    pub fn get(&self, id: SkillId) -> Option<&SkillDef> {
        self.defs.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_inserted_definition() {
        let mut table = SkillTable::new();
        let id = SkillId(1);
        table.insert(
            id,
            SkillDef {
                damage_base: 100,
                crit_base: 0.1,
                cooldown: Duration::from_secs(2),
                range: 5.0,
            },
        );
        assert_eq!(table.get(id).unwrap().damage_base, 100);
        assert!(table.get(SkillId(99)).is_none());
    }
}
