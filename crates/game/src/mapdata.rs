//! Static per-map walkability metadata (C6 Move validation): a set of
//! blocked grid cells per map, loaded once from [`MapConfig`] at node
//! startup. Same bucketing scheme as `gw_aoi::Grid` -- `floor(coord /
//! cell_size)` -- but kept as its own table since obstacle geometry and
//! AOI interest-management geometry are independent concerns.

use ahash::AHashSet;
use gw_common::config::MapConfig;

pub struct MapTable {
    cell_size: f32,
    blocked: AHashSet<(u32, i32, i32)>,
}

impl MapTable {
    pub fn new(config: MapConfig) -> Self {
        let blocked = config
            .blocked_cells
            .iter()
            .map(|c| (c.map_id, c.cell_x, c.cell_y))
            .collect();
        Self {
            cell_size: config.cell_size.max(f32::MIN_POSITIVE),
            blocked,
        }
    }

    /// A map with no configured obstacles; everything is walkable.
    pub fn empty() -> Self {
        Self::new(MapConfig::default())
    }

    pub fn is_walkable(&self, map_id: u32, x: f32, y: f32) -> bool {
        let cell_x = (x / self.cell_size).floor() as i32;
        let cell_y = (y / self.cell_size).floor() as i32;
        !self.blocked.contains(&(map_id, cell_x, cell_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::config::BlockedCell;

    #[test]
    fn a_cell_with_no_configured_obstacles_is_walkable() {
        let table = MapTable::empty();
        assert!(table.is_walkable(1, 123.4, -56.0));
    }

    #[test]
    fn a_blocked_cell_rejects_any_point_inside_it() {
        let config = MapConfig {
            cell_size: 10.0,
            blocked_cells: vec![BlockedCell {
                map_id: 1,
                cell_x: 2,
                cell_y: 0,
            }],
        };
        let table = MapTable::new(config);
        assert!(!table.is_walkable(1, 25.0, 5.0));
        assert!(table.is_walkable(1, 5.0, 5.0));
        assert!(table.is_walkable(2, 25.0, 5.0));
    }
}
