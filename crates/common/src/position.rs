//! World position and the uniform-grid cell coordinate it maps to.

use serde::{Deserialize, Serialize};

/// A point in a map's coordinate space, plus facing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub map_id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub facing: f32,
}

impl Position {
    pub fn new(map_id: u32, x: f32, y: f32, z: f32, facing: f32) -> Self {
        Self {
            map_id,
            x,
            y,
            z,
            facing,
        }
    }

    /// Euclidean distance ignoring `z` (ground-plane distance), used for
    /// move-bound and skill-range checks.
    pub fn planar_distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Grid cell this position falls into for a given cell size.
    /// Cell-boundary points are assigned to the lower cell (`floor`).
    pub fn cell_coords(&self, cell_size: f32) -> (i64, i64) {
        (
            (self.x / cell_size).floor() as i64,
            (self.y / cell_size).floor() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_coords_use_floor_inclusive_lower_bound() {
        let p = Position::new(1, 10.0, 9.999, 0.0, 0.0);
        assert_eq!(p.cell_coords(10.0), (1, 0));
        let boundary = Position::new(1, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(boundary.cell_coords(10.0), (0, 0));
    }

    #[test]
    fn planar_distance_ignores_z() {
        let a = Position::new(1, 0.0, 0.0, 100.0, 0.0);
        let b = Position::new(1, 3.0, 4.0, -100.0, 0.0);
        assert_eq!(a.planar_distance(&b), 5.0);
    }
}
