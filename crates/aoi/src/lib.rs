//! Area-of-interest index: a uniform grid over one map. Each entity
//! occupies exactly one cell; the observer set of an entity is the union
//! of its cell and the Moore neighborhood around it. [`Grid::mv`] is the
//! hot path — it computes the net enter/leave/position-update diff for a
//! single movement, coalescing whatever the caller would otherwise have
//! to derive by re-resolving both observer sets by hand.

use ahash::{AHashMap, AHashSet};
use gw_common::{EntityId, Position};

pub type CellCoords = (i64, i64);

/// Net effect of moving one entity, expressed from the mover's point of
/// view. Because the Moore-neighborhood relation is symmetric (same cell
/// size and radius for every entity on a map), each list doubles as both
/// "who now observes/stops observing the mover" and "what the mover now
/// observes/stops observing" — the caller fans a single diff out in both
/// directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveDelta {
    pub left_view: Vec<EntityId>,
    pub entered_view: Vec<EntityId>,
    pub position_update: Vec<EntityId>,
}

impl MoveDelta {
    fn is_noop(&self) -> bool {
        self.left_view.is_empty() && self.entered_view.is_empty() && self.position_update.is_empty()
    }
}

struct EntityRecord {
    cell: CellCoords,
    position: Position,
}

/// A single map's grid. Owned by the game node that owns the map shard;
/// not `Sync` on its own — callers route mutation through whatever
/// per-map executor or lock discipline they use for shared-resource
/// access (a per-cell lock or a map-shard executor, per the concurrency
/// model).
pub struct Grid {
    cell_size: f32,
    /// Radius in cells; 1 means the default 3x3 Moore neighborhood.
    neighborhood: i64,
    entities: AHashMap<EntityId, EntityRecord>,
    cells: AHashMap<CellCoords, AHashSet<EntityId>>,
}

impl Grid {
    pub fn new(cell_size: f32, neighborhood: i64) -> Self {
        Self {
            cell_size,
            neighborhood,
            entities: AHashMap::new(),
            cells: AHashMap::new(),
        }
    }

    fn cell_of(&self, position: &Position) -> CellCoords {
        position.cell_coords(self.cell_size)
    }

    /// All entities in `cell` and its Moore neighborhood, excluding `exclude`.
    fn observer_set(&self, cell: CellCoords, exclude: EntityId) -> AHashSet<EntityId> {
        let mut set = AHashSet::default();
        let (cx, cy) = cell;
        let r = self.neighborhood;
        for dx in -r..=r {
            for dy in -r..=r {
                if let Some(occupants) = self.cells.get(&(cx + dx, cy + dy)) {
                    for &id in occupants {
                        if id != exclude {
                            set.insert(id);
                        }
                    }
                }
            }
        }
        set
    }

    /// Insert a new entity into the grid. Returns the observer set
    /// present at insertion time: the caller emits `EntityEnter(entity)`
    /// to each of them, and `EntityEnter(neighbor)` back to `entity` for
    /// each one, per the entry contract.
    pub fn enter(&mut self, entity: EntityId, position: Position) -> Vec<EntityId> {
        let cell = self.cell_of(&position);
        self.cells.entry(cell).or_default().insert(entity);
        self.entities.insert(entity, EntityRecord { cell, position });
        self.observer_set(cell, entity).into_iter().collect()
    }

    /// Remove an entity from the grid. Returns the observer set it was
    /// last visible to; the caller emits `EntityLeave(entity)` to each.
    pub fn leave(&mut self, entity: EntityId) -> Vec<EntityId> {
        let Some(record) = self.entities.remove(&entity) else {
            return Vec::new();
        };
        if let Some(occupants) = self.cells.get_mut(&record.cell) {
            occupants.remove(&entity);
            if occupants.is_empty() {
                self.cells.remove(&record.cell);
            }
        }
        self.observer_set(record.cell, entity).into_iter().collect()
    }

    /// Move an already-entered entity to `new_position`, returning the
    /// net observer diff. A no-op move (same cell, same observers, no
    /// reason to notify) returns an empty [`MoveDelta`] so callers can
    /// coalesce repeated identical moves within one tick into silence.
    pub fn mv(&mut self, entity: EntityId, new_position: Position) -> MoveDelta {
        let Some(old_cell) = self.entities.get(&entity).map(|r| r.cell) else {
            // Not previously entered; treat as a fresh entry rather than panic.
            let entered = self.enter(entity, new_position);
            return MoveDelta {
                entered_view: entered,
                ..Default::default()
            };
        };
        let new_cell = self.cell_of(&new_position);

        if new_cell == old_cell {
            self.entities.get_mut(&entity).unwrap().position = new_position;
            let observers = self.observer_set(old_cell, entity);
            return MoveDelta {
                position_update: observers.into_iter().collect(),
                ..Default::default()
            };
        }

        let old_observers = self.observer_set(old_cell, entity);
        let new_observers = self.observer_set(new_cell, entity);

        if let Some(occupants) = self.cells.get_mut(&old_cell) {
            occupants.remove(&entity);
            if occupants.is_empty() {
                self.cells.remove(&old_cell);
            }
        }
        self.cells.entry(new_cell).or_default().insert(entity);
        self.entities.insert(
            entity,
            EntityRecord {
                cell: new_cell,
                position: new_position,
            },
        );

        let left_view = old_observers.difference(&new_observers).copied().collect();
        let entered_view = new_observers.difference(&old_observers).copied().collect();
        let position_update = old_observers
            .intersection(&new_observers)
            .copied()
            .collect();

        MoveDelta {
            left_view,
            entered_view,
            position_update,
        }
    }

    /// Resolve the observer set of `entity` for a fire-and-forget broadcast
    /// unrelated to movement (e.g. a skill result).
    pub fn observers_of(&self, entity: EntityId) -> Vec<EntityId> {
        let Some(record) = self.entities.get(&entity) else {
            return Vec::new();
        };
        self.observer_set(record.cell, entity).into_iter().collect()
    }

    pub fn position_of(&self, entity: EntityId) -> Option<Position> {
        self.entities.get(&entity).map(|r| r.position)
    }

    pub fn cell_of_entity(&self, entity: EntityId) -> Option<CellCoords> {
        self.entities.get(&entity).map(|r| r.cell)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: f32, y: f32) -> Position {
        Position::new(1, x, y, 0.0, 0.0)
    }

    #[test]
    fn enter_reports_existing_neighbors_and_vice_versa() {
        let mut grid = Grid::new(10.0, 1);
        let p1 = EntityId::new();
        let p2 = EntityId::new();

        let observers_for_p1 = grid.enter(p1, pos(5.0, 5.0));
        assert!(observers_for_p1.is_empty());

        let observers_for_p2 = grid.enter(p2, pos(15.0, 15.0));
        assert_eq!(observers_for_p2, vec![p1]);
    }

    #[test]
    fn same_cell_move_emits_only_position_update() {
        let mut grid = Grid::new(10.0, 1);
        let p1 = EntityId::new();
        let p2 = EntityId::new();
        grid.enter(p1, pos(1.0, 1.0));
        grid.enter(p2, pos(2.0, 2.0));

        let delta = grid.mv(p1, pos(3.0, 3.0));
        assert_eq!(delta.position_update, vec![p2]);
        assert!(delta.left_view.is_empty());
        assert!(delta.entered_view.is_empty());
    }

    #[test]
    fn cross_cell_move_splits_into_leave_enter_and_intersection() {
        // cell_size=10, neighborhood=1 (3x3): cell (0,0) and (4,0) share no
        // neighborhood overlap, so a mover from deep in one to deep in the
        // other sees a pure leave/enter split with no position-update carryover.
        let mut grid = Grid::new(10.0, 1);
        let mover = EntityId::new();
        let stayer_old = EntityId::new();
        let stayer_new = EntityId::new();
        grid.enter(mover, pos(5.0, 5.0));
        grid.enter(stayer_old, pos(6.0, 6.0));
        grid.enter(stayer_new, pos(45.0, 5.0));

        let delta = grid.mv(mover, pos(45.0, 6.0));
        assert_eq!(delta.left_view, vec![stayer_old]);
        assert_eq!(delta.entered_view, vec![stayer_new]);
        assert!(delta.position_update.is_empty());
    }

    #[test]
    fn adjacent_cell_move_keeps_observers_in_intersection() {
        // P1 at (100,200), P2 at (105,205): same cell (10,20) with
        // cell_size=10. P1 moves to (140,200): new cell (14,20), which is
        // not Moore-adjacent to (10,20) under radius 1, so P2 falls out of
        // view entirely -- this directly grounds seed scenario 2.
        let mut grid = Grid::new(10.0, 1);
        let p1 = EntityId::new();
        let p2 = EntityId::new();
        grid.enter(p1, pos(100.0, 200.0));
        grid.enter(p2, pos(105.0, 205.0));

        let delta = grid.mv(p1, pos(140.0, 200.0));
        assert_eq!(delta.left_view, vec![p2]);
        assert!(delta.entered_view.is_empty());
        assert!(delta.position_update.is_empty());
    }

    #[test]
    fn noop_move_is_silent() {
        let mut grid = Grid::new(10.0, 1);
        let p1 = EntityId::new();
        grid.enter(p1, pos(5.0, 5.0));
        let delta = grid.mv(p1, pos(5.0, 5.0));
        assert!(delta.is_noop());
    }

    #[test]
    fn leave_removes_entity_and_notifies_observers() {
        let mut grid = Grid::new(10.0, 1);
        let p1 = EntityId::new();
        let p2 = EntityId::new();
        grid.enter(p1, pos(1.0, 1.0));
        grid.enter(p2, pos(2.0, 2.0));

        let observers = grid.leave(p1);
        assert_eq!(observers, vec![p2]);
        assert!(grid.position_of(p1).is_none());
        assert_eq!(grid.len(), 1);
    }
}
