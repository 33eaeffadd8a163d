//! Shared sidelink resource pool: a recurring frame partitioned into
//! (subframe, resource-block-group) cells.

use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// One cell of the pool grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolSlot {
    pub subframe: u16,
    pub rbg: u16,
}

/// Occupancy of the pool within the current scheduling round. At most one
/// grant may hold a cell per frame; the scheduler resets the grid at each
/// frame boundary.
pub struct ResourcePool {
    subframes_per_frame: u16,
    rbgs_per_subframe: u16,
    occupied: Vec<bool>,
}

impl ResourcePool {
    pub fn new(cfg: &PoolConfig) -> Result<Self> {
        if cfg.subframes_per_frame == 0 || cfg.rbgs_per_subframe == 0 {
            return Err(Error::MalformedResourcePool(format!(
                "{} subframes x {} resource-block groups",
                cfg.subframes_per_frame, cfg.rbgs_per_subframe
            )));
        }
        let cells = cfg.subframes_per_frame as usize * cfg.rbgs_per_subframe as usize;
        Ok(Self {
            subframes_per_frame: cfg.subframes_per_frame,
            rbgs_per_subframe: cfg.rbgs_per_subframe,
            occupied: vec![false; cells],
        })
    }

    pub fn cells_per_frame(&self) -> usize {
        self.occupied.len()
    }

    fn index(&self, slot: PoolSlot) -> usize {
        slot.subframe as usize * self.rbgs_per_subframe as usize + slot.rbg as usize
    }

    /// Release every cell for a new scheduling round.
    pub fn begin_frame(&mut self) {
        self.occupied.fill(false);
    }

    /// Claim the earliest free cell, scanning subframes in time order and
    /// resource-block groups within each subframe. Returns `None` when the
    /// frame is fully booked.
    pub fn allocate(&mut self) -> Option<PoolSlot> {
        for subframe in 0..self.subframes_per_frame {
            for rbg in 0..self.rbgs_per_subframe {
                let slot = PoolSlot { subframe, rbg };
                let idx = self.index(slot);
                if !self.occupied[idx] {
                    self.occupied[idx] = true;
                    return Some(slot);
                }
            }
        }
        None
    }

    pub fn is_occupied(&self, slot: PoolSlot) -> bool {
        self.occupied[self.index(slot)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ResourcePool {
        ResourcePool::new(&PoolConfig {
            subframes_per_frame: 2,
            rbgs_per_subframe: 3,
            subframe_duration_us: 1_000,
            symbols_per_subframe: 14,
        })
        .unwrap()
    }

    #[test]
    fn rejects_zero_shape() {
        let cfg = PoolConfig {
            subframes_per_frame: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            ResourcePool::new(&cfg),
            Err(Error::MalformedResourcePool(_))
        ));
    }

    #[test]
    fn allocation_never_reuses_a_cell_within_a_round() {
        let mut pool = pool();
        let capacity = pool.cells_per_frame();
        let mut seen = std::collections::HashSet::new();
        while let Some(slot) = pool.allocate() {
            assert!(seen.insert(slot), "cell {slot:?} allocated twice");
        }
        assert_eq!(seen.len(), capacity);
        assert_eq!(capacity, 6);
    }

    #[test]
    fn allocation_is_time_ordered() {
        let mut pool = pool();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let d = pool.allocate().unwrap();
        assert_eq!(a, PoolSlot { subframe: 0, rbg: 0 });
        assert_eq!(b, PoolSlot { subframe: 0, rbg: 1 });
        assert_eq!(c, PoolSlot { subframe: 0, rbg: 2 });
        assert_eq!(d, PoolSlot { subframe: 1, rbg: 0 });
    }

    #[test]
    fn begin_frame_releases_all_cells() {
        let mut pool = pool();
        while pool.allocate().is_some() {}
        pool.begin_frame();
        assert!(!pool.is_occupied(PoolSlot { subframe: 0, rbg: 0 }));
        assert!(pool.allocate().is_some());
    }
}
