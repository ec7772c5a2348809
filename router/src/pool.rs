//! Frontier-point pool (§5): the maze search's hottest allocation is the
//! six-stack frontier itself, so point vectors are recycled through a
//! free-list instead of allocated and dropped per net. Grounded on the
//! teacher's `AStar` scratch-vector reuse (`algo/astar.rs`, since removed —
//! see DESIGN.md), generalized from one scratch buffer to a pool of them.

use eda_common::geom::GridCoord;

/// Vectors are grown to hold this many points on first use, matching the
/// source's ~256 KiB arena block size for its POINT free-list.
const BLOCK_CAPACITY: usize = 256 * 1024 / std::mem::size_of::<GridCoord>();

#[derive(Default)]
pub struct PointPool {
    free: Vec<Vec<GridCoord>>,
}

impl PointPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> Vec<GridCoord> {
        self.free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BLOCK_CAPACITY))
    }

    pub fn release(&mut self, mut v: Vec<GridCoord>) {
        v.clear();
        self.free.push(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_vector_is_empty_and_reused() {
        let mut pool = PointPool::new();
        let mut v = pool.acquire();
        assert!(v.is_empty());
        v.push(GridCoord::new(1, 2, 0));
        let cap = v.capacity();
        pool.release(v);

        let v2 = pool.acquire();
        assert!(v2.is_empty());
        assert_eq!(v2.capacity(), cap);
    }
}
