//! The grid model (C1): coordinate mapping and the flat per-cell arrays that
//! back every later stage. Grounded on the teacher's `grid/dense.rs`
//! (`DenseGrid`'s flat `Vec` + `index()` pattern), generalized from a single
//! occupancy word to the full Obs/NodeInfo/RMask set the spec's data model
//! (§3) requires.

use eda_common::db::Design;
use eda_common::geom::{GridCoord, Point};
use eda_common::util::error::{Result, RouterError};

/// Cardinal and vertical neighbor directions a grid cell can be entered
/// from or blocked in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    fn bit(self) -> u8 {
        match self {
            Direction::North => 1 << 0,
            Direction::South => 1 << 1,
            Direction::East => 1 << 2,
            Direction::West => 1 << 3,
            Direction::Up => 1 << 4,
            Direction::Down => 1 << 5,
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// The neighbor grid coordinate in this direction, or `None` if that
    /// would leave the grid.
    pub fn step(self, c: GridCoord, nx: u32, ny: u32, nlayers: u8) -> Option<GridCoord> {
        match self {
            Direction::North if c.y + 1 < ny => Some(GridCoord::new(c.x, c.y + 1, c.z)),
            Direction::South if c.y > 0 => Some(GridCoord::new(c.x, c.y - 1, c.z)),
            Direction::East if c.x + 1 < nx => Some(GridCoord::new(c.x + 1, c.y, c.z)),
            Direction::West if c.x > 0 => Some(GridCoord::new(c.x - 1, c.y, c.z)),
            Direction::Up if c.z + 1 < nlayers => Some(GridCoord::new(c.x, c.y, c.z + 1)),
            Direction::Down if c.z > 0 => Some(GridCoord::new(c.x, c.y, c.z - 1)),
            _ => None,
        }
    }
}

/// `Obs[l][x,y]`: one packed-conceptually grid cell. Net number 0 means no
/// net owns this cell. Need not be bit-identical to the source (§9); only
/// the accessors below are load-bearing.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObsCell {
    pub net: u32,
    blocked: u8,
    pub no_net: bool,
    pub routed_net: bool,
    pub stub_route: bool,
    pub offset_tap: bool,
}

impl ObsCell {
    pub fn is_blocked(&self, dir: Direction) -> bool {
        self.blocked & dir.bit() != 0
    }

    pub fn set_blocked(&mut self, dir: Direction, v: bool) {
        if v {
            self.blocked |= dir.bit();
        } else {
            self.blocked &= !dir.bit();
        }
    }
}

/// `NodeInfo[l][x,y]`: present only on pin-bearing layers.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeInfoEntry {
    pub nodeloc: Option<eda_common::db::indices::NodeId>,
    pub nodesav: Option<eda_common::db::indices::NodeId>,
    pub stub_len: f64,
    pub offset: f64,
    pub stub_ns: bool,
    pub stub_ew: bool,
    pub offset_ns: bool,
    pub offset_ew: bool,
    pub no_via_x: bool,
    pub no_via_y: bool,
}

pub struct GridModel {
    pub nx: u32,
    pub ny: u32,
    pub num_layers: u8,
    /// Minimum route pitch across all layers; the grid step in both axes.
    pub pitch: f64,
    pub xlb: f64,
    pub ylb: f64,

    obs: Vec<ObsCell>,
    /// Freed after C2 (§3 lifecycle); `None` once released.
    obs_info: Option<Vec<f32>>,
    /// Largest layer index carrying any NodeInfo, set at the end of C2.
    pub pin_layers: u8,
    node_info: Vec<Option<NodeInfoEntry>>,
    rmask: Vec<u8>,
}

impl GridModel {
    pub fn allocate(design: &Design) -> Result<Self> {
        let num_layers = design.layers.len() as u8;
        if num_layers == 0 {
            return Err(RouterError::NoLayers);
        }
        let pitch = design
            .layers
            .iter()
            .map(|l| l.pitch_x.min(l.pitch_y))
            .fold(f64::INFINITY, f64::min);
        for l in &design.layers {
            if l.pitch_x <= 0.0 {
                return Err(RouterError::ZeroPitch {
                    layer: l.name.clone(),
                    axis: "x",
                });
            }
            if l.pitch_y <= 0.0 {
                return Err(RouterError::ZeroPitch {
                    layer: l.name.clone(),
                    axis: "y",
                });
            }
        }

        let width = design.die_area.width();
        let height = design.die_area.height();
        let nx = (width / pitch).floor() as u32;
        let ny = (height / pitch).floor() as u32;
        if nx == 0 || ny == 0 {
            return Err(RouterError::EmptyGrid { nx, ny });
        }

        let cells = nx as usize * ny as usize * num_layers as usize;
        Ok(Self {
            nx,
            ny,
            num_layers,
            pitch,
            xlb: design.die_area.min.x,
            ylb: design.die_area.min.y,
            obs: vec![ObsCell::default(); cells],
            obs_info: Some(vec![0.0; cells]),
            pin_layers: num_layers.saturating_sub(1),
            node_info: vec![None; cells],
            rmask: vec![0; nx as usize * ny as usize],
        })
    }

    #[inline]
    pub fn index(&self, c: GridCoord) -> usize {
        (c.z as usize * self.ny as usize + c.y as usize) * self.nx as usize + c.x as usize
    }

    #[inline]
    pub fn in_bounds(&self, c: GridCoord) -> bool {
        c.x < self.nx && c.y < self.ny && c.z < self.num_layers
    }

    pub fn grid_of(&self, p: Point<f64>, layer: u8) -> GridCoord {
        let x = ((p.x - self.xlb) / self.pitch).round().max(0.0) as u32;
        let y = ((p.y - self.ylb) / self.pitch).round().max(0.0) as u32;
        GridCoord::new(x.min(self.nx - 1), y.min(self.ny - 1), layer)
    }

    /// Like `grid_of`, but rejects a point that falls outside the die area
    /// instead of clamping it onto the nearest edge. Used where a point
    /// landing off-grid indicates corrupt input geometry rather than an
    /// ordinary rounding edge case.
    pub fn try_grid_of(&self, p: Point<f64>, layer: u8) -> Result<GridCoord> {
        let fx = (p.x - self.xlb) / self.pitch;
        let fy = (p.y - self.ylb) / self.pitch;
        if fx < -0.5 || fy < -0.5 || fx >= self.nx as f64 + 0.5 || fy >= self.ny as f64 + 0.5 {
            return Err(RouterError::OutOfBounds {
                x: fx.round() as i64,
                y: fy.round() as i64,
                layer: layer as i64,
            });
        }
        let x = (fx.round().max(0.0) as u32).min(self.nx - 1);
        let y = (fy.round().max(0.0) as u32).min(self.ny - 1);
        Ok(GridCoord::new(x, y, layer))
    }

    pub fn phys_of(&self, c: GridCoord) -> Point<f64> {
        Point::new(
            self.xlb + c.x as f64 * self.pitch,
            self.ylb + c.y as f64 * self.pitch,
        )
    }

    pub fn obs(&self, c: GridCoord) -> &ObsCell {
        &self.obs[self.index(c)]
    }

    pub fn obs_mut(&mut self, c: GridCoord) -> &mut ObsCell {
        let idx = self.index(c);
        &mut self.obs[idx]
    }

    pub fn obs_info(&self, c: GridCoord) -> Option<f32> {
        self.obs_info.as_ref().map(|v| v[self.index(c)])
    }

    pub fn set_obs_info(&mut self, c: GridCoord, v: f32) {
        let idx = self.index(c);
        if let Some(arr) = self.obs_info.as_mut() {
            arr[idx] = v;
        }
    }

    /// §4.2 end-of-C2: release ObsInfo and trim NodeInfo above `pin_layers`.
    pub fn freeze_after_obstruction_analysis(&mut self, pin_layers: u8) {
        self.obs_info = None;
        self.pin_layers = pin_layers;
        for z in (pin_layers as usize + 1)..self.num_layers as usize {
            for y in 0..self.ny as usize {
                for x in 0..self.nx as usize {
                    let idx = (z * self.ny as usize + y) * self.nx as usize + x;
                    self.node_info[idx] = None;
                }
            }
        }
    }

    pub fn node_info(&self, c: GridCoord) -> Option<&NodeInfoEntry> {
        self.node_info[self.index(c)].as_ref()
    }

    pub fn node_info_mut(&mut self, c: GridCoord) -> &mut NodeInfoEntry {
        let idx = self.index(c);
        self.node_info[idx].get_or_insert_with(NodeInfoEntry::default)
    }

    pub fn clear_node_info(&mut self, c: GridCoord) {
        let idx = self.index(c);
        self.node_info[idx] = None;
    }

    pub fn rmask(&self, x: u32, y: u32) -> u8 {
        self.rmask[(y as usize) * self.nx as usize + x as usize]
    }

    pub fn set_rmask(&mut self, x: u32, y: u32, v: u8) {
        self.rmask[(y as usize) * self.nx as usize + x as usize] = v;
    }

    pub fn clear_rmask(&mut self) {
        self.rmask.fill(0);
    }

    /// `block_route`: set the BLOCKED_dir bit on the neighbor and its
    /// mirror on `(x,y,l)`. No-op if the neighbor is out of bounds or
    /// already NO_NET.
    pub fn block_route(&mut self, c: GridCoord, dir: Direction) {
        let Some(neighbor) = dir.step(c, self.nx, self.ny, self.num_layers) else {
            return;
        };
        if self.obs(neighbor).no_net {
            return;
        }
        self.obs_mut(neighbor).set_blocked(dir.opposite(), true);
        self.obs_mut(c).set_blocked(dir, true);
    }
}
