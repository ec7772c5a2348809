//! Technology description: routing layers, via types, and the unit-scale record.

use super::indices::LayerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Horizontal,
    Vertical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AntennaMethod {
    None,
    Area,
    AggregateArea,
    SideArea,
    AggregateSideArea,
}

/// A spacing rule that may widen for wide metal: the source keeps a list of
/// (minWidth, spacing) pairs and applies the entry for the largest minWidth
/// not exceeding the query width.
#[derive(Clone, Debug)]
pub struct SpacingTable(pub Vec<(f64, f64)>);

impl SpacingTable {
    pub fn uniform(spacing: f64) -> Self {
        Self(vec![(0.0, spacing)])
    }

    pub fn spacing(&self, width: f64) -> f64 {
        self.0
            .iter()
            .rev()
            .find(|(min_w, _)| width >= *min_w)
            .map(|(_, s)| *s)
            .unwrap_or(0.0)
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub number: u8,
    pub direction: Direction,
    pub width: f64,
    pub pitch_x: f64,
    pub pitch_y: f64,
    pub offset: f64,
    pub spacing: SpacingTable,
    pub thickness: f64,
    pub antenna_ratio: f64,
    pub antenna_method: AntennaMethod,
}

impl Layer {
    pub fn pitch(&self) -> f64 {
        match self.direction {
            Direction::Horizontal => self.pitch_y,
            Direction::Vertical => self.pitch_x,
        }
    }
}

/// Per-orientation via footprint on one of its two contacted layers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ViaFootprint {
    pub width_x: f64,
    pub width_y: f64,
}

#[derive(Clone, Debug)]
pub struct ViaType {
    pub name: String,
    pub bottom: LayerId,
    pub top: LayerId,
    pub bottom_footprint: ViaFootprint,
    pub top_footprint: ViaFootprint,
    pub resistance: f64,
}

/// Integer multipliers between user units, internal (output) units, and the
/// technology manufacturing grid.
#[derive(Clone, Copy, Debug)]
pub struct Scales {
    pub user_units_per_micron: u32,
    pub internal_units_per_micron: u32,
    pub manufacturing_grid: f64,
}

impl Default for Scales {
    fn default() -> Self {
        Self {
            user_units_per_micron: 1000,
            internal_units_per_micron: 1000,
            manufacturing_grid: 0.001,
        }
    }
}

impl Scales {
    pub fn snap(&self, value: f64) -> f64 {
        (value / self.manufacturing_grid).round() * self.manufacturing_grid
    }
}
