use thiserror::Error;

/// Error kinds the core distinguishes (§7). Only setup errors unwind out of
/// a command; everything else is reported through FailedNets and logged.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("inconsistent pitch: layer '{layer}' has zero pitch in {axis}")]
    ZeroPitch { layer: String, axis: &'static str },

    #[error("no routing layers defined")]
    NoLayers,

    #[error("die bounding box implies zero grid channels ({nx} x {ny})")]
    EmptyGrid { nx: u32, ny: u32 },

    #[error("node has zero reachable taps on the routing grid")]
    UnreachableNode,

    #[error("antenna gpoint out of range at ({x}, {y}, {layer})")]
    AntennaGpointOutOfRange { x: u32, y: u32, layer: u8 },

    #[error("grid coordinate out of bounds: ({x}, {y}, {layer})")]
    OutOfBounds { x: i64, y: i64, layer: i64 },
}

pub type Result<T> = std::result::Result<T, RouterError>;
