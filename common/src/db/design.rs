//! The placed-design entities: macros, instances, nodes, nets, and the
//! route trees the router builds over them.

use crate::geom::{GridCoord, Point, Rect};

use super::indices::{InstanceId, LayerId, MacroId, NetId, NodeId, PinId, RouteId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
    Other,
}

/// One rectangle of metal on a pin, in the macro's local coordinate frame
/// (µm), before placement transforms it to absolute coordinates.
#[derive(Clone, Copy, Debug)]
pub struct TapRect {
    pub layer: LayerId,
    pub rect: Rect,
}

#[derive(Clone, Debug)]
pub struct MacroPin {
    pub name: String,
    pub direction: PinDirection,
    pub taps: Vec<TapRect>,
}

#[derive(Clone, Debug, Default)]
pub struct GateMacro {
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub pins: Vec<MacroPin>,
    pub obstructions: Vec<TapRect>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    N,
    FN,
    S,
    FS,
    E,
    FE,
    W,
    FW,
}

impl Orientation {
    /// Apply this orientation's rotation/mirror to a point local to a macro
    /// of the given width/height, returning the transformed local point.
    pub fn transform(&self, p: Point<f64>, width: f64, height: f64) -> Point<f64> {
        match self {
            Orientation::N => p,
            Orientation::FN => Point::new(width - p.x, p.y),
            Orientation::S => Point::new(width - p.x, height - p.y),
            Orientation::FS => Point::new(p.x, height - p.y),
            Orientation::E => Point::new(height - p.y, p.x),
            Orientation::FE => Point::new(p.y, p.x),
            Orientation::W => Point::new(p.y, width - p.x),
            Orientation::FW => Point::new(height - p.y, width - p.x),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GateInstance {
    pub name: String,
    pub macro_id: MacroId,
    pub origin: Point<f64>,
    pub orientation: Orientation,
    /// Per-pin net, parallel to the macro's pin list.
    pub pin_nets: Vec<Option<NetId>>,
    /// Per-pin node, parallel to the macro's pin list.
    pub pin_nodes: Vec<Option<NodeId>>,
    /// Placement-adjusted tap rectangles, per pin.
    pub pin_taps: Vec<Vec<TapRect>>,
    /// Placement-adjusted obstruction rectangles.
    pub obstructions: Vec<TapRect>,
}

/// A grid-plus-physical point on one layer, as produced by projecting a tap
/// rectangle onto the routing grid.
#[derive(Clone, Copy, Debug)]
pub struct DPoint {
    pub grid: GridCoord,
    pub phys: Point<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub net: Option<NetId>,
    pub index_in_net: usize,
    pub taps: Vec<DPoint>,
    pub halo: Vec<DPoint>,
    pub reachable_count: usize,
    pub branch: Point<f64>,
    /// (instance, pin) this node terminates, for antenna area bookkeeping.
    pub owner: Option<(InstanceId, PinId)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetUse {
    Signal,
    Power,
    Ground,
    Clock,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetFlags {
    pub critical: bool,
    pub ignored: bool,
    pub has_stub: bool,
    pub vertical_trunk_preferred: bool,
    pub placement_pending: bool,
}

#[derive(Clone, Debug)]
pub struct Net {
    pub number: u32,
    pub name: String,
    pub nodes: Vec<NodeId>,
    pub flags: NetFlags,
    pub use_kind: NetUse,
    pub bbox: Rect,
    pub trunk: Point<f64>,
    pub routes: Vec<RouteId>,
    /// Nets this net is forbidden from ripping up, accumulated during stage 2.
    pub no_ripup: Vec<NetId>,
}

impl Net {
    pub fn new(number: u32, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            nodes: Vec::new(),
            flags: NetFlags::default(),
            use_kind: NetUse::Signal,
            bbox: Rect::default(),
            trunk: Point::new(0.0, 0.0),
            routes: Vec::new(),
            no_ripup: Vec::new(),
        }
    }
}

/// One endpoint of a Route: either a Node tap or a T-junction with another
/// Route. Grounded on DESIGN NOTES §9 — replaces the source's raw-pointer
/// union with a stable-index enum so rip-up never leaves dangling refs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteEnd {
    Unset,
    Node(NodeId),
    Route(RouteId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Wire,
    Via,
    WireOffsetStart,
    WireOffsetEnd,
    MinMetalFiller,
    SpecialNet,
}

#[derive(Clone, Copy, Debug)]
pub struct Segment {
    pub layer: LayerId,
    pub p1: GridCoord,
    pub p2: GridCoord,
    pub kind: SegmentKind,
    /// Stub/offset distance in µm, populated when kind is one of the
    /// WireOffset* variants.
    pub offset_distance: f64,
}

impl Segment {
    pub fn is_via(&self) -> bool {
        self.kind == SegmentKind::Via
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteFlags {
    pub visited: bool,
    pub stub: bool,
    pub already_emitted: bool,
    pub start_is_node: bool,
    pub end_is_node: bool,
}

#[derive(Clone, Debug)]
pub struct Route {
    pub net: NetId,
    pub segments: Vec<Segment>,
    pub start: RouteEnd,
    pub end: RouteEnd,
    pub flags: RouteFlags,
}

impl Route {
    pub fn new(net: NetId) -> Self {
        Self {
            net,
            segments: Vec::new(),
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        }
    }

    pub fn is_short(&self) -> bool {
        self.segments.len() <= 3
    }
}

/// Arena owning every entity of the placed design. Indices into its `Vec`s
/// are the only cross-references entities hold (see DESIGN NOTES §9).
///
/// `routes` is a tombstoned arena, not a dense `Vec<Route>`: rip-up removes a
/// route by clearing its slot to `None`, never by compacting the vec, so a
/// `RouteId` stays valid for as long as the route it names is live, no
/// matter how many other routes are ripped up around it. `free_routes` lets
/// `add_route` reuse tombstoned slots instead of growing forever.
#[derive(Default)]
pub struct Design {
    pub layers: Vec<super::tech::Layer>,
    pub vias: Vec<super::tech::ViaType>,
    pub scales: super::tech::Scales,

    pub macros: Vec<GateMacro>,
    pub instances: Vec<GateInstance>,
    pub nodes: Vec<Node>,
    pub nets: Vec<Net>,
    routes: Vec<Option<Route>>,
    free_routes: Vec<RouteId>,

    pub die_area: Rect,
    pub macro_by_name: std::collections::HashMap<String, MacroId>,
    pub instance_by_name: std::collections::HashMap<String, InstanceId>,
    pub net_by_name: std::collections::HashMap<String, NetId>,
}

impl Design {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_macro(&mut self, m: GateMacro) -> MacroId {
        let id = MacroId::new(self.macros.len());
        self.macro_by_name.insert(m.name.clone(), id);
        self.macros.push(m);
        id
    }

    pub fn add_instance(&mut self, inst: GateInstance) -> InstanceId {
        let id = InstanceId::new(self.instances.len());
        self.instance_by_name.insert(inst.name.clone(), id);
        self.instances.push(inst);
        id
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn add_net(&mut self, net: Net) -> NetId {
        let id = NetId::new(self.nets.len());
        self.net_by_name.insert(net.name.clone(), id);
        self.nets.push(net);
        id
    }

    pub fn add_route(&mut self, route: Route) -> RouteId {
        if let Some(id) = self.free_routes.pop() {
            self.routes[id.index()] = Some(route);
            return id;
        }
        let id = RouteId::new(self.routes.len());
        self.routes.push(Some(route));
        id
    }

    /// Tombstones `id`'s slot and returns it to the free list. The index
    /// itself is never reused until a later `add_route` pops it back off
    /// that list, so any `RouteId` recorded elsewhere before this call stays
    /// meaningful (it just no longer resolves) until the slot is reused.
    pub fn remove_route(&mut self, id: RouteId) {
        self.routes[id.index()] = None;
        self.free_routes.push(id);
    }

    /// Writes `route` back into `id`'s exact slot, taking it out of the free
    /// list if `remove_route` had put it there. Used by rip-up/reroute
    /// attempts that restore a net's prior routes verbatim on failure, so
    /// any other route's `RouteEnd::Route(id)` still resolves to the same
    /// data it did before the attempt.
    pub fn restore_route(&mut self, id: RouteId, route: Route) {
        self.routes[id.index()] = Some(route);
        self.free_routes.retain(|&r| r != id);
    }

    pub fn layer(&self, id: LayerId) -> &super::tech::Layer {
        &self.layers[id.index()]
    }

    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[id.index()]
    }

    pub fn net_mut(&mut self, id: NetId) -> &mut Net {
        &mut self.nets[id.index()]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn route(&self, id: RouteId) -> &Route {
        self.routes[id.index()].as_ref().expect("RouteId refers to a removed route")
    }

    pub fn route_mut(&mut self, id: RouteId) -> &mut Route {
        self.routes[id.index()].as_mut().expect("RouteId refers to a removed route")
    }
}
