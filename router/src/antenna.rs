//! Antenna analysis and repair (C8): bottom-up per-layer cumulative-area
//! walk over each net's route graph, with an optional fix phase that routes
//! violating subgraphs out to free antenna-cell taps. Grounded on spec §4.8
//! and `original_source/antenna.c`.

use std::collections::{HashMap, HashSet};

use log::{error, warn};

use eda_common::db::design::RouteEnd;
use eda_common::db::indices::{InstanceId, LayerId, NetId, NodeId, RouteId};
use eda_common::db::tech::AntennaMethod;
use eda_common::db::Design;
use eda_common::geom::GridCoord;
use eda_common::util::config::{AntennaConfig, SearchConfig};
use eda_common::util::error::RouterError;

use crate::connect;
use crate::grid::GridModel;
use crate::search::{self, SearchState};

#[derive(Clone, Copy, Debug)]
pub struct Violation {
    pub net: NetId,
    pub node: NodeId,
    pub layer: LayerId,
    pub route: RouteId,
}

/// Node → (instance, pin) lookup, built once per run for O(1) antenna
/// bookkeeping (step 1 of §4.8).
fn build_owner_index(design: &Design) -> HashMap<NodeId, (InstanceId, usize)> {
    let mut index = HashMap::new();
    for i in 0..design.nodes.len() {
        let id = NodeId::new(i);
        if let Some((inst, pin)) = design.node(id).owner {
            index.insert(id, (inst, pin.index()));
        }
    }
    index
}

fn segment_area(design: &Design, grid: &GridModel, seg: &eda_common::db::design::Segment) -> f64 {
    let layer = design.layer(seg.layer);
    let dx = seg.p1.x.abs_diff(seg.p2.x) as f64;
    let dy = seg.p1.y.abs_diff(seg.p2.y) as f64;
    let length = (dx + dy) * grid.pitch;
    match layer.antenna_method {
        AntennaMethod::None => 0.0,
        AntennaMethod::Area | AntennaMethod::AggregateArea => length * layer.width,
        AntennaMethod::SideArea | AntennaMethod::AggregateSideArea => {
            2.0 * layer.thickness * (length + layer.width)
        }
    }
}

/// Gate area contributed by one connected pin. The LEF model carried here
/// has no per-pin ANTENNAGATEAREA property, so this approximates with the
/// owning macro's footprint area — a known simplification (see DESIGN.md).
fn pin_gate_area(design: &Design, inst: InstanceId) -> f64 {
    let macro_id = design.instances[inst.index()].macro_id;
    let m = &design.macros[macro_id.index()];
    m.width * m.height
}

fn visit_route(
    design: &Design,
    grid: &GridModel,
    route_id: RouteId,
    max_layer: u8,
    visited_routes: &mut HashSet<RouteId>,
    visited_nodes: &mut HashSet<NodeId>,
    metal_area: &mut f64,
) {
    if visited_routes.contains(&route_id) {
        return;
    }
    let route = design.route(route_id);
    if route.segments.iter().any(|s| s.p1.z.max(s.p2.z) > max_layer) {
        return;
    }
    visited_routes.insert(route_id);
    for seg in &route.segments {
        if !seg.is_via() {
            *metal_area += segment_area(design, grid, seg);
        }
    }
    let ends = [route.start, route.end];
    for end in ends {
        match end {
            RouteEnd::Node(n) => walk(design, grid, n, max_layer, visited_routes, visited_nodes, metal_area),
            RouteEnd::Route(r) => visit_route(design, grid, r, max_layer, visited_routes, visited_nodes, metal_area),
            RouteEnd::Unset => {}
        }
    }
}

fn walk(
    design: &Design,
    grid: &GridModel,
    node_id: NodeId,
    max_layer: u8,
    visited_routes: &mut HashSet<RouteId>,
    visited_nodes: &mut HashSet<NodeId>,
    metal_area: &mut f64,
) {
    if !visited_nodes.insert(node_id) {
        return;
    }
    let Some(net_id) = design.node(node_id).net else {
        return;
    };
    let route_ids = design.net(net_id).routes.clone();
    for route_id in route_ids {
        if visited_routes.contains(&route_id) {
            continue;
        }
        let route = design.route(route_id);
        let touches = matches!(route.start, RouteEnd::Node(n) if n == node_id)
            || matches!(route.end, RouteEnd::Node(n) if n == node_id);
        if touches {
            visit_route(design, grid, route_id, max_layer, visited_routes, visited_nodes, metal_area);
        }
    }
}

pub fn check(design: &Design, grid: &GridModel) -> Vec<Violation> {
    let owners = build_owner_index(design);
    let mut violations = Vec::new();

    for layer_idx in 0..design.layers.len() as u8 {
        for net_idx in 0..design.nets.len() {
            let net_id = NetId::new(net_idx);
            let node_ids = design.net(net_id).nodes.clone();
            for &node_id in &node_ids {
                let mut visited_routes = HashSet::new();
                let mut visited_nodes = HashSet::new();
                let mut metal_area = 0.0;
                walk(design, grid, node_id, layer_idx, &mut visited_routes, &mut visited_nodes, &mut metal_area);

                let mut gate_area = 0.0;
                for n in &visited_nodes {
                    if let Some((inst, _)) = owners.get(n) {
                        gate_area += pin_gate_area(design, *inst);
                    }
                }
                if gate_area <= 0.0 {
                    continue;
                }
                let ratio = metal_area / gate_area;
                let limit = design.layer(LayerId::new(layer_idx as usize)).antenna_ratio;
                if ratio > limit {
                    if let Some(&route) = visited_routes.iter().next() {
                        violations.push(Violation {
                            net: net_id,
                            node: node_id,
                            layer: LayerId::new(layer_idx as usize),
                            route,
                        });
                    }
                }
            }
        }
    }
    violations
}

fn matches_antenna_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Raw (unclamped) grid projection, so an out-of-range free tap is reported
/// rather than silently clamped onto the grid edge (§9 Open Question 3).
fn raw_grid_of(grid: &GridModel, p: eda_common::geom::Point<f64>, layer: u8) -> Result<GridCoord, RouterError> {
    let fx = (p.x - grid.xlb) / grid.pitch;
    let fy = (p.y - grid.ylb) / grid.pitch;
    if fx < 0.0 || fy < 0.0 || fx.round() as i64 >= grid.nx as i64 || fy.round() as i64 >= grid.ny as i64 {
        return Err(RouterError::AntennaGpointOutOfRange {
            x: fx.max(0.0) as u32,
            y: fy.max(0.0) as u32,
            layer,
        });
    }
    Ok(GridCoord::new(fx.round() as u32, fy.round() as u32, layer))
}

fn free_antenna_taps(design: &Design, grid: &GridModel, pattern: &str, max_layer: u8) -> Vec<GridCoord> {
    let mut taps = Vec::new();
    for inst in &design.instances {
        if !matches_antenna_pattern(&inst.name, pattern) {
            continue;
        }
        for pin_taps in &inst.pin_taps {
            for tap in pin_taps {
                if tap.layer.index() as u8 > max_layer {
                    continue;
                }
                let center = eda_common::geom::Point::new(
                    (tap.rect.min.x + tap.rect.max.x) / 2.0,
                    (tap.rect.min.y + tap.rect.max.y) / 2.0,
                );
                if let Ok(c) = raw_grid_of(grid, center, tap.layer.index() as u8) {
                    taps.push(c);
                }
            }
        }
    }
    taps
}

#[allow(clippy::too_many_arguments)]
pub fn fix(
    design: &mut Design,
    grid: &mut GridModel,
    state: &mut SearchState,
    search_cfg: &SearchConfig,
    cfg: &AntennaConfig,
    violations: &[Violation],
) -> Vec<Violation> {
    let mut unfixed = Vec::new();
    for v in violations {
        let mut visited_routes = HashSet::new();
        let mut visited_nodes = HashSet::new();
        let mut metal_area = 0.0;
        walk(design, grid, v.node, v.layer.index() as u8, &mut visited_routes, &mut visited_nodes, &mut metal_area);

        let sources: Vec<GridCoord> = visited_routes
            .iter()
            .flat_map(|r| design.route(*r).segments.iter().flat_map(|s| [s.p1, s.p2]))
            .collect();
        if sources.is_empty() {
            unfixed.push(*v);
            continue;
        }

        let targets = free_antenna_taps(design, grid, &cfg.antenna_cell_pattern, v.layer.index() as u8);
        if targets.is_empty() {
            warn!("antenna fix: no free antenna tap reachable for net {:?}", v.net);
            unfixed.push(*v);
            continue;
        }

        let Some(result) = search::find_path(grid, design, state, &sources, &targets, search_cfg, 9, true) else {
            unfixed.push(*v);
            continue;
        };
        let path = search::reconstruct_path(grid, state, result.best);
        let segments = search::path_to_segments(grid, &path);
        search::writeback(grid, &path, design.net(v.net).number);

        let route_id = design.add_route(eda_common::db::design::Route {
            net: v.net,
            segments,
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: eda_common::db::design::RouteFlags::default(),
        });
        design.net_mut(v.net).routes.push(route_id);
        connect::set_connections(design, route_id);
    }
    unfixed
}

pub fn run(
    design: &mut Design,
    grid: &mut GridModel,
    state: &mut SearchState,
    search_cfg: &SearchConfig,
    cfg: &AntennaConfig,
) -> Vec<Violation> {
    let violations = check(design, grid);
    if violations.is_empty() || !cfg.fix {
        if !violations.is_empty() {
            error!("{} antenna violations found, fix disabled", violations.len());
        }
        return violations;
    }
    fix(design, grid, state, search_cfg, cfg, &violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::design::{GateInstance, GateMacro, Node, Orientation, Route, RouteFlags, Segment, SegmentKind};
    use eda_common::db::indices::PinId;
    use eda_common::db::tech::{Layer, SpacingTable};
    use eda_common::geom::{Point, Rect};

    fn design_with_one_pin_net(gate_area: f64, antenna_ratio: f64, wire_len_grid: u32) -> (Design, GridModel, RouteId) {
        let mut design = Design::new();
        design.layers.push(Layer {
            name: "M1".into(),
            number: 0,
            direction: eda_common::db::tech::Direction::Horizontal,
            width: 1.0,
            pitch_x: 1.0,
            pitch_y: 1.0,
            offset: 0.0,
            spacing: SpacingTable::uniform(0.1),
            thickness: 0.1,
            antenna_ratio,
            antenna_method: AntennaMethod::Area,
        });
        design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(200.0, 200.0));

        let side = gate_area.sqrt();
        let macro_id = design.add_macro(GateMacro {
            name: "INV".into(),
            width: side,
            height: side,
            pins: Vec::new(),
            obstructions: Vec::new(),
        });
        let inst_id = design.add_instance(GateInstance {
            name: "u1".into(),
            macro_id,
            origin: Point::new(0.0, 0.0),
            orientation: Orientation::N,
            pin_nets: vec![None],
            pin_nodes: vec![None],
            pin_taps: vec![Vec::new()],
            obstructions: Vec::new(),
        });

        let net_id = design.add_net(Net::new(1, "n1"));
        let node_id = design.add_node(Node {
            net: Some(net_id),
            owner: Some((inst_id, PinId::new(0))),
            ..Default::default()
        });
        design.net_mut(net_id).nodes.push(node_id);

        let route_id = design.add_route(Route {
            net: net_id,
            segments: vec![Segment {
                layer: LayerId::new(0),
                p1: GridCoord::new(0, 0, 0),
                p2: GridCoord::new(wire_len_grid, 0, 0),
                kind: SegmentKind::Wire,
                offset_distance: 0.0,
            }],
            start: RouteEnd::Node(node_id),
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(route_id);

        let grid = GridModel::allocate(&design).unwrap();
        (design, grid, route_id)
    }

    #[test]
    fn flags_a_net_whose_metal_area_exceeds_its_ratio() {
        let (design, grid, route_id) = design_with_one_pin_net(0.0001, 10.0, 100);
        let violations = check(&design, &grid);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].route, route_id);
        assert_eq!(violations[0].net, design.route(route_id).net);
    }

    #[test]
    fn does_not_flag_a_net_within_its_ratio() {
        let (design, grid, _route_id) = design_with_one_pin_net(10_000.0, 400.0, 2);
        let violations = check(&design, &grid);
        assert!(violations.is_empty());
    }
}
