//! Node and obstruction analysis (C2): the densest subsystem, run once
//! after loading in ordered phases (§4.2). Grounded on
//! `original_source/node.c` for the per-phase decision rules.

use eda_common::db::design::{DPoint, TapRect};
use eda_common::db::indices::{LayerId, NodeId};
use eda_common::db::Design;
use eda_common::geom::{GridCoord, Point, Rect};
use eda_common::util::error::Result;

use crate::grid::{Direction, GridModel};

pub fn run(grid: &mut GridModel, design: &mut Design) -> Result<()> {
    c2_0_project_taps_and_halos(grid, design)?;
    c2_1_tap_clipping(grid, design)?;
    c2_2_tap_expansion(design);
    c2_3_obstructions_from_gates(grid, design);
    c2_4_obstructions_inside_nodes(grid, design);
    c2_5_obstructions_outside_nodes(grid, design);
    c2_6_variable_pitch_blocking(grid, design);
    c2_7_final_stub_adjustment(grid, design);
    let pin_layers = c2_8_route_blocks(grid, design);
    grid.freeze_after_obstruction_analysis(pin_layers);
    Ok(())
}

/// Projects each node's taps onto real grid coordinates from their physical
/// centers, and builds the halo-ring points C2.5 walks. `def::parse` only
/// fills in a tap's layer index (no `GridModel` exists yet at parse time),
/// so x/y start at a placeholder; this must run before C2.1 uses `tap.grid`.
/// Grounded on spec §3's Node.halo field and §4.2 C2.5's "halo around a pin,
/// one via-clearance distance" text. A tap whose physical center falls well
/// outside the die area is corrupt input geometry, not an ordinary rounding
/// edge case, so projection is fallible here (unlike the halo ring below).
fn c2_0_project_taps_and_halos(grid: &GridModel, design: &mut Design) -> Result<()> {
    for node_idx in 0..design.nodes.len() {
        let node_id = NodeId::new(node_idx);
        let owner = design.node(node_id).owner;
        let taps_len = design.node(node_id).taps.len();
        let mut halo_points = Vec::new();

        for i in 0..taps_len {
            let z = design.node(node_id).taps[i].grid.z;
            let phys = design.node(node_id).taps[i].phys;
            design.nodes[node_id.index()].taps[i].grid = grid.try_grid_of(phys, z)?;

            if z as usize >= design.layers.len() {
                continue;
            }
            let layer = design.layer(LayerId::new(z as usize));
            let halo_dist = layer.spacing.spacing(layer.width);
            let rect = owner
                .and_then(|(inst, pin)| {
                    design.instances[inst.index()].pin_taps[pin.index()]
                        .iter()
                        .find(|t| t.layer.index() == z as usize)
                        .map(|t| t.rect)
                })
                .unwrap_or_else(|| Rect::new(phys, phys));

            let lo = grid.grid_of(Point::new(rect.min.x - halo_dist, rect.min.y - halo_dist), z);
            let hi = grid.grid_of(Point::new(rect.max.x + halo_dist, rect.max.y + halo_dist), z);
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let c = GridCoord::new(x, y, z);
                    let p = grid.phys_of(c);
                    if rect.contains(p) {
                        continue;
                    }
                    halo_points.push(DPoint { grid: c, phys: p });
                }
            }
        }
        design.nodes[node_id.index()].halo = halo_points;
    }
    Ok(())
}

/// C2.1: drop out-of-grid taps, emitting a diagnostic and continuing. A real
/// net terminal left with zero taps after clipping can never be reached by
/// any route attempt, regardless of search configuration; `original_source`
/// treats this as fatal to completing the net (`node.c`'s final "has no
/// taps!" message), so here it hard-fails setup rather than silently
/// producing a net that stage 1 can only ever fail to route.
fn c2_1_tap_clipping(grid: &GridModel, design: &mut Design) -> Result<()> {
    for node in design.nodes.iter_mut() {
        let before = node.taps.len();
        node.taps.retain(|t| t.grid.x < grid.nx && t.grid.y < grid.ny);
        node.reachable_count = node.taps.len();
        if node.taps.len() != before {
            log::warn!(
                "clipped {} out-of-grid tap(s) on a node of net {:?}",
                before - node.taps.len(),
                node.net
            );
        }
        if node.net.is_some() && before > 0 && node.taps.is_empty() {
            return Err(eda_common::util::error::RouterError::UnreachableNode);
        }
    }
    Ok(())
}

/// C2.2: extend a tap to cover another same-layer tap it abuts or overlaps,
/// iterating to a fixpoint. Applied per-instance, per-pin.
fn c2_2_tap_expansion(design: &mut Design) {
    for inst in design.instances.iter_mut() {
        for taps in inst.pin_taps.iter_mut() {
            let mut changed = true;
            while changed {
                changed = false;
                for i in 0..taps.len() {
                    for j in 0..taps.len() {
                        if i == j || taps[i].layer.index() != taps[j].layer.index() {
                            continue;
                        }
                        let (a, b) = (taps[i].rect, taps[j].rect);
                        let vertical_contained = a.min.y >= b.min.y && a.max.y <= b.max.y;
                        let horizontal_touch = a.min.x <= b.max.x && a.max.x >= b.min.x;
                        if vertical_contained && horizontal_touch {
                            let new = Rect::new(
                                Point::new(a.min.x.min(b.min.x), a.min.y),
                                Point::new(a.max.x.max(b.max.x), a.max.y),
                            );
                            if new.width() > a.width() {
                                taps[i].rect = new;
                                changed = true;
                            }
                            continue;
                        }
                        let horizontal_contained = a.min.x >= b.min.x && a.max.x <= b.max.x;
                        let vertical_touch = a.min.y <= b.max.y && a.max.y >= b.min.y;
                        if horizontal_contained && vertical_touch {
                            let new = Rect::new(
                                Point::new(a.min.x, a.min.y.min(b.min.y)),
                                Point::new(a.max.x, a.max.y.max(b.max.y)),
                            );
                            if new.height() > a.height() {
                                taps[i].rect = new;
                                changed = true;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// C2.3: mark grid points within a obstruction's via-clearance halo as
/// OBSTRUCT_MASK (inside) or OBSTRUCT_{dir} (within spacing), combining
/// multiple obstructions by taking the more restrictive direction.
fn c2_3_obstructions_from_gates(grid: &mut GridModel, design: &Design) {
    for inst in &design.instances {
        for obs in inst.obstructions.iter().chain(unconnected_pin_obstructions(inst).iter()) {
            mark_obstruction(grid, design, obs, true);
        }
    }
}

fn unconnected_pin_obstructions(inst: &eda_common::db::design::GateInstance) -> Vec<TapRect> {
    inst.pin_taps
        .iter()
        .zip(inst.pin_nets.iter())
        .filter(|(_, net)| net.is_none())
        .flat_map(|(taps, _)| taps.iter().cloned())
        .collect()
}

fn mark_obstruction(grid: &mut GridModel, design: &Design, obs: &TapRect, with_halo: bool) {
    let layer = design.layer(obs.layer);
    let halo = if with_halo { layer.spacing.spacing(layer.width) } else { layer.width / 2.0 };
    let lo = grid.grid_of(Point::new(obs.rect.min.x - halo, obs.rect.min.y - halo), obs.layer.index() as u8);
    let hi = grid.grid_of(Point::new(obs.rect.max.x + halo, obs.rect.max.y + halo), obs.layer.index() as u8);

    for y in lo.y..=hi.y {
        for x in lo.x..=hi.x {
            let c = eda_common::geom::GridCoord::new(x, y, obs.layer.index() as u8);
            let p = grid.phys_of(c);
            if obs.rect.contains(p) {
                grid.obs_mut(c).no_net = true;
            } else {
                let dist = edge_distance(p, obs.rect);
                if dist < halo {
                    grid.set_obs_info(c, dist as f32);
                    let (dir_a, dir_b) = nearest_edge_directions(p, obs.rect);
                    grid.obs_mut(c).set_blocked(dir_a, true);
                    if let Some(b) = dir_b {
                        if opposing(dir_a, b) {
                            grid.obs_mut(c).no_net = true;
                        } else {
                            grid.obs_mut(c).set_blocked(b, true);
                        }
                    }
                }
            }
        }
    }
}

fn edge_distance(p: Point<f64>, r: Rect) -> f64 {
    let dx = (r.min.x - p.x).max(p.x - r.max.x).max(0.0);
    let dy = (r.min.y - p.y).max(p.y - r.max.y).max(0.0);
    dx.hypot(dy)
}

fn nearest_edge_directions(p: Point<f64>, r: Rect) -> (Direction, Option<Direction>) {
    let dn = (r.max.y - p.y).abs();
    let ds = (p.y - r.min.y).abs();
    let de = (r.max.x - p.x).abs();
    let dw = (p.x - r.min.x).abs();
    let mut dirs = [(Direction::North, dn), (Direction::South, ds), (Direction::East, de), (Direction::West, dw)];
    dirs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    (dirs[0].0, Some(dirs[1].0).filter(|_| dirs[1].1 - dirs[0].1 < f64::EPSILON * 4.0))
}

fn opposing(a: Direction, b: Direction) -> bool {
    a.opposite() == b
}

/// C2.4: write the owning net number into Obs for every grid point inside a
/// pin tap, creating a NodeInfo entry; declare stub routes near corners.
fn c2_4_obstructions_inside_nodes(grid: &mut GridModel, design: &mut Design) {
    for node_idx in 0..design.nodes.len() {
        let node_id = NodeId::new(node_idx);
        let (net_number, taps) = {
            let node = design.node(node_id);
            let net_number = node.net.map(|n| design.net(n).number).unwrap_or(0);
            (net_number, node.taps.clone())
        };
        for tap in &taps {
            let c = tap.grid;
            if !grid.in_bounds(c) {
                continue;
            }
            let cell = grid.obs_mut(c);
            if cell.net != 0 && cell.net != net_number {
                cell.no_net = true;
                continue;
            }
            cell.net = net_number;
            let info = grid.node_info_mut(c);
            info.nodeloc = Some(node_id);
            info.nodesav = Some(node_id);
        }
    }
}

/// C2.5: the hardest phase. For halo points around a pin, attempt an
/// offset tap when blocked by an adjacent obstruction, otherwise decide
/// whether a stub route reaches the tap.
fn c2_5_obstructions_outside_nodes(grid: &mut GridModel, design: &mut Design) {
    for node_idx in 0..design.nodes.len() {
        let node_id = NodeId::new(node_idx);
        let halo = design.node(node_id).halo.clone();
        for h in &halo {
            let c = h.grid;
            if !grid.in_bounds(c) {
                continue;
            }
            if grid.obs(c).no_net {
                if let Some(clearance) = grid.obs_info(c) {
                    try_offset_tap(grid, c, clearance as f64, design.layer(
                        eda_common::db::indices::LayerId::new(c.z as usize)
                    ).pitch());
                }
                continue;
            }
            declare_stub_if_needed(grid, design, node_id, c, h.phys);
        }
    }
}

fn try_offset_tap(grid: &mut GridModel, c: eda_common::geom::GridCoord, clearance: f64, pitch: f64) {
    if clearance >= pitch / 2.0 {
        return;
    }
    // Pick the offset axis from the blocking direction `mark_obstruction`
    // recorded on this cell, not a fixed axis: a tap pinched from the north
    // or south needs an east-west offset to clear it (and vice versa). A
    // cell blocked on both axes, or on neither (fully inside the
    // obstruction's rect, never touched by the edge-distance branch), has no
    // offset that clears it.
    let ns_blocked = grid.obs(c).is_blocked(Direction::North) || grid.obs(c).is_blocked(Direction::South);
    let ew_blocked = grid.obs(c).is_blocked(Direction::East) || grid.obs(c).is_blocked(Direction::West);
    if ns_blocked == ew_blocked {
        return;
    }

    let info = grid.node_info_mut(c);
    info.offset = clearance;
    if ns_blocked {
        info.offset_ns = true;
        info.no_via_y = true;
    } else {
        info.offset_ew = true;
        info.no_via_x = true;
    }
    grid.obs_mut(c).no_net = false;
    // The offset tap still sits within via spacing of the obstruction on
    // this layer; a via stacked through it would land too close on the
    // layer above, so block that approach outright.
    grid.block_route(c, Direction::Up);
}

fn declare_stub_if_needed(
    grid: &mut GridModel,
    design: &Design,
    node_id: NodeId,
    c: eda_common::geom::GridCoord,
    halo_phys: Point<f64>,
) {
    let node = design.node(node_id);
    let Some(tap) = node.taps.iter().find(|t| t.grid.z == c.z) else {
        return;
    };
    let tap_phys = tap.phys;
    let dx = tap_phys.x - halo_phys.x;
    let dy = tap_phys.y - halo_phys.y;
    let route_width = design.layer(eda_common::db::indices::LayerId::new(c.z as usize)).width;

    let reaches_horizontally_only = dy.abs() < f64::EPSILON;
    let reaches_vertically_only = dx.abs() < f64::EPSILON;

    if !reaches_horizontally_only && !reaches_vertically_only {
        // only a diagonal stub would reach: unroutable.
        grid.obs_mut(c).no_net = true;
        return;
    }

    let length = dx.hypot(dy);
    if length < route_width / 2.0 {
        return; // too short to violate anything, suppress.
    }

    let info = grid.node_info_mut(c);
    info.stub_len = if reaches_horizontally_only { dx } else { dy };
    if reaches_horizontally_only {
        info.stub_ew = true;
    } else {
        info.stub_ns = true;
    }
    grid.obs_mut(c).stub_route = true;
}

/// C2.6: sparsen layers whose pitch exceeds the grid step.
fn c2_6_variable_pitch_blocking(grid: &mut GridModel, design: &Design) {
    for layer in &design.layers {
        let l = layer.number;
        let ratio_x = (layer.pitch_x / grid.pitch).round().max(1.0) as u32;
        let ratio_y = (layer.pitch_y / grid.pitch).round().max(1.0) as u32;
        if ratio_x <= 1 && ratio_y <= 1 {
            continue;
        }
        for y in 0..grid.ny {
            for x in 0..grid.nx {
                let c = eda_common::geom::GridCoord::new(x, y, l);
                let on_track = x % ratio_x == 0 && y % ratio_y == 0;
                if !on_track && grid.node_info(c).is_none() {
                    grid.obs_mut(c).no_net = true;
                }
            }
        }
    }
}

/// C2.7: lengthen or retype stubs/offsets that would otherwise create a
/// spacing violation. A cell never holds both an NS-stub and an NS-offset.
fn c2_7_final_stub_adjustment(grid: &mut GridModel, _design: &Design) {
    for z in 0..grid.num_layers {
        for y in 0..grid.ny {
            for x in 0..grid.nx {
                let c = eda_common::geom::GridCoord::new(x, y, z);
                if let Some(info) = grid.node_info(c).copied() {
                    if info.stub_ns && info.offset_ns {
                        let fixed = grid.node_info_mut(c);
                        fixed.offset_ns = false;
                    }
                }
            }
        }
    }
}

/// C2.8: for pin edges within spacing distance of a parallel track, block
/// the neighboring track position from the direction of the pin. Returns
/// the highest layer index carrying any NodeInfo (`Pinlayers`).
fn c2_8_route_blocks(grid: &mut GridModel, design: &Design) -> u8 {
    let mut pin_layers = 0u8;
    for inst in &design.instances {
        for taps in &inst.pin_taps {
            for tap in taps {
                pin_layers = pin_layers.max(tap.layer.index() as u8);
                let layer = design.layer(tap.layer);
                let spacing = layer.spacing.spacing(layer.width);
                let z = tap.layer.index() as u8;

                for dir in [Direction::North, Direction::South] {
                    let edge_y = if dir == Direction::North { tap.rect.max.y } else { tap.rect.min.y };
                    block_parallel_track(grid, design, z, tap.rect.min.x, tap.rect.max.x, edge_y, spacing, true, dir);
                }
                for dir in [Direction::East, Direction::West] {
                    let edge_x = if dir == Direction::East { tap.rect.max.x } else { tap.rect.min.x };
                    block_parallel_track(grid, design, z, tap.rect.min.y, tap.rect.max.y, edge_x, spacing, false, dir);
                }
            }
        }
    }
    pin_layers
}

#[allow(clippy::too_many_arguments)]
fn block_parallel_track(
    grid: &mut GridModel,
    _design: &Design,
    z: u8,
    span_lo: f64,
    span_hi: f64,
    edge: f64,
    spacing: f64,
    horizontal_edge: bool,
    dir: Direction,
) {
    let lo_phys = if horizontal_edge { Point::new(span_lo, edge + spacing) } else { Point::new(edge + spacing, span_lo) };
    let hi_phys = if horizontal_edge { Point::new(span_hi, edge + spacing) } else { Point::new(edge + spacing, span_hi) };
    let lo = grid.grid_of(lo_phys, z);
    let hi = grid.grid_of(hi_phys, z);
    if horizontal_edge {
        for x in lo.x..=hi.x {
            let c = eda_common::geom::GridCoord::new(x, lo.y, z);
            if grid.in_bounds(c) {
                grid.obs_mut(c).set_blocked(dir.opposite(), true);
            }
        }
    } else {
        for y in lo.y..=hi.y {
            let c = eda_common::geom::GridCoord::new(lo.x, y, z);
            if grid.in_bounds(c) {
                grid.obs_mut(c).set_blocked(dir.opposite(), true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::design::Node;
    use eda_common::db::tech::{AntennaMethod, Direction as LayerDirection, Layer, SpacingTable};
    use eda_common::geom::Point;

    fn one_layer_design() -> Design {
        let mut design = Design::new();
        design.layers.push(Layer {
            name: "M1".into(),
            number: 0,
            direction: LayerDirection::Horizontal,
            width: 0.1,
            pitch_x: 1.0,
            pitch_y: 1.0,
            offset: 0.0,
            spacing: SpacingTable::uniform(0.1),
            thickness: 0.1,
            antenna_ratio: 400.0,
            antenna_method: AntennaMethod::None,
        });
        design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        design
    }

    #[test]
    fn projects_tap_grid_coordinates_from_physical_centers() {
        let mut design = one_layer_design();
        let net_id = design.add_net(eda_common::db::design::Net::new(1, "n1"));
        let node_id = design.add_node(Node {
            net: Some(net_id),
            taps: vec![DPoint { grid: GridCoord::new(0, 0, 0), phys: Point::new(4.0, 6.0) }],
            ..Default::default()
        });
        design.net_mut(net_id).nodes.push(node_id);

        let grid = GridModel::allocate(&design).unwrap();
        c2_0_project_taps_and_halos(&grid, &mut design).unwrap();

        assert_eq!(design.node(node_id).taps[0].grid, GridCoord::new(4, 6, 0));
    }

    #[test]
    fn tap_clipping_fails_a_net_terminal_left_with_no_taps() {
        let mut design = one_layer_design();
        let net_id = design.add_net(eda_common::db::design::Net::new(1, "n1"));
        let node_id = design.add_node(Node {
            net: Some(net_id),
            taps: vec![DPoint { grid: GridCoord::new(50, 50, 0), phys: Point::new(50.0, 50.0) }],
            ..Default::default()
        });
        design.net_mut(net_id).nodes.push(node_id);

        let grid = GridModel::allocate(&design).unwrap();
        let result = c2_1_tap_clipping(&grid, &mut design);
        assert!(result.is_err());
    }
}
