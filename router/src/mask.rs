//! Mask generator (C3): per-net bounding box, trunk/branch computation, and
//! the RMask cost overlay that biases the maze search toward the preferred
//! region. Grounded on `original_source/mask.c` for the congestion-aware
//! trunk scan and its documented first-minimum tie-break (§9 Open Questions).

use eda_common::db::indices::NetId;
use eda_common::db::Design;
use eda_common::geom::{GridCoord, Point, Rect};

use crate::grid::GridModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskMode {
    None,
    Bbox,
    Auto,
    TrunkBranch,
}

impl MaskMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => MaskMode::None,
            "bbox" => MaskMode::Bbox,
            "trunk+branch" => MaskMode::TrunkBranch,
            _ => MaskMode::Auto,
        }
    }
}

pub fn prepare_net(grid: &mut GridModel, design: &mut Design, net_id: NetId, mode: MaskMode, halo_cap: u8) {
    compute_bbox(design, net_id);
    compute_trunk_and_branches(design, net_id);

    grid.clear_rmask();
    match mode {
        MaskMode::None => {}
        MaskMode::Bbox => fill_bbox_mask(grid, design, net_id, halo_cap),
        MaskMode::Auto => {
            // two-node nets have no trunk to speak of: a plain bbox is
            // already the tightest useful mask. Multi-node nets get the
            // congestion-aware trunk/branch scan, same as `original_source`'s
            // net-size dispatch in mask.c.
            if design.net(net_id).nodes.len() <= 2 {
                fill_bbox_mask(grid, design, net_id, halo_cap);
            } else {
                fill_trunk_branch_mask(grid, design, net_id, halo_cap);
            }
        }
        MaskMode::TrunkBranch => fill_trunk_branch_mask(grid, design, net_id, halo_cap),
    }
}

fn compute_bbox(design: &mut Design, net_id: NetId) {
    let node_ids = design.net(net_id).nodes.clone();

    // A 2-node net's bbox is the bounding box of its closest tap pair, not
    // the union of every tap on both nodes: a multi-tap pin offers several
    // equivalent landing points, and most of them are farther apart than the
    // pair the route will actually use, needlessly loosening the mask.
    if node_ids.len() == 2 {
        if let Some((a, b)) = closest_tap_pair(design, node_ids[0], node_ids[1]) {
            let min = Point::new(a.x.min(b.x), a.y.min(b.y));
            let max = Point::new(a.x.max(b.x), a.y.max(b.y));
            design.net_mut(net_id).bbox = Rect::new(min, max);
        }
        return;
    }

    let mut min = Point::new(f64::INFINITY, f64::INFINITY);
    let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for node_id in &node_ids {
        for tap in &design.node(*node_id).taps {
            min.x = min.x.min(tap.phys.x);
            min.y = min.y.min(tap.phys.y);
            max.x = max.x.max(tap.phys.x);
            max.y = max.y.max(tap.phys.y);
        }
    }
    if min.x.is_finite() {
        design.net_mut(net_id).bbox = Rect::new(min, max);
    }
}

/// Two-pass nearest-tap search mirroring `original_source/mask.c`'s
/// `find_bounding_box`: pick the tap on `b` closest (grid-squared-distance)
/// to `a`'s first tap, then the tap on `a` closest to that one. Returns the
/// physical points of the resulting pair.
fn closest_tap_pair(design: &Design, a: eda_common::db::indices::NodeId, b: eda_common::db::indices::NodeId) -> Option<(Point<f64>, Point<f64>)> {
    let a_taps = &design.node(a).taps;
    let b_taps = &design.node(b).taps;
    let a_first = a_taps.first()?;

    let grid_sq_dist = |g1: GridCoord, g2: GridCoord| -> i64 {
        let dx = g1.x as i64 - g2.x as i64;
        let dy = g1.y as i64 - g2.y as i64;
        dx * dx + dy * dy
    };

    let b_tap = b_taps
        .iter()
        .min_by_key(|t| grid_sq_dist(t.grid, a_first.grid))?;
    let a_tap = a_taps
        .iter()
        .min_by_key(|t| grid_sq_dist(t.grid, b_tap.grid))?;

    Some((a_tap.phys, b_tap.phys))
}

fn compute_trunk_and_branches(design: &mut Design, net_id: NetId) {
    let node_ids = design.net(net_id).nodes.clone();
    let trunk = if node_ids.len() > 2 {
        let mut sum = Point::new(0.0, 0.0);
        let mut count = 0.0;
        for id in &node_ids {
            if let Some(tap) = design.node(*id).taps.first() {
                sum = sum + tap.phys;
                count += 1.0;
            }
        }
        if count > 0.0 {
            Point::new(sum.x / count, sum.y / count)
        } else {
            Point::new(0.0, 0.0)
        }
    } else if node_ids.len() == 2 {
        let a = design.node(node_ids[0]).taps.first().map(|t| t.phys).unwrap_or_default();
        let b = design.node(node_ids[1]).taps.first().map(|t| t.phys).unwrap_or_default();
        Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    } else {
        Point::new(0.0, 0.0)
    };
    design.net_mut(net_id).trunk = trunk;

    for id in &node_ids {
        let branch = design.node(*id).taps.first().map(|t| t.phys).unwrap_or_default();
        design.nodes[id.index()].branch = branch;
    }
}

fn fill_bbox_mask(grid: &mut GridModel, design: &Design, net_id: NetId, halo_cap: u8) {
    let bbox = design.net(net_id).bbox;
    if !bbox.width().is_finite() {
        return;
    }
    let lo = grid.grid_of(bbox.min, 0);
    let hi = grid.grid_of(bbox.max, 0);
    for y in 0..grid.ny {
        for x in 0..grid.nx {
            let inside = x >= lo.x && x <= hi.x && y >= lo.y && y <= hi.y;
            if inside {
                grid.set_rmask(x, y, 0);
            } else {
                let dx = if x < lo.x { lo.x - x } else { x.saturating_sub(hi.x) };
                let dy = if y < lo.y { lo.y - y } else { y.saturating_sub(hi.y) };
                let dist = dx.max(dy) as u8;
                grid.set_rmask(x, y, dist.min(halo_cap));
            }
        }
    }
}

/// Congestion-aware trunk-line scan: for each candidate row (or column, by
/// orientation), sum cells that are routed/NO_NET/pin-obstructed across all
/// layers, add a distance-from-centroid penalty, pick the minimum. Ties
/// keep the first minimum encountered (source behavior, §9).
fn choose_trunk_line(grid: &GridModel, design: &Design, net_id: NetId, vertical: bool) -> u32 {
    let bbox = design.net(net_id).bbox;
    let lo = grid.grid_of(bbox.min, 0);
    let hi = grid.grid_of(bbox.max, 0);
    let trunk = design.net(net_id).trunk;
    let centroid = grid.grid_of(trunk, 0);

    let (range, fixed_len) = if vertical {
        (lo.x..=hi.x, hi.y.saturating_sub(lo.y) + 1)
    } else {
        (lo.y..=hi.y, hi.x.saturating_sub(lo.x) + 1)
    };

    let mut best = *range.start();
    let mut best_cost = u64::MAX;
    for candidate in range {
        let mut congestion = 0u64;
        for i in 0..fixed_len {
            let (x, y) = if vertical { (candidate, lo.y + i) } else { (lo.x + i, candidate) };
            if x >= grid.nx || y >= grid.ny {
                continue;
            }
            for z in 0..grid.num_layers {
                let c = GridCoord::new(x, y, z);
                let cell = grid.obs(c);
                if cell.no_net || cell.routed_net || cell.net != 0 {
                    congestion += 1;
                }
            }
        }
        let dist_penalty = if vertical {
            (candidate as i64 - centroid.x as i64).unsigned_abs()
        } else {
            (candidate as i64 - centroid.y as i64).unsigned_abs()
        };
        let cost = congestion + dist_penalty;
        if cost < best_cost {
            best_cost = cost;
            best = candidate;
        }
    }
    best
}

fn fill_trunk_branch_mask(grid: &mut GridModel, design: &Design, net_id: NetId, halo_cap: u8) {
    let vertical = design.net(net_id).flags.vertical_trunk_preferred
        || design.net(net_id).bbox.height() > design.net(net_id).bbox.width();
    let trunk_line = choose_trunk_line(grid, design, net_id, vertical);

    for y in 0..grid.ny {
        for x in 0..grid.nx {
            let dist = if vertical { (x as i64 - trunk_line as i64).unsigned_abs() } else { (y as i64 - trunk_line as i64).unsigned_abs() };
            grid.set_rmask(x, y, (dist as u8).min(halo_cap));
        }
    }

    for &node_id in &design.net(net_id).nodes.clone() {
        let branch = design.node(node_id).branch;
        let bc = grid.grid_of(branch, 0);
        for y in 0..grid.ny {
            for x in 0..grid.nx {
                let on_branch_line = if vertical { y == bc.y } else { x == bc.x };
                if on_branch_line {
                    grid.set_rmask(x, y, 0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::design::{DPoint, Net, Node};
    use eda_common::db::tech::{AntennaMethod, Direction as LayerDirection, Layer, SpacingTable};

    fn two_node_design() -> (Design, GridModel) {
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

        let net_id = design.add_net(Net::new(1, "n1"));
        for (x, y) in [(1.0, 1.0), (8.0, 1.0)] {
            let node = Node {
                net: Some(net_id),
                index_in_net: design.net(net_id).nodes.len(),
                taps: vec![DPoint { grid: GridCoord::new(x as u32, y as u32, 0), phys: Point::new(x, y) }],
                ..Default::default()
            };
            let node_id = design.add_node(node);
            design.net_mut(net_id).nodes.push(node_id);
        }

        let grid = GridModel::allocate(&design).unwrap();
        (design, grid)
    }

    #[test]
    fn bbox_covers_both_taps() {
        let (mut design, _grid) = two_node_design();
        let net_id = NetId::new(0);
        compute_bbox(&mut design, net_id);
        let bbox = design.net(net_id).bbox;
        assert_eq!(bbox.min.x, 1.0);
        assert_eq!(bbox.max.x, 8.0);
        assert_eq!(bbox.min.y, 1.0);
    }

    #[test]
    fn two_node_bbox_picks_the_closest_tap_pair_not_the_union() {
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
        design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(20.0, 20.0));

        let net_id = design.add_net(Net::new(1, "n1"));
        // Node 0 has two equivalent taps, one much closer to node 1 than
        // the other. Node 1 has a single tap.
        let node0 = design.add_node(Node {
            net: Some(net_id),
            index_in_net: 0,
            taps: vec![
                DPoint { grid: GridCoord::new(1, 1, 0), phys: Point::new(1.0, 1.0) },
                DPoint { grid: GridCoord::new(15, 15, 0), phys: Point::new(15.0, 15.0) },
            ],
            ..Default::default()
        });
        design.net_mut(net_id).nodes.push(node0);
        let node1 = design.add_node(Node {
            net: Some(net_id),
            index_in_net: 1,
            taps: vec![DPoint { grid: GridCoord::new(2, 1, 0), phys: Point::new(2.0, 1.0) }],
            ..Default::default()
        });
        design.net_mut(net_id).nodes.push(node1);

        compute_bbox(&mut design, net_id);
        let bbox = design.net(net_id).bbox;
        // The closest pair is (1,1)-(2,1); the far tap at (15,15) must not
        // bloat the bbox.
        assert_eq!(bbox.min.x, 1.0);
        assert_eq!(bbox.max.x, 2.0);
        assert_eq!(bbox.min.y, 1.0);
        assert_eq!(bbox.max.y, 1.0);
    }

    #[test]
    fn trunk_is_midpoint_for_two_node_net() {
        let (mut design, _grid) = two_node_design();
        let net_id = NetId::new(0);
        compute_trunk_and_branches(&mut design, net_id);
        let trunk = design.net(net_id).trunk;
        assert!((trunk.x - 4.5).abs() < 1e-9);
        assert!((trunk.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bbox_mask_is_zero_inside_and_grows_outward() {
        let (mut design, mut grid) = two_node_design();
        let net_id = NetId::new(0);
        prepare_net(&mut grid, &mut design, net_id, MaskMode::Bbox, 3);
        assert_eq!(grid.rmask(1, 1), 0);
        assert_eq!(grid.rmask(4, 1), 0);
        assert!(grid.rmask(1, 9) > 0);
    }

    #[test]
    fn none_mode_leaves_mask_clear() {
        let (mut design, mut grid) = two_node_design();
        let net_id = NetId::new(0);
        prepare_net(&mut grid, &mut design, net_id, MaskMode::None, 3);
        for y in 0..grid.ny {
            for x in 0..grid.nx {
                assert_eq!(grid.rmask(x, y), 0);
            }
        }
    }
}
