//! Cleanup rip-up (C7): rewrite adjacent vias that sit too close together
//! and collapse redundant short routes sandwiched between two vias.
//! Grounded on spec §4.7 and `original_source/node.c`'s via-merge pass.

use eda_common::db::design::{Segment, SegmentKind};
use eda_common::db::indices::{LayerId, NetId, RouteId};
use eda_common::db::Design;
use eda_common::geom::GridCoord;

use crate::connect;
use crate::grid::GridModel;

/// A layer needs cleanup consideration only if its via-to-via spacing rule
/// could plausibly force two adjacent vias together at grid pitch.
fn needblock(design: &Design, layer: LayerId) -> bool {
    let layer = design.layer(layer);
    layer.spacing.spacing(layer.width) > 0.0
}

fn grid_adjacent(a: GridCoord, b: GridCoord) -> bool {
    a.z == b.z
        && ((a.x == b.x && a.y.abs_diff(b.y) == 1) || (a.y == b.y && a.x.abs_diff(b.x) == 1))
}

pub fn run(design: &mut Design, grid: &GridModel) {
    let net_ids: Vec<NetId> = (0..design.nets.len()).map(NetId::new).collect();
    for net_id in net_ids {
        merge_adjacent_vias(design, net_id);
        collapse_redundant_short_routes(design, grid, net_id);
        connect::set_connections_for_net(design, net_id);
    }
}

fn via_endpoint_layers(seg: &Segment) -> (u8, u8) {
    (seg.p1.z, seg.p2.z)
}

fn merge_adjacent_vias(design: &mut Design, net_id: NetId) {
    let route_ids = design.net(net_id).routes.clone();
    // Rule 1 applies at either end of a route; check the first segment's
    // via and the last segment's via independently.
    merge_vias_at_route_end(design, &route_ids, false);
    merge_vias_at_route_end(design, &route_ids, true);
}

/// One pass of rule 1, looking at the first segment of each route
/// (`at_end = false`) or the last (`at_end = true`).
fn merge_vias_at_route_end(design: &mut Design, route_ids: &[eda_common::db::indices::RouteId], at_end: bool) {
    for i in 0..route_ids.len() {
        let a_id = route_ids[i];
        let a_segments = &design.route(a_id).segments;
        let a_via = if at_end { a_segments.last() } else { a_segments.first() }
            .copied()
            .filter(|s| s.is_via());
        let Some(a_via) = a_via else {
            continue;
        };
        if !needblock(design, a_via.layer) {
            continue;
        }
        let a_point = if at_end { a_via.p2 } else { a_via.p1 };

        for &b_id in route_ids {
            if b_id == a_id {
                continue;
            }
            let b_segments = &design.route(b_id).segments;
            let b_via = if at_end { b_segments.last() } else { b_segments.first() }
                .copied()
                .filter(|s| s.is_via());
            let Some(b_via) = b_via else {
                continue;
            };
            let b_point = if at_end { b_via.p2 } else { b_via.p1 };
            if !grid_adjacent(a_point, b_point) {
                continue;
            }
            let (a_lo, a_hi) = via_endpoint_layers(&a_via);
            let (b_lo, b_hi) = via_endpoint_layers(&b_via);
            if (a_lo, a_hi) == (b_lo, b_hi) {
                // same layer pair: promote this via to a wire on the shared
                // upper metal, extended by one track to the neighbor.
                let route = design.route_mut(a_id);
                let idx = if at_end { route.segments.len() - 1 } else { 0 };
                route.segments[idx] = Segment {
                    layer: LayerId::new(a_hi.max(a_lo) as usize),
                    p1: a_point,
                    p2: b_point,
                    kind: SegmentKind::Wire,
                    offset_distance: 0.0,
                };
            } else {
                // differing layer pairs: tie them with a wire on the common
                // metal, recorded as a special-net rectangle at write-out.
                let common = if a_hi == b_lo || a_hi == b_hi {
                    a_hi
                } else {
                    a_lo
                };
                let route = design.route_mut(a_id);
                let seg = Segment {
                    layer: LayerId::new(common as usize),
                    p1: a_point,
                    p2: b_point,
                    kind: SegmentKind::SpecialNet,
                    offset_distance: 0.0,
                };
                if at_end {
                    route.segments.push(seg);
                } else {
                    route.segments.insert(0, seg);
                }
            }
        }
    }
}

/// Rule 2: a route whose first (or last) wire segment is exactly one track
/// long and sandwiched between two vias is a redundant dogleg. Remove the
/// inner via and promote the wire onto its layer. Checked at both ends,
/// mirroring `merge_vias_at_route_end`'s `at_end` parameterization.
fn collapse_redundant_short_routes(design: &mut Design, grid: &GridModel, net_id: NetId) {
    let route_ids = design.net(net_id).routes.clone();
    collapse_at_route_end(design, grid, net_id, &route_ids, false);
    collapse_at_route_end(design, grid, net_id, &route_ids, true);
}

fn collapse_at_route_end(
    design: &mut Design,
    grid: &GridModel,
    net_id: NetId,
    route_ids: &[RouteId],
    at_end: bool,
) {
    for &route_id in route_ids {
        let segments = design.route(route_id).segments.clone();
        if segments.len() < 3 {
            continue;
        }
        let n = segments.len();
        let (outer, wire, inner) = if at_end {
            (segments[n - 1], segments[n - 2], segments[n - 3])
        } else {
            (segments[0], segments[1], segments[2])
        };
        if !(outer.is_via() && inner.is_via() && !wire.is_via() && single_track(&wire)) {
            continue;
        }
        if !same_net_on_both_layers(design, grid, net_id, &wire) {
            continue;
        }

        let route = design.route_mut(route_id);
        let promoted = if at_end {
            Segment { layer: wire.layer, p1: wire.p1, p2: outer.p2, kind: SegmentKind::Wire, offset_distance: 0.0 }
        } else {
            Segment { layer: wire.layer, p1: outer.p1, p2: wire.p2, kind: SegmentKind::Wire, offset_distance: 0.0 }
        };
        if at_end {
            route.segments.truncate(n - 3);
            route.segments.push(promoted);
        } else {
            route.segments[0] = promoted;
            route.segments.remove(2);
            route.segments.remove(1);
        }
    }
}

/// The collapse only holds if the grid point under the short wire carries
/// this net on both the wire's layer and the layer directly below it; a
/// foreign net sitting there means the via this collapse would remove is
/// the only thing keeping the two layers from shorting across it.
fn same_net_on_both_layers(design: &Design, grid: &GridModel, net_id: NetId, wire: &Segment) -> bool {
    let number = design.net(net_id).number;
    let on_net = |c: GridCoord| grid.obs(c).net == number;
    let below = |c: GridCoord| c.z == 0 || on_net(GridCoord::new(c.x, c.y, c.z - 1));
    on_net(wire.p1) && on_net(wire.p2) && below(wire.p1) && below(wire.p2)
}

fn single_track(seg: &Segment) -> bool {
    let dx = seg.p1.x.abs_diff(seg.p2.x);
    let dy = seg.p1.y.abs_diff(seg.p2.y);
    dx + dy == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::design::{Net, Route, RouteFlags, RouteEnd};
    use eda_common::db::tech::{AntennaMethod, Direction as LayerDirection, Layer, SpacingTable};

    fn design_with_two_layers() -> Design {
        let mut design = Design::new();
        for (name, dir) in [("M1", LayerDirection::Horizontal), ("M2", LayerDirection::Vertical)] {
            design.layers.push(Layer {
                name: name.into(),
                number: design.layers.len() as u8,
                direction: dir,
                width: 0.1,
                pitch_x: 1.0,
                pitch_y: 1.0,
                offset: 0.0,
                spacing: SpacingTable::uniform(0.1),
                thickness: 0.1,
                antenna_ratio: 400.0,
                antenna_method: AntennaMethod::None,
            });
        }
        design.die_area = eda_common::geom::Rect::new(
            eda_common::geom::Point::new(0.0, 0.0),
            eda_common::geom::Point::new(10.0, 10.0),
        );
        design
    }

    fn via_route(design: &mut Design, net_id: NetId, at: GridCoord) -> eda_common::db::indices::RouteId {
        let up = GridCoord::new(at.x, at.y, at.z + 1);
        let id = design.add_route(Route {
            net: net_id,
            segments: vec![Segment { layer: LayerId::new(at.z as usize), p1: at, p2: up, kind: SegmentKind::Via, offset_distance: 0.0 }],
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(id);
        id
    }

    #[test]
    fn merges_adjacent_same_layer_vias_into_a_wire() {
        let mut design = design_with_two_layers();
        let net_id = design.add_net(Net::new(1, "n1"));
        let a = GridCoord::new(2, 2, 0);
        let b = GridCoord::new(3, 2, 0);
        let a_id = via_route(&mut design, net_id, a);
        via_route(&mut design, net_id, b);

        merge_adjacent_vias(&mut design, net_id);

        let seg = design.route(a_id).segments[0];
        assert_eq!(seg.kind, SegmentKind::Wire);
        assert_eq!(seg.p1, a);
        assert_eq!(seg.p2, b);
    }

    #[test]
    fn merges_adjacent_vias_at_the_tail_of_a_route() {
        let mut design = design_with_two_layers();
        let net_id = design.add_net(Net::new(1, "n1"));
        let lead_in = GridCoord::new(0, 2, 0);
        let a = GridCoord::new(2, 2, 0);
        let a_up = GridCoord::new(2, 2, 1);
        let b = GridCoord::new(3, 2, 0);
        let b_up = GridCoord::new(3, 2, 1);

        let a_id = design.add_route(Route {
            net: net_id,
            segments: vec![
                Segment { layer: LayerId::new(0), p1: lead_in, p2: a, kind: SegmentKind::Wire, offset_distance: 0.0 },
                Segment { layer: LayerId::new(0), p1: a, p2: a_up, kind: SegmentKind::Via, offset_distance: 0.0 },
            ],
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(a_id);
        via_route(&mut design, net_id, b);

        merge_vias_at_route_end(&mut design, &design.net(net_id).routes.clone(), true);

        let seg = design.route(a_id).segments[1];
        assert_eq!(seg.kind, SegmentKind::Wire);
        assert_eq!(seg.p1, a_up);
        assert_eq!(seg.p2, b_up);
    }

    #[test]
    fn collapses_via_wire_via_sandwich_of_a_single_track() {
        let mut design = design_with_two_layers();
        let net_id = design.add_net(Net::new(1, "n1"));
        let p0 = GridCoord::new(0, 0, 0);
        let p1 = GridCoord::new(0, 0, 1);
        let p2 = GridCoord::new(1, 0, 1);
        let p3 = GridCoord::new(1, 0, 0);
        let route_id = design.add_route(Route {
            net: net_id,
            segments: vec![
                Segment { layer: LayerId::new(0), p1: p0, p2: p1, kind: SegmentKind::Via, offset_distance: 0.0 },
                Segment { layer: LayerId::new(1), p1: p1, p2: p2, kind: SegmentKind::Wire, offset_distance: 0.0 },
                Segment { layer: LayerId::new(0), p1: p2, p2: p3, kind: SegmentKind::Via, offset_distance: 0.0 },
            ],
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(route_id);

        let mut grid = GridModel::allocate(&design).unwrap();
        let number = design.net(net_id).number;
        for c in [p0, p1, p2, p3] {
            grid.obs_mut(c).net = number;
        }

        collapse_redundant_short_routes(&mut design, &grid, net_id);

        let route = design.route(route_id);
        assert_eq!(route.segments.len(), 1);
        assert_eq!(route.segments[0].kind, SegmentKind::Wire);
        assert_eq!(route.segments[0].p1, p0);
        assert_eq!(route.segments[0].p2, p2);
    }

    #[test]
    fn collapses_a_via_wire_via_sandwich_at_the_tail_of_a_longer_route() {
        let mut design = design_with_two_layers();
        let net_id = design.add_net(Net::new(1, "n1"));
        let lead_in = GridCoord::new(5, 0, 0);
        let p0 = GridCoord::new(0, 0, 0);
        let p1 = GridCoord::new(0, 0, 1);
        let p2 = GridCoord::new(1, 0, 1);
        let p3 = GridCoord::new(1, 0, 0);
        let route_id = design.add_route(Route {
            net: net_id,
            segments: vec![
                Segment { layer: LayerId::new(0), p1: lead_in, p2: p0, kind: SegmentKind::Wire, offset_distance: 0.0 },
                Segment { layer: LayerId::new(0), p1: p0, p2: p1, kind: SegmentKind::Via, offset_distance: 0.0 },
                Segment { layer: LayerId::new(1), p1: p1, p2: p2, kind: SegmentKind::Wire, offset_distance: 0.0 },
                Segment { layer: LayerId::new(0), p1: p2, p2: p3, kind: SegmentKind::Via, offset_distance: 0.0 },
            ],
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(route_id);

        let mut grid = GridModel::allocate(&design).unwrap();
        let number = design.net(net_id).number;
        for c in [p0, p1, p2, p3] {
            grid.obs_mut(c).net = number;
        }

        collapse_redundant_short_routes(&mut design, &grid, net_id);

        let route = design.route(route_id);
        assert_eq!(route.segments.len(), 2);
        assert_eq!(route.segments[0].p1, lead_in);
        assert_eq!(route.segments[0].p2, p0);
        assert_eq!(route.segments[1].kind, SegmentKind::Wire);
        assert_eq!(route.segments[1].p1, p1);
        assert_eq!(route.segments[1].p2, p3);
    }

    #[test]
    fn does_not_collapse_when_a_foreign_net_occupies_the_wire() {
        let mut design = design_with_two_layers();
        let net_id = design.add_net(Net::new(1, "n1"));
        let p0 = GridCoord::new(0, 0, 0);
        let p1 = GridCoord::new(0, 0, 1);
        let p2 = GridCoord::new(1, 0, 1);
        let p3 = GridCoord::new(1, 0, 0);
        let route_id = design.add_route(Route {
            net: net_id,
            segments: vec![
                Segment { layer: LayerId::new(0), p1: p0, p2: p1, kind: SegmentKind::Via, offset_distance: 0.0 },
                Segment { layer: LayerId::new(1), p1: p1, p2: p2, kind: SegmentKind::Wire, offset_distance: 0.0 },
                Segment { layer: LayerId::new(0), p1: p2, p2: p3, kind: SegmentKind::Via, offset_distance: 0.0 },
            ],
            start: RouteEnd::Unset,
            end: RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(route_id);

        // Grid left at its default net number 0: never matches this net's
        // number, so the precondition must refuse to collapse.
        let grid = GridModel::allocate(&design).unwrap();

        collapse_redundant_short_routes(&mut design, &grid, net_id);

        let route = design.route(route_id);
        assert_eq!(route.segments.len(), 3);
    }
}
