//! End-to-end exercises of `eda_router::route` against hand-built designs,
//! reproducing scenario S1 (two-node, same-row, two-layer technology) and
//! a setup-error path through C2.0/C2.1. Also drives `orchestrator::run`
//! directly against hand-built grids for S2 (a crossing net forces a
//! rip-up-and-reroute) and S6 (stage2 terminates and reports the nets a
//! contention limit leaves unresolved, instead of looping).

mod common;

use eda_common::geom::{GridCoord, Point};
use eda_common::util::config::Config;
use eda_common::util::error::RouterError;
use eda_router::grid::{Direction, GridModel};
use eda_router::orchestrator;
use eda_router::route;

#[test]
fn routes_a_two_node_same_row_net_end_to_end() {
    let mut design = common::two_layer_tech(15.0, 5.0);
    let net_id = common::add_net(&mut design, 1, "A");
    common::add_pin_instance(&mut design, Point::new(1.0, 1.0), net_id);
    common::add_pin_instance(&mut design, Point::new(10.0, 1.0), net_id);

    let config = Config::default();
    let report = route(&mut design, &config).expect("setup must succeed");

    assert!(report.failed.is_empty());
    assert_eq!(report.routed, vec![net_id]);
    assert_eq!(design.net(net_id).routes.len(), 1);

    let route = design.route(design.net(net_id).routes[0]);
    assert!(route.segments.iter().all(|s| !s.is_via()));
    let first = route.segments.first().unwrap();
    let last = route.segments.last().unwrap();
    assert_eq!(first.p1.y, 1);
    assert_eq!(last.p2.y, 1);
    assert_eq!(first.p1.x.min(last.p2.x), 1, "route must reach the node at x=1");
    assert_eq!(first.p1.x.max(last.p2.x), 10, "route must reach the node at x=10");
}

#[test]
fn setup_fails_when_a_tap_falls_far_outside_the_die_area() {
    let mut design = common::two_layer_tech(15.0, 5.0);
    let net_id = common::add_net(&mut design, 1, "A");
    // Entirely outside the 15x5 die area.
    common::add_pin_instance(&mut design, Point::new(500.0, 500.0), net_id);
    common::add_pin_instance(&mut design, Point::new(2.0, 2.0), net_id);

    let config = Config::default();
    let err = route(&mut design, &config).unwrap_err();
    assert!(matches!(err, RouterError::OutOfBounds { .. }));
}

/// S2: net A's direct path is walled off in stage 1 (spacing-blocked, as
/// `obstruct` would leave it near a real obstruction) so it only succeeds in
/// stage 2, crossing directly over net B's already-routed track. Net B gets
/// ripped up and re-routed around it. A third net, routed first and never
/// touching the wall, proves the rip-up-and-reroute churn elsewhere in the
/// arena never perturbs an unrelated net's `RouteId`.
#[test]
fn rips_up_a_crossing_net_to_route_the_net_blocked_by_it() {
    let mut design = common::one_layer_tech(12.0, 5.0);

    let net_b = common::add_net(&mut design, 2, "B");
    common::add_bare_node(&mut design, net_b, 2, 1, 0);
    common::add_bare_node(&mut design, net_b, 4, 1, 0);

    let net_c = common::add_net(&mut design, 3, "C");
    common::add_bare_node(&mut design, net_c, 2, 3, 0);
    common::add_bare_node(&mut design, net_c, 4, 3, 0);

    let net_a = common::add_net(&mut design, 1, "A");
    common::add_bare_node(&mut design, net_a, 1, 1, 0);
    common::add_bare_node(&mut design, net_a, 6, 1, 0);

    let mut grid = GridModel::allocate(&design).unwrap();
    // A spacing-style wall between x=1 and x=2, on every row: impassable in
    // stage 1, a cost-penalized detour from stage 2 on. Net C's taps never
    // cross it.
    for y in 0..grid.ny {
        let west = GridCoord::new(1, y, 0);
        let east = GridCoord::new(2, y, 0);
        grid.obs_mut(west).set_blocked(Direction::East, true);
        grid.obs_mut(east).set_blocked(Direction::West, true);
    }

    let config = Config::default();
    let report = orchestrator::run(&mut design, &mut grid, &config);

    assert!(report.failed.is_empty(), "both A and B must end up routed after the rip-up");
    assert!(!design.net(net_a).routes.is_empty());
    assert!(!design.net(net_b).routes.is_empty());

    assert_eq!(design.net(net_c).routes.len(), 1);
    let c_route = design.route(design.net(net_c).routes[0]);
    assert_eq!(c_route.net, net_c);
    let first = c_route.segments.first().unwrap();
    let last = c_route.segments.last().unwrap();
    assert_eq!(first.p1.y, 3);
    assert_eq!(last.p2.y, 3);
    assert_eq!(first.p1.x.min(last.p2.x), 2);
    assert_eq!(first.p1.x.max(last.p2.x), 4);
}

/// S6: three nets want the identical route across the same wall, but
/// `rip_limit = 0` forbids stage 2 from ever ripping anyone up. Exactly one
/// (whichever stage 2 happens to process first) wins the contested track;
/// the other two can never resolve their single conflict and are abandoned
/// on their first attempt. The orchestrator terminates and reports both as
/// failed rather than looping or silently dropping them, regardless of the
/// random order stage 2 shuffles them into.
#[test]
fn abandons_nets_that_cannot_be_resolved_within_the_rip_limit() {
    let mut design = common::one_layer_tech(12.0, 5.0);

    let mut nets = Vec::new();
    for number in 1..=3u32 {
        let net_id = common::add_net(&mut design, number, &format!("N{number}"));
        common::add_bare_node(&mut design, net_id, 1, 1, 0);
        common::add_bare_node(&mut design, net_id, 6, 1, 0);
        nets.push(net_id);
    }

    let mut grid = GridModel::allocate(&design).unwrap();
    for y in 0..grid.ny {
        let west = GridCoord::new(1, y, 0);
        let east = GridCoord::new(2, y, 0);
        grid.obs_mut(west).set_blocked(Direction::East, true);
        grid.obs_mut(east).set_blocked(Direction::West, true);
    }

    let mut config = Config::default();
    config.stages.rip_limit = 0;
    let report = orchestrator::run(&mut design, &mut grid, &config);

    assert_eq!(report.routed.len(), 1, "exactly one net wins the contested track");
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.abandoned.len(), 2);
    assert_eq!(
        report.failed.iter().collect::<std::collections::HashSet<_>>(),
        report.abandoned.iter().collect::<std::collections::HashSet<_>>(),
    );

    let mut all: Vec<_> = report.routed.iter().chain(report.failed.iter()).copied().collect();
    all.sort_by_key(|n| n.index());
    let mut expected = nets.clone();
    expected.sort_by_key(|n| n.index());
    assert_eq!(all, expected);
}
