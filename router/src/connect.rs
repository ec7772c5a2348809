//! Route connection repair (C6): after a route is committed or rewritten,
//! resolve its `start`/`end` references so cleanup (C7) and antenna analysis
//! (C8) never walk a stale endpoint. Grounded on spec §4.6.

use eda_common::db::design::RouteEnd;
use eda_common::db::indices::{NetId, RouteId};
use eda_common::db::Design;
use eda_common::geom::GridCoord;

pub fn set_connections(design: &mut Design, route_id: RouteId) {
    let net_id = design.route(route_id).net;
    let endpoints = {
        let route = design.route(route_id);
        let first = route.segments.first().map(|s| s.p1);
        let last = route.segments.last().map(|s| s.p2);
        (first, last)
    };

    if let Some(p1) = endpoints.0 {
        let (end, is_node) = resolve_end(design, net_id, route_id, p1);
        let route = design.route_mut(route_id);
        route.start = end;
        route.flags.start_is_node = is_node;
    }
    if let Some(p2) = endpoints.1 {
        let (end, is_node) = resolve_end(design, net_id, route_id, p2);
        let route = design.route_mut(route_id);
        route.end = end;
        route.flags.end_is_node = is_node;
    }
}

/// Re-run connection repair across every route of a net, e.g. after C7
/// rewrites segments.
pub fn set_connections_for_net(design: &mut Design, net_id: NetId) {
    let route_ids = design.net(net_id).routes.clone();
    for route_id in route_ids {
        set_connections(design, route_id);
    }
}

fn resolve_end(design: &Design, net_id: NetId, self_route: RouteId, c: GridCoord) -> (RouteEnd, bool) {
    for &node_id in &design.net(net_id).nodes {
        if design.node(node_id).taps.iter().any(|t| t.grid == c) {
            return (RouteEnd::Node(node_id), true);
        }
    }
    for &other in &design.net(net_id).routes {
        if other == self_route {
            continue;
        }
        if design
            .route(other)
            .segments
            .iter()
            .any(|s| s.p1 == c || s.p2 == c)
        {
            return (RouteEnd::Route(other), false);
        }
    }
    (RouteEnd::Unset, false)
}
