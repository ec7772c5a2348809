//! Stage orchestrator (C5): fresh routing, rip-up-and-reroute, and cleanup
//! rip-up, run in sequence over every net. Grounded on spec §4.5 and the
//! teacher's `detailed_router.rs` iteration/rip-up loop, sequentialized
//! (§5 requires single-threaded, cooperative scheduling; the teacher's
//! `rayon` net-level parallelism has no counterpart here — see DESIGN.md).

use log::{info, warn};
use rand::seq::SliceRandom;

use eda_common::db::design::RouteFlags;
use eda_common::db::indices::{NetId, RouteId};
use eda_common::db::Design;
use eda_common::geom::GridCoord;
use eda_common::util::config::Config;

use crate::connect;
use crate::grid::GridModel;
use crate::mask::{self, MaskMode};
use crate::search::{self, SearchState};

pub struct RoutingReport {
    pub routed: Vec<NetId>,
    pub failed: Vec<NetId>,
    pub abandoned: Vec<NetId>,
}

pub fn run(design: &mut Design, grid: &mut GridModel, cfg: &Config) -> RoutingReport {
    let mut state = SearchState::new(grid);
    let mode = MaskMode::parse(&cfg.stages.mask_mode);

    let order = order_nets_for_stage1(design);
    let mut failed: Vec<NetId> = Vec::new();
    let mut routed: Vec<NetId> = Vec::new();

    info!("stage1: routing {} nets", order.len());
    for net_id in order {
        if route_net(design, grid, &mut state, cfg, net_id, 1, mode).is_some() {
            routed.push(net_id);
        } else {
            failed.push(net_id);
        }
    }

    let (stage2_routed, still_failed, abandoned) =
        stage2_rip_up_and_reroute(design, grid, &mut state, cfg, mode, failed);
    routed.extend(stage2_routed);

    stage3_cleanup_ripup(design, grid, &mut state, cfg, mode, &routed);

    info!(
        "routing complete: {} routed, {} failed, {} abandoned",
        routed.len(),
        still_failed.len(),
        abandoned.len()
    );

    RoutingReport {
        routed,
        failed: still_failed,
        abandoned,
    }
}

/// (a) critical nets in configured order, (b) remaining by descending node
/// count, tie-broken by ascending min(bbox-width, bbox-height), tie-broken
/// by descending node count again.
fn order_nets_for_stage1(design: &Design) -> Vec<NetId> {
    let mut critical = Vec::new();
    let mut rest = Vec::new();
    for (i, net) in design.nets.iter().enumerate() {
        let id = NetId::new(i);
        if net.flags.critical {
            critical.push(id);
        } else {
            rest.push(id);
        }
    }
    rest.sort_by(|&a, &b| {
        let na = design.net(a);
        let nb = design.net(b);
        nb.nodes
            .len()
            .cmp(&na.nodes.len())
            .then_with(|| {
                let ma = na.bbox.width().min(na.bbox.height());
                let mb = nb.bbox.width().min(nb.bbox.height());
                ma.partial_cmp(&mb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| nb.nodes.len().cmp(&na.nodes.len()))
    });
    critical.extend(rest);
    critical
}

/// Route one net, incrementally growing its partial tree: node 0 seeds the
/// tree, then every subsequent node is routed from the tree-so-far to that
/// node's taps.
fn route_net(
    design: &mut Design,
    grid: &mut GridModel,
    state: &mut SearchState,
    cfg: &Config,
    net_id: NetId,
    stage: u32,
    mode: MaskMode,
) -> Option<()> {
    let node_ids = design.net(net_id).nodes.clone();
    if node_ids.len() < 2 {
        return Some(());
    }
    let net_number = design.net(net_id).number;

    mask::prepare_net(grid, design, net_id, mode, 8);

    let mut tree: Vec<GridCoord> = Vec::new();
    for tap in &design.node(node_ids[0]).taps {
        tree.push(tap.grid);
        mark_owned(grid, tap.grid, net_number);
    }

    for &node_id in &node_ids[1..] {
        let targets: Vec<GridCoord> = design.node(node_id).taps.iter().map(|t| t.grid).collect();
        if targets.is_empty() {
            if cfg.stages.force_routable {
                warn!("node has zero reachable taps; force-routable promotion skipped (no grid fallback configured)");
            }
            return None;
        }
        let result = search::find_path(
            grid,
            design,
            state,
            &tree,
            &targets,
            &cfg.search,
            stage,
            cfg.stages.force_routable,
        )?;
        let path = search::reconstruct_path(grid, state, result.best);
        let segments = search::path_to_segments(grid, &path);
        search::writeback(grid, &path, net_number);

        let route_id = design.add_route(eda_common::db::design::Route {
            net: net_id,
            segments,
            start: eda_common::db::design::RouteEnd::Unset,
            end: eda_common::db::design::RouteEnd::Unset,
            flags: RouteFlags::default(),
        });
        design.net_mut(net_id).routes.push(route_id);
        connect::set_connections(design, route_id);

        tree.extend(path);
    }

    Some(())
}

fn mark_owned(grid: &mut GridModel, c: GridCoord, net_number: u32) {
    let cell = grid.obs_mut(c);
    cell.routed_net = true;
    cell.net = net_number;
}

/// Rip up every route of `victim`, clearing its ROUTED_NET marks from Obs.
/// Tombstones each route at its own `RouteId` slot (`Design::remove_route`)
/// rather than compacting the routes arena, so a `RouteId` held anywhere
/// else (another net's `RouteEnd::Route`, an antenna `Violation`) never ends
/// up silently renamed to a different route.
fn rip_up_net(design: &mut Design, grid: &mut GridModel, victim: NetId) {
    let route_ids = std::mem::take(&mut design.net_mut(victim).routes);
    let victim_number = design.net(victim).number;
    for route_id in route_ids {
        for seg in &design.route(route_id).segments {
            for c in [seg.p1, seg.p2] {
                let cell = grid.obs_mut(c);
                if cell.net == victim_number {
                    cell.routed_net = false;
                    cell.net = 0;
                }
            }
        }
        design.remove_route(route_id);
    }
}

fn victims_on_path(design: &Design, grid: &GridModel, path: &[GridCoord], self_net: NetId) -> Vec<NetId> {
    let mut victims = Vec::new();
    let self_number = design.net(self_net).number;
    for &c in path {
        let cell = grid.obs(c);
        if cell.routed_net && cell.net != 0 && cell.net != self_number {
            if let Some((idx, _)) = design.nets.iter().enumerate().find(|(_, n)| n.number == cell.net) {
                let id = NetId::new(idx);
                if !victims.contains(&id) {
                    victims.push(id);
                }
            }
        }
    }
    victims
}

fn stage2_rip_up_and_reroute(
    design: &mut Design,
    grid: &mut GridModel,
    state: &mut SearchState,
    cfg: &Config,
    mode: MaskMode,
    initial_failed: Vec<NetId>,
) -> (Vec<NetId>, Vec<NetId>, Vec<NetId>) {
    let mut failed_nets = initial_failed;
    let mut rng = rand::thread_rng();
    failed_nets.shuffle(&mut rng);

    let mut routed = Vec::new();
    let mut abandoned = Vec::new();
    let mut no_ripup: std::collections::HashMap<NetId, Vec<NetId>> = std::collections::HashMap::new();

    let mut progress_samples: Vec<usize> = Vec::new();
    let mut rounds_since_sample = 0usize;

    while let Some(net_id) = failed_nets.pop() {
        let node_ids = design.net(net_id).nodes.clone();
        if node_ids.len() < 2 {
            routed.push(net_id);
            continue;
        }
        let net_number = design.net(net_id).number;
        mask::prepare_net(grid, design, net_id, mode, 8);

        let mut tree: Vec<GridCoord> = Vec::new();
        for tap in &design.node(node_ids[0]).taps {
            tree.push(tap.grid);
        }

        let mut victims_total: Vec<NetId> = Vec::new();
        let mut ok = true;
        let mut committed_routes: Vec<RouteId> = Vec::new();

        for &node_id in &node_ids[1..] {
            let targets: Vec<GridCoord> = design.node(node_id).taps.iter().map(|t| t.grid).collect();
            if targets.is_empty() {
                ok = false;
                break;
            }
            let Some(result) = search::find_path(grid, design, state, &tree, &targets, &cfg.search, 2, true) else {
                ok = false;
                break;
            };
            let path = search::reconstruct_path(grid, state, result.best);
            let victims = victims_on_path(design, grid, &path, net_id);
            let banned = no_ripup.get(&net_id).cloned().unwrap_or_default();
            let new_victims: Vec<NetId> = victims.into_iter().filter(|v| !banned.contains(v)).collect();

            if victims_total.len() + new_victims.len() > cfg.stages.rip_limit {
                ok = false;
                break;
            }
            victims_total.extend(new_victims.iter().copied());

            let segments = search::path_to_segments(grid, &path);
            search::writeback(grid, &path, net_number);
            let route_id = design.add_route(eda_common::db::design::Route {
                net: net_id,
                segments,
                start: eda_common::db::design::RouteEnd::Unset,
                end: eda_common::db::design::RouteEnd::Unset,
                flags: RouteFlags::default(),
            });
            design.net_mut(net_id).routes.push(route_id);
            committed_routes.push(route_id);
            connect::set_connections(design, route_id);
            tree.extend(path);
        }

        if ok {
            for victim in &victims_total {
                rip_up_net(design, grid, *victim);
                no_ripup.entry(net_id).or_default().push(*victim);
                failed_nets.push(*victim);
            }
            routed.push(net_id);
        } else {
            for route_id in committed_routes {
                design.net_mut(net_id).routes.retain(|r| *r != route_id);
            }
            let entry = no_ripup.entry(net_id).or_default();
            if entry.is_empty() {
                abandoned.push(net_id);
            } else {
                failed_nets.push(net_id);
            }
        }

        rounds_since_sample += 1;
        if rounds_since_sample >= cfg.stages.effort.max(1) {
            rounds_since_sample = 0;
            progress_samples.push(failed_nets.len());
            if progress_samples.len() > 3 {
                progress_samples.remove(0);
            }
            if progress_samples.len() == 3 && progress_samples[0] <= progress_samples[2] {
                warn!("stage2: no progress over sliding window, stopping");
                break;
            }
        }
    }

    failed_nets.extend(abandoned.iter().copied());
    (routed, failed_nets, abandoned)
}

fn stage3_cleanup_ripup(
    design: &mut Design,
    grid: &mut GridModel,
    state: &mut SearchState,
    cfg: &Config,
    mode: MaskMode,
    routed: &[NetId],
) {
    for &net_id in routed {
        let routes = design.net(net_id).routes.clone();
        if routes.iter().all(|r| design.route(*r).is_short()) {
            continue;
        }

        let saved: Vec<_> = routes.iter().map(|r| (*r, design.route(*r).clone())).collect();
        rip_up_net(design, grid, net_id);

        if route_net(design, grid, state, cfg, net_id, 3, mode).is_some() {
            continue;
        }

        // The reroute attempt may have committed some routes of its own
        // before failing partway through the net's node list; discard them
        // and restore every saved route at its original `RouteId` slot, so
        // any `RouteEnd::Route(...)` within this net that referenced one of
        // them still resolves to the same data it did before the attempt.
        design.net_mut(net_id).routes.clear();
        for (route_id, route) in saved {
            design.restore_route(route_id, route);
            let number = design.net(net_id).number;
            for seg in design.route(route_id).segments.clone() {
                let cell = grid.obs_mut(seg.p1);
                cell.routed_net = true;
                cell.net = number;
                let cell2 = grid.obs_mut(seg.p2);
                cell2.routed_net = true;
                cell2.net = number;
            }
            design.net_mut(net_id).routes.push(route_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::design::{Net, Node};
    use eda_common::db::tech::{AntennaMethod, Direction as LayerDirection, Layer, SpacingTable};
    use eda_common::geom::{Point, Rect};

    fn design_with_one_layer() -> Design {
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
        design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(50.0, 50.0));
        design
    }

    fn add_net_with_nodes(design: &mut Design, number: u32, node_count: usize, critical: bool) -> NetId {
        let net_id = design.add_net(Net::new(number, format!("n{number}")));
        design.net_mut(net_id).flags.critical = critical;
        for _ in 0..node_count {
            let node_id = design.add_node(Node::default());
            design.net_mut(net_id).nodes.push(node_id);
        }
        net_id
    }

    #[test]
    fn critical_nets_route_before_anything_else() {
        let mut design = design_with_one_layer();
        let small = add_net_with_nodes(&mut design, 1, 2, false);
        let critical = add_net_with_nodes(&mut design, 2, 2, true);
        let big = add_net_with_nodes(&mut design, 3, 5, false);

        let order = order_nets_for_stage1(&design);
        assert_eq!(order[0], critical);
        assert!(order.contains(&small));
        assert!(order.contains(&big));
        // among non-critical nets, the one with more nodes sorts first.
        let big_pos = order.iter().position(|&n| n == big).unwrap();
        let small_pos = order.iter().position(|&n| n == small).unwrap();
        assert!(big_pos < small_pos);
    }

    #[test]
    fn victims_on_path_finds_the_owning_net_of_a_routed_cell() {
        let mut design = design_with_one_layer();
        let grid = GridModel::allocate(&design).unwrap();
        let self_net = design.add_net(Net::new(1, "self"));
        let victim_net = design.add_net(Net::new(2, "victim"));
        let mut grid = grid;
        let c = GridCoord::new(3, 3, 0);
        grid.obs_mut(c).routed_net = true;
        grid.obs_mut(c).net = design.net(victim_net).number;

        let victims = victims_on_path(&design, &grid, &[c], self_net);
        assert_eq!(victims, vec![victim_net]);
    }

    #[test]
    fn victims_on_path_ignores_cells_owned_by_self() {
        let design = design_with_one_layer();
        let mut grid = GridModel::allocate(&design).unwrap();
        let c = GridCoord::new(2, 2, 0);
        grid.obs_mut(c).routed_net = true;
        grid.obs_mut(c).net = 1;
        let mut design = design;
        let self_net = design.add_net(Net::new(1, "self"));

        let victims = victims_on_path(&design, &grid, &[c], self_net);
        assert!(victims.is_empty());
    }
}
