//! Maze search (C4): six-stack LIFO frontier over the obstruction grid.
//! Grounded on the teacher's `algo/astar.rs` for the generation-tag scratch
//! array (`AStar::{current_tag,visited_tag}`, avoiding a full reset between
//! searches) and on `original_source/qrouter.c`'s `glist[6]` for the literal
//! frontier shape (§9 Open Questions decided against a `BinaryHeap`).

use eda_common::db::design::{Segment, SegmentKind};
use eda_common::db::indices::LayerId;
use eda_common::db::Design;
use eda_common::geom::GridCoord;
use eda_common::util::config::SearchConfig;

use crate::grid::{Direction, GridModel};
use crate::pool::PointPool;

const PROCESSED: u8 = 1 << 0;
const SOURCE: u8 = 1 << 1;
const TARGET: u8 = 1 << 2;
const CONFLICT: u8 = 1 << 3;

#[derive(Clone, Copy)]
struct Cell {
    gen: u32,
    flags: u8,
    cost: u32,
    pred: Option<Direction>,
    via_run: u8,
}

impl Cell {
    fn fresh(gen: u32) -> Self {
        Self {
            gen,
            flags: 0,
            cost: u32::MAX,
            pred: None,
            via_run: 0,
        }
    }
}

/// Per-cell working memory reused across every net's search, keyed off a
/// generation counter instead of being cleared between calls.
pub struct SearchState {
    cells: Vec<Cell>,
    current_gen: u32,
    nx: u32,
    ny: u32,
    num_layers: u8,
    pool: PointPool,
}

impl SearchState {
    pub fn new(grid: &GridModel) -> Self {
        let count = grid.nx as usize * grid.ny as usize * grid.num_layers as usize;
        Self {
            cells: vec![Cell::fresh(0); count],
            current_gen: 0,
            nx: grid.nx,
            ny: grid.ny,
            num_layers: grid.num_layers,
            pool: PointPool::new(),
        }
    }

    #[inline]
    fn index(&self, c: GridCoord) -> usize {
        (c.z as usize * self.ny as usize + c.y as usize) * self.nx as usize + c.x as usize
    }

    fn begin_net(&mut self) {
        self.current_gen += 1;
    }

    fn get(&self, c: GridCoord) -> Cell {
        let cell = self.cells[self.index(c)];
        if cell.gen == self.current_gen {
            cell
        } else {
            Cell::fresh(self.current_gen)
        }
    }

    fn get_mut(&mut self, c: GridCoord) -> &mut Cell {
        let gen = self.current_gen;
        let idx = self.index(c);
        let cell = &mut self.cells[idx];
        if cell.gen != gen {
            *cell = Cell::fresh(gen);
        }
        cell
    }
}

fn axis_horizontal(dir: Direction) -> bool {
    matches!(dir, Direction::East | Direction::West)
}

/// Direction preference order for this layer's routing direction: the
/// layer's own axis first, then vertical moves, then the off-axis.
fn direction_order(horizontal_preferred: bool) -> [Direction; 6] {
    if horizontal_preferred {
        [
            Direction::East,
            Direction::West,
            Direction::Up,
            Direction::Down,
            Direction::North,
            Direction::South,
        ]
    } else {
        [
            Direction::North,
            Direction::South,
            Direction::Up,
            Direction::Down,
            Direction::East,
            Direction::West,
        ]
    }
}

fn pop_highest(stacks: &mut [Vec<GridCoord>; 6]) -> Option<(usize, GridCoord)> {
    for (i, stack) in stacks.iter_mut().enumerate() {
        if let Some(c) = stack.pop() {
            return Some((i, c));
        }
    }
    None
}

struct StepCost {
    total: u32,
    conflict: bool,
}

#[allow(clippy::too_many_arguments)]
fn step_cost(
    grid: &GridModel,
    design: &Design,
    from: GridCoord,
    dir: Direction,
    to: GridCoord,
    pred_of_from: Option<Direction>,
    cfg: &SearchConfig,
    stage: u32,
    blocked: bool,
) -> StepCost {
    let mut total = 0u32;
    let conflict = blocked;

    if matches!(dir, Direction::Up | Direction::Down) {
        total += cfg.via_cost;
    } else {
        total += cfg.seg_cost;
        let horizontal_layer = design.layers[from.z as usize].direction == eda_common::db::tech::Direction::Horizontal;
        if axis_horizontal(dir) != horizontal_layer {
            total += cfg.xver_cost;
        }
        if let Some(pred) = pred_of_from {
            if !matches!(pred, Direction::Up | Direction::Down) && axis_horizontal(pred) != axis_horizontal(dir) {
                total += cfg.jog_cost;
            }
        }
    }

    if let Some(info) = grid.node_info(to) {
        if info.offset_ns || info.offset_ew {
            total += (cfg.offset_cost as f64 * info.offset.abs()).round() as u32;
        }
        if let Some(node_id) = info.nodeloc {
            if design.node(node_id).taps.len() == 1 {
                total += cfg.block_cost;
            }
        }
    }

    if conflict {
        total += cfg.conflict_cost.saturating_mul(stage);
    }

    total += grid.rmask(to.x, to.y) as u32;

    StepCost { total, conflict }
}

fn stacked_contacts_ok(via_run: u8, limit: u32) -> bool {
    (via_run as u32) < limit
}

pub struct SearchResult {
    pub best: GridCoord,
    pub cost: u32,
}

/// Run the maze search for one net from `sources` to `targets`. Returns the
/// best target reached, or `None` if every pass exhausted the frontier
/// without finding a path within `max_cost`.
pub fn find_path(
    grid: &GridModel,
    design: &Design,
    state: &mut SearchState,
    sources: &[GridCoord],
    targets: &[GridCoord],
    cfg: &SearchConfig,
    stage: u32,
    force_routable: bool,
) -> Option<SearchResult> {
    state.begin_net();
    let mut stacks: [Vec<GridCoord>; 6] = std::array::from_fn(|_| state.pool.acquire());

    for &s in sources {
        let cell = state.get_mut(s);
        cell.flags |= SOURCE;
        cell.cost = 0;
        stacks[0].push(s);
    }
    for &t in targets {
        state.get_mut(t).flags |= TARGET;
    }

    let mut max_cost = cfg.max_cost;
    let mut best: Option<(GridCoord, u32)> = None;
    let mut found: Option<SearchResult> = None;

    'passes: for pass in 0..cfg.num_passes {
        let mut unprocessed: Vec<GridCoord> = Vec::new();

        while let Some((_priority, c)) = pop_highest(&mut stacks) {
            let mask_val = grid.rmask(c.x, c.y);
            if mask_val as usize > pass {
                unprocessed.push(c);
                continue;
            }
            let current = state.get(c);
            if current.cost > max_cost {
                unprocessed.push(c);
                continue;
            }
            if current.flags & PROCESSED != 0 {
                continue;
            }
            if current.flags & TARGET != 0 {
                if best.map_or(true, |(_, bc)| current.cost < bc) {
                    best = Some((c, current.cost));
                    max_cost = current.cost;
                }
                state.get_mut(c).flags |= PROCESSED;
                continue;
            }

            let horizontal_layer =
                design.layers[c.z as usize].direction == eda_common::db::tech::Direction::Horizontal;
            let order = direction_order(horizontal_layer);
            for (i, dir) in order.iter().enumerate() {
                let Some(n) = dir.step(c, state.nx, state.ny, state.num_layers) else {
                    continue;
                };
                let obs = grid.obs(n);
                if obs.no_net {
                    continue;
                }
                let mut blocked = false;
                if grid.obs(c).is_blocked(*dir) {
                    if stage >= 2 || force_routable {
                        blocked = true;
                    } else {
                        continue;
                    }
                }
                let via_run = if matches!(dir, Direction::Up | Direction::Down) {
                    current.via_run + 1
                } else {
                    0
                };
                if matches!(dir, Direction::Up | Direction::Down) && !stacked_contacts_ok(current.via_run, cfg.stacked_contacts) {
                    continue;
                }

                let sc = step_cost(grid, design, c, *dir, n, current.pred, cfg, stage, blocked);
                let tentative = current.cost.saturating_add(sc.total);
                let neighbor = state.get(n);
                if neighbor.flags & PROCESSED != 0 && neighbor.flags & TARGET == 0 {
                    continue;
                }
                if tentative < neighbor.cost {
                    let is_target = neighbor.flags & TARGET != 0;
                    {
                        let nc = state.get_mut(n);
                        nc.cost = tentative;
                        nc.pred = Some(*dir);
                        nc.via_run = via_run;
                        if sc.conflict {
                            nc.flags |= CONFLICT;
                        }
                    }
                    if is_target {
                        if best.map_or(true, |(_, bc)| tentative < bc) {
                            best = Some((n, tentative));
                            max_cost = tentative;
                        }
                    } else {
                        stacks[i].push(n);
                    }
                }
            }
            state.get_mut(c).flags |= PROCESSED;
        }

        if let Some((c, cost)) = best {
            if cost <= max_cost {
                found = Some(SearchResult { best: c, cost });
                break 'passes;
            }
        }
        if unprocessed.is_empty() {
            break 'passes;
        }
        max_cost = max_cost.saturating_mul(2);
        for c in unprocessed {
            stacks[0].push(c);
        }
    }

    for stack in stacks {
        state.pool.release(stack);
    }

    found.or_else(|| best.map(|(c, cost)| SearchResult { best: c, cost }))
}

/// Walk the predecessor chain from `best` back to a SOURCE cell, collapsing
/// same-direction same-layer runs into wire segments and emitting a via
/// segment at every layer transition.
pub fn reconstruct_path(grid: &GridModel, state: &SearchState, best: GridCoord) -> Vec<GridCoord> {
    let mut path = vec![best];
    let mut c = best;
    loop {
        let cell = state.get(c);
        if cell.flags & SOURCE != 0 {
            break;
        }
        let Some(pred_dir) = cell.pred else { break };
        let Some(prev) = pred_dir.opposite().step(c, grid.nx, grid.ny, grid.num_layers) else {
            break;
        };
        path.push(prev);
        c = prev;
        if path.len() > (grid.nx as usize * grid.ny as usize * grid.num_layers as usize + 1) {
            break; // defensive: a cycle would mean a bug in cost monotonicity
        }
    }
    path.reverse();
    path
}

pub fn path_to_segments(grid: &GridModel, path: &[GridCoord]) -> Vec<Segment> {
    let mut segments = Vec::new();
    if path.len() < 2 {
        return segments;
    }

    let mut run_start = 0usize;
    for i in 1..path.len() {
        let a = path[i - 1];
        let b = path[i];
        let is_via = a.z != b.z;
        let prev_is_via = if i >= 2 { path[i - 2].z != a.z } else { false };
        if is_via {
            if i - 1 > run_start {
                segments.push(wire_segment(path[run_start], a));
            }
            segments.push(Segment {
                layer: LayerId::new(a.z.min(b.z) as usize),
                p1: a,
                p2: b,
                kind: SegmentKind::Via,
                offset_distance: 0.0,
            });
            run_start = i;
        } else if prev_is_via {
            run_start = i - 1;
        }
    }
    if path.len() - 1 > run_start {
        segments.push(wire_segment(path[run_start], path[path.len() - 1]));
    }

    annotate_offsets(grid, path, &mut segments);
    segments
}

fn wire_segment(p1: GridCoord, p2: GridCoord) -> Segment {
    Segment {
        layer: LayerId::new(p1.z as usize),
        p1,
        p2,
        kind: SegmentKind::Wire,
        offset_distance: 0.0,
    }
}

fn annotate_offsets(grid: &GridModel, path: &[GridCoord], segments: &mut [Segment]) {
    if let (Some(first), Some(seg)) = (path.first(), segments.first_mut()) {
        if let Some(info) = grid.node_info(*first) {
            if info.stub_ns || info.stub_ew {
                seg.kind = SegmentKind::WireOffsetStart;
                seg.offset_distance = info.stub_len;
            } else if info.offset_ns || info.offset_ew {
                seg.kind = SegmentKind::WireOffsetStart;
                seg.offset_distance = info.offset;
            }
        }
    }
    if let (Some(last), Some(seg)) = (path.last(), segments.last_mut()) {
        if let Some(info) = grid.node_info(*last) {
            if info.stub_ns || info.stub_ew {
                seg.kind = SegmentKind::WireOffsetEnd;
                seg.offset_distance = info.stub_len;
            } else if info.offset_ns || info.offset_ew {
                seg.kind = SegmentKind::WireOffsetEnd;
                seg.offset_distance = info.offset;
            }
        }
    }
}

/// Mark every grid point on the committed path ROUTED_NET for this net; via
/// points occupy both the bottom and top layer.
pub fn writeback(grid: &mut GridModel, path: &[GridCoord], net_number: u32) {
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        mark_routed(grid, a, net_number);
        mark_routed(grid, b, net_number);
    }
    if let Some(&only) = path.first().filter(|_| path.len() == 1) {
        mark_routed(grid, only, net_number);
    }
}

fn mark_routed(grid: &mut GridModel, c: GridCoord, net_number: u32) {
    let cell = grid.obs_mut(c);
    cell.routed_net = true;
    cell.net = net_number;
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::tech::{AntennaMethod, Direction as LayerDirection, Layer, SpacingTable};
    use eda_common::geom::{Point, Rect};

    fn two_layer_design() -> Design {
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
        design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        design
    }

    #[test]
    fn finds_a_direct_path_on_an_open_grid() {
        let design = two_layer_design();
        let grid = GridModel::allocate(&design).unwrap();
        let mut state = SearchState::new(&grid);
        let cfg = SearchConfig::default();

        let source = GridCoord::new(0, 0, 0);
        let target = GridCoord::new(5, 0, 0);
        let result = find_path(&grid, &design, &mut state, &[source], &[target], &cfg, 1, false)
            .expect("path should be found on an unobstructed grid");

        assert_eq!(result.best, target);
        let path = reconstruct_path(&grid, &state, result.best);
        assert_eq!(path.first(), Some(&source));
        assert_eq!(path.last(), Some(&target));
    }

    #[test]
    fn fails_when_target_is_walled_off_by_no_net_cells() {
        let design = two_layer_design();
        let mut grid = GridModel::allocate(&design).unwrap();
        // wall off column x=3 across the full y-range on layer 0 and
        // layer 1, and block the vias between them, so nothing can cross.
        for y in 0..grid.ny {
            for z in 0..grid.num_layers {
                grid.obs_mut(GridCoord::new(3, y, z)).no_net = true;
            }
        }
        let mut state = SearchState::new(&grid);
        let cfg = SearchConfig::default();

        let source = GridCoord::new(0, 0, 0);
        let target = GridCoord::new(5, 0, 0);
        let result = find_path(&grid, &design, &mut state, &[source], &[target], &cfg, 1, false);
        assert!(result.is_none());
    }

    #[test]
    fn path_to_segments_emits_a_via_at_a_layer_transition() {
        let design = two_layer_design();
        let grid = GridModel::allocate(&design).unwrap();
        let path = vec![
            GridCoord::new(0, 0, 0),
            GridCoord::new(1, 0, 0),
            GridCoord::new(1, 0, 1),
            GridCoord::new(1, 1, 1),
        ];
        let segments = path_to_segments(&grid, &path);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].kind, SegmentKind::Wire);
        assert_eq!(segments[1].kind, SegmentKind::Via);
        assert_eq!(segments[2].kind, SegmentKind::Wire);
    }
}
