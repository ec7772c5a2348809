//! Post-route verification: testable properties 1 (no shorts) and 2
//! (connectivity) from §8, run off the routing critical path.

use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::db::indices::NetId;
use crate::db::Design;
use crate::geom::Point;

const CHECK_TOLERANCE: f64 = 0.005;
const BIN_SIZE: f64 = 10.0;

pub fn run(design: &Design) -> Result<(), String> {
    log::info!("starting post-route verification");

    let (shorts_result, opens_result) =
        rayon::join(|| check_shorts(design), || check_opens(design));

    let mut msgs = Vec::new();
    match shorts_result {
        Err(e) => {
            log::error!("FAIL: shorts detected: {e}");
            msgs.push(e);
        }
        Ok(_) => log::info!("PASS: no shorts found"),
    }
    match opens_result {
        Err(e) => {
            log::error!("FAIL: open net detected: {e}");
            msgs.push(e);
        }
        Ok(_) => log::info!("PASS: all nets fully connected"),
    }

    if msgs.is_empty() {
        Ok(())
    } else {
        Err(msgs.join("; "))
    }
}

#[derive(Clone, Copy, Debug)]
struct FlatSegment {
    p1: Point<f64>,
    p2: Point<f64>,
    layer: u8,
    net_id: NetId,
}

impl FlatSegment {
    fn intersects(&self, other: &FlatSegment) -> bool {
        if self.layer != other.layer {
            return false;
        }
        let min_x1 = self.p1.x.min(self.p2.x) - CHECK_TOLERANCE;
        let max_x1 = self.p1.x.max(self.p2.x) + CHECK_TOLERANCE;
        let min_y1 = self.p1.y.min(self.p2.y) - CHECK_TOLERANCE;
        let max_y1 = self.p1.y.max(self.p2.y) + CHECK_TOLERANCE;
        let min_x2 = other.p1.x.min(other.p2.x) - CHECK_TOLERANCE;
        let max_x2 = other.p1.x.max(other.p2.x) + CHECK_TOLERANCE;
        let min_y2 = other.p1.y.min(other.p2.y) - CHECK_TOLERANCE;
        let max_y2 = other.p1.y.max(other.p2.y) + CHECK_TOLERANCE;
        if max_x1 < min_x2 || min_x1 > max_x2 || max_y1 < min_y2 || min_y1 > max_y2 {
            return false;
        }

        fn on_segment(p: Point<f64>, a: Point<f64>, b: Point<f64>) -> bool {
            p.x >= a.x.min(b.x) - CHECK_TOLERANCE
                && p.x <= a.x.max(b.x) + CHECK_TOLERANCE
                && p.y >= a.y.min(b.y) - CHECK_TOLERANCE
                && p.y <= a.y.max(b.y) + CHECK_TOLERANCE
        }

        let o1 = orientation(self.p1, self.p2, other.p1);
        let o2 = orientation(self.p1, self.p2, other.p2);
        let o3 = orientation(other.p1, other.p2, self.p1);
        let o4 = orientation(other.p1, other.p2, self.p2);

        if o1 != o2 && o3 != o4 {
            return true;
        }
        (o1 == 0 && on_segment(other.p1, self.p1, self.p2))
            || (o2 == 0 && on_segment(other.p2, self.p1, self.p2))
            || (o3 == 0 && on_segment(self.p1, other.p1, other.p2))
            || (o4 == 0 && on_segment(self.p2, other.p1, other.p2))
    }

    fn shares_endpoint(&self, other: &FlatSegment) -> bool {
        let d = |a: Point<f64>, b: Point<f64>| (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
        let tol_sq = CHECK_TOLERANCE * CHECK_TOLERANCE;
        d(self.p1, other.p1) < tol_sq
            || d(self.p1, other.p2) < tol_sq
            || d(self.p2, other.p1) < tol_sq
            || d(self.p2, other.p2) < tol_sq
    }

    fn is_via(&self) -> bool {
        (self.p1.x - self.p2.x).abs() < 1e-6 && (self.p1.y - self.p2.y).abs() < 1e-6
    }
}

fn orientation(p: Point<f64>, q: Point<f64>, r: Point<f64>) -> i32 {
    let val = (q.y - p.y) * (r.x - q.x) - (q.x - p.x) * (r.y - q.y);
    if val.abs() < CHECK_TOLERANCE {
        0
    } else if val > 0.0 {
        1
    } else {
        2
    }
}

fn flatten(design: &Design, net_id: NetId) -> Vec<FlatSegment> {
    design
        .net(net_id)
        .routes
        .iter()
        .flat_map(|&rid| design.route(rid).segments.iter())
        .map(|s| FlatSegment {
            p1: Point::new(s.p1.x as f64, s.p1.y as f64),
            p2: Point::new(s.p2.x as f64, s.p2.y as f64),
            layer: s.layer.index() as u8,
            net_id,
        })
        .collect()
}

#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
struct BinKey {
    layer: u8,
    bx: i32,
    by: i32,
}

fn check_shorts(design: &Design) -> Result<(), String> {
    let mut entries: Vec<(BinKey, FlatSegment)> = (0..design.nets.len())
        .into_par_iter()
        .flat_map(|i| {
            let net_id = NetId::new(i);
            flatten(design, net_id)
                .into_iter()
                .flat_map(move |s| {
                    let min_x = s.p1.x.min(s.p2.x);
                    let max_x = s.p1.x.max(s.p2.x);
                    let min_y = s.p1.y.min(s.p2.y);
                    let max_y = s.p1.y.max(s.p2.y);
                    let (bx0, bx1) = ((min_x / BIN_SIZE).floor() as i32, (max_x / BIN_SIZE).floor() as i32);
                    let (by0, by1) = ((min_y / BIN_SIZE).floor() as i32, (max_y / BIN_SIZE).floor() as i32);
                    let mut v = Vec::new();
                    for bx in bx0..=bx1 {
                        for by in by0..=by1 {
                            v.push((BinKey { layer: s.layer, bx, by }, s));
                        }
                    }
                    v
                })
                .collect::<Vec<_>>()
        })
        .collect();

    entries.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut chunks = Vec::new();
    if !entries.is_empty() {
        let mut start = 0;
        for i in 1..entries.len() {
            if entries[i].0 != entries[i - 1].0 {
                chunks.push((start, i));
                start = i;
            }
        }
        chunks.push((start, entries.len()));
    }

    let found = AtomicBool::new(false);
    let msg = Arc::new(Mutex::new(String::new()));

    chunks.par_iter().for_each(|&(a, b)| {
        if found.load(Ordering::Relaxed) {
            return;
        }
        let slice = &entries[a..b];
        for i in 0..slice.len() {
            for j in (i + 1)..slice.len() {
                let s1 = &slice[i].1;
                let s2 = &slice[j].1;
                if !s1.intersects(s2) {
                    continue;
                }
                if s1.net_id != s2.net_id {
                    let n1 = &design.net(s1.net_id).name;
                    let n2 = &design.net(s2.net_id).name;
                    let m = format!("short: '{n1}' vs '{n2}' on layer {}", s1.layer);
                    if !found.swap(true, Ordering::Relaxed) {
                        *msg.lock().unwrap() = m;
                    }
                    return;
                } else if !s1.shares_endpoint(s2) && !s1.is_via() && !s2.is_via() {
                    let n1 = &design.net(s1.net_id).name;
                    let m = format!("self-short/loop: net '{n1}' on layer {}", s1.layer);
                    if !found.swap(true, Ordering::Relaxed) {
                        *msg.lock().unwrap() = m;
                    }
                    return;
                }
            }
        }
    });

    if found.load(Ordering::Relaxed) {
        Err(msg.lock().unwrap().clone())
    } else {
        Ok(())
    }
}

fn check_opens(design: &Design) -> Result<(), String> {
    let found = AtomicBool::new(false);
    let msg = Arc::new(Mutex::new(String::new()));

    (0..design.nets.len()).into_par_iter().for_each(|i| {
        if found.load(Ordering::Relaxed) {
            return;
        }
        let net_id = NetId::new(i);
        let net = design.net(net_id);
        if net.nodes.len() < 2 || net.flags.ignored {
            return;
        }

        let segments = flatten(design, net_id);
        if segments.is_empty() {
            if !found.swap(true, Ordering::Relaxed) {
                *msg.lock().unwrap() = format!("net '{}': unrouted (no segments)", net.name);
            }
            return;
        }

        let n = segments.len();
        let mut adj = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let (s1, s2) = (&segments[i], &segments[j]);
                let same = s1.layer == s2.layer;
                let adj_layer = (s1.layer as i32 - s2.layer as i32).abs() == 1;
                if same && (s1.intersects(s2) || s1.shares_endpoint(s2)) {
                    adj[i].push(j);
                    adj[j].push(i);
                } else if adj_layer && overlap_ignoring_layer(s1, s2) {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }

        let mut pin_segs = Vec::new();
        for &node_id in &net.nodes {
            let node = design.node(node_id);
            let Some(tap) = node.taps.first() else {
                continue;
            };
            let mut found_seg = None;
            for (idx, seg) in segments.iter().enumerate() {
                if point_to_segment_dist(tap.phys, seg.p1, seg.p2) < CHECK_TOLERANCE {
                    found_seg = Some(idx);
                    break;
                }
            }
            match found_seg {
                Some(idx) => pin_segs.push(idx),
                None => {
                    if !found.swap(true, Ordering::Relaxed) {
                        *msg.lock().unwrap() =
                            format!("net '{}': a node tap is not connected to any wire", net.name);
                    }
                    return;
                }
            }
        }

        if pin_segs.is_empty() {
            return;
        }
        let mut visited = vec![false; n];
        let mut queue = VecDeque::new();
        visited[pin_segs[0]] = true;
        queue.push_back(pin_segs[0]);
        while let Some(u) = queue.pop_front() {
            for &v in &adj[u] {
                if !visited[v] {
                    visited[v] = true;
                    queue.push_back(v);
                }
            }
        }
        for &s in &pin_segs {
            if !visited[s] {
                if !found.swap(true, Ordering::Relaxed) {
                    *msg.lock().unwrap() = format!("net '{}': broken connectivity", net.name);
                }
                return;
            }
        }
    });

    if found.load(Ordering::Relaxed) {
        Err(msg.lock().unwrap().clone())
    } else {
        Ok(())
    }
}

fn overlap_ignoring_layer(s1: &FlatSegment, s2: &FlatSegment) -> bool {
    let mut a = *s1;
    a.layer = 0;
    let mut b = *s2;
    b.layer = 0;
    a.intersects(&b)
}

fn point_to_segment_dist(p: Point<f64>, a: Point<f64>, b: Point<f64>) -> f64 {
    let l2 = (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
    if l2 == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    let t = (((p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y)) / l2).clamp(0.0, 1.0);
    let px = a.x + t * (b.x - a.x);
    let py = a.y + t * (b.y - a.y);
    ((p.x - px).powi(2) + (p.y - py).powi(2)).sqrt()
}
