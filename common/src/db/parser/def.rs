//! Placed-design (DEF-like) file reader. Builds instances, nets, and nodes
//! from COMPONENTS/PINS/NETS sections; instance pin geometry is placement-
//! transformed from the macro definition already loaded by `lef::parse`.

use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::db::design::{DPoint, GateInstance, Net, NetUse, Node, Orientation};
use crate::db::indices::NetId;
use crate::db::Design;
use crate::geom::{GridCoord, Point, Rect};

enum Section {
    None,
    Components,
    Pins,
    Nets,
}

pub fn parse(design: &mut Design, filename: &str) -> Result<()> {
    let file = File::open(filename)?;
    let reader = BufReader::new(file);

    let mut section = Section::None;
    let mut def_units = 1000.0;
    let mut pending_net: Option<NetId> = None;

    for line in reader.lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "UNITS" => {
                if let Some(i) = parts.iter().position(|&p| p == "MICRONS") {
                    if let Some(v) =
                        parts.get(i + 1).and_then(|s| s.trim_matches(';').parse().ok())
                    {
                        def_units = v;
                    }
                }
            }
            "DIEAREA" => {
                let x1: f64 = parts[2].parse()?;
                let y1: f64 = parts[3].parse()?;
                let x2: f64 = parts[6].parse()?;
                let y2: f64 = parts[7].parse()?;
                design.die_area = Rect::new(
                    Point::new(x1 / def_units, y1 / def_units),
                    Point::new(x2 / def_units, y2 / def_units),
                );
            }
            "COMPONENTS" => section = Section::Components,
            "PINS" => section = Section::Pins,
            "NETS" => section = Section::Nets,
            "END" if parts.len() > 1 => {
                section = match parts[1] {
                    "COMPONENTS" | "PINS" | "NETS" => Section::None,
                    _ => section,
                };
            }
            "-" => match section {
                Section::Components => parse_component(design, &parts, def_units),
                Section::Pins => parse_pin(design, &parts, def_units),
                Section::Nets => {
                    let net_name = parts[1].to_string();
                    let net_id = parse_net_header(design, &net_name);
                    pending_net = Some(net_id);
                    bind_conns_in_line(design, net_id, &parts);
                }
                Section::None => {}
            },
            _ => {
                if matches!(section, Section::Nets) {
                    if let Some(net_id) = pending_net {
                        bind_conns_in_line(design, net_id, &parts);
                    }
                }
            }
        }
    }

    Ok(())
}

fn parse_component(design: &mut Design, parts: &[&str], def_units: f64) {
    let name = parts[1].to_string();
    let macro_name = parts[2].to_string();
    let mut origin = Point::new(0.0, 0.0);
    let mut orientation = Orientation::N;

    for (i, &part) in parts.iter().enumerate() {
        if part == "(" && i + 2 < parts.len() {
            if let (Ok(x), Ok(y)) = (parts[i + 1].parse::<f64>(), parts[i + 2].parse::<f64>()) {
                origin = Point::new(x / def_units, y / def_units);
            }
        }
        orientation = match part {
            "N" => Orientation::N,
            "FN" => Orientation::FN,
            "S" => Orientation::S,
            "FS" => Orientation::FS,
            "E" => Orientation::E,
            "FE" => Orientation::FE,
            "W" => Orientation::W,
            "FW" => Orientation::FW,
            _ => orientation,
        };
    }

    let Some(&macro_id) = design.macro_by_name.get(&macro_name) else {
        log::warn!("component {name} references unknown macro {macro_name}, skipping");
        return;
    };
    let m = &design.macros[macro_id.index()];

    let place = |r: &Rect| -> Rect {
        let lo = orientation.transform(r.min, m.width, m.height);
        let hi = orientation.transform(r.max, m.width, m.height);
        let min = Point::new(lo.x.min(hi.x), lo.y.min(hi.y)) + origin;
        let max = Point::new(lo.x.max(hi.x), lo.y.max(hi.y)) + origin;
        Rect::new(min, max)
    };

    let pin_taps = m
        .pins
        .iter()
        .map(|pin| {
            pin.taps
                .iter()
                .map(|t| crate::db::design::TapRect {
                    layer: t.layer,
                    rect: place(&t.rect),
                })
                .collect()
        })
        .collect();
    let obstructions = m
        .obstructions
        .iter()
        .map(|t| crate::db::design::TapRect {
            layer: t.layer,
            rect: place(&t.rect),
        })
        .collect();

    let num_pins = m.pins.len();
    design.add_instance(GateInstance {
        name,
        macro_id,
        origin,
        orientation,
        pin_nets: vec![None; num_pins],
        pin_nodes: vec![None; num_pins],
        pin_taps,
        obstructions,
    });
}

fn parse_pin(design: &mut Design, parts: &[&str], def_units: f64) {
    let mut net_name = String::new();
    let mut point = Point::new(0.0, 0.0);

    let mut i = 2;
    while i < parts.len() {
        if parts[i] == "NET" && i + 1 < parts.len() {
            net_name = parts[i + 1].to_string();
        } else if parts[i] == "(" && i + 2 < parts.len() {
            if let (Ok(x), Ok(y)) = (parts[i + 1].parse::<f64>(), parts[i + 2].parse::<f64>()) {
                point = Point::new(x / def_units, y / def_units);
            }
        }
        i += 1;
    }
    if net_name.is_empty() {
        return;
    }

    let net_id = parse_net_header(design, &net_name);
    let node = Node {
        net: Some(net_id),
        index_in_net: design.net(net_id).nodes.len(),
        taps: vec![DPoint {
            grid: GridCoord::new(0, 0, 0),
            phys: point,
        }],
        halo: Vec::new(),
        reachable_count: 1,
        branch: point,
        owner: None,
    };
    let node_id = design.add_node(node);
    design.net_mut(net_id).nodes.push(node_id);
}

fn parse_net_header(design: &mut Design, net_name: &str) -> NetId {
    if let Some(id) = design.net_by_name.get(net_name) {
        return *id;
    }
    let number = design.nets.len() as u32 + 1;
    let use_kind = match net_name.to_uppercase().as_str() {
        s if s.contains("VDD") || s.contains("VCC") => NetUse::Power,
        s if s.contains("VSS") || s.contains("GND") => NetUse::Ground,
        s if s.contains("CLK") => NetUse::Clock,
        _ => NetUse::Signal,
    };
    let mut net = Net::new(number, net_name);
    net.use_kind = use_kind;
    design.add_net(net)
}

/// A NETS entry's `( instance pin )` connection list may span several
/// physical lines before the terminating `;`; scan every line encountered
/// while a net is open.
fn bind_conns_in_line(design: &mut Design, net_id: NetId, parts: &[&str]) {
    let mut i = 0;
    while i < parts.len() {
        if parts[i] == "(" && i + 2 < parts.len() {
            let inst = parts[i + 1];
            let pin = parts[i + 2];
            if inst != "PIN" {
                if let Some(&inst_id) = design.instance_by_name.get(inst) {
                    bind_pin(design, net_id, inst_id, pin);
                }
            }
            i += 3;
        } else {
            i += 1;
        }
    }
}

fn bind_pin(
    design: &mut Design,
    net_id: NetId,
    inst_id: crate::db::indices::InstanceId,
    pin_name: &str,
) {
    let macro_id = design.instances[inst_id.index()].macro_id;
    let Some(pin_idx) = design.macros[macro_id.index()]
        .pins
        .iter()
        .position(|p| p.name == pin_name)
    else {
        return;
    };
    if design.instances[inst_id.index()].pin_nodes[pin_idx].is_some() {
        return;
    }

    let taps: Vec<DPoint> = design.instances[inst_id.index()].pin_taps[pin_idx]
        .iter()
        .map(|t| DPoint {
            grid: GridCoord::new(0, 0, t.layer.index() as u8),
            phys: Point::new(
                (t.rect.min.x + t.rect.max.x) / 2.0,
                (t.rect.min.y + t.rect.max.y) / 2.0,
            ),
        })
        .collect();
    let branch = taps.first().map(|t| t.phys).unwrap_or(Point::new(0.0, 0.0));
    let reachable_count = taps.len();

    let node = Node {
        net: Some(net_id),
        index_in_net: design.net(net_id).nodes.len(),
        taps,
        halo: Vec::new(),
        reachable_count,
        branch,
        owner: Some((inst_id, crate::db::indices::PinId::new(pin_idx))),
    };
    let node_id = design.add_node(node);
    design.net_mut(net_id).nodes.push(node_id);
    design.instances[inst_id.index()].pin_nets[pin_idx] = Some(net_id);
    design.instances[inst_id.index()].pin_nodes[pin_idx] = Some(node_id);
}
