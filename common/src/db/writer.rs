//! Annotated-design, failed-nets, and layer-info writers (§6 produced
//! artifacts). Grounded on the teacher's `save_def` in `cli/src/main.rs`.

use std::io::Write;

use super::design::{Design, SegmentKind};

pub fn write_annotated_design(design: &Design, filename: &str) -> std::io::Result<()> {
    let mut file = std::fs::File::create(filename)?;
    let units = design.scales.internal_units_per_micron as f64;

    writeln!(file, "VERSION 5.8 ;")?;
    writeln!(file, "DIVIDERCHAR \"/\" ;")?;
    writeln!(file, "BUSBITCHARS \"[]\" ;")?;
    writeln!(file, "DESIGN routed ;")?;
    writeln!(file, "UNITS DISTANCE MICRONS {} ;", units as i64)?;

    let x1 = (design.die_area.min.x * units) as i64;
    let y1 = (design.die_area.min.y * units) as i64;
    let x2 = (design.die_area.max.x * units) as i64;
    let y2 = (design.die_area.max.y * units) as i64;
    writeln!(file, "DIEAREA ( {x1} {y1} ) ( {x2} {y2} ) ;")?;

    writeln!(file, "COMPONENTS {} ;", design.instances.len())?;
    for inst in &design.instances {
        let mac = &design.macros[inst.macro_id.index()];
        writeln!(
            file,
            "- {} {} + PLACED ( {} {} ) N ;",
            inst.name,
            mac.name,
            (inst.origin.x * units) as i64,
            (inst.origin.y * units) as i64
        )?;
    }
    writeln!(file, "END COMPONENTS")?;

    writeln!(file, "NETS {} ;", design.nets.len())?;
    let mut specialnets = Vec::new();
    for net in &design.nets {
        write!(file, "- {} ", net.name)?;
        for &node_id in &net.nodes {
            if let Some((inst_id, pin_id)) = design.node(node_id).owner {
                let inst = &design.instances[inst_id.index()];
                let mac = &design.macros[inst.macro_id.index()];
                let pin_name = &mac.pins[pin_id.index()].name;
                write!(file, "( {} {} ) ", inst.name, pin_name)?;
            }
        }
        writeln!(file)?;

        for &route_id in &net.routes {
            let route = design.route(route_id);
            for seg in &route.segments {
                let layer_name = &design.layer(seg.layer).name;
                let x1 = seg.p1.x as i64;
                let y1 = seg.p1.y as i64;
                match seg.kind {
                    SegmentKind::Via => {
                        let next = super::indices::LayerId::new(seg.layer.index() + 1);
                        let next_name = design
                            .layers
                            .get(next.index())
                            .map(|l| l.name.as_str())
                            .unwrap_or(layer_name.as_str());
                        let via_name = format!("VIA_{layer_name}_{next_name}");
                        writeln!(file, "  + ROUTED {layer_name} ( {x1} {y1} ) {via_name}")?;
                    }
                    SegmentKind::WireOffsetStart | SegmentKind::WireOffsetEnd => {
                        let x2 = seg.p2.x as i64;
                        let y2 = seg.p2.y as i64;
                        writeln!(file, "  + ROUTED {layer_name} ( {x1} {y1} ) ( {x2} {y2} )")?;
                        specialnets.push((net.name.clone(), layer_name.clone(), seg.offset_distance));
                    }
                    _ => {
                        let x2 = seg.p2.x as i64;
                        let y2 = seg.p2.y as i64;
                        writeln!(file, "  + ROUTED {layer_name} ( {x1} {y1} ) ( {x2} {y2} )")?;
                    }
                }
            }
        }
        writeln!(file, "  ;")?;
    }
    writeln!(file, "END NETS")?;

    if !specialnets.is_empty() {
        writeln!(file, "SPECIALNETS {} ;", specialnets.len())?;
        for (net_name, layer_name, dist) in &specialnets {
            writeln!(
                file,
                "- {net_name} + ROUTED {layer_name} {:.3} ;",
                dist.abs()
            )?;
        }
        writeln!(file, "END SPECIALNETS")?;
    }

    writeln!(file, "END DESIGN")?;
    Ok(())
}

/// §6: `<count> nets failed to route:` header, then one name per line.
pub fn write_failed_nets(design: &Design, failed: &[super::indices::NetId], filename: &str) -> std::io::Result<()> {
    let mut file = std::fs::File::create(filename)?;
    writeln!(file, "{} nets failed to route:", failed.len())?;
    for &id in failed {
        writeln!(file, "{}", design.net(id).name)?;
    }
    Ok(())
}

/// §6 `-i` info output: one line per layer plus a `units scale <N>` header.
pub fn write_layer_info(design: &Design, filename: &str) -> std::io::Result<()> {
    let mut file = std::fs::File::create(filename)?;
    writeln!(file, "units scale {}", design.scales.internal_units_per_micron)?;
    for layer in &design.layers {
        let dir = match layer.direction {
            super::tech::Direction::Horizontal => "horizontal",
            super::tech::Direction::Vertical => "vertical",
        };
        writeln!(
            file,
            "{} {} {} {} {}",
            layer.name,
            layer.pitch(),
            layer.offset,
            layer.width,
            dir
        )?;
    }
    Ok(())
}
