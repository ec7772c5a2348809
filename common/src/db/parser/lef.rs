//! Technology (LEF-like) file reader: routing layers, via types, and macro
//! pin/obstruction geometry. External collaborator per §6; kept narrow on
//! purpose — the router only needs the fields this reader extracts.

use anyhow::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::db::design::{GateMacro, MacroPin, PinDirection, TapRect};
use crate::db::indices::LayerId;
use crate::db::tech::{AntennaMethod, Direction, Layer, SpacingTable};
use crate::db::Design;
use crate::geom::{Point, Rect};

pub fn parse(design: &mut Design, filename: &str) -> Result<()> {
    let file = File::open(filename)?;
    let reader = BufReader::new(file);

    let mut current_macro: Option<GateMacro> = None;
    let mut current_pin: Option<MacroPin> = None;
    let mut in_obs = false;

    let mut in_layer = false;
    let mut layer_name = String::new();
    let mut layer_type = String::new();
    let mut layer_dir = Direction::Horizontal;
    let mut layer_pitch_x = 1.0;
    let mut layer_pitch_y = 1.0;
    let mut layer_width = 1.0;
    let mut layer_offset = 0.0;
    let mut layer_spacing = 0.0;
    let mut layer_antenna_ratio = 400.0;
    let mut layer_antenna_method = AntennaMethod::None;

    for line in reader.lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "LAYER" => {
                if current_macro.is_none() {
                    layer_name = parts[1].trim_end_matches(';').to_string();
                    in_layer = true;
                    layer_type.clear();
                    layer_dir = Direction::Horizontal;
                    layer_pitch_x = 1.0;
                    layer_pitch_y = 1.0;
                    layer_width = 1.0;
                    layer_offset = 0.0;
                    layer_spacing = 0.0;
                    layer_antenna_ratio = 400.0;
                    layer_antenna_method = AntennaMethod::None;
                }
            }
            "TYPE" if in_layer => layer_type = parts[1].trim_end_matches(';').to_string(),
            "DIRECTION" if in_layer => {
                layer_dir = match parts[1].trim_end_matches(';') {
                    "VERTICAL" => Direction::Vertical,
                    _ => Direction::Horizontal,
                };
            }
            "PITCH" if in_layer => {
                let v: f64 = parts[1].trim_end_matches(';').parse().unwrap_or(1.0);
                layer_pitch_x = v;
                layer_pitch_y = parts
                    .get(2)
                    .and_then(|s| s.trim_end_matches(';').parse().ok())
                    .unwrap_or(v);
            }
            "WIDTH" if in_layer => {
                layer_width = parts[1].trim_end_matches(';').parse().unwrap_or(1.0)
            }
            "OFFSET" if in_layer => {
                layer_offset = parts[1].trim_end_matches(';').parse().unwrap_or(0.0)
            }
            "SPACING" if in_layer => {
                layer_spacing = parts[1].trim_end_matches(';').parse().unwrap_or(0.0)
            }
            "ANTENNAAREARATIO" | "ANTENNADIFFAREARATIO" if in_layer => {
                if let Ok(v) = parts[1].trim_end_matches(';').parse() {
                    layer_antenna_ratio = v;
                    layer_antenna_method = AntennaMethod::Area;
                }
            }
            "ANTENNACUMAREARATIO" if in_layer => {
                if let Ok(v) = parts[1].trim_end_matches(';').parse() {
                    layer_antenna_ratio = v;
                    layer_antenna_method = AntennaMethod::AggregateArea;
                }
            }
            "ANTENNASIDEAREARATIO" if in_layer => {
                if let Ok(v) = parts[1].trim_end_matches(';').parse() {
                    layer_antenna_ratio = v;
                    layer_antenna_method = AntennaMethod::SideArea;
                }
            }
            "ANTENNACUMSIDEAREARATIO" if in_layer => {
                if let Ok(v) = parts[1].trim_end_matches(';').parse() {
                    layer_antenna_ratio = v;
                    layer_antenna_method = AntennaMethod::AggregateSideArea;
                }
            }
            "END" => {
                if parts.len() > 1 && parts[1] == layer_name && in_layer {
                    if layer_type == "ROUTING" {
                        let number = design.layers.len() as u8;
                        design.layers.push(Layer {
                            name: layer_name.clone(),
                            number,
                            direction: layer_dir,
                            width: layer_width,
                            pitch_x: layer_pitch_x,
                            pitch_y: layer_pitch_y,
                            offset: layer_offset,
                            spacing: SpacingTable::uniform(layer_spacing.max(layer_width)),
                            thickness: layer_width,
                            antenna_ratio: layer_antenna_ratio,
                            antenna_method: layer_antenna_method,
                        });
                    }
                    in_layer = false;
                } else if parts.len() > 1 && Some(parts[1]) == current_pin.as_ref().map(|p| p.name.as_str()) {
                    if let (Some(m), Some(p)) = (current_macro.as_mut(), current_pin.take()) {
                        m.pins.push(p);
                    }
                    in_obs = false;
                } else if parts.len() > 1
                    && Some(parts[1]) == current_macro.as_ref().map(|m| m.name.as_str())
                {
                    if let Some(m) = current_macro.take() {
                        design.add_macro(m);
                    }
                }
            }
            "MACRO" => {
                current_macro = Some(GateMacro {
                    name: parts[1].to_string(),
                    ..Default::default()
                });
            }
            "PIN" => {
                current_pin = Some(MacroPin {
                    name: parts[1].to_string(),
                    direction: PinDirection::Other,
                    taps: Vec::new(),
                });
            }
            "DIRECTION" if current_pin.is_some() => {
                if let Some(p) = current_pin.as_mut() {
                    p.direction = match parts[1].trim_end_matches(';') {
                        "INPUT" => PinDirection::Input,
                        "OUTPUT" => PinDirection::Output,
                        _ => PinDirection::Other,
                    };
                }
            }
            "OBS" => in_obs = true,
            "RECT" => {
                if let (Ok(x1), Ok(y1), Ok(x2), Ok(y2)) = (
                    parts[1].parse::<f64>(),
                    parts[2].parse::<f64>(),
                    parts[3].parse::<f64>(),
                    parts[4].trim_end_matches(';').parse::<f64>(),
                ) {
                    let layer = find_or_stub_layer(design, &layer_name);
                    let rect = Rect::new(Point::new(x1, y1), Point::new(x2, y2));
                    if in_obs {
                        if let Some(m) = current_macro.as_mut() {
                            m.obstructions.push(TapRect { layer, rect });
                        }
                    } else if let Some(p) = current_pin.as_mut() {
                        p.taps.push(TapRect { layer, rect });
                    }
                }
            }
            "SIZE" => {
                if let Some(m) = current_macro.as_mut() {
                    m.width = parts[1].parse().unwrap_or(0.0);
                    m.height = parts[3].trim_end_matches(';').parse().unwrap_or(0.0);
                }
            }
            _ => {}
        }
    }

    if design.layers.is_empty() {
        log::warn!("no ROUTING layers found in technology file, using default 6-layer stack");
        for (i, name) in ["M1", "M2", "M3", "M4", "M5", "M6"].iter().enumerate() {
            design.layers.push(Layer {
                name: name.to_string(),
                number: i as u8,
                direction: if i % 2 == 0 {
                    Direction::Vertical
                } else {
                    Direction::Horizontal
                },
                width: 1.0,
                pitch_x: 1.0,
                pitch_y: 1.0,
                offset: 0.0,
                spacing: SpacingTable::uniform(1.0),
                thickness: 1.0,
                antenna_ratio: 400.0,
                antenna_method: AntennaMethod::Area,
            });
        }
    }

    Ok(())
}

/// LEF layer lines referenced inside a MACRO/PIN/RECT block are named but not
/// re-declared there; resolve by name against already-parsed routing layers,
/// falling back to layer 0 for a name we have not seen yet (e.g. a cut layer).
fn find_or_stub_layer(design: &Design, name: &str) -> LayerId {
    design
        .layers
        .iter()
        .position(|l| l.name == name)
        .map(LayerId::new)
        .unwrap_or(LayerId::new(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse_str(contents: &str) -> Design {
        let path = std::env::temp_dir().join(format!(
            "eda-common-lef-test-{}-{:?}.lef",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        drop(file);
        let mut design = Design::new();
        parse(&mut design, path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        design
    }

    #[test]
    fn reads_area_ratio_from_antennaarearatio() {
        let design = parse_str(
            "LAYER M1\nTYPE ROUTING ;\nDIRECTION HORIZONTAL ;\nPITCH 1.0 ;\nWIDTH 0.1 ;\n\
             ANTENNAAREARATIO 250.0 ;\nEND M1\n",
        );
        let layer = &design.layers[0];
        assert_eq!(layer.antenna_method, AntennaMethod::Area);
        assert_eq!(layer.antenna_ratio, 250.0);
    }

    #[test]
    fn reads_cumulative_side_area_ratio() {
        let design = parse_str(
            "LAYER M1\nTYPE ROUTING ;\nDIRECTION HORIZONTAL ;\nPITCH 1.0 ;\nWIDTH 0.1 ;\n\
             ANTENNACUMSIDEAREARATIO 300.0 ;\nEND M1\n",
        );
        let layer = &design.layers[0];
        assert_eq!(layer.antenna_method, AntennaMethod::AggregateSideArea);
        assert_eq!(layer.antenna_ratio, 300.0);
    }

    #[test]
    fn layer_with_no_antenna_keyword_gets_no_antenna_rule() {
        let design = parse_str("LAYER M1\nTYPE ROUTING ;\nDIRECTION HORIZONTAL ;\nPITCH 1.0 ;\nWIDTH 0.1 ;\nEND M1\n");
        assert_eq!(design.layers[0].antenna_method, AntennaMethod::None);
    }
}
