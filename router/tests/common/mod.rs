//! Shared design fixtures for the end-to-end routing tests.

use eda_common::db::design::{
    DPoint, GateInstance, GateMacro, MacroPin, Net, Node, Orientation, PinDirection, TapRect,
};
use eda_common::db::indices::{LayerId, NetId, PinId};
use eda_common::db::tech::{AntennaMethod, Direction as LayerDirection, Layer, SpacingTable};
use eda_common::db::Design;
use eda_common::geom::{GridCoord, Point, Rect};

/// A single horizontal metal layer, 1 um pitch, over a `width` x `height`
/// die area starting at the origin. Grid coordinates map 1:1 onto physical
/// coordinates, so callers can place nodes directly in grid space.
pub fn one_layer_tech(width: f64, height: f64) -> Design {
    let mut design = Design::new();
    design.layers.push(Layer {
        name: "M1".into(),
        number: 0,
        direction: LayerDirection::Horizontal,
        width: 0.3,
        pitch_x: 1.0,
        pitch_y: 1.0,
        offset: 0.0,
        spacing: SpacingTable::uniform(0.1),
        thickness: 0.1,
        antenna_ratio: 400.0,
        antenna_method: AntennaMethod::None,
    });
    design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(width, height));
    design
}

/// Two metal layers (M1 horizontal, M2 vertical), 1 um pitch, over a
/// `width` x `height` die area starting at the origin.
pub fn two_layer_tech(width: f64, height: f64) -> Design {
    let mut design = Design::new();
    for (name, dir) in [
        ("M1", LayerDirection::Horizontal),
        ("M2", LayerDirection::Vertical),
    ] {
        design.layers.push(Layer {
            name: name.into(),
            number: design.layers.len() as u8,
            direction: dir,
            width: 0.3,
            pitch_x: 1.0,
            pitch_y: 1.0,
            offset: 0.0,
            spacing: SpacingTable::uniform(0.1),
            thickness: 0.1,
            antenna_ratio: 400.0,
            antenna_method: AntennaMethod::None,
        });
    }
    design.die_area = Rect::new(Point::new(0.0, 0.0), Point::new(width, height));
    design
}

pub fn add_net(design: &mut Design, number: u32, name: &str) -> NetId {
    design.add_net(Net::new(number, name))
}

/// Adds a one-pin instance whose placed tap is centered at `center`, on
/// layer 0, bound to `net_id`. Mirrors `def::parser::bind_pin`'s tap
/// centering and node construction.
pub fn add_pin_instance(design: &mut Design, center: Point<f64>, net_id: NetId) {
    let macro_id = design.add_macro(GateMacro {
        name: format!("CELL{}", design.macros.len()),
        width: 1.0,
        height: 1.0,
        pins: vec![MacroPin {
            name: "A".into(),
            direction: PinDirection::Other,
            taps: vec![TapRect {
                layer: LayerId::new(0),
                rect: Rect::new(Point::new(0.0, 0.0), Point::new(0.2, 0.2)),
            }],
        }],
        obstructions: Vec::new(),
    });
    let tap_rect = Rect::new(
        Point::new(center.x - 0.1, center.y - 0.1),
        Point::new(center.x + 0.1, center.y + 0.1),
    );
    let inst_id = design.add_instance(GateInstance {
        name: format!("U{}", design.instances.len()),
        macro_id,
        origin: Point::new(center.x - 0.5, center.y - 0.5),
        orientation: Orientation::N,
        pin_nets: vec![None],
        pin_nodes: vec![None],
        pin_taps: vec![vec![TapRect {
            layer: LayerId::new(0),
            rect: tap_rect,
        }]],
        obstructions: Vec::new(),
    });

    let node = Node {
        net: Some(net_id),
        index_in_net: design.net(net_id).nodes.len(),
        taps: vec![DPoint {
            grid: GridCoord::new(0, 0, 0),
            phys: center,
        }],
        halo: Vec::new(),
        reachable_count: 1,
        branch: center,
        owner: Some((inst_id, PinId::new(0))),
    };
    let node_id = design.add_node(node);
    design.net_mut(net_id).nodes.push(node_id);
    design.instances[inst_id.index()].pin_nets[0] = Some(net_id);
    design.instances[inst_id.index()].pin_nodes[0] = Some(node_id);
}

/// Adds a bare node at grid coordinate `(x, y, z)` directly, with no owning
/// instance. For tests that drive `orchestrator::run` against a hand-built
/// `GridModel` and don't need C2's obstruction/placement machinery.
pub fn add_bare_node(design: &mut Design, net_id: NetId, x: u32, y: u32, z: u8) {
    let phys = Point::new(x as f64, y as f64);
    let node = Node {
        net: Some(net_id),
        index_in_net: design.net(net_id).nodes.len(),
        taps: vec![DPoint {
            grid: GridCoord::new(x, y, z),
            phys,
        }],
        halo: Vec::new(),
        reachable_count: 1,
        branch: phys,
        owner: None,
    };
    let node_id = design.add_node(node);
    design.net_mut(net_id).nodes.push(node_id);
}
