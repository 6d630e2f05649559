//! Loading of Yosys JSON netlists.
//!
//! Reads the output of `write_json` into a [`Design`]. Module, cell and
//! net attributes are carried over with integer values normalized to
//! decimal text. Constant bits (`"0"`, `"1"`, `"x"`, `"z"`) are connected
//! to fresh nets with no driver.

use std::path::Path;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{CellDef, Design, Direction, ModuleDef, NetId};

/// An error loading a Yosys netlist.
#[derive(thiserror::Error, Debug)]
pub enum YosysError {
    /// The JSON is malformed or does not describe a netlist.
    #[error("invalid yosys netlist: {0}")]
    Json(#[from] serde_json::Error),
    /// The netlist file could not be read.
    #[error("could not read yosys netlist: {0}")]
    Io(#[from] std::io::Error),
    /// A port direction other than `input`, `output` or `inout`.
    #[error("unknown direction `{direction}` on port `{port}` of `{module}`")]
    Direction {
        module: ArcStr,
        port: ArcStr,
        direction: ArcStr,
    },
}

#[derive(Serialize, Deserialize, Debug)]
struct Netlist {
    #[serde(default)]
    creator: Option<String>,
    modules: IndexMap<ArcStr, NetlistModule>,
}

#[derive(Serialize, Deserialize, Debug)]
struct NetlistModule {
    #[serde(default)]
    attributes: IndexMap<ArcStr, serde_json::Value>,
    #[serde(default)]
    ports: IndexMap<ArcStr, NetlistPort>,
    #[serde(default)]
    cells: IndexMap<ArcStr, NetlistCell>,
    #[serde(default)]
    netnames: IndexMap<ArcStr, NetlistNetname>,
}

#[derive(Serialize, Deserialize, Debug)]
struct NetlistPort {
    direction: ArcStr,
    bits: Vec<Bit>,
}

#[derive(Serialize, Deserialize, Debug)]
struct NetlistCell {
    #[serde(rename = "type")]
    cell_type: ArcStr,
    #[serde(default)]
    attributes: IndexMap<ArcStr, serde_json::Value>,
    #[serde(default)]
    port_directions: IndexMap<ArcStr, ArcStr>,
    #[serde(default)]
    connections: IndexMap<ArcStr, Vec<Bit>>,
}

#[derive(Serialize, Deserialize, Debug)]
struct NetlistNetname {
    bits: Vec<Bit>,
    #[serde(default)]
    attributes: IndexMap<ArcStr, serde_json::Value>,
}

/// A bit of a port or connection.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
enum Bit {
    Net(u64),
    Constant(ArcStr),
}

/// Parses a Yosys JSON netlist.
pub fn from_str(json: &str) -> Result<Design, YosysError> {
    let netlist: Netlist = serde_json::from_str(json)?;
    tracing::debug!(creator = ?netlist.creator, modules = netlist.modules.len(), "loaded yosys netlist");
    convert(netlist)
}

/// Reads and parses a Yosys JSON netlist file.
pub fn from_file(path: impl AsRef<Path>) -> Result<Design, YosysError> {
    let json = std::fs::read_to_string(path)?;
    from_str(&json)
}

fn convert(netlist: Netlist) -> Result<Design, YosysError> {
    // Port directions of every module, for cells without `port_directions`.
    let mut directions: IndexMap<(ArcStr, ArcStr), Direction> = IndexMap::new();
    for (name, module) in netlist.modules.iter() {
        for (port, info) in module.ports.iter() {
            let direction = parse_direction(name, port, &info.direction)?;
            directions.insert((name.clone(), port.clone()), direction);
        }
    }

    let mut design = Design::new();
    for (name, module) in netlist.modules {
        design.add_module(convert_module(name, module, &directions)?);
    }
    Ok(design)
}

fn convert_module(
    name: ArcStr,
    module: NetlistModule,
    directions: &IndexMap<(ArcStr, ArcStr), Direction>,
) -> Result<ModuleDef, YosysError> {
    let mut def = ModuleDef::new(name.clone());
    for (key, value) in module.attributes.iter() {
        def.set_attr(key.clone(), attr_value(value));
    }

    // Reserve every numbered bit before constants get fresh nets.
    let numbered = module
        .ports
        .values()
        .flat_map(|p| p.bits.iter())
        .chain(module.netnames.values().flat_map(|n| n.bits.iter()))
        .chain(module.cells.values().flat_map(|c| c.connections.values().flatten()))
        .filter_map(|bit| match bit {
            Bit::Net(id) => Some(NetId(*id)),
            Bit::Constant(_) => None,
        })
        .collect::<Vec<_>>();
    def.reserve(&numbered);

    for (port, info) in module.ports.iter() {
        let direction = directions[&(name.clone(), port.clone())];
        let bits = resolve_bits(&mut def, &info.bits);
        def.add_port_with_bits(port.clone(), direction, bits);
    }

    for (net, info) in module.netnames.iter() {
        let bits = resolve_bits(&mut def, &info.bits);
        def.add_netname(net.clone(), bits);
        for (key, value) in info.attributes.iter() {
            def.set_netname_attr(net, key.clone(), attr_value(value));
        }
    }

    for (cell_name, cell) in module.cells.iter() {
        let mut inst = CellDef::new(cell_name.clone(), cell.cell_type.clone());
        for (key, value) in cell.attributes.iter() {
            inst.set_attr(key.clone(), attr_value(value));
        }
        for (port, bits) in cell.connections.iter() {
            let direction = match cell.port_directions.get(port) {
                Some(direction) => parse_direction(cell_name, port, direction)?,
                None => match directions.get(&(cell.cell_type.clone(), port.clone())) {
                    Some(direction) => *direction,
                    None => {
                        tracing::warn!(
                            module = name.as_str(),
                            cell = cell_name.as_str(),
                            port = port.as_str(),
                            "skipping connection with unknown direction"
                        );
                        continue;
                    }
                },
            };
            let bits = resolve_bits(&mut def, bits);
            inst.connect(port.clone(), direction, bits);
        }
        def.add_cell(inst);
    }

    Ok(def)
}

fn resolve_bits(def: &mut ModuleDef, bits: &[Bit]) -> Vec<NetId> {
    bits.iter()
        .map(|bit| match bit {
            Bit::Net(id) => NetId(*id),
            Bit::Constant(_) => def.alloc(),
        })
        .collect()
}

fn parse_direction(module: &str, port: &str, direction: &str) -> Result<Direction, YosysError> {
    match direction {
        "input" => Ok(Direction::Input),
        "output" => Ok(Direction::Output),
        "inout" => Ok(Direction::InOut),
        _ => Err(YosysError::Direction {
            module: module.into(),
            port: port.into(),
            direction: direction.into(),
        }),
    }
}

/// Converts an attribute value to text.
///
/// Yosys writes integer attributes as 32-character binary strings.
/// These are converted to decimal.
fn attr_value(value: &serde_json::Value) -> ArcStr {
    match value {
        serde_json::Value::String(s) => {
            if s.len() == 32 && s.bytes().all(|b| b == b'0' || b == b'1') {
                if let Ok(v) = u32::from_str_radix(s, 2) {
                    return arcstr::format!("{}", v);
                }
            }
            ArcStr::from(s.trim_end())
        }
        other => arcstr::format!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{Endpoint, Entity, NetlistView};
    use test_log::test;

    const BUFFER: &str = r#"{
      "creator": "Yosys 0.9",
      "modules": {
        "BUF": {
          "attributes": {
            "blackbox": "00000000000000000000000000000001",
            "CLASS": "lut",
            "src": "buf.sim.v:2"
          },
          "ports": {
            "A": { "direction": "input", "bits": [ 2 ] },
            "Y": { "direction": "output", "bits": [ 3 ] }
          },
          "cells": {},
          "netnames": {
            "A": { "hide_name": 0, "bits": [ 2 ], "attributes": { "CLOCK": "00000000000000000000000000000000" } },
            "Y": { "hide_name": 0, "bits": [ 3 ], "attributes": { "DELAY_CONST_A": "30e-12" } }
          }
        },
        "TOP": {
          "attributes": {},
          "ports": {
            "I": { "direction": "input", "bits": [ 2 ] },
            "O": { "direction": "output", "bits": [ 3 ] }
          },
          "cells": {
            "b": {
              "hide_name": 0,
              "type": "BUF",
              "attributes": { "FASM_PREFIX": "B0" },
              "connections": { "A": [ 2 ], "Y": [ 3 ] }
            },
            "tie": {
              "hide_name": 0,
              "type": "BUF",
              "port_directions": { "A": "input", "Y": "output" },
              "connections": { "A": [ "1" ], "Y": [ 4 ] }
            }
          },
          "netnames": {
            "I": { "hide_name": 0, "bits": [ 2 ], "attributes": {} },
            "O": { "hide_name": 0, "bits": [ 3 ], "attributes": {} },
            "dangling": { "hide_name": 0, "bits": [ 4 ], "attributes": { "keep": 1 } }
          }
        }
      }
    }"#;

    #[test]
    fn loads_modules_and_attributes() {
        let design = from_str(BUFFER).unwrap();
        assert_eq!(design.modules(), vec!["BUF", "TOP"]);
        let attrs = design.attributes_of("BUF", Entity::Module);
        assert_eq!(attrs["blackbox"], "1");
        assert_eq!(attrs["CLASS"], "lut");
        assert_eq!(design.attributes_of("BUF", Entity::Port("A"))["CLOCK"], "0");
        assert_eq!(
            design.attributes_of("BUF", Entity::Port("Y"))["DELAY_CONST_A"],
            "30e-12"
        );
        assert_eq!(design.attributes_of("TOP", Entity::Cell("b"))["FASM_PREFIX"], "B0");
        assert_eq!(design.attributes_of("TOP", Entity::Net(NetId(4)))["keep"], "1");
    }

    #[test]
    fn cell_directions_come_from_definitions() {
        let design = from_str(BUFFER).unwrap();
        assert_eq!(design.sinks_of("TOP", NetId(2)), vec![Endpoint::cell("b", "A")]);
        assert_eq!(
            design.drivers_of("TOP", NetId(3)),
            vec![Endpoint::cell("b", "Y")]
        );
    }

    #[test]
    fn constants_are_undriven() {
        let design = from_str(BUFFER).unwrap();
        let net = design.net_for("TOP", "tie", "A").unwrap();
        assert!(net.0 > 4);
        assert!(design.drivers_of("TOP", net).is_empty());
    }

    #[test]
    fn bad_direction() {
        let json = r#"{"modules": {"M": {"ports": {"P": {"direction": "sideways", "bits": [2]}}}}}"#;
        assert!(matches!(from_str(json), Err(YosysError::Direction { .. })));
    }

    #[test]
    fn malformed_json() {
        assert!(matches!(from_str("{"), Err(YosysError::Json(_))));
    }
}
