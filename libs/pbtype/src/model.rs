//! Primitive models of leaf modules.
//!
//! A model lists the ports of a primitive with the clocks they are
//! sequentially associated with and the outputs they reach combinationally.
//! Modules whose class has a built-in model get none.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use tracing::{span, Level};

use crate::attrs::ModuleAttrs;
use crate::builder::{parse_ports, ParsedPort};
use crate::error::{Error, Errors};
use crate::netlist::{Direction, Entity, NetId, NetlistView, PortInfo};
use crate::node::PortKind;

/// The cell type of a D flip-flop in the netlist.
const DFF_CELL: &str = "$dff";

/// A port of a primitive model.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelPort {
    /// The port name.
    pub name: ArcStr,
    /// Whether the port is a clock.
    pub is_clock: bool,
    /// Clocks the port is sequentially associated with.
    pub clocks: Vec<ArcStr>,
    /// Outputs combinationally reachable from the port.
    pub combinational_sinks: Vec<ArcStr>,
}

/// A primitive model.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// The model name.
    pub name: ArcStr,
    /// Input ports, clocks included, in declaration order.
    pub inputs: Vec<ModelPort>,
    /// Output ports, in declaration order.
    pub outputs: Vec<ModelPort>,
    /// Warnings recorded while deriving the model.
    #[serde(skip)]
    pub warnings: Vec<Error>,
}

/// Derives the primitive model of `module`.
///
/// Returns [`None`] if the module's class has a built-in model.
pub fn derive_model<V: NetlistView>(view: &V, module: &str) -> Result<Option<Model>, Errors> {
    let _guard = span!(Level::INFO, "deriving model", module).entered();

    if !view.has_module(module) {
        return Err(Error::MissingModule {
            module: module.into(),
        }
        .into());
    }
    let mut issues = Errors::new();
    let raw_attrs = view.attributes_of(module, Entity::Module);
    let attrs = match ModuleAttrs::parse(module, &raw_attrs, &mut issues) {
        Ok(attrs) => attrs,
        Err(e) => {
            issues.add(e);
            return Err(issues);
        }
    };
    if attrs.class.is_some_and(|class| class.has_builtin_model()) {
        return Ok(None);
    }

    let mut ports = parse_ports(view, module)?;
    // Declaration order within the model.
    let declared: Vec<ArcStr> = view.ports_of(module).into_iter().map(|p| p.name).collect();
    ports.sort_by_key(|port| declared.iter().position(|name| *name == port.info.name));

    let clocks: Vec<ArcStr> = ports
        .iter()
        .filter(|port| port.kind == PortKind::Clock)
        .map(|port| port.info.name.clone())
        .collect();
    let flops = flip_flops(view, module);

    let mut model = Model {
        name: attrs.model_name.unwrap_or_else(|| module.into()),
        inputs: Vec::new(),
        outputs: Vec::new(),
        warnings: Vec::new(),
    };
    for port in ports.iter() {
        let is_clock = port.kind == PortKind::Clock;
        let is_output = port.info.direction == Direction::Output;

        let mut assoc = Vec::new();
        if !is_clock && port.attrs.no_seq != Some(true) {
            for clock in clocks.iter() {
                let signals = view.clock_associated_signals(module, clock);
                let associated = if is_output {
                    signals.contains(&port.info.name)
                } else {
                    view.related_outputs(module, &port.info.name)
                        .iter()
                        .any(|output| signals.contains(output))
                };
                if associated {
                    assoc.push(clock.clone());
                }
            }
        }

        let mut sinks = Vec::new();
        let comb = match port.attrs.no_comb {
            Some(no_comb) => !no_comb,
            None => !is_clock,
        };
        if !is_output && comb {
            for sink in view.combinational_sinks(module, &port.info.name) {
                if !is_registered(module, &flops, &ports, &port.info, &sink, &mut issues) {
                    sinks.push(sink);
                }
            }
        }

        let entry = ModelPort {
            name: port.info.name.clone(),
            is_clock,
            clocks: assoc,
            combinational_sinks: sinks,
        };
        if is_output {
            model.outputs.push(entry);
        } else {
            model.inputs.push(entry);
        }
    }

    model.warnings.extend(issues);
    Ok(Some(model))
}

struct FlipFlop {
    name: ArcStr,
    d: Vec<NetId>,
    q: Vec<NetId>,
}

fn flip_flops<V: NetlistView>(view: &V, module: &str) -> Vec<FlipFlop> {
    view.cells_of(module)
        .into_iter()
        .filter(|cell| cell.cell_type == DFF_CELL)
        .map(|cell| {
            let conns = view.cell_connections(module, &cell.name);
            let bits = |port: &str| {
                conns
                    .iter()
                    .find(|conn| conn.port == port)
                    .map(|conn| conn.bits.clone())
                    .unwrap_or_default()
            };
            FlipFlop {
                d: bits("D"),
                q: bits("Q"),
                name: cell.name,
            }
        })
        .collect()
}

/// Returns `true` if the path from `input` to `output` goes through a
/// flip-flop, i.e. some flip-flop reads exactly the input's bits and
/// drives exactly the output's bits.
///
/// A path registered by several flip-flops is recorded as a warning.
fn is_registered(
    module: &str,
    flops: &[FlipFlop],
    ports: &[ParsedPort],
    input: &PortInfo,
    output: &str,
    issues: &mut Errors,
) -> bool {
    let Some(output) = ports.iter().find(|port| port.info.name == output) else {
        return false;
    };
    let matches: Vec<ArcStr> = flops
        .iter()
        .filter(|ff| ff.d == input.bits && ff.q == output.info.bits)
        .map(|ff| ff.name.clone())
        .collect();
    if matches.len() > 1 {
        issues.add(Error::AmbiguousRegistration {
            module: module.into(),
            input: input.name.clone(),
            output: output.info.name.clone(),
            flops: matches.clone(),
        });
    }
    !matches.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{CellDef, Design, ModuleDef};
    use test_log::test;

    fn names(ports: &[ModelPort]) -> Vec<&str> {
        ports.iter().map(|p| p.name.as_str()).collect()
    }

    /// A primitive with a registered path D -> Q and a combinational path
    /// A -> Y.
    fn prim() -> Design {
        let mut m = ModuleDef::new("PRIM");
        m.set_attr("MODEL_NAME", "prim_model");
        let d = m.add_port("D", Direction::Input, 1);
        m.add_port("A", Direction::Input, 1);
        let clk = m.add_port("CLK", Direction::Input, 1);
        let q = m.add_port("Q", Direction::Output, 1);
        m.add_port("Y", Direction::Output, 1);
        let mut ff = CellDef::new("$auto$dff.cc:1", DFF_CELL);
        ff.connect("D", Direction::Input, d);
        ff.connect("CLK", Direction::Input, clk);
        ff.connect("Q", Direction::Output, q);
        m.add_cell(ff);

        m.add_combinational_sink("D", "Q");
        m.add_combinational_sink("A", "Y");
        m.add_clock_associated("CLK", "Q");
        m.add_clock_associated("CLK", "D");
        m.add_related_output("D", "Q");
        m.add_related_output("A", "Y");

        let mut design = Design::new();
        design.add_module(m);
        design
    }

    #[test]
    fn model_ports() {
        let model = derive_model(&prim(), "PRIM").unwrap().unwrap();
        assert_eq!(model.name, "prim_model");
        assert_eq!(names(&model.inputs), vec!["D", "A", "CLK"]);
        assert_eq!(names(&model.outputs), vec!["Q", "Y"]);

        let d = &model.inputs[0];
        assert!(!d.is_clock);
        assert_eq!(d.clocks, vec!["CLK"]);
        assert!(d.combinational_sinks.is_empty());

        let a = &model.inputs[1];
        assert!(a.clocks.is_empty());
        assert_eq!(a.combinational_sinks, vec!["Y"]);

        let clk = &model.inputs[2];
        assert!(clk.is_clock);
        assert!(clk.clocks.is_empty());
        assert!(clk.combinational_sinks.is_empty());

        assert_eq!(model.outputs[0].clocks, vec!["CLK"]);
        assert!(model.outputs[1].clocks.is_empty());
    }

    #[test]
    fn overrides() {
        let mut design = prim();
        let m = design.module_mut("PRIM").unwrap();
        m.set_port_attr("Q", "NO_SEQ", "1");
        m.set_port_attr("A", "NO_COMB", "1");
        m.set_port_attr("CLK", "NO_COMB", "0");
        m.add_combinational_sink("CLK", "Y");

        let model = derive_model(&design, "PRIM").unwrap().unwrap();
        assert!(model.outputs[0].clocks.is_empty());
        assert!(model.inputs[1].combinational_sinks.is_empty());
        assert_eq!(model.inputs[2].combinational_sinks, vec!["Y"]);
    }

    #[test]
    fn builtin_classes_have_no_model() {
        let mut design = prim();
        design.module_mut("PRIM").unwrap().set_attr("CLASS", "lut");
        assert_eq!(derive_model(&design, "PRIM").unwrap(), None);

        design.module_mut("PRIM").unwrap().set_attr("CLASS", "mux");
        assert!(derive_model(&design, "PRIM").unwrap().is_some());
    }

    #[test]
    fn ambiguous_registration_still_prunes() {
        let mut design = prim();
        let m = design.module_mut("PRIM").unwrap();
        let d = m.net_named("D").unwrap().to_vec();
        let q = m.net_named("Q").unwrap().to_vec();
        let mut ff = CellDef::new("$auto$dff.cc:2", DFF_CELL);
        ff.connect("D", Direction::Input, d);
        ff.connect("Q", Direction::Output, q);
        m.add_cell(ff);

        let model = derive_model(&design, "PRIM").unwrap().unwrap();
        assert!(model.inputs[0].combinational_sinks.is_empty());
        assert_eq!(
            model.warnings,
            vec![Error::AmbiguousRegistration {
                module: "PRIM".into(),
                input: "D".into(),
                output: "Q".into(),
                flops: vec!["$auto$dff.cc:1".into(), "$auto$dff.cc:2".into()],
            }]
        );
    }

    #[test]
    fn single_registration_records_nothing() {
        let model = derive_model(&prim(), "PRIM").unwrap().unwrap();
        assert!(model.warnings.is_empty());
    }
}
