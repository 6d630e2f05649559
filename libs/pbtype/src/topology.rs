//! Classification of resolved interconnect into direct connections and muxes.

use std::collections::HashSet;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{span, Level};

use crate::error::{Error, Errors};
use crate::interconnect::{EdgeSet, Pin};
use crate::netlist::Attributes;

/// The kind of a pack pattern.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    /// From a `pack` or `PACK` attribute.
    Pack,
    /// From a `carry` attribute.
    Carry,
}

/// A pack pattern tag on a direct connection.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PackPattern {
    /// The pattern name.
    pub name: ArcStr,
    /// The pattern kind.
    pub kind: PatternKind,
}

/// Reads the pack patterns tagged on a connection.
pub fn pack_patterns(attrs: &Attributes) -> Vec<PackPattern> {
    let mut patterns = Vec::new();
    if let Some(pack) = attrs.get("pack").or_else(|| attrs.get("PACK")) {
        for name in pack.split(';').map(str::trim).filter(|name| !name.is_empty()) {
            patterns.push(PackPattern {
                name: name.into(),
                kind: PatternKind::Pack,
            });
        }
    }
    if let Some(carry) = attrs.get("carry").filter(|carry| !carry.is_empty()) {
        patterns.push(PackPattern {
            name: carry.clone(),
            kind: PatternKind::Carry,
        });
    }
    patterns
}

/// A point-to-point connection.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DirectConnection {
    /// The driving pin.
    pub driver: Pin,
    /// The driven pin.
    pub sink: Pin,
    /// Pack patterns tagged on the connection.
    pub pack_patterns: Vec<PackPattern>,
    /// All attributes of the connection.
    pub attrs: Attributes,
}

/// A routing instance folded into a multiplexed connection.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MuxGroup {
    /// The short name of the routing instance.
    pub name: ArcStr,
    /// Drivers of the mux, keyed by the mux input pin they drive.
    pub inputs: IndexMap<ArcStr, Pin>,
    /// The output pin of the routing instance.
    pub output: Pin,
    /// The single sink of the output.
    pub sink: Pin,
}

/// Interconnect split into direct connections and muxes.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Connections not involving a routing instance, in edge order.
    pub directs: Vec<DirectConnection>,
    /// One mux per routing instance, in the order given.
    pub muxes: Vec<MuxGroup>,
}

/// Splits `edges` into direct connections and one mux per routing instance.
///
/// `routing` lists the short names of the routing instances.
pub fn classify(module: &str, edges: &EdgeSet, routing: &[ArcStr]) -> Result<Topology, Errors> {
    let _guard = span!(Level::INFO, "classifying interconnect", module).entered();
    let is_routing = |pin: &Pin| {
        pin.owner
            .as_ref()
            .is_some_and(|owner| routing.contains(owner))
    };

    let mut errors = Errors::new();
    let mut reported: HashSet<(Pin, Pin)> = HashSet::new();
    let mut muxes = Vec::with_capacity(routing.len());

    for mux in routing {
        let outputs: Vec<(&Pin, &Pin)> = edges
            .edges()
            .filter(|(driver, _)| driver.is_on(mux))
            .map(|(driver, sink)| (driver, &sink.pin))
            .collect();
        let (output, sink) = match outputs.as_slice() {
            [(output, sink)] => ((*output).clone(), (*sink).clone()),
            _ => {
                errors.add(Error::MultiOutputMux {
                    module: module.into(),
                    mux: mux.clone(),
                    outputs: outputs
                        .iter()
                        .map(|(output, sink)| arcstr::format!("{} -> {}", output, sink))
                        .collect(),
                });
                continue;
            }
        };

        let mut valid = true;
        if is_routing(&sink) {
            valid = false;
            reported.insert((output.clone(), sink.clone()));
            errors.add(Error::RoutingChain {
                module: module.into(),
                driver: output.clone(),
                sink: sink.clone(),
            });
        }

        let mut inputs: IndexMap<ArcStr, Pin> = IndexMap::new();
        for (driver, edge) in edges.edges().filter(|(_, edge)| edge.pin.is_on(mux)) {
            if let Some(first) = inputs.get(&edge.pin.name) {
                valid = false;
                errors.add(Error::DuplicateMuxInput {
                    module: module.into(),
                    mux: mux.clone(),
                    pin: edge.pin.name.clone(),
                    first: first.clone(),
                    second: driver.clone(),
                });
                continue;
            }
            inputs.insert(edge.pin.name.clone(), driver.clone());
        }

        for (label, driver) in inputs.iter() {
            if is_routing(driver) {
                valid = false;
                let sink = Pin::on(mux.clone(), label.clone());
                if reported.insert((driver.clone(), sink.clone())) {
                    errors.add(Error::RoutingChain {
                        module: module.into(),
                        driver: driver.clone(),
                        sink,
                    });
                }
            }
        }

        if valid {
            muxes.push(MuxGroup {
                name: mux.clone(),
                inputs,
                output,
                sink,
            });
        }
    }

    let directs = edges
        .edges()
        .filter(|(driver, sink)| !is_routing(driver) && !is_routing(&sink.pin))
        .map(|(driver, sink)| DirectConnection {
            driver: driver.clone(),
            sink: sink.pin.clone(),
            pack_patterns: pack_patterns(&sink.attrs),
            attrs: sink.attrs.clone(),
        })
        .collect();

    errors.into_result(Topology { directs, muxes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interconnect::InterconnectEdge;
    use test_log::test;

    fn edge(driver: Pin, sink: Pin) -> InterconnectEdge {
        InterconnectEdge::new(driver, sink, Attributes::new())
    }

    fn mux_edges() -> EdgeSet {
        EdgeSet::from_edges([
            edge(Pin::on("lut[0]", "out"), Pin::on("mux", "in[0]")),
            edge(Pin::on("lut[1]", "out"), Pin::on("mux", "in[1]")),
            edge(Pin::on("mux", "out"), Pin::boundary("O")),
            edge(Pin::boundary("I[0]"), Pin::on("lut[0]", "in")),
            edge(Pin::boundary("I[1]"), Pin::on("lut[1]", "in")),
        ])
    }

    #[test]
    fn routing_instance_becomes_mux() {
        let topology = classify("TOP", &mux_edges(), &["mux".into()]).unwrap();
        assert_eq!(topology.muxes.len(), 1);
        let mux = &topology.muxes[0];
        assert_eq!(mux.name, "mux");
        assert_eq!(
            mux.inputs.keys().collect::<Vec<_>>(),
            vec!["in[0]", "in[1]"]
        );
        assert_eq!(mux.inputs["in[1]"], Pin::on("lut[1]", "out"));
        assert_eq!(mux.output, Pin::on("mux", "out"));
        assert_eq!(mux.sink, Pin::boundary("O"));
        assert_eq!(topology.directs.len(), 2);
        assert!(topology
            .directs
            .iter()
            .all(|d| !d.driver.is_on("mux") && !d.sink.is_on("mux")));
    }

    #[test]
    fn mux_with_two_sinks_fails() {
        let mut edges: Vec<_> = mux_edges()
            .edges()
            .map(|(d, s)| edge(d.clone(), s.pin.clone()))
            .collect();
        edges.push(edge(Pin::on("mux", "out"), Pin::boundary("P")));
        let errors = classify("TOP", &EdgeSet::from_edges(edges), &["mux".into()]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(Error::MultiOutputMux { mux, outputs, .. }) if mux == "mux" && outputs.len() == 2
        ));
    }

    #[test]
    fn undriving_mux_fails() {
        let edges = EdgeSet::from_edges([edge(Pin::boundary("I"), Pin::on("mux", "in[0]"))]);
        let errors = classify("TOP", &edges, &["mux".into()]).unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(Error::MultiOutputMux { outputs, .. }) if outputs.is_empty()
        ));
    }

    #[test]
    fn chained_muxes_are_reported_once() {
        let edges = EdgeSet::from_edges([
            edge(Pin::boundary("I[0]"), Pin::on("m0", "in[0]")),
            edge(Pin::boundary("I[1]"), Pin::on("m0", "in[1]")),
            edge(Pin::on("m0", "out"), Pin::on("m1", "in[0]")),
            edge(Pin::boundary("I[2]"), Pin::on("m1", "in[1]")),
            edge(Pin::on("m1", "out"), Pin::boundary("O")),
        ]);
        let errors = classify("TOP", &edges, &["m0".into(), "m1".into()]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(Error::RoutingChain { driver, sink, .. })
                if driver == &Pin::on("m0", "out") && sink == &Pin::on("m1", "in[0]")
        ));
    }

    #[test]
    fn duplicate_mux_input() {
        let edges = EdgeSet::from_edges([
            edge(Pin::boundary("A"), Pin::on("mux", "in[0]")),
            edge(Pin::boundary("B"), Pin::on("mux", "in[0]")),
            edge(Pin::on("mux", "out"), Pin::boundary("O")),
        ]);
        let errors = classify("TOP", &edges, &["mux".into()]).unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(Error::DuplicateMuxInput { pin, first, second, .. })
                if pin == "in[0]" && first == &Pin::boundary("A") && second == &Pin::boundary("B")
        ));
    }

    #[test]
    fn pack_patterns_from_attributes() {
        let attrs: Attributes = [("PACK", "A;B"), ("carry", "ADDER")]
            .into_iter()
            .map(|(k, v)| (ArcStr::from(k), ArcStr::from(v)))
            .collect();
        let patterns = pack_patterns(&attrs);
        assert_eq!(
            patterns,
            vec![
                PackPattern {
                    name: "A".into(),
                    kind: PatternKind::Pack
                },
                PackPattern {
                    name: "B".into(),
                    kind: PatternKind::Pack
                },
                PackPattern {
                    name: "ADDER".into(),
                    kind: PatternKind::Carry
                },
            ]
        );
    }
}
