//! Expansion of modules with alternative modes.
//!
//! Each mode is evaluated against its own re-elaborated snapshot of the
//! netlist. A mode whose snapshot has no child instances contributes only
//! boundary wiring. Any other mode gets a full subtree, connected to the
//! host port by port.
//!
//! Modes share nothing mutable, so they may be built on separate threads.
//! Results are always returned in declaration order.

use arcstr::ArcStr;
use tracing::{span, Level, Span};

use crate::builder::build_node;
use crate::config::BuildOptions;
use crate::error::{Error, Errors};
use crate::grouping::Children;
use crate::interconnect::{resolve, EdgeSet, InterconnectEdge, Pin};
use crate::metadata::Metadata;
use crate::netlist::{Attributes, Direction, Entity, NetlistView};
use crate::node::Mode;
use crate::topology::classify;

/// Builds every mode of `module`, in the order given.
pub fn expand_modes<V: NetlistView + Sync>(
    view: &V,
    module: &str,
    modes: &[ArcStr],
    options: &BuildOptions,
) -> Result<Vec<Mode>, Errors> {
    let _guard = span!(Level::INFO, "expanding modes", module, count = modes.len()).entered();

    let results = if options.parallel_modes && modes.len() > 1 {
        let span = Span::current();
        std::thread::scope(|s| {
            let handles: Vec<_> = modes
                .iter()
                .map(|mode| {
                    let span = span.clone();
                    s.spawn(move || span.in_scope(|| build_mode(view, module, mode, options)))
                })
                .collect();
            handles
                .into_iter()
                .zip(modes)
                .map(|(handle, mode)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(Error::ModeBuildPanicked {
                            module: module.into(),
                            mode: mode.clone(),
                        }
                        .into())
                    })
                })
                .collect::<Vec<_>>()
        })
    } else {
        modes
            .iter()
            .map(|mode| build_mode(view, module, mode, options))
            .collect()
    };

    let mut errors = Errors::new();
    let built: Vec<Mode> = results
        .into_iter()
        .filter_map(|result| errors.check(result))
        .collect();
    errors.into_result(built)
}

fn build_mode<V: NetlistView + Sync>(
    view: &V,
    module: &str,
    mode: &ArcStr,
    options: &BuildOptions,
) -> Result<Mode, Errors> {
    let _guard = span!(Level::INFO, "building mode", mode = mode.as_str()).entered();
    let snapshot = view.elaborate_with_mode(module, mode)?;

    if snapshot.cells_of(module).is_empty() {
        tracing::debug!("mode has no children");
        let mut errors = Errors::new();
        let metadata = Metadata::from_attributes(
            &snapshot.attributes_of(module, Entity::Module),
            Some(mode.as_str()),
        );
        if !metadata.is_empty() {
            errors.add(Error::ModeMetadataWithoutChildren {
                module: module.into(),
                mode: mode.clone(),
                keys: metadata.keys().cloned().collect(),
            });
        }
        let interconnect = errors.check(resolve(&snapshot, module, &Children::default()));
        return match interconnect {
            Some(interconnect) => {
                let directs = classify(module, &interconnect, &[])?.directs;
                errors.into_result(Mode {
                    name: mode.clone(),
                    node: None,
                    interconnect,
                    directs,
                })
            }
            None => Err(errors),
        };
    }

    let node = build_node(&snapshot, module, Some(mode.as_str()), options)?;
    let interconnect = host_interconnect(view, module, mode);
    let directs = classify(module, &interconnect, &[])?.directs;
    Ok(Mode {
        name: mode.clone(),
        node: Some(Box::new(node)),
        interconnect,
        directs,
    })
}

/// Connects each port of the host to the same-named port of a mode.
fn host_interconnect<V: NetlistView>(view: &V, module: &str, mode: &ArcStr) -> EdgeSet {
    view.ports_of(module)
        .into_iter()
        .map(|port| match port.direction {
            Direction::Input => InterconnectEdge::new(
                Pin::boundary(port.name.clone()),
                Pin::on(mode.clone(), port.name),
                Attributes::new(),
            ),
            _ => InterconnectEdge::new(
                Pin::on(mode.clone(), port.name.clone()),
                Pin::boundary(port.name),
                Attributes::new(),
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{CellDef, Design, ModuleDef};
    use crate::node::PbNode;
    use test_log::test;

    fn lut() -> ModuleDef {
        let mut lut = ModuleDef::new("LUT1");
        lut.set_attr("blackbox", "1");
        lut.set_attr("CLASS", "lut");
        lut.add_port("in", Direction::Input, 1);
        lut.add_port("out", Direction::Output, 1);
        lut
    }

    /// A host with a wire mode and a LUT mode.
    fn design() -> Design {
        let mut host = ModuleDef::new("HOST");
        host.set_attr("MODES", "WIRE;LOGIC");
        host.add_port("I", Direction::Input, 1);
        host.add_port("O", Direction::Output, 1);

        let mut wire = ModuleDef::new("HOST");
        let i = wire.add_port("I", Direction::Input, 1);
        wire.add_port_with_bits("O", Direction::Output, i);
        let mut wire_design = Design::new();
        wire_design.add_module(wire);

        let mut logic = ModuleDef::new("HOST");
        logic.set_attr("FASM_FEATURES_LOGIC", "HOST.LOGIC");
        let i = logic.add_port("I", Direction::Input, 1);
        let o = logic.add_port("O", Direction::Output, 1);
        let mut cell = CellDef::new("lut", "LUT1");
        cell.connect("in", Direction::Input, i);
        cell.connect("out", Direction::Output, o);
        logic.add_cell(cell);
        let mut logic_design = Design::new();
        logic_design.add_module(logic);
        logic_design.add_module(lut());

        let mut design = Design::new();
        design.add_module(host);
        design.add_module(lut());
        design.add_mode_variant("HOST", "WIRE", wire_design);
        design.add_mode_variant("HOST", "LOGIC", logic_design);
        design
    }

    fn modes() -> Vec<ArcStr> {
        vec!["WIRE".into(), "LOGIC".into()]
    }

    #[test]
    fn wire_mode_is_boundary_only() {
        let modes = expand_modes(&design(), "HOST", &modes(), &BuildOptions::default()).unwrap();
        let wire = &modes[0];
        assert_eq!(wire.name, "WIRE");
        assert!(wire.node.is_none());
        let edges: Vec<_> = wire
            .interconnect
            .edges()
            .map(|(d, s)| (d.clone(), s.pin.clone()))
            .collect();
        assert_eq!(edges, vec![(Pin::boundary("I"), Pin::boundary("O"))]);
        assert_eq!(wire.directs.len(), 1);
    }

    #[test]
    fn logic_mode_has_subtree() {
        let modes = expand_modes(&design(), "HOST", &modes(), &BuildOptions::default()).unwrap();
        let logic = &modes[1];
        let node = logic.node.as_deref().unwrap();
        assert_eq!(node.name(), "LOGIC");
        assert_eq!(node.metadata().get("fasm_features").map(|v| v.as_str()), Some("HOST.LOGIC"));
        let PbNode::Container(container) = node else {
            panic!("expected a container");
        };
        assert_eq!(container.children[0].cell_type, "LUT1");
        assert_eq!(container.directs.len(), 2);

        let edges: Vec<_> = logic
            .interconnect
            .edges()
            .map(|(d, s)| (d.to_string(), s.pin.to_string()))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("I".to_string(), "LOGIC.I".to_string()),
                ("LOGIC.O".to_string(), "O".to_string())
            ]
        );
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let design = design();
        let parallel = expand_modes(&design, "HOST", &modes(), &BuildOptions::default()).unwrap();
        let sequential =
            expand_modes(&design, "HOST", &modes(), &BuildOptions::default().sequential()).unwrap();
        assert_eq!(parallel, sequential);
        assert_eq!(
            parallel.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["WIRE", "LOGIC"]
        );
    }

    #[test]
    fn unknown_mode_fails_elaboration() {
        let errors = expand_modes(
            &design(),
            "HOST",
            &["WIRE".into(), "MISSING".into()],
            &BuildOptions::default(),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(Error::Elaboration { mode, .. }) if mode == "MISSING"
        ));
    }
}
