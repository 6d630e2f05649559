//! Orchestration of the compiler passes into a [`PbNode`] tree.

use std::collections::HashSet;

use arcstr::ArcStr;
use indexmap::IndexMap;
use tracing::{span, Level};

use crate::attrs::{is_clock_name, ModuleAttrs, PortAttrs};
use crate::config::BuildOptions;
use crate::error::{Error, Errors};
use crate::grouping::group_children;
use crate::interconnect::resolve;
use crate::metadata::{group_metadata, module_metadata, parse_attr_name, Metadata};
use crate::modes::expand_modes;
use crate::netlist::{Attributes, Direction, Entity, NetlistView, PortInfo};
use crate::node::{Container, Leaf, ModeHost, NodeHeader, PbNode, PbPort, PortKind};
use crate::timing::TimingAnnotation;
use crate::topology::{classify, PackPattern, PatternKind};

/// A port of a module with its parsed attributes.
pub(crate) struct ParsedPort {
    pub(crate) info: PortInfo,
    pub(crate) attrs: PortAttrs,
    pub(crate) kind: PortKind,
}

/// Parses and classifies the ports of `module`.
///
/// A port is a clock if the view derived it as one or its name looks like
/// one. Outputs are never clocks unless forced by `CLOCK`. The result holds
/// clocks first, then inputs, then outputs.
pub(crate) fn parse_ports<V: NetlistView>(
    view: &V,
    module: &str,
) -> Result<Vec<ParsedPort>, Errors> {
    let derived = view.clocks_of(module);
    let mut errors = Errors::new();
    let mut ports = Vec::new();

    for info in view.ports_of(module) {
        if info.direction == Direction::InOut {
            errors.add(Error::BidirectionalPort {
                module: module.into(),
                port: info.name.clone(),
            });
            continue;
        }
        let raw = view.attributes_of(module, Entity::Port(&info.name));
        let attrs = match PortAttrs::parse(module, &info.name, &raw) {
            Ok(attrs) => attrs,
            Err(e) => {
                errors.add(e);
                continue;
            }
        };

        let mut is_clock = info.direction == Direction::Input
            && (derived.contains(&info.name) || is_clock_name(&info.name));
        if let Some(clock) = attrs.clock {
            is_clock = clock;
        }
        let kind = if is_clock {
            PortKind::Clock
        } else if info.direction == Direction::Input {
            PortKind::Input
        } else {
            PortKind::Output
        };
        ports.push(ParsedPort { info, attrs, kind });
    }

    ports.sort_by_key(|port| port.kind);
    errors.into_result(ports)
}

/// Builds the pb_type of `module`.
///
/// Child types are referenced by name and are not built; see
/// [`build_library`] for building a whole hierarchy.
pub fn build_pb_type<V: NetlistView + Sync>(
    view: &V,
    module: &str,
    options: &BuildOptions,
) -> Result<PbNode, Errors> {
    build_node(view, module, None, options)
}

/// Builds `module` in `view`.
///
/// With `mode` set, the view is a snapshot elaborated in that mode and the
/// resulting node is named after it.
pub(crate) fn build_node<V: NetlistView + Sync>(
    view: &V,
    module: &str,
    mode: Option<&str>,
    options: &BuildOptions,
) -> Result<PbNode, Errors> {
    let _guard = span!(Level::INFO, "building pb_type", module, mode).entered();

    if !view.has_module(module) {
        return Err(Error::MissingModule {
            module: module.into(),
        }
        .into());
    }

    let mut errors = Errors::new();
    if options.require_uppercase_names && module != module.to_uppercase() {
        errors.add(Error::InvalidModuleName {
            module: module.into(),
        });
    }

    let raw_attrs = view.attributes_of(module, Entity::Module);
    let module_attrs = match ModuleAttrs::parse(module, &raw_attrs, &mut errors) {
        Ok(attrs) => attrs,
        Err(e) => {
            errors.add(e);
            return Err(errors);
        }
    };
    let ports = errors.check(parse_ports(view, module));
    let metadata = errors.check(module_metadata(view, module, mode));
    let (Some(ports), Some(metadata)) = (ports, metadata) else {
        return Err(errors);
    };

    let has_cells = !view.cells_of(module).is_empty();
    let header = NodeHeader {
        name: mode.map(ArcStr::from).unwrap_or_else(|| module.into()),
        module: module.into(),
        class: module_attrs.class,
        ports: ports.iter().map(pb_port).collect(),
        blif_model: blif_model(module, &module_attrs, has_cells),
        pb_class: module_attrs
            .class
            .and_then(|class| class.pb_class())
            .map(ArcStr::from),
        metadata,
        passthrough: passthrough(&module_attrs.other),
        warnings: Vec::new(),
    };

    if module_attrs.has_modes() && mode.is_none() {
        let modes = errors.check(expand_modes(view, module, &module_attrs.modes, options));
        return match modes {
            Some(modes) => finish(errors, PbNode::ModeHost(ModeHost { header, modes })),
            None => Err(errors),
        };
    }

    if module_attrs.blackbox || !has_cells {
        let timing = leaf_timing(module, &ports, &mut errors);
        return finish(errors, PbNode::Leaf(Leaf { header, timing }));
    }

    let Some(children) = errors.check(group_children(view, module)) else {
        return Err(errors);
    };
    if children.is_empty() {
        let timing = leaf_timing(module, &ports, &mut errors);
        return finish(errors, PbNode::Leaf(Leaf { header, timing }));
    }

    let interconnect = errors.check(resolve(view, module, &children));
    let topology = interconnect
        .as_ref()
        .and_then(|edges| errors.check(classify(module, edges, &children.routing_names())));

    let mut groups = Vec::with_capacity(children.groups.len());
    for group in children.groups.iter() {
        let included = Metadata::from_attributes(
            &view.attributes_of(&group.cell_type, Entity::Module),
            None,
        );
        if let Some(metadata) = errors.check(group_metadata(module, group, &included)) {
            groups.push(group.clone().with_metadata(metadata));
        }
    }

    match (interconnect, topology) {
        (Some(interconnect), Some(topology)) => finish(errors, PbNode::Container(Container {
            header,
            children: groups,
            interconnect,
            directs: topology.directs,
            muxes: topology.muxes,
        })),
        _ => Err(errors),
    }
}

/// Fails with `errors` if they hold an error, and otherwise attaches the
/// warnings among them to `node`.
fn finish(errors: Errors, mut node: PbNode) -> Result<PbNode, Errors> {
    if errors.has_error() {
        return Err(errors);
    }
    node.header_mut().warnings.extend(errors);
    Ok(node)
}

fn pb_port(port: &ParsedPort) -> PbPort {
    PbPort {
        name: port.info.name.clone(),
        kind: port.kind,
        width: port.info.width(),
        port_class: port.attrs.port_class.clone(),
        carry: port.attrs.carry.clone().map(|name| PackPattern {
            name,
            kind: PatternKind::Carry,
        }),
    }
}

/// The BLIF model of a module.
///
/// Classes with a fixed model use it. A module without a class, modes or
/// internal structure is an opaque `.subckt`.
fn blif_model(module: &str, attrs: &ModuleAttrs, has_cells: bool) -> Option<ArcStr> {
    match attrs.class {
        Some(class) => class.blif_model().map(ArcStr::from),
        None if (attrs.blackbox || !has_cells) && !attrs.has_modes() => {
            let name = attrs.model_name.as_deref().unwrap_or(module);
            Some(arcstr::format!(".subckt {}", name))
        }
        None => None,
    }
}

fn passthrough(other: &Attributes) -> Attributes {
    other
        .iter()
        .filter(|(key, _)| *key != "src" && parse_attr_name(key).is_none())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn leaf_timing(module: &str, ports: &[ParsedPort], errors: &mut Errors) -> Vec<TimingAnnotation> {
    let mut timing = Vec::new();
    for port in ports {
        for spec in port.attrs.timing.iter() {
            match spec.check_direction(module, &port.info.name, port.info.direction) {
                Ok(()) => timing.push(TimingAnnotation {
                    port: port.info.name.clone(),
                    spec: spec.clone(),
                }),
                Err(e) => errors.add(e),
            }
        }
    }
    timing
}

/// Builds `top` and every module reachable from it through child groups.
///
/// Modules are visited depth first, each once, in order of first
/// reference. Child types of mode subtrees are looked up in `view` itself.
/// Errors of all modules are reported together.
pub fn build_library<V: NetlistView + Sync>(
    view: &V,
    top: &str,
    options: &BuildOptions,
) -> Result<IndexMap<ArcStr, PbNode>, Errors> {
    let _guard = span!(Level::INFO, "building pb_type library", top).entered();

    let mut errors = Errors::new();
    let mut library = IndexMap::new();
    let mut seen = HashSet::new();
    let mut stack = vec![ArcStr::from(top)];

    while let Some(module) = stack.pop() {
        if !seen.insert(module.clone()) {
            continue;
        }
        match build_pb_type(view, &module, options) {
            Ok(node) => {
                stack.extend(
                    node.child_types()
                        .into_iter()
                        .rev()
                        .filter(|ty| !seen.contains(ty)),
                );
                library.insert(module, node);
            }
            Err(e) => errors.append(e),
        }
    }

    tracing::debug!(modules = library.len(), "built pb_type library");
    errors.into_result(library)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::ModuleClass;
    use crate::netlist::{CellDef, Design, ModuleDef};
    use crate::timing::TimingSpec;
    use test_log::test;

    fn ff() -> ModuleDef {
        let mut ff = ModuleDef::new("DFF");
        ff.set_attr("blackbox", "1");
        ff.set_attr("CLASS", "flipflop");
        ff.set_attr("keep_hierarchy", "1");
        ff.add_port("D", Direction::Input, 1);
        ff.add_port("C", Direction::Input, 1);
        ff.add_port("Q", Direction::Output, 1);
        ff.set_port_attr("D", "SETUP", "C 10e-12");
        ff.set_port_attr("Q", "CLK_TO_Q", "C 12e-12");
        ff.set_port_attr("C", "CLOCK", "1");
        ff
    }

    #[test]
    fn blackbox_leaf_with_timing() {
        let mut design = Design::new();
        design.add_module(ff());
        let node = build_pb_type(&design, "DFF", &BuildOptions::default()).unwrap();
        let leaf = node.as_leaf().unwrap();
        assert_eq!(leaf.header.class, Some(ModuleClass::FlipFlop));
        assert_eq!(leaf.header.blif_model.as_deref(), Some(".latch"));
        assert_eq!(leaf.header.pb_class.as_deref(), Some("flipflop"));
        let ports: Vec<_> = leaf
            .header
            .ports
            .iter()
            .map(|p| (p.name.as_str(), p.kind))
            .collect();
        assert_eq!(
            ports,
            vec![
                ("C", PortKind::Clock),
                ("D", PortKind::Input),
                ("Q", PortKind::Output)
            ]
        );
        assert_eq!(leaf.timing.len(), 2);
        assert!(matches!(leaf.timing[1].spec, TimingSpec::ClockToQ { .. }));
        assert_eq!(leaf.header.passthrough["keep_hierarchy"], "1");
    }

    #[test]
    fn clock_to_q_on_input_is_rejected() {
        let mut design = Design::new();
        let mut ff = ff();
        ff.set_port_attr("D", "CLK_TO_Q", "C 1e-12");
        design.add_module(ff);
        let errors = build_pb_type(&design, "DFF", &BuildOptions::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors.iter().next(),
            Some(Error::BadTiming { port, .. }) if port == "D"
        ));
    }

    #[test]
    fn opaque_primitive_is_subckt() {
        let mut design = Design::new();
        let mut m = ModuleDef::new("ADDER");
        m.set_attr("MODEL_NAME", "adder_model");
        m.add_port("A", Direction::Input, 2);
        m.add_port("S", Direction::Output, 2);
        m.add_port("CO", Direction::Output, 1);
        m.set_port_attr("CO", "carry", "CHAIN");
        m.set_port_attr("A", "PORT_CLASS", "a");
        design.add_module(m);

        let node = build_pb_type(&design, "ADDER", &BuildOptions::default()).unwrap();
        let header = node.header();
        assert_eq!(header.blif_model.as_deref(), Some(".subckt adder_model"));
        assert_eq!(header.port("A").unwrap().width, 2);
        assert_eq!(header.port("A").unwrap().port_class.as_deref(), Some("a"));
        assert_eq!(
            header.port("CO").unwrap().carry,
            Some(PackPattern {
                name: "CHAIN".into(),
                kind: PatternKind::Carry
            })
        );
    }

    #[test]
    fn output_named_like_clock_is_not_a_clock() {
        let mut design = Design::new();
        let mut m = ModuleDef::new("CLKBUF");
        m.set_attr("blackbox", "1");
        m.add_port("clk_in", Direction::Input, 1);
        m.add_port("clk_out", Direction::Output, 1);
        m.add_port("EN", Direction::Input, 1);
        m.add_clock("EN");
        design.add_module(m);

        let node = build_pb_type(&design, "CLKBUF", &BuildOptions::default()).unwrap();
        let kinds: Vec<_> = node.header().ports.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![PortKind::Clock, PortKind::Clock, PortKind::Output]
        );
        assert_eq!(node.header().ports[2].name, "clk_out");
    }

    #[test]
    fn report_all_errors_of_a_level() {
        let mut design = Design::new();
        let mut m = ModuleDef::new("bad");
        m.add_port("IO", Direction::InOut, 1);
        m.set_attr("FASM_PREFIX", "X");
        design.add_module(m);

        let errors = build_pb_type(&design, "bad", &BuildOptions::default()).unwrap_err();
        let kinds: Vec<_> = errors
            .iter()
            .map(|e| match e {
                Error::InvalidModuleName { .. } => "name",
                Error::BidirectionalPort { .. } => "inout",
                Error::ScopeViolation { .. } => "scope",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["name", "inout", "scope"]);

        let relaxed = BuildOptions {
            require_uppercase_names: false,
            ..Default::default()
        };
        assert_eq!(build_pb_type(&design, "bad", &relaxed).unwrap_err().len(), 2);
    }

    #[test]
    fn missing_module() {
        let design = Design::new();
        let errors = build_pb_type(&design, "NOPE", &BuildOptions::default()).unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(Error::MissingModule { module }) if module == "NOPE"
        ));
    }

    #[test]
    fn library_visits_each_type_once() {
        let mut design = Design::new();
        design.add_module(ff());

        let mut slice = ModuleDef::new("SLICE");
        let d = slice.add_port("D", Direction::Input, 2);
        let c = slice.add_port("C", Direction::Input, 1);
        let q = slice.add_port("Q", Direction::Output, 2);
        for i in 0..2 {
            let mut cell = CellDef::new(format!("ff[{i}]"), "DFF");
            cell.connect("D", Direction::Input, [d[i]]);
            cell.connect("C", Direction::Input, c.clone());
            cell.connect("Q", Direction::Output, [q[i]]);
            slice.add_cell(cell);
        }
        design.add_module(slice);

        let mut top = ModuleDef::new("TOP");
        let d = top.add_port("D", Direction::Input, 2);
        let c = top.add_port("C", Direction::Input, 1);
        let q = top.add_port("Q", Direction::Output, 2);
        let mut cell = CellDef::new("slice", "SLICE");
        cell.connect("D", Direction::Input, d);
        cell.connect("C", Direction::Input, c.clone());
        cell.connect("Q", Direction::Output, q.clone());
        top.add_cell(cell);
        let mut extra = CellDef::new("spare", "DFF");
        extra.connect("D", Direction::Input, [q[0]]);
        extra.connect("C", Direction::Input, c);
        top.add_cell(extra);
        design.add_module(top);

        let library = build_library(&design, "TOP", &BuildOptions::default()).unwrap();
        assert_eq!(
            library.keys().collect::<Vec<_>>(),
            vec!["TOP", "SLICE", "DFF"]
        );
        assert!(library["SLICE"].as_container().is_some());
    }

    #[test]
    fn library_reports_missing_child_type() {
        let mut design = Design::new();
        let mut top = ModuleDef::new("TOP");
        let i = top.add_port("I", Direction::Input, 1);
        let mut cell = CellDef::new("x", "GHOST");
        cell.connect("A", Direction::Input, i);
        top.add_cell(cell);
        design.add_module(top);

        let errors = build_library(&design, "TOP", &BuildOptions::default()).unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(Error::MissingModule { module }) if module == "GHOST"
        ));
    }
}
