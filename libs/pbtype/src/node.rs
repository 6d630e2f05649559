//! The hierarchy produced by the compiler.
//!
//! A [`PbNode`] is constructed bottom-up and never modified after being
//! returned. Containers refer to their children by type; the node of each
//! child type is built separately (see [`build_library`](crate::builder::build_library)).

use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::attrs::ModuleClass;
use crate::error::Error;
use crate::grouping::ChildGroup;
use crate::interconnect::EdgeSet;
use crate::metadata::Metadata;
use crate::netlist::Attributes;
use crate::timing::TimingAnnotation;
use crate::topology::{DirectConnection, MuxGroup, PackPattern};

/// The kind of a pb port.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum PortKind {
    /// A clock input.
    Clock,
    /// A non-clock input.
    Input,
    /// An output.
    Output,
}

impl Display for PortKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Clock => write!(f, "clock"),
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// A port of a pb node.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PbPort {
    /// The port name.
    pub name: ArcStr,
    /// The port kind.
    pub kind: PortKind,
    /// The number of pins.
    pub width: usize,
    /// The `PORT_CLASS` of the port.
    pub port_class: Option<ArcStr>,
    /// The carry chain pack pattern of the port.
    pub carry: Option<PackPattern>,
}

/// The data common to every kind of node.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeHeader {
    /// The node name: the module name, or the mode name for a mode subtree.
    pub name: ArcStr,
    /// The module the node was built from.
    pub module: ArcStr,
    /// The module class.
    pub class: Option<ModuleClass>,
    /// Ports: clocks, then inputs, then outputs.
    pub ports: Vec<PbPort>,
    /// The BLIF model implementing the node, if any.
    pub blif_model: Option<ArcStr>,
    /// The pb class, if any.
    pub pb_class: Option<ArcStr>,
    /// Metadata declared on the module for this node.
    pub metadata: Metadata,
    /// Module attributes not otherwise interpreted.
    pub passthrough: Attributes,
    /// Warnings recorded while building this node.
    #[serde(skip)]
    pub warnings: Vec<Error>,
}

impl NodeHeader {
    /// Looks up a port by name.
    pub fn port(&self, name: &str) -> Option<&PbPort> {
        self.ports.iter().find(|port| port.name == name)
    }

    /// Iterates over the ports of the given kind.
    pub fn ports_of_kind(&self, kind: PortKind) -> impl Iterator<Item = &PbPort> {
        self.ports.iter().filter(move |port| port.kind == kind)
    }
}

/// A primitive with no children.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    /// The node header.
    pub header: NodeHeader,
    /// Timing annotations on the ports.
    pub timing: Vec<TimingAnnotation>,
}

/// A node composed of child groups.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// The node header.
    pub header: NodeHeader,
    /// Child groups, in order of first appearance.
    pub children: Vec<ChildGroup>,
    /// The resolved interconnect.
    pub interconnect: EdgeSet,
    /// Connections not involving a routing instance.
    pub directs: Vec<DirectConnection>,
    /// Routing instances folded into muxes.
    pub muxes: Vec<MuxGroup>,
}

/// One alternative of a [`ModeHost`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    /// The mode name.
    pub name: ArcStr,
    /// The subtree built for the mode, or [`None`] if it has no children.
    pub node: Option<Box<PbNode>>,
    /// Connections between the host and the mode.
    ///
    /// Mode-side pins are owned by the mode name. A mode without children
    /// only has boundary pins.
    pub interconnect: EdgeSet,
    /// The interconnect as direct connections.
    pub directs: Vec<DirectConnection>,
}

/// A node with alternative modes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModeHost {
    /// The node header.
    pub header: NodeHeader,
    /// The modes, in declaration order.
    pub modes: Vec<Mode>,
}

impl ModeHost {
    /// Looks up a mode by name.
    pub fn mode(&self, name: &str) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.name == name)
    }
}

/// A node of the hierarchy.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum PbNode {
    /// A primitive.
    Leaf(Leaf),
    /// A composite of child groups.
    Container(Container),
    /// A node with alternative modes.
    ModeHost(ModeHost),
}

impl PbNode {
    /// The node header.
    pub fn header(&self) -> &NodeHeader {
        match self {
            Self::Leaf(leaf) => &leaf.header,
            Self::Container(container) => &container.header,
            Self::ModeHost(host) => &host.header,
        }
    }

    pub(crate) fn header_mut(&mut self) -> &mut NodeHeader {
        match self {
            Self::Leaf(leaf) => &mut leaf.header,
            Self::Container(container) => &mut container.header,
            Self::ModeHost(host) => &mut host.header,
        }
    }

    /// The node name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.header().name
    }

    /// The node metadata.
    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.header().metadata
    }

    /// Returns the leaf, if this node is one.
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Returns the container, if this node is one.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Self::Container(container) => Some(container),
            _ => None,
        }
    }

    /// Returns the mode host, if this node is one.
    pub fn as_mode_host(&self) -> Option<&ModeHost> {
        match self {
            Self::ModeHost(host) => Some(host),
            _ => None,
        }
    }

    /// The types of all children of this node and of its mode subtrees,
    /// each once, in order of first appearance.
    pub fn child_types(&self) -> Vec<ArcStr> {
        let mut types = Vec::new();
        self.collect_child_types(&mut types);
        types
    }

    fn collect_child_types(&self, types: &mut Vec<ArcStr>) {
        match self {
            Self::Leaf(_) => {}
            Self::Container(container) => {
                for group in container.children.iter() {
                    if !types.contains(&group.cell_type) {
                        types.push(group.cell_type.clone());
                    }
                }
            }
            Self::ModeHost(host) => {
                for node in host.modes.iter().filter_map(|mode| mode.node.as_deref()) {
                    node.collect_child_types(types);
                }
            }
        }
    }
}
