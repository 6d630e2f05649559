//! The netlist graph consumed by the compiler.
//!
//! An external elaboration tool produces a graph of modules, cell instances,
//! ports, nets and attributes. [`NetlistView`] is the read-only query surface
//! over that graph. The compiler never mutates a view; mode expansion asks the
//! view for an independent, re-elaborated snapshot instead.
//!
//! Two implementations ship with this crate: the in-memory [`Design`] and a
//! loader for Yosys JSON netlists in [`yosys`].

use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod design;
pub mod yosys;

pub use design::{CellDef, Design, ModuleDef};

/// Attribute name to attribute value.
///
/// Insertion order is preserved so that downstream output is reproducible.
pub type Attributes = IndexMap<ArcStr, ArcStr>;

/// An opaque net identifier.
///
/// Net IDs are scoped to a module; the same ID in two modules
/// refers to unrelated nets.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NetId(pub u64);

impl Display for NetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "net{}", self.0)
    }
}

/// Port directions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Input.
    Input,
    /// Output.
    Output,
    /// Bidirectional.
    InOut,
}

impl Direction {
    /// Returns `true` if a connection in this direction drives its net.
    ///
    /// From the inside of a module, input ports drive nets.
    /// From the outside of an instance, output pins drive nets.
    #[inline]
    pub fn drives_from_cell(&self) -> bool {
        matches!(*self, Self::Output | Self::InOut)
    }

    /// Returns `true` if a cell pin in this direction reads its net.
    #[inline]
    pub fn sinks_from_cell(&self) -> bool {
        matches!(*self, Self::Input | Self::InOut)
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::InOut => write!(f, "inout"),
        }
    }
}

/// A port of a module.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    /// The port name.
    pub name: ArcStr,
    /// The port direction.
    pub direction: Direction,
    /// The net connected to each bit of the port, LSB first.
    pub bits: Vec<NetId>,
}

impl PortInfo {
    /// Creates a new port.
    pub fn new(name: impl Into<ArcStr>, direction: Direction, bits: impl Into<Vec<NetId>>) -> Self {
        Self {
            name: name.into(),
            direction,
            bits: bits.into(),
        }
    }

    /// The number of bits in the port.
    #[inline]
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// Iterates over `(bit name, net)` pairs.
    pub fn bit_pins(&self) -> impl Iterator<Item = (ArcStr, NetId)> + '_ {
        let width = self.width();
        self.bits
            .iter()
            .enumerate()
            .map(move |(i, net)| (bit_name(&self.name, width, i), *net))
    }
}

/// A cell instance placed inside a module.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    /// The raw instance name, as produced by elaboration.
    pub name: ArcStr,
    /// The name of the instantiated module.
    pub cell_type: ArcStr,
}

/// The connection of one port of a cell instance.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellConnection {
    /// The name of the port on the instantiated module.
    pub port: ArcStr,
    /// The direction of the port, seen from the instantiated module.
    pub direction: Direction,
    /// The net connected to each bit of the port, LSB first.
    pub bits: Vec<NetId>,
}

impl CellConnection {
    /// Iterates over `(bit name, net)` pairs.
    pub fn bit_pins(&self) -> impl Iterator<Item = (ArcStr, NetId)> + '_ {
        let width = self.bits.len();
        self.bits
            .iter()
            .enumerate()
            .map(move |(i, net)| (bit_name(&self.port, width, i), *net))
    }
}

/// One end of a net.
///
/// `cell` is [`None`] for the boundary of the module being queried,
/// i.e. one of its own ports.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// The raw name of the cell instance, if any.
    pub cell: Option<ArcStr>,
    /// The bit-level pin name.
    pub pin: ArcStr,
}

impl Endpoint {
    /// An endpoint on the module's own boundary.
    pub fn boundary(pin: impl Into<ArcStr>) -> Self {
        Self {
            cell: None,
            pin: pin.into(),
        }
    }

    /// An endpoint on a cell instance.
    pub fn cell(cell: impl Into<ArcStr>, pin: impl Into<ArcStr>) -> Self {
        Self {
            cell: Some(cell.into()),
            pin: pin.into(),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cell {
            Some(cell) => write!(f, "{}.{}", cell, self.pin),
            None => write!(f, "{}", self.pin),
        }
    }
}

/// Something attributes can be attached to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Entity<'a> {
    /// The module itself.
    Module,
    /// A port of the module, by name.
    Port(&'a str),
    /// A net of the module.
    Net(NetId),
    /// A cell instance of the module, by raw name.
    Cell(&'a str),
}

/// Read-only queries over an elaborated netlist.
///
/// All queries name the module they are scoped to. Unknown modules,
/// cells or ports yield empty results rather than errors; the compiler
/// checks module existence explicitly where it matters.
pub trait NetlistView {
    /// The names of all modules in the view.
    fn modules(&self) -> Vec<ArcStr>;

    /// The cell instances directly inside `module`, in elaboration order.
    fn cells_of(&self, module: &str) -> Vec<CellInfo>;

    /// The ports of `module`, in declaration order.
    fn ports_of(&self, module: &str) -> Vec<PortInfo>;

    /// The port connections of cell instance `cell` inside `module`.
    fn cell_connections(&self, module: &str, cell: &str) -> Vec<CellConnection>;

    /// The endpoints driving `net`.
    fn drivers_of(&self, module: &str, net: NetId) -> Vec<Endpoint>;

    /// The endpoints reading `net`.
    fn sinks_of(&self, module: &str, net: NetId) -> Vec<Endpoint>;

    /// The attributes attached to `entity` inside `module`.
    fn attributes_of(&self, module: &str, entity: Entity<'_>) -> Attributes;

    /// Re-elaborates the design with `module` evaluated in the given mode.
    ///
    /// The returned view is an independent snapshot.
    fn elaborate_with_mode(&self, module: &str, mode: &str) -> Result<Self>
    where
        Self: Sized;

    /// Ports of `module` found to be clocks by the elaboration tool.
    fn clocks_of(&self, _module: &str) -> Vec<ArcStr> {
        Vec::new()
    }

    /// Output ports of `module` combinationally reachable from input `port`.
    fn combinational_sinks(&self, _module: &str, _port: &str) -> Vec<ArcStr> {
        Vec::new()
    }

    /// Signals of `module` that are sequentially associated with `clock`.
    fn clock_associated_signals(&self, _module: &str, _clock: &str) -> Vec<ArcStr> {
        Vec::new()
    }

    /// Output ports of `module` related to input `port` through any path.
    fn related_outputs(&self, _module: &str, _port: &str) -> Vec<ArcStr> {
        Vec::new()
    }

    /// Returns `true` if the view contains `module`.
    fn has_module(&self, module: &str) -> bool {
        self.modules().iter().any(|m| m == module)
    }

    /// The net connected to bit-level `pin` of cell `cell` inside `module`.
    fn net_for(&self, module: &str, cell: &str, pin: &str) -> Option<NetId> {
        let conns = self.cell_connections(module, cell);
        let net = conns
            .iter()
            .flat_map(|conn| conn.bit_pins())
            .find(|(name, _)| name == pin)
            .map(|(_, net)| net);
        net
    }
}

/// Formats the name of bit `index` of a port of the given width.
///
/// # Examples
///
/// ```
/// use pbtype::netlist::bit_name;
/// assert_eq!(bit_name("clk", 1, 0), "clk");
/// assert_eq!(bit_name("in", 4, 2), "in[2]");
/// ```
pub fn bit_name(port: &str, width: usize, index: usize) -> ArcStr {
    if width == 1 {
        ArcStr::from(port)
    } else {
        arcstr::format!("{}[{}]", port, index)
    }
}

/// Strips a trailing bit index from a bit-level pin name.
///
/// # Examples
///
/// ```
/// use pbtype::netlist::port_of_bit;
/// assert_eq!(port_of_bit("in[2]"), "in");
/// assert_eq!(port_of_bit("clk"), "clk");
/// ```
pub fn port_of_bit(pin: &str) -> &str {
    match pin.strip_suffix(']').and_then(|p| p.rfind('[').map(|i| (p, i))) {
        Some((p, i)) if p[i + 1..].chars().all(|c| c.is_ascii_digit()) && i + 1 < p.len() => {
            &pin[..i]
        }
        _ => pin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn bit_names_of_wide_ports() {
        let port = PortInfo::new("out", Direction::Output, [NetId(4), NetId(5)]);
        let pins: Vec<_> = port.bit_pins().collect();
        assert_eq!(
            pins,
            vec![
                (ArcStr::from("out[0]"), NetId(4)),
                (ArcStr::from("out[1]"), NetId(5))
            ]
        );
    }

    #[test]
    fn port_of_bit_ignores_non_numeric_suffixes() {
        assert_eq!(port_of_bit("a[x]"), "a[x]");
        assert_eq!(port_of_bit("a[]"), "a[]");
        assert_eq!(port_of_bit("a[1][3]"), "a[1]");
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::cell("lut", "out").to_string(), "lut.out");
        assert_eq!(Endpoint::boundary("I[0]").to_string(), "I[0]");
    }
}
