//! An in-memory netlist.

use std::collections::HashMap;

use arcstr::ArcStr;
use indexmap::IndexMap;

use super::{
    Attributes, CellConnection, CellInfo, Direction, Endpoint, Entity, NetId, NetlistView,
    PortInfo,
};
use crate::error::{Error, Result};

/// An in-memory netlist.
///
/// Re-elaborated variants of the design are registered per module and
/// mode with [`Design::add_mode_variant`].
#[derive(Debug, Clone, Default)]
pub struct Design {
    modules: IndexMap<ArcStr, ModuleDef>,
    variants: HashMap<(ArcStr, ArcStr), Design>,
}

impl Design {
    /// Creates an empty design.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module, replacing any module of the same name.
    pub fn add_module(&mut self, module: ModuleDef) {
        self.modules.insert(module.name.clone(), module);
    }

    /// Gets a module by name.
    pub fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.get(name)
    }

    /// Gets a mutable reference to a module by name.
    pub fn module_mut(&mut self, name: &str) -> Option<&mut ModuleDef> {
        self.modules.get_mut(name)
    }

    /// Registers the design obtained by elaborating `module` in `mode`.
    pub fn add_mode_variant(
        &mut self,
        module: impl Into<ArcStr>,
        mode: impl Into<ArcStr>,
        variant: Design,
    ) {
        self.variants.insert((module.into(), mode.into()), variant);
    }
}

/// A named group of nets.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
struct NetName {
    bits: Vec<NetId>,
    attrs: Attributes,
}

/// A module definition.
#[derive(Debug, Clone, Default)]
pub struct ModuleDef {
    name: ArcStr,
    attrs: Attributes,
    ports: Vec<PortInfo>,
    port_attrs: HashMap<ArcStr, Attributes>,
    net_attrs: HashMap<NetId, Attributes>,
    netnames: IndexMap<ArcStr, NetName>,
    cells: IndexMap<ArcStr, CellDef>,
    clocks: Vec<ArcStr>,
    combinational: IndexMap<ArcStr, Vec<ArcStr>>,
    clock_associated: IndexMap<ArcStr, Vec<ArcStr>>,
    related: IndexMap<ArcStr, Vec<ArcStr>>,
    next_net: u64,
}

impl ModuleDef {
    /// Creates an empty module.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The module name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// Sets a module attribute.
    pub fn set_attr(&mut self, key: impl Into<ArcStr>, value: impl Into<ArcStr>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Allocates a fresh net.
    pub(super) fn alloc(&mut self) -> NetId {
        let id = NetId(self.next_net);
        self.next_net += 1;
        id
    }

    /// Adds a port of the given width on fresh nets, returning its bits.
    pub fn add_port(
        &mut self,
        name: impl Into<ArcStr>,
        direction: Direction,
        width: usize,
    ) -> Vec<NetId> {
        let bits: Vec<NetId> = (0..width).map(|_| self.alloc()).collect();
        self.add_port_with_bits(name, direction, bits.clone());
        bits
    }

    /// Adds a port connected to existing nets.
    pub fn add_port_with_bits(
        &mut self,
        name: impl Into<ArcStr>,
        direction: Direction,
        bits: impl Into<Vec<NetId>>,
    ) {
        let name = name.into();
        let bits = bits.into();
        self.reserve(&bits);
        self.netnames.entry(name.clone()).or_insert_with(|| NetName {
            bits: bits.clone(),
            attrs: Attributes::new(),
        });
        self.ports.push(PortInfo::new(name, direction, bits));
    }

    /// Adds a single-bit named net.
    pub fn add_net(&mut self, name: impl Into<ArcStr>) -> NetId {
        let id = self.alloc();
        self.add_netname(name, [id]);
        id
    }

    /// Adds a named bus of fresh nets.
    pub fn add_bus(&mut self, name: impl Into<ArcStr>, width: usize) -> Vec<NetId> {
        let bits: Vec<NetId> = (0..width).map(|_| self.alloc()).collect();
        self.add_netname(name, bits.clone());
        bits
    }

    /// Names a group of existing nets.
    pub fn add_netname(&mut self, name: impl Into<ArcStr>, bits: impl Into<Vec<NetId>>) {
        let bits = bits.into();
        self.reserve(&bits);
        self.netnames.insert(
            name.into(),
            NetName {
                bits,
                attrs: Attributes::new(),
            },
        );
    }

    /// Ensures that fresh nets never collide with `bits`.
    pub(super) fn reserve(&mut self, bits: &[NetId]) {
        if let Some(max) = bits.iter().map(|id| id.0).max() {
            self.next_net = self.next_net.max(max + 1);
        }
    }

    /// The nets of a named net or port.
    pub fn net_named(&self, name: &str) -> Option<&[NetId]> {
        self.netnames.get(name).map(|n| n.bits.as_slice())
    }

    /// Sets an attribute on a port.
    pub fn set_port_attr(
        &mut self,
        port: impl Into<ArcStr>,
        key: impl Into<ArcStr>,
        value: impl Into<ArcStr>,
    ) {
        self.port_attrs
            .entry(port.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Sets an attribute on a single net.
    pub fn set_net_attr(&mut self, net: NetId, key: impl Into<ArcStr>, value: impl Into<ArcStr>) {
        self.net_attrs
            .entry(net)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Sets an attribute on a named net, applying to each of its bits.
    pub fn set_netname_attr(
        &mut self,
        name: &str,
        key: impl Into<ArcStr>,
        value: impl Into<ArcStr>,
    ) {
        if let Some(netname) = self.netnames.get_mut(name) {
            netname.attrs.insert(key.into(), value.into());
        }
    }

    /// Adds a cell instance, replacing any instance of the same name.
    pub fn add_cell(&mut self, cell: CellDef) {
        for conn in cell.connections.iter() {
            self.reserve(&conn.bits);
        }
        self.cells.insert(cell.name.clone(), cell);
    }

    /// Gets a cell instance by name.
    pub fn cell(&self, name: &str) -> Option<&CellDef> {
        self.cells.get(name)
    }

    /// Marks `port` as a clock.
    pub fn add_clock(&mut self, port: impl Into<ArcStr>) {
        self.clocks.push(port.into());
    }

    /// Records that `output` is combinationally reachable from `input`.
    pub fn add_combinational_sink(&mut self, input: impl Into<ArcStr>, output: impl Into<ArcStr>) {
        self.combinational
            .entry(input.into())
            .or_default()
            .push(output.into());
    }

    /// Records that `signal` is sequentially associated with `clock`.
    pub fn add_clock_associated(&mut self, clock: impl Into<ArcStr>, signal: impl Into<ArcStr>) {
        self.clock_associated
            .entry(clock.into())
            .or_default()
            .push(signal.into());
    }

    /// Records that `output` is related to `input` through any path.
    pub fn add_related_output(&mut self, input: impl Into<ArcStr>, output: impl Into<ArcStr>) {
        self.related
            .entry(input.into())
            .or_default()
            .push(output.into());
    }

    fn drivers(&self, net: NetId) -> Vec<Endpoint> {
        let mut drivers = Vec::new();
        for port in self.ports.iter() {
            if matches!(port.direction, Direction::Input | Direction::InOut) {
                drivers.extend(
                    port.bit_pins()
                        .filter(|(_, n)| *n == net)
                        .map(|(pin, _)| Endpoint::boundary(pin)),
                );
            }
        }
        for cell in self.cells.values() {
            for conn in cell.connections.iter() {
                if conn.direction.drives_from_cell() {
                    drivers.extend(
                        conn.bit_pins()
                            .filter(|(_, n)| *n == net)
                            .map(|(pin, _)| Endpoint::cell(cell.name.clone(), pin)),
                    );
                }
            }
        }
        drivers
    }

    fn sinks(&self, net: NetId) -> Vec<Endpoint> {
        let mut sinks = Vec::new();
        for port in self.ports.iter() {
            if matches!(port.direction, Direction::Output | Direction::InOut) {
                sinks.extend(
                    port.bit_pins()
                        .filter(|(_, n)| *n == net)
                        .map(|(pin, _)| Endpoint::boundary(pin)),
                );
            }
        }
        for cell in self.cells.values() {
            for conn in cell.connections.iter() {
                if conn.direction.sinks_from_cell() {
                    sinks.extend(
                        conn.bit_pins()
                            .filter(|(_, n)| *n == net)
                            .map(|(pin, _)| Endpoint::cell(cell.name.clone(), pin)),
                    );
                }
            }
        }
        sinks
    }

    /// Attributes of a net: those set on it directly, then those of every
    /// named net containing it.
    fn attrs_of_net(&self, net: NetId) -> Attributes {
        let mut attrs = self.net_attrs.get(&net).cloned().unwrap_or_default();
        for netname in self.netnames.values() {
            if netname.bits.contains(&net) {
                for (key, value) in netname.attrs.iter() {
                    attrs.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        attrs
    }

    fn attrs_of_port(&self, port: &str) -> Attributes {
        let mut attrs = self.port_attrs.get(port).cloned().unwrap_or_default();
        if let Some(netname) = self.netnames.get(port) {
            for (key, value) in netname.attrs.iter() {
                attrs.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        attrs
    }
}

/// A cell instance.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CellDef {
    name: ArcStr,
    cell_type: ArcStr,
    attrs: Attributes,
    connections: Vec<CellConnection>,
}

impl CellDef {
    /// Creates an instance of `cell_type` named `name`.
    pub fn new(name: impl Into<ArcStr>, cell_type: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            cell_type: cell_type.into(),
            ..Default::default()
        }
    }

    /// The raw instance name.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The instantiated module.
    #[inline]
    pub fn cell_type(&self) -> &ArcStr {
        &self.cell_type
    }

    /// Sets an instance attribute.
    pub fn set_attr(&mut self, key: impl Into<ArcStr>, value: impl Into<ArcStr>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Connects `port` of the instance to `bits`.
    pub fn connect(
        &mut self,
        port: impl Into<ArcStr>,
        direction: Direction,
        bits: impl Into<Vec<NetId>>,
    ) {
        self.connections.push(CellConnection {
            port: port.into(),
            direction,
            bits: bits.into(),
        });
    }

    /// The port connections of the instance.
    pub fn connections(&self) -> &[CellConnection] {
        &self.connections
    }
}

impl NetlistView for Design {
    fn modules(&self) -> Vec<ArcStr> {
        self.modules.keys().cloned().collect()
    }

    fn cells_of(&self, module: &str) -> Vec<CellInfo> {
        self.module(module)
            .map(|m| {
                m.cells
                    .values()
                    .map(|c| CellInfo {
                        name: c.name.clone(),
                        cell_type: c.cell_type.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ports_of(&self, module: &str) -> Vec<PortInfo> {
        self.module(module)
            .map(|m| m.ports.clone())
            .unwrap_or_default()
    }

    fn cell_connections(&self, module: &str, cell: &str) -> Vec<CellConnection> {
        self.module(module)
            .and_then(|m| m.cell(cell))
            .map(|c| c.connections.clone())
            .unwrap_or_default()
    }

    fn drivers_of(&self, module: &str, net: NetId) -> Vec<Endpoint> {
        self.module(module)
            .map(|m| m.drivers(net))
            .unwrap_or_default()
    }

    fn sinks_of(&self, module: &str, net: NetId) -> Vec<Endpoint> {
        self.module(module)
            .map(|m| m.sinks(net))
            .unwrap_or_default()
    }

    fn attributes_of(&self, module: &str, entity: Entity<'_>) -> Attributes {
        let Some(m) = self.module(module) else {
            return Attributes::new();
        };
        match entity {
            Entity::Module => m.attrs.clone(),
            Entity::Port(port) => m.attrs_of_port(port),
            Entity::Net(net) => m.attrs_of_net(net),
            Entity::Cell(cell) => m
                .cell(cell)
                .map(|c| c.attrs.clone())
                .unwrap_or_default(),
        }
    }

    fn elaborate_with_mode(&self, module: &str, mode: &str) -> Result<Self> {
        self.variants
            .get(&(ArcStr::from(module), ArcStr::from(mode)))
            .cloned()
            .ok_or_else(|| Error::Elaboration {
                module: module.into(),
                mode: mode.into(),
                message: "no elaboration registered for this mode".into(),
            })
    }

    fn clocks_of(&self, module: &str) -> Vec<ArcStr> {
        self.module(module)
            .map(|m| m.clocks.clone())
            .unwrap_or_default()
    }

    fn combinational_sinks(&self, module: &str, port: &str) -> Vec<ArcStr> {
        self.module(module)
            .and_then(|m| m.combinational.get(port).cloned())
            .unwrap_or_default()
    }

    fn clock_associated_signals(&self, module: &str, clock: &str) -> Vec<ArcStr> {
        self.module(module)
            .and_then(|m| m.clock_associated.get(clock).cloned())
            .unwrap_or_default()
    }

    fn related_outputs(&self, module: &str, port: &str) -> Vec<ArcStr> {
        self.module(module)
            .and_then(|m| m.related.get(port).cloned())
            .unwrap_or_default()
    }
}
