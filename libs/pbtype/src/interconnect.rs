//! Interconnect resolution.
//!
//! Derives the driver to sink edges local to one hierarchy level: from
//! children and the container boundary into child inputs, from child
//! outputs to the container boundary, and straight through the container
//! from its inputs to its outputs.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{span, Level};

use crate::error::{Error, Errors};
use crate::grouping::Children;
use crate::netlist::{port_of_bit, Attributes, Direction, Endpoint, Entity, NetId, NetlistView};

/// A single-bit connection point.
///
/// An owner of [`None`] denotes the boundary of the container itself.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    /// The short name of the owning child, if any.
    pub owner: Option<ArcStr>,
    /// The bit-level pin name.
    pub name: ArcStr,
}

impl Pin {
    /// A pin on the container boundary.
    pub fn boundary(name: impl Into<ArcStr>) -> Self {
        Self {
            owner: None,
            name: name.into(),
        }
    }

    /// A pin on a child.
    pub fn on(owner: impl Into<ArcStr>, name: impl Into<ArcStr>) -> Self {
        Self {
            owner: Some(owner.into()),
            name: name.into(),
        }
    }

    /// Returns `true` if the pin is on the container boundary.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.owner.is_none()
    }

    /// Returns `true` if the pin belongs to `owner`.
    pub fn is_on(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }
}

impl Display for Pin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}.{}", owner, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The total order on pins.
///
/// Boundary pins sort before pins on children. Otherwise pins are
/// ordered by owner and then by name.
pub fn pin_order(a: &Pin, b: &Pin) -> Ordering {
    match (&a.owner, &b.owner) {
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (x, y) => x.cmp(y).then_with(|| a.name.cmp(&b.name)),
    }
}

impl Ord for Pin {
    fn cmp(&self, other: &Self) -> Ordering {
        pin_order(self, other)
    }
}

impl PartialOrd for Pin {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A driver to sink connection.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct InterconnectEdge {
    /// The driving pin.
    pub driver: Pin,
    /// The driven pin.
    pub sink: Pin,
    /// Attributes of the connection.
    pub attrs: Attributes,
}

impl InterconnectEdge {
    /// Creates a new edge.
    pub fn new(driver: Pin, sink: Pin, attrs: Attributes) -> Self {
        Self {
            driver,
            sink,
            attrs,
        }
    }
}

/// A sink of an [`EdgeSet`] driver.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Sink {
    /// The driven pin.
    pub pin: Pin,
    /// Attributes of the connection.
    pub attrs: Attributes,
}

/// Edges grouped under their drivers.
///
/// Drivers and the sinks of each driver are kept in [`pin_order`].
/// Serialized as the ordered sequence of its edges.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<InterconnectEdge>", into = "Vec<InterconnectEdge>")]
pub struct EdgeSet {
    drivers: BTreeMap<Pin, Vec<Sink>>,
}

impl EdgeSet {
    /// Creates an empty edge set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an ordered edge set from unordered edges.
    pub fn from_edges(edges: impl IntoIterator<Item = InterconnectEdge>) -> Self {
        let mut drivers: BTreeMap<Pin, Vec<Sink>> = BTreeMap::new();
        for edge in edges {
            drivers.entry(edge.driver).or_default().push(Sink {
                pin: edge.sink,
                attrs: edge.attrs,
            });
        }
        let drivers = drivers
            .into_iter()
            .map(|(driver, sinks)| {
                let sinks = sinks
                    .into_iter()
                    .sorted_by(|a, b| pin_order(&a.pin, &b.pin))
                    .collect();
                (driver, sinks)
            })
            .collect();
        Self { drivers }
    }

    /// Iterates over drivers and their sinks.
    pub fn drivers(&self) -> impl Iterator<Item = (&Pin, &[Sink])> {
        self.drivers
            .iter()
            .map(|(driver, sinks)| (driver, sinks.as_slice()))
    }

    /// The sinks of `driver`.
    pub fn sinks(&self, driver: &Pin) -> &[Sink] {
        self.drivers.get(driver).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over `(driver, sink)` pairs in order.
    pub fn edges(&self) -> impl Iterator<Item = (&Pin, &Sink)> {
        self.drivers
            .iter()
            .flat_map(|(driver, sinks)| sinks.iter().map(move |sink| (driver, sink)))
    }

    /// The number of edges.
    pub fn len(&self) -> usize {
        self.drivers.values().map(Vec::len).sum()
    }

    /// Returns `true` if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl FromIterator<InterconnectEdge> for EdgeSet {
    fn from_iter<T: IntoIterator<Item = InterconnectEdge>>(iter: T) -> Self {
        Self::from_edges(iter)
    }
}

impl From<Vec<InterconnectEdge>> for EdgeSet {
    fn from(edges: Vec<InterconnectEdge>) -> Self {
        Self::from_edges(edges)
    }
}

impl From<EdgeSet> for Vec<InterconnectEdge> {
    fn from(set: EdgeSet) -> Self {
        set.drivers
            .into_iter()
            .flat_map(|(driver, sinks)| {
                sinks
                    .into_iter()
                    .map(move |sink| InterconnectEdge::new(driver.clone(), sink.pin, sink.attrs))
            })
            .collect()
    }
}

struct Resolver<'a, V> {
    view: &'a V,
    module: &'a str,
    children: &'a Children,
    errors: Errors,
    edges: Vec<InterconnectEdge>,
}

/// Resolves the interconnect of `module`, whose children are `children`.
///
/// Every input bit of every child must have exactly one driver.
pub fn resolve<V: NetlistView>(
    view: &V,
    module: &str,
    children: &Children,
) -> Result<EdgeSet, Errors> {
    let _guard = span!(Level::INFO, "resolving interconnect", module).entered();
    let mut resolver = Resolver {
        view,
        module,
        children,
        errors: Errors::new(),
        edges: Vec::new(),
    };
    resolver.resolve_children();
    resolver.resolve_passthrough();
    let Resolver { errors, edges, .. } = resolver;
    errors.into_result(EdgeSet::from_edges(edges))
}

impl<V: NetlistView> Resolver<'_, V> {
    fn resolve_children(&mut self) {
        let children = self.children;
        for (group, member) in children.members() {
            let owner = member.short_name();
            for conn in self.view.cell_connections(self.module, &member.raw) {
                match conn.direction {
                    Direction::Input => {
                        for (pin, net) in conn.bit_pins() {
                            self.resolve_input(&member.raw, &owner, &group.cell_type, pin, net);
                        }
                    }
                    Direction::Output => {
                        for (pin, net) in conn.bit_pins() {
                            self.resolve_output(&owner, &group.cell_type, pin, net);
                        }
                    }
                    // Rejected when the child type itself is built.
                    Direction::InOut => {
                        tracing::warn!(
                            module = self.module,
                            cell = member.raw.as_str(),
                            port = conn.port.as_str(),
                            "skipping bidirectional child pin"
                        );
                    }
                }
            }
        }
    }

    fn resolve_input(&mut self, raw: &ArcStr, owner: &ArcStr, cell_type: &str, pin: ArcStr, net: NetId) {
        let drivers = self.view.drivers_of(self.module, net);
        let driver = match drivers.as_slice() {
            [driver] => driver,
            [] => {
                self.errors.add(Error::UnconnectedInput {
                    module: self.module.into(),
                    cell: owner.clone(),
                    pin,
                });
                return;
            }
            _ => {
                tracing::debug!(cell = raw.as_str(), "input has multiple drivers");
                self.errors.add(Error::MultiDriver {
                    module: self.module.into(),
                    cell: owner.clone(),
                    pin,
                    net,
                    drivers: drivers.iter().map(|d| d.to_string().into()).collect(),
                });
                return;
            }
        };

        let driver_attrs = self.endpoint_port_attrs(driver);
        let sink_attrs = self.port_attrs(cell_type, &pin);
        let driver = self.endpoint_pin(driver);
        let sink = Pin::on(owner.clone(), pin);
        self.add_edge(driver, sink, net, [driver_attrs, sink_attrs]);
    }

    fn resolve_output(&mut self, owner: &ArcStr, cell_type: &str, pin: ArcStr, net: NetId) {
        let driver_attrs = self.port_attrs(cell_type, &pin);
        for sink in self.view.sinks_of(self.module, net) {
            if sink.cell.is_some() {
                continue;
            }
            let driver = Pin::on(owner.clone(), pin.clone());
            self.add_edge(
                driver,
                Pin::boundary(sink.pin),
                net,
                [driver_attrs.clone(), Attributes::new()],
            );
        }
    }

    fn resolve_passthrough(&mut self) {
        let ports = self.view.ports_of(self.module);
        let inputs: Vec<(ArcStr, NetId)> = ports
            .iter()
            .filter(|port| port.direction == Direction::Input)
            .flat_map(|port| port.bit_pins())
            .collect();
        for output in ports.iter().filter(|port| port.direction == Direction::Output) {
            for (out_pin, out_net) in output.bit_pins() {
                for (in_pin, in_net) in inputs.iter() {
                    if *in_net == out_net {
                        self.add_edge(
                            Pin::boundary(in_pin.clone()),
                            Pin::boundary(out_pin.clone()),
                            out_net,
                            [Attributes::new(), Attributes::new()],
                        );
                    }
                }
            }
        }
    }

    fn add_edge(&mut self, driver: Pin, sink: Pin, net: NetId, ports: [Attributes; 2]) {
        let net_attrs = without_src(self.view.attributes_of(self.module, Entity::Net(net)));
        let [driver_attrs, sink_attrs] = ports;
        let mut values: IndexMap<ArcStr, Vec<ArcStr>> = IndexMap::new();
        for source in [net_attrs, driver_attrs, sink_attrs] {
            for (key, value) in source {
                values.entry(key).or_default().push(value);
            }
        }

        let mut attrs = Attributes::new();
        let mut consistent = true;
        for (key, values) in values {
            if values.iter().all_equal() {
                attrs.insert(key, values[0].clone());
            } else {
                consistent = false;
                self.errors.add(Error::AttributeConflict {
                    module: self.module.into(),
                    driver: driver.clone(),
                    sink: sink.clone(),
                    key,
                    values,
                });
            }
        }
        if consistent {
            self.edges.push(InterconnectEdge::new(driver, sink, attrs));
        }
    }

    fn endpoint_pin(&self, endpoint: &Endpoint) -> Pin {
        match &endpoint.cell {
            Some(cell) => {
                let owner = self
                    .children
                    .member(cell)
                    .map(|member| member.short_name())
                    .unwrap_or_else(|| cell.clone());
                Pin::on(owner, endpoint.pin.clone())
            }
            None => Pin::boundary(endpoint.pin.clone()),
        }
    }

    fn endpoint_port_attrs(&self, endpoint: &Endpoint) -> Attributes {
        endpoint
            .cell
            .as_ref()
            .and_then(|cell| self.children.group_of(cell))
            .map(|group| self.port_attrs(&group.cell_type, &endpoint.pin))
            .unwrap_or_default()
    }

    fn port_attrs(&self, cell_type: &str, pin: &str) -> Attributes {
        without_src(
            self.view
                .attributes_of(cell_type, Entity::Port(port_of_bit(pin))),
        )
    }
}

fn without_src(mut attrs: Attributes) -> Attributes {
    attrs.shift_remove("src");
    attrs
}
