//! Grouping of child instances into arrays.
//!
//! Generate loops elaborate into flat instances named `lut[0]`, `lut[1]`,
//! and so on. Instances sharing a base name are gathered into one
//! [`ChildGroup`] so that the emitter can describe them as a single
//! repeated child.

use std::collections::HashMap;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{span, Level};

use crate::attrs::ModuleClass;
use crate::error::{Error, Errors, GroupingFault};
use crate::metadata::Metadata;
use crate::naming::{normalize_pb_name, parse_instance, InstanceName};
use crate::netlist::{Attributes, Entity, NetlistView};

/// A child instance as listed by the netlist, before grouping.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawInstance {
    /// The raw instance name.
    pub name: ArcStr,
    /// The instantiated module.
    pub cell_type: ArcStr,
    /// Attributes on the instance.
    pub attrs: Attributes,
}

impl RawInstance {
    /// Creates a new [`RawInstance`].
    pub fn new(name: impl Into<ArcStr>, cell_type: impl Into<ArcStr>, attrs: Attributes) -> Self {
        Self {
            name: name.into(),
            cell_type: cell_type.into(),
            attrs,
        }
    }
}

/// One member of a [`ChildGroup`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChildMember {
    /// The parsed instance name.
    pub name: InstanceName,
    /// The raw instance name.
    pub raw: ArcStr,
    /// Attributes on the instance.
    pub attrs: Attributes,
}

impl ChildMember {
    /// Creates a new [`ChildMember`].
    pub fn new(name: InstanceName, raw: impl Into<ArcStr>, attrs: Attributes) -> Self {
        Self {
            name,
            raw: raw.into(),
            attrs,
        }
    }

    /// The short name of the member, e.g. `lut[0]`.
    #[inline]
    pub fn short_name(&self) -> ArcStr {
        self.name.short_name()
    }
}

/// Sibling instances of one type sharing a prefix.
///
/// Members are in index order.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChildGroup {
    /// The shared base name.
    pub prefix: ArcStr,
    /// The module instantiated by every member.
    pub cell_type: ArcStr,
    /// The members.
    pub members: Vec<ChildMember>,
    /// Metadata merged from the members and the child type.
    pub metadata: Metadata,
}

impl ChildGroup {
    /// Creates a group with no metadata.
    pub fn new(
        prefix: impl Into<ArcStr>,
        cell_type: impl Into<ArcStr>,
        members: Vec<ChildMember>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            cell_type: cell_type.into(),
            members,
            metadata: Metadata::new(),
        }
    }

    /// The number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the group has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The name of the group as a legal pb name.
    pub fn pb_name(&self) -> ArcStr {
        normalize_pb_name(&self.prefix)
    }

    /// Returns this group with the given metadata.
    pub fn with_metadata(self, metadata: Metadata) -> Self {
        Self { metadata, ..self }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Slot {
    routing: bool,
    group: usize,
    member: usize,
}

/// The grouped children of one container.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Children {
    /// Ordinary child groups, in order of first appearance.
    pub groups: Vec<ChildGroup>,
    /// Groups of routing instances, in order of first appearance.
    pub routing: Vec<ChildGroup>,
    slots: HashMap<ArcStr, Slot>,
}

impl Children {
    /// Returns `true` if there are no children at all.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.routing.is_empty()
    }

    fn slot(&self, raw: &str) -> Option<(&ChildGroup, &ChildMember)> {
        let slot = self.slots.get(raw)?;
        let groups = if slot.routing {
            &self.routing
        } else {
            &self.groups
        };
        let group = &groups[slot.group];
        Some((group, &group.members[slot.member]))
    }

    /// Looks up a member by raw instance name.
    pub fn member(&self, raw: &str) -> Option<&ChildMember> {
        self.slot(raw).map(|(_, member)| member)
    }

    /// Looks up the group of a member by raw instance name.
    pub fn group_of(&self, raw: &str) -> Option<&ChildGroup> {
        self.slot(raw).map(|(group, _)| group)
    }

    /// Returns `true` if the instance is a routing instance.
    pub fn is_routing(&self, raw: &str) -> bool {
        self.slots.get(raw).is_some_and(|slot| slot.routing)
    }

    /// Iterates over every member of every group, ordinary groups first.
    pub fn members(&self) -> impl Iterator<Item = (&ChildGroup, &ChildMember)> {
        self.groups
            .iter()
            .chain(self.routing.iter())
            .flat_map(|group| group.members.iter().map(move |member| (group, member)))
    }

    /// The short names of all routing instances.
    pub fn routing_names(&self) -> Vec<ArcStr> {
        self.routing
            .iter()
            .flat_map(|group| group.members.iter().map(ChildMember::short_name))
            .collect()
    }
}

/// Groups the instances of `module`.
///
/// `is_routing` classifies a cell type as a routing mux.
pub fn group_instances(
    module: &str,
    instances: Vec<RawInstance>,
    is_routing: impl Fn(&str) -> bool,
) -> Result<Children, Errors> {
    let mut errors = Errors::new();
    let mut by_prefix: IndexMap<ArcStr, Vec<(ArcStr, ChildMember)>> = IndexMap::new();

    for instance in instances {
        let name = match parse_instance(module, &instance.name) {
            Ok(name) => name,
            Err(e) => {
                errors.add(e);
                continue;
            }
        };
        by_prefix
            .entry(name.base().clone())
            .or_default()
            .push((
                instance.cell_type,
                ChildMember::new(name, instance.name, instance.attrs),
            ));
    }

    let mut children = Children::default();
    for (prefix, members) in by_prefix {
        match check_group(module, &prefix, members) {
            Ok(group) => {
                let routing = is_routing(&group.cell_type);
                let groups = if routing {
                    &mut children.routing
                } else {
                    &mut children.groups
                };
                for (i, member) in group.members.iter().enumerate() {
                    children.slots.insert(
                        member.raw.clone(),
                        Slot {
                            routing,
                            group: groups.len(),
                            member: i,
                        },
                    );
                }
                groups.push(group);
            }
            Err(e) => errors.add(e),
        }
    }

    errors.into_result(children)
}

fn check_group(
    module: &str,
    prefix: &ArcStr,
    members: Vec<(ArcStr, ChildMember)>,
) -> Result<ChildGroup, Error> {
    let fail = |fault: GroupingFault, members: &[(ArcStr, ChildMember)]| Error::Grouping {
        module: module.into(),
        prefix: prefix.clone(),
        fault,
        members: members.iter().map(|(_, m)| m.short_name()).collect(),
    };

    let cell_type = members[0].0.clone();
    if let Some((found, _)) = members.iter().find(|(ty, _)| *ty != cell_type) {
        return Err(fail(
            GroupingFault::TypeMismatch {
                expected: cell_type.clone(),
                found: found.clone(),
            },
            &members,
        ));
    }

    if members.len() == 1 {
        let members = members.into_iter().map(|(_, m)| m).collect();
        return Ok(ChildGroup::new(prefix.clone(), cell_type, members));
    }

    let mut indexed = Vec::with_capacity(members.len());
    for (_, member) in members.iter() {
        match member.name.index() {
            Some(index) => indexed.push(index),
            None => return Err(fail(GroupingFault::MissingIndex, &members)),
        }
    }
    let mut sorted = indexed.clone();
    sorted.sort_unstable();
    if sorted.iter().enumerate().any(|(i, index)| i != *index) {
        return Err(fail(GroupingFault::NonContiguous, &members));
    }

    let mut ordered: Vec<Option<ChildMember>> = vec![None; members.len()];
    for ((_, member), index) in members.into_iter().zip(indexed) {
        ordered[index] = Some(member);
    }
    Ok(ChildGroup::new(
        prefix.clone(),
        cell_type,
        ordered.into_iter().flatten().collect(),
    ))
}

/// Groups the child instances of `module` in `view`.
///
/// A cell type is a routing mux if its module declares `CLASS="routing"`.
pub fn group_children<V: NetlistView>(view: &V, module: &str) -> Result<Children, Errors> {
    let _guard = span!(Level::INFO, "grouping child instances", module).entered();
    let instances = view
        .cells_of(module)
        .into_iter()
        .map(|cell| {
            let attrs = view.attributes_of(module, Entity::Cell(&cell.name));
            RawInstance::new(cell.name, cell.cell_type, attrs)
        })
        .collect();
    group_instances(module, instances, |ty| {
        view.attributes_of(ty, Entity::Module)
            .get("CLASS")
            .and_then(|class| class.parse::<ModuleClass>().ok())
            == Some(ModuleClass::Routing)
    })
}
