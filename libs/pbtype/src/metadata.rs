//! FASM metadata collection and merging.
//!
//! Metadata is read from `FASM_PREFIX`, `FASM_FEATURES` and `FASM_PARAMS`
//! attributes. Each may be qualified with a mode, as in `FASM_FEATURES_A`,
//! in which case it only applies while mode `A` is being built.

use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Errors, Result};
use crate::grouping::ChildGroup;
use crate::netlist::{Attributes, Entity, NetlistView};

lazy_static! {
    static ref FASM_ATTR_REGEX: Regex =
        Regex::new(r"^(FASM_PREFIX|FASM_FEATURES|FASM_PARAMS)(?:_(.+))?$").unwrap();
}

/// Where a piece of metadata was declared.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MetadataScope {
    /// On a cell instance.
    Instance,
    /// On a module definition.
    Module,
}

impl Display for MetadataScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Instance => write!(f, "instance"),
            Self::Module => write!(f, "module"),
        }
    }
}

/// The recognized kinds of metadata.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MetaKind {
    /// The prefix of an instance. Concatenable.
    Prefix,
    /// Features of a module.
    Features,
    /// Parameter associations of a module.
    Params,
}

impl MetaKind {
    /// The key under which this kind is stored.
    pub fn key(&self) -> &'static str {
        match *self {
            Self::Prefix => "fasm_prefix",
            Self::Features => "fasm_features",
            Self::Params => "fasm_params",
        }
    }

    /// Looks up a kind by its stored key.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "fasm_prefix" => Some(Self::Prefix),
            "fasm_features" => Some(Self::Features),
            "fasm_params" => Some(Self::Params),
            _ => None,
        }
    }

    /// Returns `true` if values of this kind are appended when merged.
    #[inline]
    pub fn is_concatenable(&self) -> bool {
        *self == Self::Prefix
    }

    /// Returns `true` if this kind may be declared at `scope`.
    pub fn allowed_in(&self, scope: MetadataScope) -> bool {
        match scope {
            MetadataScope::Instance => *self == Self::Prefix,
            MetadataScope::Module => *self != Self::Prefix,
        }
    }
}

/// Parses a metadata attribute name into its kind and optional mode.
///
/// Returns [`None`] if `attr` is not a metadata attribute.
///
/// # Examples
///
/// ```
/// use pbtype::metadata::{parse_attr_name, MetaKind};
/// assert_eq!(parse_attr_name("FASM_PREFIX"), Some((MetaKind::Prefix, None)));
/// assert_eq!(
///     parse_attr_name("FASM_FEATURES_LUT4"),
///     Some((MetaKind::Features, Some("LUT4")))
/// );
/// assert_eq!(parse_attr_name("CLASS"), None);
/// ```
pub fn parse_attr_name(attr: &str) -> Option<(MetaKind, Option<&str>)> {
    let caps = FASM_ATTR_REGEX.captures(attr)?;
    let kind = match caps.get(1)?.as_str() {
        "FASM_PREFIX" => MetaKind::Prefix,
        "FASM_FEATURES" => MetaKind::Features,
        _ => MetaKind::Params,
    };
    Some((kind, caps.get(2).map(|m| m.as_str())))
}

/// Metadata attached to a node, keyed by lower-case key.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    entries: IndexMap<ArcStr, ArcStr>,
}

impl Metadata {
    /// Creates an empty metadata map.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the metadata attributes in `attrs` that apply to `mode`.
    ///
    /// Outside of a mode only unqualified attributes apply.
    pub fn from_attributes(attrs: &Attributes, mode: Option<&str>) -> Self {
        let mut metadata = Self::new();
        for (attr, value) in attrs.iter() {
            let Some((kind, qualifier)) = parse_attr_name(attr) else {
                continue;
            };
            if qualifier != mode {
                continue;
            }
            metadata
                .entries
                .insert(ArcStr::from(kind.key()), value.clone());
        }
        metadata
    }

    /// Checks that every key may be declared at `scope`.
    pub fn check_scope(&self, scope: MetadataScope, owner: &str) -> std::result::Result<(), Errors> {
        let mut errors = Errors::new();
        for key in self.entries.keys() {
            if let Some(kind) = MetaKind::from_key(key) {
                if !kind.allowed_in(scope) {
                    errors.add(Error::ScopeViolation {
                        key: key.clone(),
                        scope,
                        owner: owner.into(),
                    });
                }
            }
        }
        errors.into_result(())
    }

    /// Inserts a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<ArcStr>, value: impl Into<ArcStr>) -> Option<ArcStr> {
        self.entries.insert(key.into(), value.into())
    }

    /// Gets the value of `key`.
    pub fn get(&self, key: &str) -> Option<&ArcStr> {
        self.entries.get(key)
    }

    /// Gets the value of a metadata kind.
    #[inline]
    pub fn kind(&self, kind: MetaKind) -> Option<&ArcStr> {
        self.get(kind.key())
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &ArcStr)> {
        self.entries.iter()
    }

    /// The keys, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &ArcStr> {
        self.entries.keys()
    }

    /// The number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges `other` into `self`.
    ///
    /// Concatenable keys are joined with a space. Any other key present
    /// in both must have the same value.
    pub fn merge(&mut self, other: &Metadata) -> Result<()> {
        for (key, value) in other.entries.iter() {
            match self.entries.get_mut(key) {
                None => {
                    self.entries.insert(key.clone(), value.clone());
                }
                Some(existing) => {
                    if MetaKind::from_key(key).is_some_and(|k| k.is_concatenable()) {
                        *existing = arcstr::format!("{} {}", existing, value);
                    } else if existing != value {
                        return Err(Error::MetadataConflict {
                            key: key.clone(),
                            existing: existing.clone(),
                            new: value.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the result of merging `other` into `self`.
    pub fn merged(mut self, other: &Metadata) -> Result<Self> {
        self.merge(other)?;
        Ok(self)
    }
}

impl<K: Into<ArcStr>, V: Into<ArcStr>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The metadata a module declares on itself in the given mode.
pub fn module_metadata<V: NetlistView>(
    view: &V,
    module: &str,
    mode: Option<&str>,
) -> std::result::Result<Metadata, Errors> {
    let metadata = Metadata::from_attributes(&view.attributes_of(module, Entity::Module), mode);
    metadata.check_scope(MetadataScope::Module, module)?;
    Ok(metadata)
}

/// Merges the metadata of a child group.
///
/// Each member contributes its instance metadata. An array member takes
/// the element of its semicolon-separated prefix list matching its index.
/// The metadata the child type declares on itself, `included`, is merged
/// last.
pub fn group_metadata(
    module: &str,
    group: &ChildGroup,
    included: &Metadata,
) -> std::result::Result<Metadata, Errors> {
    let mut errors = Errors::new();
    let mut metadata = Metadata::new();
    let count = group.members.len();
    let mut prefixed = 0;

    for (i, member) in group.members.iter().enumerate() {
        let mut own = Metadata::from_attributes(&member.attrs, None);
        let owner = member.name.short_name();
        if let Err(e) = own.check_scope(MetadataScope::Instance, &owner) {
            errors.append(e);
            continue;
        }

        if let Some(prefix) = own.kind(MetaKind::Prefix).cloned() {
            prefixed += 1;
            if count > 1 {
                let prefixes: Vec<&str> = prefix.split(';').collect();
                if prefixes.len() != count {
                    errors.add(Error::PrefixCountMismatch {
                        module: module.into(),
                        prefix: group.prefix.clone(),
                        members: count,
                        prefixes: prefixes.len(),
                    });
                    continue;
                }
                own.insert(MetaKind::Prefix.key(), prefixes[i]);
            }
        }

        if let Err(e) = metadata.merge(&own) {
            errors.add(e);
        }
    }

    if prefixed > 0 && prefixed != count {
        errors.add(Error::PrefixCountMismatch {
            module: module.into(),
            prefix: group.prefix.clone(),
            members: count,
            prefixes: prefixed,
        });
    }

    if let Err(e) = metadata.merge(included) {
        errors.add(e);
    }

    errors.into_result(metadata)
}
