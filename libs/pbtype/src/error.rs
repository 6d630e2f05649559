//! Error types and error collection.
//!
//! Every condition below is fatal except the two warnings. An inconsistent
//! topology could silently produce a wrong architecture downstream.
//! Components still collect every issue they find at one hierarchy level
//! into [`Errors`] before giving up, so a single run reports all problems
//! of that level.

use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use diagnostics::{Diagnostic, IssueSet, Severity};
use itertools::Itertools;

use crate::interconnect::Pin;
use crate::metadata::MetadataScope;
use crate::netlist::NetId;

/// A result type returning a single compiler error.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a group of sibling instances could not be formed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GroupingFault {
    /// Two members of the group instantiate different modules.
    TypeMismatch {
        /// The type of the first member.
        expected: ArcStr,
        /// The conflicting type.
        found: ArcStr,
    },
    /// A member of a multi-member group has no numeric index.
    MissingIndex,
    /// The member indices are not exactly `0..count`.
    NonContiguous,
}

impl Display for GroupingFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "members have different types (`{expected}` vs `{found}`)")
            }
            Self::MissingIndex => write!(f, "a member has no numeric index"),
            Self::NonContiguous => write!(f, "indices are not contiguous from zero"),
        }
    }
}

/// A compiler issue.
///
/// Every variant is an error except the two noted as warnings, which are
/// recorded but never fail a build.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// Sibling instances sharing a prefix do not form a valid array.
    #[error("cannot group instances `{prefix}` in module `{module}`: {fault} ({})", .members.iter().join(", "))]
    Grouping {
        module: ArcStr,
        prefix: ArcStr,
        fault: GroupingFault,
        members: Vec<ArcStr>,
    },
    /// A generate-block instance name does not follow the expected grammar.
    #[error("instance name `{name}` in module `{module}` is not a valid generate-block name")]
    InvalidInstanceName { module: ArcStr, name: ArcStr },
    /// An input pin of an instance has no driver.
    #[error("pin `{cell}.{pin}` in module `{module}` has no driver")]
    UnconnectedInput {
        module: ArcStr,
        cell: ArcStr,
        pin: ArcStr,
    },
    /// An input pin of an instance has more than one driver.
    #[error("pin `{cell}.{pin}` in module `{module}` is driven by {} through {net}", .drivers.iter().join(", "))]
    MultiDriver {
        module: ArcStr,
        cell: ArcStr,
        pin: ArcStr,
        net: NetId,
        drivers: Vec<ArcStr>,
    },
    /// The driver port, sink port and net disagree on an attribute.
    #[error("attribute `{key}` on connection {driver} -> {sink} in module `{module}` has conflicting values: {}", .values.iter().join(", "))]
    AttributeConflict {
        module: ArcStr,
        driver: Pin,
        sink: Pin,
        key: ArcStr,
        values: Vec<ArcStr>,
    },
    /// A routing instance does not drive exactly one sink from exactly one pin.
    #[error("mux `{mux}` in module `{module}` must drive exactly one sink from one output, found: {}", .outputs.iter().join(", "))]
    MultiOutputMux {
        module: ArcStr,
        mux: ArcStr,
        outputs: Vec<ArcStr>,
    },
    /// A routing instance is connected directly to another routing instance.
    #[error("mux output {driver} drives mux input {sink} in module `{module}`; nest the muxes in containers instead")]
    RoutingChain {
        module: ArcStr,
        driver: Pin,
        sink: Pin,
    },
    /// A mux input pin is assigned more than one driver.
    #[error("mux input `{mux}.{pin}` in module `{module}` is driven by both {first} and {second}")]
    DuplicateMuxInput {
        module: ArcStr,
        mux: ArcStr,
        pin: ArcStr,
        first: Pin,
        second: Pin,
    },
    /// A mode without child instances declares metadata.
    #[error("mode `{mode}` of module `{module}` has no children but declares metadata ({})", .keys.iter().join(", "))]
    ModeMetadataWithoutChildren {
        module: ArcStr,
        mode: ArcStr,
        keys: Vec<ArcStr>,
    },
    /// An instance array has a different number of prefixes than members.
    #[error("instance array `{prefix}` in module `{module}` has {members} members but {prefixes} prefixes")]
    PrefixCountMismatch {
        module: ArcStr,
        prefix: ArcStr,
        members: usize,
        prefixes: usize,
    },
    /// Two metadata sources disagree on a non-concatenable key.
    #[error("metadata conflict on `{key}`: `{existing}` vs `{new}`")]
    MetadataConflict {
        key: ArcStr,
        existing: ArcStr,
        new: ArcStr,
    },
    /// A metadata key was used at a scope where it is not allowed.
    #[error("metadata `{key}` is not allowed on {scope} `{owner}`")]
    ScopeViolation {
        key: ArcStr,
        scope: MetadataScope,
        owner: ArcStr,
    },
    /// The `CLASS` attribute names an unknown class.
    #[error("module `{module}` has unknown class `{class}`")]
    UnknownClass { module: ArcStr, class: ArcStr },
    /// A timing attribute on a port is malformed.
    #[error("bad timing specification on port `{port}` of module `{module}`: {reason}")]
    BadTiming {
        module: ArcStr,
        port: ArcStr,
        reason: ArcStr,
    },
    /// Bidirectional ports cannot be described.
    #[error("port `{port}` of module `{module}` is bidirectional, which is not supported")]
    BidirectionalPort { module: ArcStr, port: ArcStr },
    /// Module names must be upper case.
    #[error("module name `{module}` must be upper case")]
    InvalidModuleName { module: ArcStr },
    /// A module is not present in the netlist.
    #[error("module `{module}` not found in netlist")]
    MissingModule { module: ArcStr },
    /// Re-elaborating a module for a mode failed.
    #[error("failed to elaborate module `{module}` in mode `{mode}`: {message}")]
    Elaboration {
        module: ArcStr,
        mode: ArcStr,
        message: ArcStr,
    },
    /// A thread building a mode subtree panicked.
    #[error("building mode `{mode}` of module `{module}` panicked")]
    ModeBuildPanicked { module: ArcStr, mode: ArcStr },
    /// Warning: the `MODES` attribute has an empty entry, which is ignored.
    #[error("ignoring empty entry in MODES \"{modes}\" of module `{module}`")]
    EmptyModeEntry { module: ArcStr, modes: ArcStr },
    /// Warning: more than one flip-flop registers the same path.
    #[error("path {input} -> {output} of module `{module}` is registered by more than one flip-flop ({})", .flops.iter().join(", "))]
    AmbiguousRegistration {
        module: ArcStr,
        input: ArcStr,
        output: ArcStr,
        flops: Vec<ArcStr>,
    },
}

/// An ordered, report-all collection of compiler issues.
///
/// Issues are logged at the moment they are added. The collection is
/// fatal if it holds at least one issue of [`Severity::Error`].
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Errors {
    issues: IssueSet<Error>,
}

impl Errors {
    /// Creates a new, empty collection.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given issue to the collection and logs it.
    #[inline]
    pub fn add(&mut self, error: Error) {
        self.issues.add_and_log(error);
    }

    /// Moves all issues of `other` into this collection.
    ///
    /// The issues have already been logged and are not logged again.
    #[inline]
    pub fn append(&mut self, other: Errors) {
        self.issues.append(other.issues);
    }

    /// Records the issues of `result`, if any, returning its value otherwise.
    pub fn check<T>(&mut self, result: std::result::Result<T, Errors>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(errors) => {
                self.append(errors);
                None
            }
        }
    }

    /// Returns an iterator over all issues.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.issues.iter()
    }

    /// Returns an iterator over the issues of [`Severity::Warning`].
    pub fn warnings(&self) -> impl Iterator<Item = &Error> {
        self.issues
            .iter()
            .filter(|issue| issue.severity() == Severity::Warning)
    }

    /// The number of issues in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns `true` if there are no issues.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns `true` if any issue is an error.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.issues.has_error()
    }

    /// Returns `Err(self)` if the collection holds an error, and
    /// `Ok(value)` otherwise.
    ///
    /// Warnings alone do not fail; they are dropped with `self`. Use
    /// [`Errors::warnings`] beforehand to keep them.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, Errors> {
        if self.has_error() {
            Err(self)
        } else {
            Ok(value)
        }
    }
}

impl Diagnostic for Error {
    fn severity(&self) -> Severity {
        match self {
            Self::EmptyModeEntry { .. } | Self::AmbiguousRegistration { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    fn help(&self) -> Option<Box<dyn Display>> {
        let help = match self {
            Self::RoutingChain { .. } => "place each mux in its own container level",
            Self::UnconnectedInput { .. } => "tie the pin to a constant or a boundary port",
            Self::BidirectionalPort { .. } => "split the port into an input and an output",
            _ => return None,
        };
        Some(Box::new(help))
    }
}

impl From<Error> for Errors {
    fn from(value: Error) -> Self {
        let mut errors = Self::new();
        errors.add(value);
        errors
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = <IssueSet<Error> as IntoIterator>::IntoIter;
    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

impl Display for Errors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.issues)
    }
}

impl std::error::Error for Errors {}

/// An error loading build options.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The options file could not be read.
    #[error("could not read build options: {0}")]
    Io(#[from] std::io::Error),
    /// The options file is not valid TOML for [`BuildOptions`](crate::config::BuildOptions).
    #[error("could not parse build options: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn missing(name: &str) -> Error {
        Error::MissingModule {
            module: name.into(),
        }
    }

    #[test]
    fn errors_keep_insertion_order() {
        let mut errors = Errors::new();
        errors.add(missing("B"));
        errors.add(missing("A"));
        let names: Vec<_> = errors.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "module `B` not found in netlist",
                "module `A` not found in netlist"
            ]
        );
    }

    #[test]
    fn check_collects_failures() {
        let mut errors = Errors::new();
        assert_eq!(errors.check(Ok::<_, Errors>(3)), Some(3));
        assert_eq!(errors.check::<()>(Err(missing("X").into())), None);
        assert_eq!(errors.len(), 1);
        assert!(errors.clone().into_result(()).is_err());
        assert!(Errors::new().into_result(()).is_ok());
    }

    #[test]
    fn warnings_do_not_fail() {
        let mut errors = Errors::new();
        errors.add(Error::EmptyModeEntry {
            module: "M".into(),
            modes: "A;;B".into(),
        });
        assert_eq!(errors.warnings().count(), 1);
        assert!(!errors.has_error());
        assert!(errors.clone().into_result(()).is_ok());

        errors.add(missing("M"));
        assert!(errors.has_error());
        assert_eq!(errors.warnings().count(), 1);
        assert_eq!(errors.into_result(()).unwrap_err().len(), 2);
    }

    #[test]
    fn help_is_shown_with_the_error() {
        let errors = Errors::from(Error::BidirectionalPort {
            module: "M".into(),
            port: "IO".into(),
        });
        assert_eq!(
            errors.to_string(),
            "error: port `IO` of module `M` is bidirectional, which is not supported\n  help: split the port into an input and an output\n"
        );
    }

    #[test]
    fn display_lists_every_error() {
        let mut errors = Errors::from(missing("A"));
        errors.add(Error::InvalidModuleName {
            module: "lower".into(),
        });
        assert_eq!(
            errors.to_string(),
            "error: module `A` not found in netlist\nerror: module name `lower` must be upper case\n"
        );
    }
}
