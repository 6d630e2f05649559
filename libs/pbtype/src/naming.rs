//! Structured instance names.
//!
//! Elaboration flattens generate blocks into names such as
//! `$genblock$/path/to/file.sim.v:12$64[57].\comb`. These are parsed once,
//! at the netlist boundary, into an [`InstanceName`] holding the base name
//! and the array index. Nothing downstream looks at raw names again.

use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

lazy_static! {
    static ref GENBLOCK_REGEX: Regex =
        Regex::new(r"^\$genblock\$.*:[0-9]+\$[0-9]+\[(.*)\]\.\\(.*)$").unwrap();
    static ref INDEX_REGEX: Regex = Regex::new(r"\[[0-9]+\]").unwrap();
}

/// The parsed name of a cell instance.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct InstanceName {
    base: ArcStr,
    suffix: Option<ArcStr>,
}

impl InstanceName {
    /// Creates an instance name from its parts.
    pub fn new(base: impl Into<ArcStr>, suffix: Option<ArcStr>) -> Self {
        Self {
            base: base.into(),
            suffix,
        }
    }

    /// The name with any array index removed.
    ///
    /// Instances sharing a base name form one group.
    #[inline]
    pub fn base(&self) -> &ArcStr {
        &self.base
    }

    /// The raw text between the trailing brackets, if any.
    #[inline]
    pub fn suffix(&self) -> Option<&ArcStr> {
        self.suffix.as_ref()
    }

    /// The array index, if the suffix is numeric.
    pub fn index(&self) -> Option<usize> {
        self.suffix.as_ref().and_then(|s| s.parse().ok())
    }

    /// The short name, `base[suffix]` or `base`.
    pub fn short_name(&self) -> ArcStr {
        match &self.suffix {
            Some(suffix) => arcstr::format!("{}[{}]", self.base, suffix),
            None => self.base.clone(),
        }
    }
}

impl Display for InstanceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.suffix {
            Some(suffix) => write!(f, "{}[{}]", self.base, suffix),
            None => write!(f, "{}", self.base),
        }
    }
}

/// Parses a raw instance name into an [`InstanceName`].
///
/// Generate-block names are converted to array form, and a trailing
/// `[...]` on any other name is taken as its index. Only the last bracket
/// pair counts, so `i[1][3]` has base `i[1]` and index 3.
///
/// # Examples
///
/// ```
/// use pbtype::naming::strip_name;
///
/// let n = strip_name(r"$genblock$/tests/multiple_instance.sim.v:12$64[57].\comb").unwrap();
/// assert_eq!(n.short_name(), "comb[57]");
/// assert_eq!(n.base(), "comb");
/// assert_eq!(n.index(), Some(57));
///
/// let n = strip_name("lut").unwrap();
/// assert_eq!(n.short_name(), "lut");
/// assert_eq!(n.index(), None);
/// ```
pub fn strip_name(raw: &str) -> std::result::Result<InstanceName, InvalidName> {
    if raw.starts_with("$genblock$") {
        let caps = GENBLOCK_REGEX.captures(raw).ok_or(InvalidName)?;
        return Ok(InstanceName::new(&caps[2], Some(ArcStr::from(&caps[1]))));
    }
    Ok(split_index(raw))
}

/// Parses a raw instance name inside `module`, attaching context to failures.
pub(crate) fn parse_instance(module: &str, raw: &str) -> Result<InstanceName> {
    strip_name(raw).map_err(|_| Error::InvalidInstanceName {
        module: module.into(),
        name: raw.into(),
    })
}

/// The error returned when a generate-block name cannot be parsed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("malformed generate-block instance name")]
pub struct InvalidName;

fn split_index(raw: &str) -> InstanceName {
    if let Some(open) = raw.strip_suffix(']').and_then(|r| r.rfind('[')) {
        if open > 0 {
            let suffix = &raw[open + 1..raw.len() - 1];
            return InstanceName::new(&raw[..open], Some(ArcStr::from(suffix)));
        }
    }
    InstanceName::new(raw, None)
}

/// Converts a hierarchical name into one that is legal as a pb name.
///
/// Dots become underscores. The first index in the middle of the name
/// moves to the end, and every other occurrence of it is dropped.
///
/// # Examples
///
/// ```
/// use pbtype::naming::normalize_pb_name;
/// assert_eq!(
///     normalize_pb_name("output_dffs_gen[0].q_out_ff"),
///     "output_dffs_gen_q_out_ff_0"
/// );
/// assert_eq!(normalize_pb_name("gen[0].x[0].ff"), "gen_x_ff_0");
/// assert_eq!(normalize_pb_name("lut[3]"), "lut[3]");
/// ```
pub fn normalize_pb_name(name: &str) -> ArcStr {
    let inner = inner_index(name);
    let mut normalized = name.replace('.', "_");
    if let Some((start, end)) = inner {
        let index = &name[start + 1..end - 1];
        let index_text = &name[start..end];
        normalized = normalized.replace(index_text, "");
        normalized.push('_');
        normalized.push_str(index);
    }
    normalized.into()
}

/// The byte range of the first `[N]` that does not end the name.
fn inner_index(name: &str) -> Option<(usize, usize)> {
    INDEX_REGEX
        .find_iter(name)
        .find(|m| m.end() != name.len())
        .map(|m| (m.start(), m.end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn genblock_names() {
        let n = strip_name(r"$genblock$/vlog/tests/multiple_instance.sim.v:15$10[3].\comba").unwrap();
        assert_eq!(n.short_name(), "comba[3]");
        assert_eq!(n.index(), Some(3));
    }

    #[test]
    fn malformed_genblock_names_are_rejected() {
        assert_eq!(strip_name("$genblock$garbage"), Err(InvalidName));
        let err = parse_instance("TOP", "$genblock$garbage").unwrap_err();
        assert!(matches!(err, Error::InvalidInstanceName { .. }));
    }

    #[test]
    fn nested_brackets_keep_leading_index() {
        let n = strip_name("i[1][2]").unwrap();
        assert_eq!(n.base(), "i[1]");
        assert_eq!(n.index(), Some(2));
        assert_eq!(n.short_name(), "i[1][2]");
    }

    #[test]
    fn non_numeric_suffix_has_no_index() {
        let n = strip_name("a[x]").unwrap();
        assert_eq!(n.base(), "a");
        assert_eq!(n.suffix().map(|s| s.as_str()), Some("x"));
        assert_eq!(n.index(), None);
    }

    #[test]
    fn bracket_only_names_are_plain() {
        let n = strip_name("[3]").unwrap();
        assert_eq!(n.base(), "[3]");
        assert_eq!(n.suffix(), None);
    }

    #[test]
    fn normalize_plain_names() {
        assert_eq!(normalize_pb_name("a.b"), "a_b");
        assert_eq!(normalize_pb_name("LUT"), "LUT");
    }

    #[test]
    fn repeated_inner_index_is_dropped_everywhere() {
        assert_eq!(normalize_pb_name("gen[0].x[0].ff"), "gen_x_ff_0");
        assert_eq!(normalize_pb_name("gen[2].x[2].ff[1]"), "gen_x_ff[1]_2");
    }
}
