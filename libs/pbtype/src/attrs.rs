//! Typed views of the attributes recognized on modules and ports.
//!
//! Raw attribute maps are parsed once into [`ModuleAttrs`] and
//! [`PortAttrs`]. Keys that are not recognized are kept, untouched,
//! in a passthrough bag for the emitter.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Errors, Result};
use crate::netlist::Attributes;
use crate::timing::TimingSpec;

/// The functional class of a module.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ModuleClass {
    /// A primary input pad.
    Input,
    /// A primary output pad.
    Output,
    /// A look-up table.
    Lut,
    /// A routing multiplexer, folded into mux interconnect by its parent.
    Routing,
    /// A logic multiplexer.
    Mux,
    /// A flip-flop.
    FlipFlop,
}

impl ModuleClass {
    /// The BLIF model implementing this class, if it has a fixed one.
    pub fn blif_model(&self) -> Option<&'static str> {
        match *self {
            Self::Input => Some(".input"),
            Self::Output => Some(".output"),
            Self::Lut => Some(".names"),
            Self::FlipFlop => Some(".latch"),
            Self::Routing | Self::Mux => None,
        }
    }

    /// The pb class of this class, if any.
    pub fn pb_class(&self) -> Option<&'static str> {
        match *self {
            Self::Lut => Some("lut"),
            Self::FlipFlop => Some("flipflop"),
            _ => None,
        }
    }

    /// Returns `true` if modules of this class need no primitive model.
    pub fn has_builtin_model(&self) -> bool {
        matches!(
            *self,
            Self::Input | Self::Output | Self::Lut | Self::Routing | Self::FlipFlop
        )
    }
}

/// The error returned when parsing an unknown [`ModuleClass`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown module class")]
pub struct UnknownClass;

impl FromStr for ModuleClass {
    type Err = UnknownClass;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            "lut" => Ok(Self::Lut),
            "routing" => Ok(Self::Routing),
            "mux" => Ok(Self::Mux),
            "flipflop" => Ok(Self::FlipFlop),
            _ => Err(UnknownClass),
        }
    }
}

impl Display for ModuleClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Lut => write!(f, "lut"),
            Self::Routing => write!(f, "routing"),
            Self::Mux => write!(f, "mux"),
            Self::FlipFlop => write!(f, "flipflop"),
        }
    }
}

/// Attributes recognized on a module definition.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModuleAttrs {
    /// Set by `blackbox`, `whitebox` or `lib_whitebox`.
    pub blackbox: bool,
    /// The `CLASS` attribute.
    pub class: Option<ModuleClass>,
    /// The `MODES` attribute, split and trimmed.
    pub modes: Vec<ArcStr>,
    /// The `MODEL_NAME` attribute.
    pub model_name: Option<ArcStr>,
    /// Every attribute not listed above.
    pub other: Attributes,
}

impl ModuleAttrs {
    /// Parses the attributes of `module`.
    ///
    /// Warnings are recorded into `issues`.
    pub fn parse(module: &str, attrs: &Attributes, issues: &mut Errors) -> Result<Self> {
        let mut parsed = Self::default();
        for (key, value) in attrs.iter() {
            match key.as_str() {
                "blackbox" | "whitebox" | "lib_whitebox" => {
                    parsed.blackbox |= flag(value).unwrap_or(false)
                }
                "CLASS" => {
                    let class = value.parse().map_err(|_| Error::UnknownClass {
                        module: module.into(),
                        class: value.clone(),
                    })?;
                    parsed.class = Some(class);
                }
                "MODES" => parsed.modes = parse_modes(module, value, issues),
                "MODEL_NAME" => parsed.model_name = Some(value.clone()),
                _ => {
                    parsed.other.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(parsed)
    }

    /// Returns `true` if the module declares alternative modes.
    #[inline]
    pub fn has_modes(&self) -> bool {
        !self.modes.is_empty()
    }
}

fn parse_modes(module: &str, value: &ArcStr, issues: &mut Errors) -> Vec<ArcStr> {
    let mut modes = Vec::new();
    let mut empty = false;
    for mode in value.split(';').map(str::trim) {
        if mode.is_empty() {
            empty = true;
            continue;
        }
        modes.push(ArcStr::from(mode));
    }
    if empty {
        issues.add(Error::EmptyModeEntry {
            module: module.into(),
            modes: value.clone(),
        });
    }
    modes
}

/// Attributes recognized on a port.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PortAttrs {
    /// The `CLOCK` override.
    pub clock: Option<bool>,
    /// The `PORT_CLASS` attribute.
    pub port_class: Option<ArcStr>,
    /// The carry chain this port belongs to.
    pub carry: Option<ArcStr>,
    /// The `NO_COMB` override.
    pub no_comb: Option<bool>,
    /// The `NO_SEQ` override.
    pub no_seq: Option<bool>,
    /// Timing specifications attached to the port.
    pub timing: Vec<TimingSpec>,
    /// Every attribute not listed above.
    pub other: Attributes,
}

impl PortAttrs {
    /// Parses the attributes of `port` on `module`.
    pub fn parse(module: &str, port: &str, attrs: &Attributes) -> Result<Self> {
        let mut parsed = Self::default();
        for (key, value) in attrs.iter() {
            match key.as_str() {
                "CLOCK" => parsed.clock = Some(flag(value).unwrap_or(true)),
                "PORT_CLASS" => parsed.port_class = Some(value.clone()),
                "carry" => parsed.carry = Some(value.clone()),
                "NO_COMB" => parsed.no_comb = flag(value),
                "NO_SEQ" => parsed.no_seq = flag(value),
                "src" => {}
                _ => match TimingSpec::parse(module, port, key, value)? {
                    Some(spec) => parsed.timing.push(spec),
                    None => {
                        parsed.other.insert(key.clone(), value.clone());
                    }
                },
            }
        }
        Ok(parsed)
    }
}

/// Interprets an attribute value as an integer flag.
///
/// An empty value, as produced by a bare `(* CLOCK *)`, is [`None`].
fn flag(value: &str) -> Option<bool> {
    value.trim().parse::<i64>().ok().map(|v| v != 0)
}

/// Returns `true` if a port name looks like a clock.
///
/// # Examples
///
/// ```
/// use pbtype::attrs::is_clock_name;
/// assert!(is_clock_name("CLK"));
/// assert!(is_clock_name("wr_clk"));
/// assert!(is_clock_name("Clock"));
/// assert!(!is_clock_name("D"));
/// ```
pub fn is_clock_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("clk") || name.contains("clock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (ArcStr::from(*k), ArcStr::from(*v)))
            .collect()
    }

    #[test]
    fn module_attrs() {
        let mut issues = Errors::new();
        let parsed = ModuleAttrs::parse(
            "CLB",
            &attrs(&[
                ("whitebox", "1"),
                ("CLASS", "lut"),
                ("MODES", "A; B;"),
                ("MODEL_NAME", "clb_model"),
                ("FASM_FEATURES", "X"),
            ]),
            &mut issues,
        )
        .unwrap();
        assert!(parsed.blackbox);
        assert_eq!(parsed.class, Some(ModuleClass::Lut));
        assert_eq!(parsed.modes, vec![ArcStr::from("A"), ArcStr::from("B")]);
        assert_eq!(parsed.model_name.as_deref(), Some("clb_model"));
        assert_eq!(parsed.other.len(), 1);

        assert!(!issues.has_error());
        assert!(matches!(
            issues.warnings().next(),
            Some(Error::EmptyModeEntry { modes, .. }) if modes == "A; B;"
        ));
    }

    #[test]
    fn clean_modes_record_nothing() {
        let mut issues = Errors::new();
        let parsed = ModuleAttrs::parse("M", &attrs(&[("MODES", "A;B")]), &mut issues).unwrap();
        assert_eq!(parsed.modes.len(), 2);
        assert!(issues.is_empty());
    }

    #[test]
    fn unknown_class() {
        let err = ModuleAttrs::parse("M", &attrs(&[("CLASS", "mem")]), &mut Errors::new()).unwrap_err();
        assert_eq!(
            err,
            Error::UnknownClass {
                module: "M".into(),
                class: "mem".into()
            }
        );
    }

    #[test]
    fn blackbox_zero_is_not_blackbox() {
        let parsed = ModuleAttrs::parse("M", &attrs(&[("blackbox", "0")]), &mut Errors::new()).unwrap();
        assert!(!parsed.blackbox);
    }

    #[test]
    fn port_attrs() {
        let parsed = PortAttrs::parse(
            "FF",
            "Q",
            &attrs(&[
                ("CLOCK", "0"),
                ("PORT_CLASS", "D"),
                ("carry", "ADDER"),
                ("CLK_TO_Q", "clk 10e-12"),
                ("src", "ff.sim.v:3"),
                ("keep", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(parsed.clock, Some(false));
        assert_eq!(parsed.port_class.as_deref(), Some("D"));
        assert_eq!(parsed.carry.as_deref(), Some("ADDER"));
        assert_eq!(parsed.timing.len(), 1);
        assert_eq!(parsed.other.keys().collect::<Vec<_>>(), vec!["keep"]);
    }

    #[test]
    fn bare_clock_attribute_forces_clock() {
        let parsed = PortAttrs::parse("M", "C", &attrs(&[("CLOCK", "")])).unwrap();
        assert_eq!(parsed.clock, Some(true));
    }
}
