//! Timing annotations of leaf primitives.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::netlist::Direction;

const DELAY_CONST_PREFIX: &str = "DELAY_CONST_";
const DELAY_MATRIX_PREFIX: &str = "DELAY_MATRIX_";

/// A timing specification attached to a port.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TimingSpec {
    /// Setup time relative to a clock.
    Setup { clock: ArcStr, value: ArcStr },
    /// Hold time relative to a clock.
    Hold { clock: ArcStr, value: ArcStr },
    /// Clock-to-output delay. Only valid on outputs.
    ClockToQ { clock: ArcStr, max: ArcStr },
    /// A constant maximum delay from `input` to the port.
    DelayConstant { input: ArcStr, max: ArcStr },
    /// A delay matrix from `input` to the port.
    ///
    /// Columns are input bits and rows are output bits.
    DelayMatrix {
        input: ArcStr,
        rows: Vec<Vec<ArcStr>>,
    },
}

impl TimingSpec {
    /// Parses a timing attribute, returning [`None`] if `key` is not one.
    pub fn parse(module: &str, port: &str, key: &str, value: &str) -> Result<Option<Self>> {
        let bad = |reason: &str| Error::BadTiming {
            module: module.into(),
            port: port.into(),
            reason: reason.into(),
        };
        let clocked = || {
            let mut parts = value.split(' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(clock), Some(value), None) if !clock.is_empty() && !value.is_empty() => {
                    Ok((ArcStr::from(clock), ArcStr::from(value)))
                }
                _ => Err(bad(&format!(
                    "`{key}` must be of the form \"clock value\", found \"{value}\""
                ))),
            }
        };

        let spec = match key {
            "SETUP" => {
                let (clock, value) = clocked()?;
                Self::Setup { clock, value }
            }
            "HOLD" => {
                let (clock, value) = clocked()?;
                Self::Hold { clock, value }
            }
            "CLK_TO_Q" => {
                let (clock, max) = clocked()?;
                Self::ClockToQ { clock, max }
            }
            _ => {
                if let Some(input) = key.strip_prefix(DELAY_CONST_PREFIX) {
                    Self::DelayConstant {
                        input: input.into(),
                        max: value.trim().into(),
                    }
                } else if let Some(input) = key.strip_prefix(DELAY_MATRIX_PREFIX) {
                    Self::DelayMatrix {
                        input: input.into(),
                        rows: parse_matrix(value),
                    }
                } else {
                    return Ok(None);
                }
            }
        };
        Ok(Some(spec))
    }

    /// Checks that this spec is allowed on a port of the given direction.
    pub fn check_direction(&self, module: &str, port: &str, direction: Direction) -> Result<()> {
        if let Self::ClockToQ { .. } = self {
            if direction != Direction::Output {
                return Err(Error::BadTiming {
                    module: module.into(),
                    port: port.into(),
                    reason: arcstr::format!(
                        "only output ports can have CLK_TO_Q, but `{}` is an {}",
                        port,
                        direction
                    ),
                });
            }
        }
        Ok(())
    }
}

fn parse_matrix(value: &str) -> Vec<Vec<ArcStr>> {
    value
        .split(';')
        .map(|row| row.split_whitespace().map(ArcStr::from).collect::<Vec<_>>())
        .filter(|row| !row.is_empty())
        .collect()
}

/// A timing specification bound to the port it annotates.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimingAnnotation {
    /// The annotated port.
    pub port: ArcStr,
    /// The specification.
    pub spec: TimingSpec,
}
