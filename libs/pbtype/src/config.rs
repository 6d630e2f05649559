//! Build options.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Options controlling a build.
///
/// Missing keys take their default values.
///
/// # Examples
///
/// ```
/// use pbtype::config::BuildOptions;
///
/// let options = BuildOptions::from_toml_str("parallel_modes = false").unwrap();
/// assert!(!options.parallel_modes);
/// assert!(options.require_uppercase_names);
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Build the subtrees of a module's modes on separate threads.
    pub parallel_modes: bool,
    /// Reject modules whose names are not upper case.
    pub require_uppercase_names: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            parallel_modes: true,
            require_uppercase_names: true,
        }
    }
}

impl BuildOptions {
    /// Parses options from TOML text.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    /// Reads options from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml = std::fs::read_to_string(path)?;
        Self::from_toml_str(&toml)
    }

    /// Returns these options with mode subtrees built sequentially.
    pub fn sequential(self) -> Self {
        Self {
            parallel_modes: false,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn empty_toml_gives_defaults() {
        assert_eq!(BuildOptions::from_toml_str("").unwrap(), BuildOptions::default());
    }

    #[test]
    fn all_keys() {
        let options = BuildOptions::from_toml_str(
            "parallel_modes = false\nrequire_uppercase_names = false\n",
        )
        .unwrap();
        assert_eq!(
            options,
            BuildOptions {
                parallel_modes: false,
                require_uppercase_names: false,
            }
        );
    }

    #[test]
    fn bad_value() {
        let err = BuildOptions::from_toml_str("parallel_modes = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file() {
        let err = BuildOptions::from_file("/nonexistent/pbtype.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
