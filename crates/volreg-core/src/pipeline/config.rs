use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolregError};
use crate::interpolation::Interpolation;
use crate::register::linear::LinearOptions;
use crate::register::metric::CostType;
use crate::register::nonlinear::NonlinearParams;
use crate::transform::RegType;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub reg_type: RegType,
    pub cost: CostType,
    /// Score candidates in both directions during the linear search.
    pub bidirectional: bool,
    /// Edge-based nonlinear registration. Unset means on for label subjects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<bool>,
    /// Default interpolation for warping other volumes.
    pub interpolation: Interpolation,
    /// Worker thread count; the global rayon pool when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    pub nonlinear: NonlinearParams,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            reg_type: RegType::Affine,
            cost: CostType::MutualInformation,
            bidirectional: true,
            edge: None,
            interpolation: Interpolation::Cubic,
            threads: None,
            nonlinear: NonlinearParams::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| VolregError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VolregError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn linear_options(&self) -> LinearOptions {
        LinearOptions {
            reg_type: self.reg_type,
            cost: self.cost,
            bidirectional: self.bidirectional,
        }
    }
}

impl std::fmt::Display for RegistrationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let edge = match self.edge {
            Some(true) => "on",
            Some(false) => "off",
            None => "auto",
        };
        write!(
            f,
            "{} / {} (bidirectional: {}), edge: {}, nonlinear: resolution {} smoothness {} constraint {} iterations {}",
            self.reg_type,
            self.cost,
            self.bidirectional,
            edge,
            self.nonlinear.resolution,
            self.nonlinear.smoothness,
            self.nonlinear.constraint,
            self.nonlinear.iterations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips() {
        let config = RegistrationConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[nonlinear]"));
        assert_eq!(RegistrationConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = RegistrationConfig::from_toml_str(
            "cost = \"Correlation\"\nedge = true\n\n[nonlinear]\niterations = 4\n",
        )
        .unwrap();
        assert_eq!(config.cost, CostType::Correlation);
        assert_eq!(config.edge, Some(true));
        assert_eq!(config.nonlinear.iterations, 4);
        assert_eq!(config.nonlinear.resolution, 1);
        assert!(config.bidirectional);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            RegistrationConfig::from_toml_str("cost = 3"),
            Err(VolregError::Config(_))
        ));
    }
}
