//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::{PdpError, Result};
use crate::policy::MissingChild;

/// Policy decision point configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting of policy nodes accepted by the parser
    ///
    /// Documents are also bound by the JSON decoder's own recursion limit,
    /// which is reached first for values much above the default.
    pub max_depth: usize,

    /// Outcome for a mapper value with no matching child, unless the
    /// document states one
    pub mapper_missing: MissingChild,

    /// Keep decision and load counters in the store
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            mapper_missing: MissingChild::NotApplicable,
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Decode a JSON configuration; missing fields take their defaults
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(s).map_err(|e| PdpError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(PdpError::InvalidConfig("max_depth must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 32);
        assert_eq!(config.mapper_missing, MissingChild::NotApplicable);
        assert!(config.enable_metrics);
    }

    #[test]
    fn test_from_json_str() {
        let config = EngineConfig::from_json_str(r#"{"mapper_missing": "Indeterminate"}"#).unwrap();
        assert_eq!(config.mapper_missing, MissingChild::Indeterminate);
        assert_eq!(config.max_depth, 32);

        assert!(matches!(
            EngineConfig::from_json_str(r#"{"max_depth": 0}"#),
            Err(PdpError::InvalidConfig(_))
        ));
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
