//! Deployment strategies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Chart keyword prefix recording the strategy of a generated chart
pub const STRATEGY_KEYWORD_PREFIX: &str = "deployment_strategy=";

/// How a service is rolled out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Single live workload, exposed through the mesh
    Direct,
    /// Canary and primary slots with mesh-controlled traffic split
    Duplicate,
    /// The user's chart does everything; no generated chart
    UserManaged,
}

impl DeploymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Duplicate => "duplicate",
            Self::UserManaged => "user_managed",
        }
    }

    /// Whether this strategy needs a generated chart next to the user chart
    pub fn uses_generated_chart(&self) -> bool {
        !matches!(self, Self::UserManaged)
    }

    /// Chart keyword that records this strategy
    pub fn keyword(&self) -> String {
        format!("{}{}", STRATEGY_KEYWORD_PREFIX, self.as_str())
    }

    /// Read a strategy back from a list of chart keywords
    pub fn from_keywords<S: AsRef<str>>(keywords: &[S]) -> Option<Self> {
        keywords.iter().find_map(|k| {
            k.as_ref()
                .strip_prefix(STRATEGY_KEYWORD_PREFIX)
                .and_then(|v| v.parse().ok())
        })
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "duplicate" | "blue_green_service" => Ok(Self::Duplicate),
            "user_managed" => Ok(Self::UserManaged),
            other => Err(format!("unknown deployment strategy '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strategy() {
        assert_eq!(
            "duplicate".parse::<DeploymentStrategy>(),
            Ok(DeploymentStrategy::Duplicate)
        );
        assert_eq!(
            "blue_green_service".parse::<DeploymentStrategy>(),
            Ok(DeploymentStrategy::Duplicate)
        );
        assert_eq!(
            "Direct".parse::<DeploymentStrategy>(),
            Ok(DeploymentStrategy::Direct)
        );
        assert!("canary".parse::<DeploymentStrategy>().is_err());
    }

    #[test]
    fn test_keyword_round_trip() {
        let keywords = vec![
            "helm".to_string(),
            DeploymentStrategy::Duplicate.keyword(),
        ];
        assert_eq!(
            DeploymentStrategy::from_keywords(&keywords),
            Some(DeploymentStrategy::Duplicate)
        );
        assert_eq!(DeploymentStrategy::from_keywords(&["helm"]), None);
    }
}
