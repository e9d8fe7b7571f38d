use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How diffs are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffStrategy {
    /// Changed keys come from the structural value diff between prior and
    /// planned state.
    #[default]
    PlanState,
    /// Changed keys come from the flattened attribute diff.
    Classic,
}

/// How instance state is projected for the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateReadStrategy {
    #[default]
    Structural,
    /// Round-trip through the legacy flat encoding first.
    Flatmap,
}

/// Explicit bridge configuration, fixed when a provider is wrapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    pub diff_strategy: DiffStrategy,
    pub resource_diff_strategies: HashMap<String, DiffStrategy>,
    pub state_read_strategy: StateReadStrategy,
    pub resource_state_read_strategies: HashMap<String, StateReadStrategy>,
}

impl BridgeOptions {
    pub fn diff_strategy_for(&self, resource_type: &str) -> DiffStrategy {
        self.resource_diff_strategies
            .get(resource_type)
            .copied()
            .unwrap_or(self.diff_strategy)
    }

    pub fn state_read_strategy_for(&self, resource_type: &str) -> StateReadStrategy {
        self.resource_state_read_strategies
            .get(resource_type)
            .copied()
            .unwrap_or(self.state_read_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let options: BridgeOptions = serde_json::from_str(
            r#"{
                "diff_strategy": "classic",
                "resource_state_read_strategies": {"example_legacy": "flatmap"}
            }"#,
        )
        .unwrap();
        assert_eq!(options.diff_strategy_for("example_thing"), DiffStrategy::Classic);
        assert_eq!(
            options.state_read_strategy_for("example_thing"),
            StateReadStrategy::Structural
        );
        assert_eq!(
            options.state_read_strategy_for("example_legacy"),
            StateReadStrategy::Flatmap
        );
    }

    #[test]
    fn test_empty_document_is_default() {
        let options: BridgeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, BridgeOptions::default());
        assert_eq!(options.diff_strategy, DiffStrategy::PlanState);
    }
}
