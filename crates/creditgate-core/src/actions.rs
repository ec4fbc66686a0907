//! Action-to-cost table.
//!
//! Costs are configuration: the table is loaded once and consulted by name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default credit cost of each billable action.
pub const DEFAULT_ACTION_COSTS: &[(&str, i64)] = &[
    ("stock_search", 2),
    ("stock_quote", 1),
    ("market_news", 1),
    ("ai_chat", 5),
    ("technical_analysis", 10),
    ("fundamental_analysis", 10),
    ("report_export", 15),
    ("ai_analysis", 25),
    ("portfolio_analysis", 50),
];

/// Maps action names to their credit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionCostTable {
    costs: BTreeMap<String, i64>,
}

impl ActionCostTable {
    /// An empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            costs: BTreeMap::new(),
        }
    }

    /// Set the cost of an action. Negative costs are clamped to zero.
    pub fn set(&mut self, action: impl Into<String>, cost: i64) {
        self.costs.insert(action.into(), cost.max(0));
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, action: impl Into<String>, cost: i64) -> Self {
        self.set(action, cost);
        self
    }

    /// Cost of `action`, or `None` if it is not billable.
    #[must_use]
    pub fn cost(&self, action: &str) -> Option<i64> {
        self.costs.get(action).copied()
    }

    /// Iterate `(action, cost)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.costs.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Apply `name=cost,name=cost` overrides on top of this table.
    ///
    /// # Errors
    ///
    /// Returns the offending fragment if an entry is not `name=integer`.
    pub fn apply_overrides(&mut self, spec: &str) -> Result<(), String> {
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, cost) = part
                .split_once('=')
                .ok_or_else(|| format!("expected name=cost, got `{part}`"))?;
            let cost: i64 = cost
                .trim()
                .parse()
                .map_err(|_| format!("invalid cost in `{part}`"))?;
            self.set(name.trim(), cost);
        }
        Ok(())
    }
}

impl Default for ActionCostTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (action, cost) in DEFAULT_ACTION_COSTS {
            table.set(*action, *cost);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_costs() {
        let table = ActionCostTable::default();
        assert_eq!(table.cost("stock_search"), Some(2));
        assert_eq!(table.cost("technical_analysis"), Some(10));
        assert_eq!(table.cost("ai_analysis"), Some(25));
        assert_eq!(table.cost("portfolio_analysis"), Some(50));
        assert_eq!(table.cost("teleport"), None);
    }

    #[test]
    fn overrides_replace_and_extend() {
        let mut table = ActionCostTable::default();
        table
            .apply_overrides("ai_analysis=30, screener = 4")
            .unwrap();
        assert_eq!(table.cost("ai_analysis"), Some(30));
        assert_eq!(table.cost("screener"), Some(4));
    }

    #[test]
    fn malformed_override_is_rejected() {
        let mut table = ActionCostTable::default();
        assert!(table.apply_overrides("ai_analysis").is_err());
        assert!(table.apply_overrides("ai_analysis=lots").is_err());
    }
}
