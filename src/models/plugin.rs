use serde::{Deserialize, Serialize};
use std::fmt;

/// Category tag assigned to every load-order entry.
///
/// Ordering matters: required plugins always precede optional ones, which
/// precede everything else in the materialized load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    Required,
    Optional,
    Patch,
    Normal,
}

impl PluginCategory {
    /// Required and optional plugins form the fixed baseline.
    pub fn is_core(self) -> bool {
        matches!(self, PluginCategory::Required | PluginCategory::Optional)
    }

    /// Classify a non-core plugin by its file name.
    pub fn classify(name: &str, patch_keywords: &[String]) -> Self {
        let lower = name.to_lowercase();
        if patch_keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        {
            PluginCategory::Patch
        } else {
            PluginCategory::Normal
        }
    }
}

/// Test status of a plugin within the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Untested,
    Passed,
    Failed,
    Quarantined,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginStatus::Untested => "untested",
            PluginStatus::Passed => "passed",
            PluginStatus::Failed => "failed",
            PluginStatus::Quarantined => "quarantined",
        };
        f.write_str(s)
    }
}

/// How a quarantined plugin left the active load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineDisposition {
    /// File moved into the session quarantine directory, entry dropped.
    Relocated,
    /// File left in place, entry commented out with a removal marker.
    Commented,
}

/// A single load-order entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    pub category: PluginCategory,
    pub status: PluginStatus,
    pub disposition: Option<QuarantineDisposition>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, category: PluginCategory) -> Self {
        Self {
            name: name.into(),
            category,
            status: PluginStatus::Untested,
            disposition: None,
        }
    }

    /// Case-insensitive identity key used for lookups and deduplication.
    pub fn key(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Failed and quarantined plugins may never appear in a batch.
    pub fn is_excluded(&self) -> bool {
        matches!(self.status, PluginStatus::Failed | PluginStatus::Quarantined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        ["patch", "fix", "compat", "merge"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_classify_patch_keywords() {
        let kw = keywords();
        assert_eq!(
            PluginCategory::classify("Better Cities - Compatibility.esp", &kw),
            PluginCategory::Patch
        );
        assert_eq!(
            PluginCategory::classify("BugFixes.esp", &kw),
            PluginCategory::Patch
        );
        assert_eq!(
            PluginCategory::classify("Lovely Horses.esp", &kw),
            PluginCategory::Normal
        );
    }

    #[test]
    fn test_empty_keyword_never_matches() {
        let kw = vec![String::new()];
        assert_eq!(PluginCategory::classify("Any.esp", &kw), PluginCategory::Normal);
    }

    #[test]
    fn test_plugin_key_is_case_insensitive() {
        assert_eq!(Plugin::key(" Oblivion.ESM "), "oblivion.esm");
    }

    #[test]
    fn test_excluded_statuses() {
        let mut plugin = Plugin::new("A.esp", PluginCategory::Normal);
        assert!(!plugin.is_excluded());
        plugin.status = PluginStatus::Failed;
        assert!(plugin.is_excluded());
        plugin.status = PluginStatus::Quarantined;
        assert!(plugin.is_excluded());
        plugin.status = PluginStatus::Passed;
        assert!(!plugin.is_excluded());
    }
}
