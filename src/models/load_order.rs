use super::plugin::{Plugin, PluginCategory, PluginStatus, QuarantineDisposition};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use thiserror::Error;

/// Errors raised when an operation references plugins the load order cannot accept
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadOrderError {
    #[error("Plugin {0} is not part of the original load order")]
    InvalidPlugin(String),

    #[error("Plugin {0} is {1} and cannot be tested in a batch")]
    ExcludedPlugin(String, PluginStatus),

    #[error("Plugin {0} is {1}, only failed plugins can be quarantined")]
    NotFailed(String, PluginStatus),
}

/// Per-status counts of a load order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadOrderSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub untested: usize,
}

/// The live, ordered plugin list of a session.
///
/// Plugins are keyed by their lowercased name so lookups are O(1) while
/// `IndexMap` keeps the load-order sequence intact. Construction places the
/// configured required plugins first, then the optional ones, then every
/// other entry in file order; no operation ever reorders afterwards.
#[derive(Debug, Clone, Default)]
pub struct LoadOrder {
    plugins: IndexMap<String, Plugin>,
    missing_core: Vec<String>,
}

impl LoadOrder {
    /// Build a load order from raw file entries.
    ///
    /// # Arguments
    /// * `entries` - Active plugin names in file order (duplicates are dropped case-insensitively)
    /// * `required` - Configured required plugins, in their enforced order
    /// * `optional` - Configured optional plugins, in their enforced order
    /// * `patch_keywords` - Substrings that tag a plugin as a patch
    pub fn new(
        entries: &[String],
        required: &[String],
        optional: &[String],
        patch_keywords: &[String],
    ) -> Self {
        let mut present: IndexMap<String, String> = IndexMap::new();
        for entry in entries {
            let name = entry.trim();
            if name.is_empty() {
                continue;
            }
            present
                .entry(Plugin::key(name))
                .or_insert_with(|| name.to_string());
        }

        let mut plugins = IndexMap::new();
        let mut missing_core = Vec::new();

        for (list, category) in [
            (required, PluginCategory::Required),
            (optional, PluginCategory::Optional),
        ] {
            for name in list {
                let key = Plugin::key(name);
                if plugins.contains_key(&key) {
                    continue;
                }
                match present.get(&key) {
                    Some(spelling) => {
                        plugins.insert(key, Plugin::new(spelling.clone(), category));
                    }
                    None => missing_core.push(name.trim().to_string()),
                }
            }
        }

        for (key, name) in present {
            if plugins.contains_key(&key) {
                continue;
            }
            let category = PluginCategory::classify(&name, patch_keywords);
            plugins.insert(key, Plugin::new(name, category));
        }

        Self {
            plugins,
            missing_core,
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.values()
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(&Plugin::key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(&Plugin::key(name))
    }

    /// Configured core plugins that were not found in the load order.
    pub fn missing_core(&self) -> &[String] {
        &self.missing_core
    }

    pub fn status(&self, name: &str) -> Result<PluginStatus, LoadOrderError> {
        self.lookup(name).map(|p| p.status)
    }

    /// Mark plugins as passed.
    ///
    /// Every id is validated before any status changes, so an invalid id
    /// leaves the load order untouched.
    pub fn mark_passed(&mut self, ids: &[String]) -> Result<(), LoadOrderError> {
        self.set_status(ids, PluginStatus::Passed)
    }

    /// Mark plugins as failed. Same all-or-nothing validation as [`Self::mark_passed`].
    pub fn mark_failed(&mut self, ids: &[String]) -> Result<(), LoadOrderError> {
        self.set_status(ids, PluginStatus::Failed)
    }

    /// Move a failed plugin to quarantined.
    ///
    /// Returns `Ok(false)` when the plugin is already quarantined.
    pub fn mark_quarantined(
        &mut self,
        id: &str,
        disposition: QuarantineDisposition,
    ) -> Result<bool, LoadOrderError> {
        let plugin = self
            .plugins
            .get_mut(&Plugin::key(id))
            .ok_or_else(|| LoadOrderError::InvalidPlugin(id.to_string()))?;

        match plugin.status {
            PluginStatus::Quarantined => Ok(false),
            PluginStatus::Failed => {
                plugin.status = PluginStatus::Quarantined;
                plugin.disposition = Some(disposition);
                Ok(true)
            }
            other => Err(LoadOrderError::NotFailed(plugin.name.clone(), other)),
        }
    }

    /// Return a failed plugin to the untested pool so it can be retested alone.
    pub fn reset_for_retest(&mut self, id: &str) -> Result<(), LoadOrderError> {
        let plugin = self
            .plugins
            .get_mut(&Plugin::key(id))
            .ok_or_else(|| LoadOrderError::InvalidPlugin(id.to_string()))?;

        if plugin.status != PluginStatus::Failed {
            return Err(LoadOrderError::NotFailed(plugin.name.clone(), plugin.status));
        }
        plugin.status = PluginStatus::Untested;
        Ok(())
    }

    /// Untested, non-core plugins in load-order sequence.
    pub fn untested_pool(&self) -> Vec<String> {
        self.plugins
            .values()
            .filter(|p| p.status == PluginStatus::Untested && !p.category.is_core())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Plugins that accompany every test: required, optional and everything passed so far.
    pub fn baseline(&self) -> Vec<String> {
        self.plugins
            .values()
            .filter(|p| !p.is_excluded())
            .filter(|p| p.category.is_core() || p.status == PluginStatus::Passed)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Core plugins present in the load order.
    pub fn core(&self) -> Vec<String> {
        self.plugins
            .values()
            .filter(|p| p.category.is_core())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Resolve a plugin that is about to be placed in a batch.
    pub fn batchable(&self, id: &str) -> Result<&Plugin, LoadOrderError> {
        let plugin = self.lookup(id)?;
        if plugin.is_excluded() {
            return Err(LoadOrderError::ExcludedPlugin(
                plugin.name.clone(),
                plugin.status,
            ));
        }
        Ok(plugin)
    }

    /// The baseline plus `members`, in load-order sequence.
    pub fn active_set(&self, members: &[String]) -> Result<Vec<String>, LoadOrderError> {
        let mut wanted: IndexSet<String> = IndexSet::new();
        for id in members {
            wanted.insert(Plugin::key(&self.batchable(id)?.name));
        }
        for id in self.baseline() {
            wanted.insert(Plugin::key(&id));
        }

        Ok(self
            .plugins
            .iter()
            .filter(|(key, _)| wanted.contains(*key))
            .map(|(_, p)| p.name.clone())
            .collect())
    }

    pub fn with_status(&self, status: PluginStatus) -> Vec<String> {
        self.plugins
            .values()
            .filter(|p| p.status == status)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn passed(&self) -> Vec<String> {
        self.with_status(PluginStatus::Passed)
    }

    pub fn failed(&self) -> Vec<String> {
        self.with_status(PluginStatus::Failed)
    }

    pub fn quarantined(&self) -> Vec<String> {
        self.with_status(PluginStatus::Quarantined)
    }

    pub fn summary(&self) -> LoadOrderSummary {
        let mut summary = LoadOrderSummary {
            total: self.plugins.len(),
            ..Default::default()
        };
        for plugin in self.plugins.values() {
            match plugin.status {
                PluginStatus::Passed => summary.passed += 1,
                PluginStatus::Failed => summary.failed += 1,
                PluginStatus::Quarantined => summary.quarantined += 1,
                PluginStatus::Untested => summary.untested += 1,
            }
        }
        summary
    }

    fn lookup(&self, id: &str) -> Result<&Plugin, LoadOrderError> {
        self.plugins
            .get(&Plugin::key(id))
            .ok_or_else(|| LoadOrderError::InvalidPlugin(id.to_string()))
    }

    fn set_status(&mut self, ids: &[String], status: PluginStatus) -> Result<(), LoadOrderError> {
        let keys = ids
            .iter()
            .map(|id| self.lookup(id).map(|p| Plugin::key(&p.name)))
            .collect::<Result<Vec<_>, _>>()?;

        for key in keys {
            if let Some(plugin) = self.plugins.get_mut(&key) {
                plugin.status = status;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> LoadOrder {
        LoadOrder::new(
            &names(&[
                "B.esp",
                "Unofficial Patch.esp",
                "A.esm",
                "C.esp",
                "b.ESP",
                "Fix Everything.esp",
            ]),
            &names(&["A.esm", "Missing.esm"]),
            &names(&["Unofficial Patch.esp"]),
            &names(&["patch", "fix"]),
        )
    }

    #[test]
    fn test_core_plugins_placed_first() {
        let lo = sample();
        let order: Vec<_> = lo.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["A.esm", "Unofficial Patch.esp", "B.esp", "C.esp", "Fix Everything.esp"]
        );
        assert_eq!(lo.get("a.esm").unwrap().category, PluginCategory::Required);
        assert_eq!(
            lo.get("Unofficial Patch.esp").unwrap().category,
            PluginCategory::Optional
        );
        assert_eq!(
            lo.get("Fix Everything.esp").unwrap().category,
            PluginCategory::Patch
        );
    }

    #[test]
    fn test_missing_core_reported() {
        let lo = sample();
        assert_eq!(lo.missing_core(), &["Missing.esm".to_string()]);
    }

    #[test]
    fn test_duplicates_dropped_case_insensitively() {
        let lo = sample();
        assert_eq!(lo.len(), 5);
        assert_eq!(lo.get("B.ESP").unwrap().name, "B.esp");
    }

    #[test]
    fn test_untested_pool_excludes_core() {
        let lo = sample();
        assert_eq!(
            lo.untested_pool(),
            names(&["B.esp", "C.esp", "Fix Everything.esp"])
        );
    }

    #[test]
    fn test_baseline_grows_with_passed() {
        let mut lo = sample();
        assert_eq!(lo.baseline(), names(&["A.esm", "Unofficial Patch.esp"]));

        lo.mark_passed(&names(&["C.esp"])).unwrap();
        assert_eq!(
            lo.baseline(),
            names(&["A.esm", "Unofficial Patch.esp", "C.esp"])
        );
        assert_eq!(lo.untested_pool(), names(&["B.esp", "Fix Everything.esp"]));
    }

    #[test]
    fn test_invalid_plugin_leaves_state_untouched() {
        let mut lo = sample();
        let err = lo
            .mark_passed(&names(&["B.esp", "Nope.esp"]))
            .unwrap_err();
        assert_eq!(err, LoadOrderError::InvalidPlugin("Nope.esp".to_string()));
        assert_eq!(lo.status("B.esp").unwrap(), PluginStatus::Untested);
    }

    #[test]
    fn test_active_set_preserves_load_order() {
        let mut lo = sample();
        lo.mark_passed(&names(&["C.esp"])).unwrap();
        let active = lo.active_set(&names(&["Fix Everything.esp", "B.esp"])).unwrap();
        assert_eq!(
            active,
            names(&[
                "A.esm",
                "Unofficial Patch.esp",
                "B.esp",
                "C.esp",
                "Fix Everything.esp"
            ])
        );
    }

    #[test]
    fn test_active_set_rejects_failed_members() {
        let mut lo = sample();
        lo.mark_failed(&names(&["B.esp"])).unwrap();
        let err = lo.active_set(&names(&["B.esp"])).unwrap_err();
        assert!(matches!(err, LoadOrderError::ExcludedPlugin(_, PluginStatus::Failed)));
    }

    #[test]
    fn test_quarantine_only_failed_and_idempotent() {
        let mut lo = sample();
        assert!(matches!(
            lo.mark_quarantined("B.esp", QuarantineDisposition::Commented),
            Err(LoadOrderError::NotFailed(_, PluginStatus::Untested))
        ));

        lo.mark_failed(&names(&["B.esp"])).unwrap();
        assert!(lo
            .mark_quarantined("B.esp", QuarantineDisposition::Commented)
            .unwrap());
        assert!(!lo
            .mark_quarantined("B.esp", QuarantineDisposition::Relocated)
            .unwrap());
        assert_eq!(
            lo.get("B.esp").unwrap().disposition,
            Some(QuarantineDisposition::Commented)
        );
    }

    #[test]
    fn test_reset_for_retest() {
        let mut lo = sample();
        lo.mark_failed(&names(&["C.esp"])).unwrap();
        lo.reset_for_retest("C.esp").unwrap();
        assert_eq!(lo.status("C.esp").unwrap(), PluginStatus::Untested);
        assert!(lo.reset_for_retest("C.esp").is_err());
    }

    #[test]
    fn test_summary_counts() {
        let mut lo = sample();
        lo.mark_passed(&names(&["A.esm", "Unofficial Patch.esp", "B.esp"]))
            .unwrap();
        lo.mark_failed(&names(&["C.esp"])).unwrap();
        let summary = lo.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.untested, 1);
        assert_eq!(summary.quarantined, 0);
    }
}
