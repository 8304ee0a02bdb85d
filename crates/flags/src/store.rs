//! The flag table: snapshot-swapped map plus dependency/conflict rules
//! and in-memory usage counters.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use orch_domain::config::FlagSpec;
use orch_domain::{Error, Result};

use crate::strategy::FeatureFlag;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAction {
    Check,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlagUsage {
    pub check: u64,
    pub enabled: u64,
    pub disabled: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FlagStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct FlagStore {
    table: RwLock<Arc<HashMap<String, FeatureFlag>>>,
    usage: RwLock<HashMap<String, FlagUsage>>,
}

impl Default for FlagStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl FlagStore {
    pub fn empty() -> Self {
        Self {
            table: RwLock::new(Arc::new(HashMap::new())),
            usage: RwLock::new(HashMap::new()),
        }
    }

    /// Build from config seeds. Unknown dependency/conflict targets are a
    /// load error so misconfigurations fail at startup, not at check time.
    pub fn from_specs(specs: &[FlagSpec]) -> Result<Self> {
        let mut table = HashMap::with_capacity(specs.len());
        for spec in specs {
            let flag = FeatureFlag::from_spec(spec)?;
            if table.insert(flag.name.clone(), flag).is_some() {
                return Err(Error::Config(format!("duplicate flag: {}", spec.name)));
            }
        }
        for flag in table.values() {
            for dep in flag.depends_on.iter().chain(&flag.conflicts_with) {
                if !table.contains_key(dep) {
                    return Err(Error::Config(format!(
                        "flag {} references unknown flag {dep}",
                        flag.name
                    )));
                }
            }
        }
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
            usage: RwLock::new(HashMap::new()),
        })
    }

    // ── Evaluation ───────────────────────────────────────────────────

    pub fn is_enabled(&self, name: &str, user_id: Option<&str>, group_id: Option<&str>) -> bool {
        self.is_enabled_at(name, user_id, group_id, Utc::now())
    }

    /// Deterministic check against a point in time. Dependency and
    /// conflict rules run before the strategy:
    /// - A is off whenever any of its dependencies is off.
    /// - A is off whenever any of its conflicts is on.
    pub fn is_enabled_at(
        &self,
        name: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let table = self.table.read().clone();
        let result = self.eval(&table, name, user_id, group_id, now, 0);
        self.track(name, result);
        result
    }

    fn eval(
        &self,
        table: &HashMap<String, FeatureFlag>,
        name: &str,
        user_id: Option<&str>,
        group_id: Option<&str>,
        now: DateTime<Utc>,
        depth: u32,
    ) -> bool {
        // Defensive bound; config validation rejects unknown targets but a
        // dependency cycle would otherwise recurse forever.
        if depth > 8 {
            tracing::warn!(flag = name, "flag dependency chain too deep — treating as off");
            return false;
        }
        let Some(flag) = table.get(name) else {
            return false;
        };
        for dep in &flag.depends_on {
            if !self.eval(table, dep, user_id, group_id, now, depth + 1) {
                return false;
            }
        }
        for rival in &flag.conflicts_with {
            if self.eval(table, rival, user_id, group_id, now, depth + 1) {
                return false;
            }
        }
        flag.strategy_allows(user_id, group_id, now)
    }

    /// A/B variant for a user ("control" for non-A/B flags).
    pub fn get_variant(&self, name: &str, user_id: &str) -> String {
        let table = self.table.read().clone();
        table
            .get(name)
            .map(|f| f.variant(Some(user_id)).to_string())
            .unwrap_or_else(|| "control".to_string())
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Replace one flag. Builds a fresh table and swaps it in.
    pub fn upsert(&self, flag: FeatureFlag) {
        let mut table = (**self.table.read()).clone();
        table.insert(flag.name.clone(), flag);
        *self.table.write() = Arc::new(table);
    }

    pub fn get(&self, name: &str) -> Option<FeatureFlag> {
        self.table.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<FeatureFlag> {
        let mut flags: Vec<_> = self.table.read().values().cloned().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }

    // ── Usage ────────────────────────────────────────────────────────

    fn track(&self, name: &str, enabled: bool) {
        let mut usage = self.usage.write();
        let entry = usage.entry(name.to_string()).or_default();
        entry.check += 1;
        if enabled {
            entry.enabled += 1;
        } else {
            entry.disabled += 1;
        }
    }

    pub fn usage(&self) -> HashMap<String, FlagUsage> {
        self.usage.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;

    fn mk(name: &str, strategy: Strategy) -> FeatureFlag {
        FeatureFlag {
            name: name.into(),
            enabled: true,
            strategy,
            updated_at: Utc::now(),
            depends_on: Vec::new(),
            conflicts_with: Vec::new(),
        }
    }

    #[test]
    fn unknown_flag_is_off() {
        let store = FlagStore::empty();
        assert!(!store.is_enabled("ghost", Some("u"), None));
    }

    #[test]
    fn upsert_and_check() {
        let store = FlagStore::empty();
        store.upsert(mk("per_turn_rag", Strategy::On));
        assert!(store.is_enabled("per_turn_rag", None, None));

        store.upsert(mk("per_turn_rag", Strategy::Off));
        assert!(!store.is_enabled("per_turn_rag", None, None));
    }

    #[test]
    fn repeated_checks_are_stable() {
        let store = FlagStore::empty();
        store.upsert(mk("roll", Strategy::Percentage { percentage: 37.0 }));
        let first = store.is_enabled("roll", Some("user-42"), None);
        for _ in 0..20 {
            assert_eq!(store.is_enabled("roll", Some("user-42"), None), first);
        }
    }

    #[test]
    fn dependency_gates_dependent() {
        let store = FlagStore::empty();
        store.upsert(mk("base", Strategy::Off));
        let mut dependent = mk("feature", Strategy::On);
        dependent.depends_on = vec!["base".into()];
        store.upsert(dependent);

        assert!(!store.is_enabled("feature", Some("u"), None));

        store.upsert(mk("base", Strategy::On));
        assert!(store.is_enabled("feature", Some("u"), None));
    }

    #[test]
    fn conflict_disables_flag() {
        let store = FlagStore::empty();
        store.upsert(mk("legacy_path", Strategy::On));
        let mut newer = mk("new_path", Strategy::On);
        newer.conflicts_with = vec!["legacy_path".into()];
        store.upsert(newer);

        assert!(!store.is_enabled("new_path", Some("u"), None));

        store.upsert(mk("legacy_path", Strategy::Off));
        assert!(store.is_enabled("new_path", Some("u"), None));
    }

    #[test]
    fn usage_counters_accumulate() {
        let store = FlagStore::empty();
        store.upsert(mk("f", Strategy::On));
        store.is_enabled("f", None, None);
        store.is_enabled("f", None, None);
        store.upsert(mk("f", Strategy::Off));
        store.is_enabled("f", None, None);

        let usage = store.usage();
        let u = usage.get("f").unwrap();
        assert_eq!(u.check, 3);
        assert_eq!(u.enabled, 2);
        assert_eq!(u.disabled, 1);
    }

    #[test]
    fn from_specs_validates_references() {
        let spec = FlagSpec {
            name: "a".into(),
            enabled: true,
            strategy: "on".into(),
            percentage: None,
            whitelist_users: vec![],
            whitelist_groups: vec![],
            rollout_start: None,
            rollout_end: None,
            target_percentage: None,
            variants: vec![],
            depends_on: vec!["missing".into()],
            conflicts_with: vec![],
        };
        let err = FlagStore::from_specs(&[spec]).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn from_specs_rejects_duplicates() {
        let spec = |name: &str| FlagSpec {
            name: name.into(),
            enabled: true,
            strategy: "on".into(),
            percentage: None,
            whitelist_users: vec![],
            whitelist_groups: vec![],
            rollout_start: None,
            rollout_end: None,
            target_percentage: None,
            variants: vec![],
            depends_on: vec![],
            conflicts_with: vec![],
        };
        assert!(FlagStore::from_specs(&[spec("a"), spec("a")]).is_err());
    }

    #[test]
    fn variant_lookup() {
        let store = FlagStore::empty();
        store.upsert(mk("ab", Strategy::AbTest { variants: vec!["x".into(), "y".into()] }));
        let v = store.get_variant("ab", "user-1");
        assert!(["x", "y", "control"].contains(&v.as_str()));
        assert_eq!(store.get_variant("nope", "user-1"), "control");
    }
}
