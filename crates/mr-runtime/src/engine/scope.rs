use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use mr_core::{MacroValue, ResolverSettings};
use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct NamedSource {
    value: MacroValue,
    prioritized: bool,
    hidden: bool,
}

#[derive(Debug, Default)]
struct ScopeData {
    parent: Option<MacroScope>,
    is_global_root: bool,
    name: String,
    dynamic: BTreeMap<String, MacroValue>,
    named: BTreeMap<String, NamedSource>,
    anonymous: Vec<MacroValue>,
    aliases: BTreeMap<String, String>,
    settings: Arc<ResolverSettings>,
}

/// One layer of resolver data plus a shared link to its parent layer.
///
/// Writes to a parent after a child was derived stay visible to the child.
/// Every name is stored lower-cased; blank names are ignored.
#[derive(Debug, Clone, Default)]
pub struct MacroScope {
    data: Arc<RwLock<ScopeData>>,
}

fn normalize(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        tracing::debug!("ignoring blank scope name");
        return None;
    }
    Some(trimmed.to_lowercase())
}

impl MacroScope {
    pub fn new(settings: ResolverSettings, name: impl Into<String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(ScopeData {
                name: name.into(),
                settings: Arc::new(settings),
                ..ScopeData::default()
            })),
        }
    }

    /// New scope whose parent is `self`; settings are cloned, maps start empty.
    pub fn derive_child(&self) -> Self {
        let data = self.data.read();
        Self {
            data: Arc::new(RwLock::new(ScopeData {
                parent: Some(self.clone()),
                name: data.name.clone(),
                settings: Arc::new(ResolverSettings::clone(&data.settings)),
                ..ScopeData::default()
            })),
        }
    }

    pub fn parent(&self) -> Option<MacroScope> {
        self.data.read().parent.clone()
    }

    pub fn is_global_root(&self) -> bool {
        self.data.read().is_global_root
    }

    pub fn set_global_root(&self, enabled: bool) {
        self.data.write().is_global_root = enabled;
    }

    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.data.write().name = name.into();
    }

    pub fn settings(&self) -> Arc<ResolverSettings> {
        Arc::clone(&self.data.read().settings)
    }

    /// Copy-on-write: snapshots already handed out keep their old values.
    pub fn update_settings(&self, update: impl FnOnce(&mut ResolverSettings)) {
        let mut data = self.data.write();
        update(Arc::make_mut(&mut data.settings));
    }

    pub fn set_named(&self, name: &str, value: impl Into<MacroValue>, prioritized: bool, hidden: bool) {
        let Some(key) = normalize(name) else {
            return;
        };
        self.data.write().named.insert(
            key,
            NamedSource {
                value: value.into(),
                prioritized,
                hidden,
            },
        );
    }

    pub fn set_named_value(&self, name: &str, value: impl Into<MacroValue>) {
        self.set_named(name, value, false, false);
    }

    pub fn remove_named(&self, name: &str) -> Option<MacroValue> {
        let key = normalize(name)?;
        self.data.write().named.remove(&key).map(|source| source.value)
    }

    pub fn set_dynamic(&self, name: &str, value: impl Into<MacroValue>) {
        let Some(key) = normalize(name) else {
            return;
        };
        self.data.write().dynamic.insert(key, value.into());
    }

    pub fn remove_dynamic(&self, name: &str) -> Option<MacroValue> {
        let key = normalize(name)?;
        self.data.write().dynamic.remove(&key)
    }

    pub fn clear_dynamic(&self) {
        self.data.write().dynamic.clear();
    }

    pub fn add_anonymous(&self, values: impl IntoIterator<Item = MacroValue>) {
        self.data.write().anonymous.extend(values);
    }

    /// Wipes the anonymous list; never call on a scope other resolvers are reading.
    pub fn replace_anonymous(&self, values: impl IntoIterator<Item = MacroValue>) {
        let mut data = self.data.write();
        data.anonymous.clear();
        data.anonymous.extend(values);
    }

    /// First registration for a name wins.
    pub fn add_alias(&self, name: &str, fallback_expression: impl Into<String>) {
        let Some(key) = normalize(name) else {
            return;
        };
        self.data
            .write()
            .aliases
            .entry(key)
            .or_insert_with(|| fallback_expression.into());
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.collect_named(|source| !source.hidden)
    }

    pub fn hidden_names(&self) -> Vec<String> {
        self.collect_named(|source| source.hidden)
    }

    pub fn prioritized_names(&self) -> Vec<String> {
        self.collect_named(|source| source.prioritized && !source.hidden)
    }

    fn collect_named(&self, include: impl Fn(&NamedSource) -> bool) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let data = scope.data.read();
            names.extend(
                data.named
                    .iter()
                    .filter(|(_, source)| include(source))
                    .map(|(name, _)| name.clone()),
            );
            current = data.parent.clone();
        }
        names.into_iter().collect()
    }

    /// Own dynamic parameters, else those of the nearest global-root ancestor.
    pub(crate) fn find_dynamic(&self, key: &str) -> Option<MacroValue> {
        let parent = {
            let data = self.data.read();
            if let Some(value) = data.dynamic.get(key) {
                return Some(value.clone());
            }
            data.parent.clone()
        };
        let mut current = parent;
        while let Some(scope) = current {
            let data = scope.data.read();
            if data.is_global_root {
                return data.dynamic.get(key).cloned();
            }
            current = data.parent.clone();
        }
        None
    }

    pub(crate) fn named_value(&self, key: &str) -> Option<MacroValue> {
        self.data
            .read()
            .named
            .get(key)
            .map(|source| source.value.clone())
    }

    pub(crate) fn anonymous_values(&self) -> Vec<MacroValue> {
        self.data.read().anonymous.clone()
    }

    /// Nearest alias along the parent chain.
    pub(crate) fn find_alias(&self, key: &str) -> Option<String> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let data = scope.data.read();
            if let Some(expression) = data.aliases.get(key) {
                return Some(expression.clone());
            }
            current = data.parent.clone();
        }
        None
    }
}

#[cfg(test)]
mod scope_tests {
    use super::*;

    fn root() -> MacroScope {
        MacroScope::new(ResolverSettings::default(), "root")
    }

    #[test]
    fn names_are_case_insensitive_and_overwritable() {
        let scope = root();
        scope.set_named_value("UserName", "alice");
        scope.set_named_value("username", "bob");
        assert_eq!(scope.named_value("username"), Some(MacroValue::text("bob")));
        assert_eq!(scope.registered_names(), vec!["username".to_string()]);
    }

    #[test]
    fn blank_names_are_ignored() {
        let scope = root();
        scope.set_named_value("  ", 1);
        scope.set_dynamic("", 1);
        scope.add_alias(" ", "x");
        assert!(scope.registered_names().is_empty());
        assert_eq!(scope.find_dynamic(""), None);
    }

    #[test]
    fn hidden_and_prioritized_names_union_across_parents() {
        let parent = root();
        parent.set_named("site", 1, true, false);
        parent.set_named("secret", 2, false, true);
        let child = parent.derive_child();
        child.set_named("user", 3, true, false);
        assert_eq!(child.registered_names(), vec!["site".to_string(), "user".to_string()]);
        assert_eq!(child.hidden_names(), vec!["secret".to_string()]);
        assert_eq!(child.prioritized_names(), vec!["site".to_string(), "user".to_string()]);
    }

    #[test]
    fn child_sees_later_parent_writes_but_not_parent_dynamics() {
        let parent = root();
        let child = parent.derive_child();
        parent.set_named_value("late", "yes");
        parent.set_dynamic("loop", 1);
        assert_eq!(
            child.parent().and_then(|scope| scope.named_value("late")),
            Some(MacroValue::text("yes"))
        );
        assert_eq!(child.find_dynamic("loop"), None);
        parent.set_global_root(true);
        assert_eq!(child.find_dynamic("loop"), Some(MacroValue::Int(1)));
    }

    #[test]
    fn child_settings_are_independent_copies() {
        let parent = root();
        let child = parent.derive_child();
        child.update_settings(|settings| settings.keep_unresolved = true);
        assert!(child.settings().keep_unresolved);
        assert!(!parent.settings().keep_unresolved);
    }

    #[test]
    fn settings_snapshot_survives_update() {
        let scope = root();
        let snapshot = scope.settings();
        scope.update_settings(|settings| settings.max_recursion_depth = 3);
        assert_eq!(snapshot.max_recursion_depth, 9);
        assert_eq!(scope.settings().max_recursion_depth, 3);
    }

    #[test]
    fn first_alias_wins_and_aliases_inherit() {
        let parent = root();
        parent.add_alias("title", "page.title");
        parent.add_alias("title", "document.name");
        let child = parent.derive_child();
        assert_eq!(child.find_alias("title"), Some("page.title".to_string()));
    }

    #[test]
    fn replace_anonymous_wipes_previous_values() {
        let scope = root();
        scope.add_anonymous([MacroValue::Int(1), MacroValue::Int(2)]);
        scope.replace_anonymous([MacroValue::Int(3)]);
        assert_eq!(scope.anonymous_values(), vec![MacroValue::Int(3)]);
    }

    #[test]
    fn dynamic_parameters_can_be_removed() {
        let scope = root();
        scope.set_dynamic("out", "x");
        assert_eq!(scope.remove_dynamic("OUT"), Some(MacroValue::text("x")));
        assert_eq!(scope.find_dynamic("out"), None);
        scope.set_dynamic("a", 1);
        scope.clear_dynamic();
        assert_eq!(scope.find_dynamic("a"), None);
    }
}
