use std::collections::BTreeMap;
use std::fmt;

use crate::value::{find_key_ignore_case, MacroValue};

/// Objects exposing named properties, such as domain records.
pub trait HierarchicalObject: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    /// `None` means the object has no such property; `Some(Null)` is a present empty value.
    fn try_get_value(&self, name: &str) -> Option<MacroValue>;

    fn sensitive_fields(&self) -> &[String] {
        &[]
    }

    /// When virtual mode is on, absent properties become placeholders instead of misses.
    fn supports_virtual_mode(&self) -> bool {
        false
    }

    fn cache_dependency(&self) -> Option<String> {
        None
    }

    fn display_text(&self) -> String {
        self.type_name().to_string()
    }
}

/// Containers indexable by an arbitrary name, optionally enumerable.
pub trait MacroObject: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    fn get_by_name(&self, name: &str) -> Option<MacroValue>;

    fn items(&self) -> Option<Vec<MacroValue>> {
        None
    }

    fn sensitive_fields(&self) -> &[String] {
        &[]
    }

    fn is_virtual_collection(&self) -> bool {
        false
    }

    fn cache_dependency(&self) -> Option<String> {
        None
    }

    fn display_text(&self) -> String {
        self.type_name().to_string()
    }
}

/// General-purpose hierarchical object backed by a property map.
#[derive(Debug, Clone, Default)]
pub struct DomainObject {
    type_name: String,
    properties: BTreeMap<String, MacroValue>,
    sensitive_fields: Vec<String>,
    virtual_mode: bool,
    cache_dependency: Option<String>,
    display_property: Option<String>,
}

impl DomainObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<MacroValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_sensitive_field(mut self, name: impl Into<String>) -> Self {
        self.sensitive_fields.push(name.into());
        self
    }

    pub fn with_virtual_mode(mut self, enabled: bool) -> Self {
        self.virtual_mode = enabled;
        self
    }

    pub fn with_cache_dependency(mut self, key: impl Into<String>) -> Self {
        self.cache_dependency = Some(key.into());
        self
    }

    pub fn with_display_property(mut self, name: impl Into<String>) -> Self {
        self.display_property = Some(name.into());
        self
    }
}

impl HierarchicalObject for DomainObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn try_get_value(&self, name: &str) -> Option<MacroValue> {
        find_key_ignore_case(&self.properties, name).cloned()
    }

    fn sensitive_fields(&self) -> &[String] {
        &self.sensitive_fields
    }

    fn supports_virtual_mode(&self) -> bool {
        self.virtual_mode
    }

    fn cache_dependency(&self) -> Option<String> {
        self.cache_dependency.clone()
    }

    fn display_text(&self) -> String {
        self.display_property
            .as_deref()
            .and_then(|name| self.try_get_value(name))
            .and_then(|value| value.as_text().map(ToString::to_string))
            .unwrap_or_else(|| self.type_name.clone())
    }
}

#[cfg(test)]
mod object_tests {
    use super::*;

    #[test]
    fn domain_object_reads_properties_ignoring_case() {
        let user = DomainObject::new("cms.user")
            .with("UserName", "alice")
            .with("Age", 31)
            .with_display_property("UserName");
        assert_eq!(user.try_get_value("username"), Some(MacroValue::text("alice")));
        assert_eq!(user.try_get_value("missing"), None);
        assert_eq!(user.display_text(), "alice");
    }

    #[test]
    fn display_falls_back_to_type_name() {
        let object = DomainObject::new("cms.site");
        assert_eq!(object.display_text(), "cms.site");
        assert!(!object.supports_virtual_mode());
    }
}
