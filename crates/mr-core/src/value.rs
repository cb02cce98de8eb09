use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde_json::Value as JsonValue;

use crate::object::{HierarchicalObject, MacroObject};
use crate::table::TabularValue;
use crate::types::{Culture, Identity};

/// What a lazy field sees of the evaluation that materializes it.
pub trait LazyContext {
    fn resolve_macros(&self, text: &str) -> String;
    fn lookup_value(&self, name: &str) -> Option<MacroValue>;
    fn culture(&self) -> &Culture;
    fn identity(&self) -> &Identity;
}

type Producer = dyn Fn(&dyn LazyContext) -> MacroValue + Send + Sync;
type Availability = dyn Fn(&dyn LazyContext) -> bool + Send + Sync;

const MAX_LAZY_CHAIN: usize = 32;

/// Deferred value computed at lookup time, never eagerly.
#[derive(Clone)]
pub struct LazyField {
    producer: Arc<Producer>,
    availability: Option<Arc<Availability>>,
}

impl LazyField {
    pub fn new(producer: impl Fn(&dyn LazyContext) -> MacroValue + Send + Sync + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
            availability: None,
        }
    }

    pub fn with_availability(
        mut self,
        availability: impl Fn(&dyn LazyContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.availability = Some(Arc::new(availability));
        self
    }

    pub fn is_available(&self, context: &dyn LazyContext) -> bool {
        self.availability
            .as_ref()
            .map(|availability| availability(context))
            .unwrap_or(true)
    }

    /// `None` when the field (or a field it produced) reports itself unavailable.
    pub fn materialize(&self, context: &dyn LazyContext) -> Option<MacroValue> {
        let mut field = self.clone();
        for _ in 0..MAX_LAZY_CHAIN {
            if !field.is_available(context) {
                return None;
            }
            match (field.producer)(context) {
                MacroValue::Lazy(next) => field = next,
                value => return Some(value),
            }
        }
        None
    }
}

impl fmt::Debug for LazyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyField")
            .field("has_availability", &self.availability.is_some())
            .finish()
    }
}

/// A value paired with the object it was read from.
#[derive(Debug, Clone)]
pub struct PropertyValue {
    pub owner: MacroValue,
    pub value: MacroValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKey {
    Name(String),
    Index(i64),
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "[{}]", index),
        }
    }
}

impl From<&str> for MemberKey {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<i64> for MemberKey {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

#[derive(Debug, Clone, Default)]
pub enum MacroValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    TimeSpan(Duration),
    List(Vec<MacroValue>),
    Map(BTreeMap<String, MacroValue>),
    StringMap(BTreeMap<String, String>),
    Table(TabularValue),
    Hierarchy(Arc<dyn HierarchicalObject>),
    Object(Arc<dyn MacroObject>),
    Property(Arc<PropertyValue>),
    Lazy(LazyField),
    Placeholder,
}

impl MacroValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn lazy(producer: impl Fn(&dyn LazyContext) -> MacroValue + Send + Sync + 'static) -> Self {
        Self::Lazy(LazyField::new(producer))
    }

    pub fn hierarchy(object: impl HierarchicalObject + 'static) -> Self {
        Self::Hierarchy(Arc::new(object))
    }

    pub fn object(object: impl MacroObject + 'static) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn property(owner: MacroValue, value: MacroValue) -> Self {
        Self::Property(Arc::new(PropertyValue { owner, value }))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(_) => "boolean".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Text(_) => "string".to_string(),
            Self::DateTime(_) => "datetime".to_string(),
            Self::TimeSpan(_) => "timespan".to_string(),
            Self::List(_) => "list".to_string(),
            Self::Map(_) => "map".to_string(),
            Self::StringMap(_) => "stringmap".to_string(),
            Self::Table(table) => table.type_name().to_string(),
            Self::Hierarchy(object) => object.type_name().to_string(),
            Self::Object(object) => object.type_name().to_string(),
            Self::Property(_) => "property".to_string(),
            Self::Lazy(_) => "field".to_string(),
            Self::Placeholder => "placeholder".to_string(),
        }
    }

    /// Elements of a value that flattens during post-processing; strings never do.
    /// Tables enumerate their rows and data sets their tables.
    pub fn enumerate(&self) -> Option<Vec<MacroValue>> {
        match self {
            Self::List(items) => Some(items.clone()),
            Self::Object(object) => object.items(),
            Self::Table(TabularValue::Table(table)) => Some(
                table
                    .rows()
                    .into_iter()
                    .map(|row| Self::Table(TabularValue::Row(row)))
                    .collect(),
            ),
            Self::Table(TabularValue::Set(set)) => Some(
                set.tables()
                    .iter()
                    .map(|table| Self::Table(TabularValue::Table(Arc::clone(table))))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn is_securable(&self) -> bool {
        matches!(self, Self::Hierarchy(_) | Self::Object(_))
    }

    pub fn sensitive_fields(&self) -> &[String] {
        match self {
            Self::Hierarchy(object) => object.sensitive_fields(),
            Self::Object(object) => object.sensitive_fields(),
            _ => &[],
        }
    }

    pub fn cache_dependency(&self) -> Option<String> {
        match self {
            Self::Hierarchy(object) => object.cache_dependency(),
            Self::Object(object) => object.cache_dependency(),
            _ => None,
        }
    }

    pub fn to_display_text(&self, culture: &Culture) -> String {
        match self {
            Self::Null | Self::Lazy(_) | Self::Placeholder => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => culture.format_float(*value),
            Self::Text(value) => value.clone(),
            Self::DateTime(value) => culture.format_datetime(value),
            Self::TimeSpan(value) => culture.format_timespan(value),
            Self::List(values) => values
                .iter()
                .map(|value| value.to_display_text(culture))
                .collect::<Vec<_>>()
                .join(", "),
            Self::Map(_) => self.to_json().to_string(),
            Self::StringMap(entries) => entries
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join("&"),
            Self::Table(table) => table.display_text(),
            Self::Hierarchy(object) => object.display_text(),
            Self::Object(object) => object.display_text(),
            Self::Property(property) => property.value.to_display_text(culture),
        }
    }

    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(value),
            JsonValue::Number(value) => match value.as_i64() {
                Some(value) => Self::Int(value),
                None => Self::Float(value.as_f64().unwrap_or(0.0)),
            },
            JsonValue::String(value) => Self::Text(value),
            JsonValue::Array(values) => Self::List(values.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(values) => Self::Map(
                values
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null | Self::Lazy(_) | Self::Placeholder => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Int(value) => JsonValue::from(*value),
            Self::Float(value) => JsonValue::from(*value),
            Self::Text(value) => JsonValue::String(value.clone()),
            Self::List(values) => JsonValue::Array(values.iter().map(Self::to_json).collect()),
            Self::Map(values) => JsonValue::Object(
                values
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::StringMap(values) => JsonValue::Object(
                values
                    .iter()
                    .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
                    .collect(),
            ),
            Self::Property(property) => property.value.to_json(),
            other => JsonValue::String(other.to_display_text(&Culture::invariant())),
        }
    }
}

impl PartialEq for MacroValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Placeholder, Self::Placeholder) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Int(left), Self::Int(right)) => left == right,
            (Self::Float(left), Self::Float(right)) => left == right,
            (Self::Int(left), Self::Float(right)) | (Self::Float(right), Self::Int(left)) => {
                (*left as f64) == *right
            }
            (Self::Text(left), Self::Text(right)) => left == right,
            (Self::DateTime(left), Self::DateTime(right)) => left == right,
            (Self::TimeSpan(left), Self::TimeSpan(right)) => left == right,
            (Self::List(left), Self::List(right)) => left == right,
            (Self::Map(left), Self::Map(right)) => left == right,
            (Self::StringMap(left), Self::StringMap(right)) => left == right,
            (Self::Table(left), Self::Table(right)) => left == right,
            (Self::Hierarchy(left), Self::Hierarchy(right)) => Arc::ptr_eq(left, right),
            (Self::Object(left), Self::Object(right)) => Arc::ptr_eq(left, right),
            (Self::Property(left), Self::Property(right)) => {
                left.owner == right.owner && left.value == right.value
            }
            _ => false,
        }
    }
}

impl From<bool> for MacroValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MacroValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for MacroValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for MacroValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MacroValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MacroValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDateTime> for MacroValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<Duration> for MacroValue {
    fn from(value: Duration) -> Self {
        Self::TimeSpan(value)
    }
}

impl From<Vec<MacroValue>> for MacroValue {
    fn from(values: Vec<MacroValue>) -> Self {
        Self::List(values)
    }
}

impl From<TabularValue> for MacroValue {
    fn from(value: TabularValue) -> Self {
        Self::Table(value)
    }
}

/// Case-insensitive key lookup; an exact key wins over a folded one.
pub fn find_key_ignore_case<'a, V>(
    entries: &'a BTreeMap<String, V>,
    name: &str,
) -> Option<&'a V> {
    if let Some(value) = entries.get(name) {
        return Some(value);
    }
    let folded = name.to_lowercase();
    entries
        .iter()
        .find(|(key, _)| key.to_lowercase() == folded)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod value_tests {
    use super::*;
    use crate::object::DomainObject;
    use crate::table::{DataSet, DataTable};
    use serde_json::json;

    struct NoContext {
        culture: Culture,
        identity: Identity,
    }

    impl LazyContext for NoContext {
        fn resolve_macros(&self, text: &str) -> String {
            text.to_string()
        }

        fn lookup_value(&self, _name: &str) -> Option<MacroValue> {
            None
        }

        fn culture(&self) -> &Culture {
            &self.culture
        }

        fn identity(&self) -> &Identity {
            &self.identity
        }
    }

    fn context() -> NoContext {
        NoContext {
            culture: Culture::invariant(),
            identity: Identity::public(),
        }
    }

    #[test]
    fn json_conversion_keeps_integers_and_nesting() {
        let value = MacroValue::from_json(json!({"a": [1, 2.5, "x"], "b": null}));
        let MacroValue::Map(entries) = &value else {
            panic!("expected map");
        };
        assert_eq!(
            entries.get("a"),
            Some(&MacroValue::List(vec![
                MacroValue::Int(1),
                MacroValue::Float(2.5),
                MacroValue::text("x"),
            ]))
        );
        assert_eq!(entries.get("b"), Some(&MacroValue::Null));
        assert_eq!(value.to_json(), json!({"a": [1, 2.5, "x"], "b": null}));
    }

    #[test]
    fn unavailable_lazy_field_materializes_to_none() {
        let field = LazyField::new(|_| MacroValue::Int(1)).with_availability(|_| false);
        assert_eq!(field.materialize(&context()), None);
        let field = LazyField::new(|_| MacroValue::lazy(|_| MacroValue::Int(7)));
        assert_eq!(field.materialize(&context()), Some(MacroValue::Int(7)));
    }

    #[test]
    fn display_text_covers_scalars_and_query_maps() {
        let culture = Culture::new("en-US");
        assert_eq!(MacroValue::Null.to_display_text(&culture), "");
        assert_eq!(MacroValue::Bool(true).to_display_text(&culture), "true");
        assert_eq!(MacroValue::Float(1.25).to_display_text(&culture), "1.25");
        let query = MacroValue::StringMap(BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]));
        assert_eq!(query.to_display_text(&culture), "a=1&b=2");
        let wrapped = MacroValue::property(MacroValue::Null, MacroValue::text("inner"));
        assert_eq!(wrapped.to_display_text(&culture), "inner");
    }

    #[test]
    fn objects_compare_by_identity_and_expose_sensitive_fields() {
        let object = MacroValue::hierarchy(
            DomainObject::new("cms.user").with_sensitive_field("Password"),
        );
        assert_eq!(object.clone(), object);
        assert_eq!(object.sensitive_fields().to_vec(), vec!["Password".to_string()]);
        assert!(object.is_securable());
        assert!(!MacroValue::text("x").is_securable());
    }

    #[test]
    fn only_collections_enumerate() {
        assert_eq!(MacroValue::text("ab").enumerate(), None);
        assert_eq!(MacroValue::Map(BTreeMap::new()).enumerate(), None);
        assert_eq!(
            MacroValue::List(vec![MacroValue::Int(1)]).enumerate(),
            Some(vec![MacroValue::Int(1)])
        );

        let mut table = DataTable::new("Users", &["Name"]);
        table.add_row(vec![MacroValue::text("a")]).expect("row fits");
        table.add_row(vec![MacroValue::text("b")]).expect("row fits");
        let set = DataSet::new("Data")
            .with_table(table)
            .with_table(DataTable::new("Roles", &["Name"]));
        let tables = MacroValue::Table(TabularValue::set(set)).enumerate().expect("sets enumerate");
        assert_eq!(tables.len(), 2);
        let rows = tables[0].enumerate().expect("tables enumerate");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].type_name(), "datarow");
    }

    #[test]
    fn key_lookup_falls_back_to_case_insensitive_match() {
        let entries = BTreeMap::from([("UserName".to_string(), 1)]);
        assert_eq!(find_key_ignore_case(&entries, "UserName"), Some(&1));
        assert_eq!(find_key_ignore_case(&entries, "username"), Some(&1));
        assert_eq!(find_key_ignore_case(&entries, "user"), None);
    }
}
