use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use mr_core::{
    find_key_ignore_case, HierarchicalObject, MacroObject, MacroValue, MemberKey, TabularValue,
};

use super::context::EvaluationContext;
use crate::evaluator::{EvaluationResult, Outcome};

impl EvaluationContext {
    /// Reads `key` from `container`, tried shape by shape in a fixed order.
    pub fn get_member(&self, container: &MacroValue, key: &MemberKey) -> EvaluationResult {
        match self.get_member_value(container, key) {
            Some(value) => self.result(Outcome::Matched(value)),
            None => self.result(Outcome::Unmatched),
        }
    }

    pub(crate) fn get_member_value(&self, container: &MacroValue, key: &MemberKey) -> Option<MacroValue> {
        let raw = self.dispatch_member(container, key)?;
        self.finalize_member(raw)
    }

    fn dispatch_member(&self, container: &MacroValue, key: &MemberKey) -> Option<MacroValue> {
        if is_sensitive(container, key) {
            tracing::debug!(member = %key, "sensitive member blocked");
            return None;
        }

        let materialized;
        let container = match container {
            MacroValue::Lazy(field) => {
                materialized = field.materialize(self)?;
                if is_sensitive(&materialized, key) {
                    return None;
                }
                &materialized
            }
            MacroValue::Property(property) => &property.value,
            other => other,
        };

        let structural = match container {
            // Tabular shapes are definitive: a missing column never falls through.
            MacroValue::Table(tabular) => return tabular_member(tabular, key),
            MacroValue::DateTime(value) => datetime_member(value, key),
            MacroValue::TimeSpan(value) => timespan_member(value, key),
            MacroValue::Hierarchy(object) => self.hierarchy_member(object, key),
            MacroValue::Map(entries) => match key {
                MemberKey::Name(name) => find_key_ignore_case(entries, name).cloned(),
                MemberKey::Index(_) => None,
            },
            MacroValue::StringMap(entries) => match key {
                MemberKey::Name(name) => find_key_ignore_case(entries, name).cloned().map(MacroValue::Text),
                MemberKey::Index(_) => None,
            },
            MacroValue::Text(text) => string_member(text, key),
            MacroValue::List(items) => match key {
                MemberKey::Index(index) => nth(items.iter().cloned(), *index),
                MemberKey::Name(_) => None,
            },
            MacroValue::Object(object) => object_member(object, key),
            MacroValue::Placeholder => Some(MacroValue::Placeholder),
            _ => None,
        };
        if structural.is_some() {
            return structural;
        }

        let registry = self.registry();
        let handled = match key {
            MemberKey::Name(name) => registry.try_name_handlers(container, name),
            MemberKey::Index(index) => registry.try_index_handlers(container, *index),
        };
        if handled.is_some() {
            return handled;
        }

        if let MemberKey::Name(name) = key {
            if let Some(producer) = registry.field(&container.type_name(), name) {
                return Some(producer(container));
            }
        }

        match container {
            MacroValue::Object(object)
                if self.settings().virtual_mode && object.is_virtual_collection() =>
            {
                Some(MacroValue::Placeholder)
            }
            _ => None,
        }
    }

    fn hierarchy_member(&self, object: &Arc<dyn HierarchicalObject>, key: &MemberKey) -> Option<MacroValue> {
        let MemberKey::Name(name) = key else {
            return None;
        };
        object.try_get_value(name).or_else(|| {
            (self.settings().virtual_mode && object.supports_virtual_mode())
                .then_some(MacroValue::Placeholder)
        })
    }

    /// Property unwrap, lazy materialization, dependency tracking and security.
    fn finalize_member(&self, raw: MacroValue) -> Option<MacroValue> {
        let value = match raw {
            MacroValue::Property(property) => {
                self.record_dependency(&property.owner);
                property.value.clone()
            }
            value => value,
        };
        let value = match value {
            MacroValue::Lazy(field) => field.materialize(self)?,
            value => value,
        };
        self.record_dependency(&value);
        if !self.passes_security(&value) {
            return Some(MacroValue::Null);
        }
        Some(value)
    }
}

fn is_sensitive(container: &MacroValue, key: &MemberKey) -> bool {
    let MemberKey::Name(name) = key else {
        return false;
    };
    container
        .sensitive_fields()
        .iter()
        .any(|field| field.eq_ignore_ascii_case(name.trim()))
}

fn nth(items: impl Iterator<Item = MacroValue>, index: i64) -> Option<MacroValue> {
    let index = usize::try_from(index).ok()?;
    items.into_iter().nth(index)
}

fn tabular_member(value: &TabularValue, key: &MemberKey) -> Option<MacroValue> {
    match (value, key) {
        (TabularValue::Row(row), MemberKey::Name(name)) => row.get(name),
        (TabularValue::Row(row), MemberKey::Index(index)) => {
            row.get_index(usize::try_from(*index).ok()?)
        }
        (TabularValue::RowView(view), MemberKey::Name(name)) => view.get(name),
        (TabularValue::RowView(view), MemberKey::Index(index)) => {
            view.get_index(usize::try_from(*index).ok()?)
        }
        (TabularValue::Table(table), MemberKey::Index(index)) => table
            .row(usize::try_from(*index).ok()?)
            .map(|row| MacroValue::Table(TabularValue::Row(row))),
        (TabularValue::Table(table), MemberKey::Name(name)) => {
            if let Some(column) = table.column_index(name) {
                return Some(table.cell(0, column).cloned().unwrap_or_default());
            }
            match name.to_lowercase().as_str() {
                "rows" => Some(MacroValue::List(
                    table
                        .rows()
                        .into_iter()
                        .map(|row| MacroValue::Table(TabularValue::Row(row)))
                        .collect(),
                )),
                "count" | "rowcount" => Some(MacroValue::Int(table.row_count() as i64)),
                _ => None,
            }
        }
        (TabularValue::Set(set), MemberKey::Index(index)) => set
            .tables()
            .get(usize::try_from(*index).ok()?)
            .map(|table| MacroValue::Table(TabularValue::Table(Arc::clone(table)))),
        (TabularValue::Set(set), MemberKey::Name(name)) => {
            if let Some(table) = set.table(name) {
                return Some(MacroValue::Table(TabularValue::Table(Arc::clone(table))));
            }
            match name.to_lowercase().as_str() {
                "tables" => Some(MacroValue::List(
                    set.tables()
                        .iter()
                        .map(|table| MacroValue::Table(TabularValue::Table(Arc::clone(table))))
                        .collect(),
                )),
                "count" => Some(MacroValue::Int(set.tables().len() as i64)),
                _ => None,
            }
        }
    }
}

fn datetime_member(value: &NaiveDateTime, key: &MemberKey) -> Option<MacroValue> {
    let MemberKey::Name(name) = key else {
        return None;
    };
    let member = match name.to_lowercase().as_str() {
        "year" => MacroValue::Int(i64::from(value.year())),
        "month" => MacroValue::Int(i64::from(value.month())),
        "day" => MacroValue::Int(i64::from(value.day())),
        "hour" => MacroValue::Int(i64::from(value.hour())),
        "minute" => MacroValue::Int(i64::from(value.minute())),
        "second" => MacroValue::Int(i64::from(value.second())),
        "millisecond" => MacroValue::Int(i64::from(value.nanosecond() / 1_000_000)),
        "dayofweek" => MacroValue::Text(value.format("%A").to_string()),
        "dayofyear" => MacroValue::Int(i64::from(value.ordinal())),
        "date" => MacroValue::DateTime(value.date().and_time(NaiveTime::MIN)),
        "timeofday" => MacroValue::TimeSpan(value.time().signed_duration_since(NaiveTime::MIN)),
        _ => return None,
    };
    Some(member)
}

fn timespan_member(value: &Duration, key: &MemberKey) -> Option<MacroValue> {
    let MemberKey::Name(name) = key else {
        return None;
    };
    let millis = value.num_milliseconds();
    let member = match name.to_lowercase().as_str() {
        "days" => MacroValue::Int(value.num_days()),
        "hours" => MacroValue::Int(value.num_hours() % 24),
        "minutes" => MacroValue::Int(value.num_minutes() % 60),
        "seconds" => MacroValue::Int(value.num_seconds() % 60),
        "milliseconds" => MacroValue::Int(millis % 1000),
        "totaldays" => MacroValue::Float(millis as f64 / 86_400_000.0),
        "totalhours" => MacroValue::Float(millis as f64 / 3_600_000.0),
        "totalminutes" => MacroValue::Float(millis as f64 / 60_000.0),
        "totalseconds" => MacroValue::Float(millis as f64 / 1000.0),
        "totalmilliseconds" => MacroValue::Float(millis as f64),
        _ => return None,
    };
    Some(member)
}

fn string_member(text: &str, key: &MemberKey) -> Option<MacroValue> {
    match key {
        MemberKey::Name(name) if name.eq_ignore_ascii_case("length") => {
            Some(MacroValue::Int(text.chars().count() as i64))
        }
        MemberKey::Name(_) => None,
        MemberKey::Index(index) => nth(text.chars().map(|c| MacroValue::Text(c.to_string())), *index),
    }
}

fn object_member(object: &Arc<dyn MacroObject>, key: &MemberKey) -> Option<MacroValue> {
    match key {
        MemberKey::Index(index) => nth(object.items()?.into_iter(), *index),
        // A null from the name indexer counts as a miss, unlike tabular and hierarchical nulls.
        MemberKey::Name(name) => object.get_by_name(name).filter(|value| !value.is_null()),
    }
}
