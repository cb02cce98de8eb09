use std::collections::BTreeMap;
use std::time::Duration;

use mr_core::{Culture, Identity, MacroError, MacroValue};
use parking_lot::Mutex;
use serde::Serialize;

use crate::helpers::text::replace_localization_keys;

pub trait SecurityChecker: Send + Sync {
    fn check_permission(&self, value: &MacroValue, identity: &Identity) -> bool;
}

#[derive(Debug, Default)]
pub struct AllowAllSecurity;

impl SecurityChecker for AllowAllSecurity {
    fn check_permission(&self, _value: &MacroValue, _identity: &Identity) -> bool {
        true
    }
}

/// Observes resolution; implementations must not influence results.
pub trait AuditLog: Send + Sync {
    fn log_operation(&self, expression: &str, result: &str, indent: usize, duration: Duration);
    fn log_failure(&self, expression: &str, message: &str, code: &str);
}

#[derive(Debug, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn log_operation(&self, expression: &str, result: &str, indent: usize, duration: Duration) {
        tracing::debug!(
            expression,
            result,
            indent,
            duration_us = duration.as_micros() as u64,
            "macro resolved"
        );
    }

    fn log_failure(&self, expression: &str, message: &str, code: &str) {
        tracing::warn!(expression, code, "macro failed: {}", message);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuditEntry {
    Operation {
        expression: String,
        result: String,
        indent: usize,
        duration: Duration,
    },
    Failure {
        expression: String,
        message: String,
        code: String,
    },
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn failures_with_code(&self, code: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| matches!(entry, AuditEntry::Failure { code: found, .. } if found == code))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditLog for MemoryAuditLog {
    fn log_operation(&self, expression: &str, result: &str, indent: usize, duration: Duration) {
        self.entries.lock().push(AuditEntry::Operation {
            expression: expression.to_string(),
            result: result.to_string(),
            indent,
            duration,
        });
    }

    fn log_failure(&self, expression: &str, message: &str, code: &str) {
        self.entries.lock().push(AuditEntry::Failure {
            expression: expression.to_string(),
            message: message.to_string(),
            code: code.to_string(),
        });
    }
}

pub trait Localizer: Send + Sync {
    fn get_string(&self, key: &str, culture: &Culture) -> Option<String>;

    /// Replaces `{$key$}` patterns; text without them comes back unchanged.
    fn localize(&self, text: &str, culture: &Culture) -> String {
        replace_localization_keys(text, |key| {
            self.get_string(key, culture)
                .unwrap_or_else(|| key.to_string())
        })
    }
}

/// Culture -> key -> text dictionary. Keys and cultures match case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ResourceLocalizer {
    resources: BTreeMap<String, BTreeMap<String, String>>,
}

impl ResourceLocalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(
        mut self,
        culture: &str,
        key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.insert(culture, key, text);
        self
    }

    pub fn insert(&mut self, culture: &str, key: impl Into<String>, text: impl Into<String>) {
        self.resources
            .entry(culture.to_lowercase())
            .or_default()
            .insert(key.into().to_lowercase(), text.into());
    }

    pub fn from_json(source: &str) -> Result<Self, MacroError> {
        let parsed: BTreeMap<String, BTreeMap<String, String>> = serde_json::from_str(source)
            .map_err(|error| MacroError::config(format!("Invalid resource file: {}", error)))?;
        let mut localizer = Self::new();
        for (culture, strings) in parsed {
            for (key, text) in strings {
                localizer.insert(&culture, key, text);
            }
        }
        Ok(localizer)
    }
}

impl Localizer for ResourceLocalizer {
    fn get_string(&self, key: &str, culture: &Culture) -> Option<String> {
        let key = key.trim().to_lowercase();
        let exact = self
            .resources
            .get(&culture.code().to_lowercase())
            .and_then(|strings| strings.get(&key));
        let language = || {
            self.resources
                .get(&culture.language())
                .and_then(|strings| strings.get(&key))
        };
        let invariant = || self.resources.get("").and_then(|strings| strings.get(&key));
        exact.or_else(language).or_else(invariant).cloned()
    }
}

pub trait ContextPropertyProvider: Send + Sync {
    fn get_ambient_property(&self, namespace: &str, name: &str) -> Option<MacroValue>;
}

/// Fixed ambient values, e.g. request data injected by a host.
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    values: BTreeMap<String, MacroValue>,
}

impl StaticContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<MacroValue>) -> Self {
        self.values.insert(name.to_lowercase(), value.into());
        self
    }
}

impl ContextPropertyProvider for StaticContextProvider {
    fn get_ambient_property(&self, _namespace: &str, name: &str) -> Option<MacroValue> {
        self.values.get(&name.to_lowercase()).cloned()
    }
}
