use mr_core::{MacroValue, MemberKey};

use super::context::EvaluationContext;
use crate::evaluator::{EvaluationResult, Outcome};

/// A source hit before lazy materialization and security.
struct Found {
    value: MacroValue,
    /// Already finalized by member access, or trusted alias output.
    checked: bool,
}

impl Found {
    fn raw(value: MacroValue) -> Self {
        Self {
            value,
            checked: false,
        }
    }

    fn checked(value: MacroValue) -> Self {
        Self {
            value,
            checked: true,
        }
    }
}

impl EvaluationContext {
    /// Answers what `name` means in the current scope; first source wins.
    pub fn lookup(&self, name: &str) -> EvaluationResult {
        let name = name.trim();
        if name.is_empty() {
            return self.result(Outcome::Unmatched);
        }
        let key = name.to_lowercase();
        let Some(found) = self.find_source(name, &key) else {
            tracing::debug!(name, "no source matched");
            return self.result(Outcome::Unmatched);
        };
        let value = match found.value {
            MacroValue::Lazy(field) => match field.materialize(self) {
                Some(value) => value,
                None => return self.result(Outcome::Unmatched),
            },
            value => value,
        };
        let value = match value {
            MacroValue::Property(property) => {
                self.record_dependency(&property.owner);
                property.value.clone()
            }
            value => value,
        };
        if found.checked {
            return self.result(Outcome::Matched(value));
        }
        self.record_dependency(&value);
        if !self.passes_security(&value) {
            return self.result(Outcome::Matched(MacroValue::Null));
        }
        self.result(Outcome::Matched(value))
    }

    fn find_source(&self, name: &str, key: &str) -> Option<Found> {
        let scope = self.resolver().scope();
        if let Some(value) = scope.find_dynamic(key) {
            return Some(Found::raw(value));
        }

        let member = MemberKey::Name(name.to_string());
        for source in self.prioritized_sources() {
            if let Some(value) = self.get_member_value(&source, &member) {
                self.mark_context_used();
                return Some(Found::checked(value));
            }
        }

        if let Some(value) = self.registry().on_get_value(key) {
            return Some(Found::raw(value));
        }

        // Named then anonymous, this scope first and then each parent in turn.
        let mut current = Some(scope.clone());
        while let Some(layer) = current {
            if let Some(value) = layer.named_value(key) {
                return Some(Found::raw(value));
            }
            for source in layer.anonymous_values() {
                if let Some(value) = self.get_member_value(&source, &member) {
                    return Some(Found::checked(value));
                }
            }
            current = layer.parent();
        }

        if let Some(expression) = scope.find_alias(key) {
            if let Some(value) = self.resolver().evaluate_alias(&expression, self) {
                return Some(Found::checked(value));
            }
        }

        if let Some(value) = self.registry().root_property(key) {
            return Some(Found::raw(value));
        }

        self.registry().ambient_property(name).map(Found::raw)
    }
}
