use std::sync::Arc;

use mr_core::MacroValue;

use super::context::EvaluationContext;
use super::driver::MacroResolver;
use crate::helpers::text::{contains_marker_start, html_encode, sql_escape};

const ITEM_SEPARATOR: char = '\n';

impl MacroResolver {
    /// Turns an evaluated value into the text spliced back into the document.
    ///
    /// Localization runs after nested resolution and before encoding, so encoding is
    /// always the outermost transform.
    pub(crate) fn finalize(&self, value: &MacroValue, context: &EvaluationContext, allow_recursion: bool) -> String {
        let mut text = self.value_to_text(value, context, allow_recursion);

        if text.is_empty() {
            if let Some(default) = context.applicable_default() {
                text = default.to_string();
            }
        }

        let settings = context.settings();
        text = self.localizer().localize(&text, &settings.culture);
        if settings.avoid_sql_injection {
            text = sql_escape(&text);
        }
        if settings.encode_resolved_values {
            text = html_encode(&text);
        }
        text
    }

    fn value_to_text(&self, value: &MacroValue, context: &EvaluationContext, allow_recursion: bool) -> String {
        if let Some(items) = value.enumerate() {
            let mut text = String::new();
            for item in &items {
                text.push_str(&self.value_to_text(item, context, false));
                text.push(ITEM_SEPARATOR);
            }
            if text.ends_with(ITEM_SEPARATOR) {
                text.pop();
            }
            return text;
        }
        match value {
            MacroValue::Property(property) => self.value_to_text(&property.value, context, allow_recursion),
            MacroValue::Lazy(field) => field
                .materialize(context)
                .map(|value| self.value_to_text(&value, context, allow_recursion))
                .unwrap_or_default(),
            value => {
                let text = value.to_display_text(context.culture());
                if allow_recursion && contains_marker_start(&text) && context.can_nest() {
                    let nested = Arc::new(context.nested_settings());
                    return self.resolve_text(&text, &nested, context.depth() + 1, context.trace());
                }
                text
            }
        }
    }
}
