use std::collections::BTreeMap;
use std::time::Instant;

use mr_core::{MacroError, MacroValue, MemberKey};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, FLOAT, INT};

use crate::engine::EvaluationContext;
use crate::evaluator::{EvaluationResult, ExpressionEvaluator, ExpressionTree, Outcome};
use crate::helpers::text::html_encode;

const MAX_CALL_LEVELS: usize = 64;

pub(crate) fn macro_value_to_dynamic(value: MacroValue) -> Dynamic {
    match value {
        MacroValue::Null => Dynamic::UNIT,
        MacroValue::Bool(value) => Dynamic::from_bool(value),
        MacroValue::Int(value) => Dynamic::from_int(value as INT),
        MacroValue::Float(value) => Dynamic::from_float(value as FLOAT),
        MacroValue::Text(value) => Dynamic::from(value),
        MacroValue::List(values) => Dynamic::from_array(
            values
                .into_iter()
                .map(macro_value_to_dynamic)
                .collect::<Array>(),
        ),
        MacroValue::Property(property) => macro_value_to_dynamic(property.value.clone()),
        other => Dynamic::from(other),
    }
}

pub(crate) fn dynamic_to_macro_value(value: Dynamic) -> Result<MacroValue, MacroError> {
    if value.is_unit() {
        return Ok(MacroValue::Null);
    }
    if value.is::<bool>() {
        return Ok(MacroValue::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(MacroValue::Int(value.cast::<INT>()));
    }
    if value.is::<FLOAT>() {
        return Ok(MacroValue::Float(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(MacroValue::Text(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<char>() {
        return Ok(MacroValue::Text(value.cast::<char>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_macro_value(item)?);
        }
        return Ok(MacroValue::List(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_macro_value(value)?);
        }
        return Ok(MacroValue::Map(out));
    }
    if value.is::<MacroValue>() {
        return Ok(value.cast::<MacroValue>());
    }

    Err(MacroError::evaluation(format!(
        "Unsupported Rhai value type \"{}\".",
        value.type_name()
    )))
}

fn member_to_dynamic(context: &EvaluationContext, container: &MacroValue, key: MemberKey) -> Dynamic {
    match context.get_member(container, &key).outcome {
        Outcome::Matched(value) => macro_value_to_dynamic(value),
        _ => {
            context.mark_member_missed();
            Dynamic::UNIT
        }
    }
}

fn is_null_dynamic(value: &Dynamic) -> bool {
    value.is_unit()
        || value
            .read_lock::<MacroValue>()
            .map(|value| value.is_null() || matches!(*value, MacroValue::Placeholder))
            .unwrap_or(false)
}

/// Expression evaluator backed by a fresh Rhai engine per evaluation.
#[derive(Debug, Clone, Default)]
pub struct RhaiEvaluator;

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self
    }

    #[allow(deprecated)]
    fn build_engine(&self, context: &EvaluationContext) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.register_type_with_name::<MacroValue>("MacroValue");

        let lookup_context = context.clone();
        engine.on_var(move |name, _index, scope_context| {
            if scope_context.scope().contains(name) {
                return Ok(None);
            }
            match lookup_context.lookup(name).outcome {
                Outcome::Matched(value) => Ok(Some(macro_value_to_dynamic(value))),
                _ => Ok(None),
            }
        });

        let deadline = context.deadline();
        engine.on_progress(move |_operations| {
            (Instant::now() >= deadline).then(|| Dynamic::from("evaluation timed out"))
        });

        let member_context = context.clone();
        engine.register_indexer_get(move |container: &mut MacroValue, name: ImmutableString| {
            member_to_dynamic(&member_context, container, MemberKey::Name(name.to_string()))
        });
        let member_context = context.clone();
        engine.register_indexer_get(move |container: &mut MacroValue, index: INT| {
            member_to_dynamic(&member_context, container, MemberKey::Index(index))
        });
        engine.register_get("length", |text: &mut ImmutableString| text.chars().count() as INT);

        let culture = context.settings().culture.clone();
        engine.register_fn("to_string", move |value: &mut MacroValue| {
            value.to_display_text(&culture)
        });
        let culture = context.settings().culture.clone();
        engine.register_fn("+", move |left: ImmutableString, right: MacroValue| {
            format!("{}{}", left, right.to_display_text(&culture))
        });
        let culture = context.settings().culture.clone();
        engine.register_fn("+", move |left: MacroValue, right: ImmutableString| {
            format!("{}{}", left.to_display_text(&culture), right)
        });

        let resource_context = context.clone();
        engine.register_fn("GetResourceString", move |key: ImmutableString| {
            resource_context.resource_string(&key)
        });
        let nested_context = context.clone();
        engine.register_fn("ResolveMacros", move |text: ImmutableString| {
            nested_context.resolve_nested(&text)
        });
        engine.register_fn("HTMLEncode", |text: ImmutableString| html_encode(&text));
        engine.register_fn("IsNull", |value: Dynamic| is_null_dynamic(&value));

        engine
    }
}

impl ExpressionEvaluator for RhaiEvaluator {
    fn parse(&self, expression: &str, suppress_errors: bool) -> Result<ExpressionTree, MacroError> {
        if expression.trim().is_empty() {
            return Ok(ExpressionTree::empty(expression));
        }
        match Engine::new().compile(expression) {
            Ok(ast) => Ok(ExpressionTree::new(expression, ast)),
            Err(_) if suppress_errors => Ok(ExpressionTree::empty(expression)),
            Err(error) => Err(MacroError::parse(format!(
                "Expression parse failed: {}",
                error
            ))),
        }
    }

    fn evaluate(
        &self,
        tree: &ExpressionTree,
        context: &EvaluationContext,
    ) -> Result<Option<EvaluationResult>, MacroError> {
        let Some(ast) = tree.ast() else {
            return Ok(None);
        };

        let engine = self.build_engine(context);
        let value = match engine.eval_ast::<Dynamic>(ast) {
            Ok(value) => dynamic_to_macro_value(value)?,
            Err(error) => {
                return match *error {
                    EvalAltResult::ErrorVariableNotFound(..)
                    | EvalAltResult::ErrorPropertyNotFound(..) => {
                        Ok(Some(context.result(Outcome::Unmatched)))
                    }
                    EvalAltResult::ErrorTerminated(..) => Err(MacroError::timeout(format!(
                        "Expression exceeded {} ms: {}",
                        context.settings().evaluation_timeout_ms,
                        tree.expression()
                    ))),
                    // Member access on a missed member, e.g. `a.missing.deeper`.
                    _ if context.member_missed() => Ok(Some(context.result(Outcome::Unmatched))),
                    other => Err(MacroError::evaluation(format!(
                        "Expression eval failed: {}",
                        other
                    ))),
                };
            }
        };

        if value.is_null() && context.member_missed() {
            return Ok(Some(context.result(Outcome::Unmatched)));
        }
        Ok(Some(context.result(Outcome::Matched(value))))
    }
}

#[cfg(test)]
mod rhai_bridge_tests {
    use super::*;

    #[test]
    fn scalars_and_arrays_convert_both_ways() {
        let list = MacroValue::List(vec![MacroValue::Int(1), MacroValue::text("a")]);
        let dynamic = macro_value_to_dynamic(list.clone());
        assert!(dynamic.is::<Array>());
        assert_eq!(dynamic_to_macro_value(dynamic).expect("convert back"), list);
        assert_eq!(
            dynamic_to_macro_value(Dynamic::UNIT).expect("unit"),
            MacroValue::Null
        );
        assert_eq!(
            dynamic_to_macro_value(Dynamic::from('x')).expect("char"),
            MacroValue::text("x")
        );
    }

    #[test]
    fn rich_values_travel_as_custom_type() {
        let map = MacroValue::Map(BTreeMap::from([("a".to_string(), MacroValue::Int(1))]));
        let dynamic = macro_value_to_dynamic(map.clone());
        assert!(dynamic.is::<MacroValue>());
        assert_eq!(dynamic_to_macro_value(dynamic).expect("custom"), map);
    }

    #[test]
    fn rhai_maps_become_macro_maps() {
        let mut map = Map::new();
        map.insert("flag".into(), Dynamic::from_bool(true));
        let converted = dynamic_to_macro_value(Dynamic::from_map(map)).expect("map");
        assert_eq!(
            converted,
            MacroValue::Map(BTreeMap::from([("flag".to_string(), MacroValue::Bool(true))]))
        );
    }

    #[test]
    fn unsupported_values_are_rejected() {
        let error = dynamic_to_macro_value(Dynamic::from(std::time::Duration::from_secs(1)))
            .expect_err("unsupported");
        assert_eq!(error.code, "MACRO_EVAL");
    }

    #[test]
    fn parse_reports_or_suppresses_syntax_errors() {
        let evaluator = RhaiEvaluator::new();
        let error = evaluator.parse("a +", false).expect_err("syntax error");
        assert_eq!(error.code, "MACRO_PARSE");
        assert!(evaluator.parse("a +", true).expect("suppressed").is_empty());
        assert!(!evaluator.parse("a + 1", false).expect("valid").is_empty());
    }

    #[test]
    fn null_check_covers_unit_and_null_values() {
        assert!(is_null_dynamic(&Dynamic::UNIT));
        assert!(is_null_dynamic(&Dynamic::from(MacroValue::Null)));
        assert!(!is_null_dynamic(&Dynamic::from(MacroValue::Int(0))));
    }
}
