use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use mr_core::{Identity, MacroError, MacroErrorKind, MacroValue, ResolverSettings};
use parking_lot::Mutex;
use serde::Serialize;

use super::active::ActiveExpressionSet;
use super::context::{ContextRequest, EvaluationContext, ExpressionKind, ResolveTrace, SharedTrace};
use super::scope::MacroScope;
use crate::collaborators::{
    AllowAllSecurity, AuditLog, Localizer, ResourceLocalizer, SecurityChecker, TracingAuditLog,
};
use crate::evaluator::{EvaluationResult, ExpressionEvaluator, Outcome};
use crate::helpers::markers::{replace_markers, MacroMarker, QUERY_STRING_SOURCE};
use crate::helpers::rhai_bridge::RhaiEvaluator;
use crate::helpers::text::contains_marker_start;
use crate::registry::ValueRegistry;

/// Dynamic parameter reset before every expression.
pub const OUT_PARAMETER: &str = "out";

#[derive(Clone)]
pub struct MacroResolverOptions {
    pub settings: ResolverSettings,
    pub name: String,
    pub evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    pub security: Option<Arc<dyn SecurityChecker>>,
    pub audit_log: Option<Arc<dyn AuditLog>>,
    pub localizer: Option<Arc<dyn Localizer>>,
    pub registry: Option<Arc<ValueRegistry>>,
    pub global_root: bool,
}

impl Default for MacroResolverOptions {
    fn default() -> Self {
        Self {
            settings: ResolverSettings::default(),
            name: String::new(),
            evaluator: None,
            security: None,
            audit_log: None,
            localizer: None,
            registry: None,
            global_root: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutput {
    pub text: String,
    pub cache_dependencies: Vec<String>,
    pub skipped_resolvers: Vec<String>,
}

struct ResolverShared {
    evaluator: Arc<dyn ExpressionEvaluator>,
    security: Arc<dyn SecurityChecker>,
    audit: Arc<dyn AuditLog>,
    localizer: Arc<dyn Localizer>,
    registry: Arc<ValueRegistry>,
    active: ActiveExpressionSet,
    skipped: Mutex<BTreeSet<String>>,
}

/// Finds markers in text and replaces each with its resolved value.
///
/// Clones share both the scope and the collaborators. Use [`MacroResolver::derive_child`]
/// to hand a resolver to another unit of work.
#[derive(Clone)]
pub struct MacroResolver {
    scope: MacroScope,
    shared: Arc<ResolverShared>,
}

impl MacroResolver {
    pub fn new(options: MacroResolverOptions) -> Result<Self, MacroError> {
        options.settings.validate()?;
        let scope = MacroScope::new(options.settings, options.name);
        scope.set_global_root(options.global_root);
        Ok(Self {
            scope,
            shared: Arc::new(ResolverShared {
                evaluator: options
                    .evaluator
                    .unwrap_or_else(|| Arc::new(RhaiEvaluator::new())),
                security: options
                    .security
                    .unwrap_or_else(|| Arc::new(AllowAllSecurity)),
                audit: options
                    .audit_log
                    .unwrap_or_else(|| Arc::new(TracingAuditLog)),
                localizer: options
                    .localizer
                    .unwrap_or_else(|| Arc::new(ResourceLocalizer::new())),
                registry: options.registry.unwrap_or_else(ValueRegistry::global),
                active: ActiveExpressionSet::default(),
                skipped: Mutex::new(BTreeSet::new()),
            }),
        })
    }

    pub fn scope(&self) -> &MacroScope {
        &self.scope
    }

    pub fn name(&self) -> String {
        self.scope.name()
    }

    pub fn settings(&self) -> Arc<ResolverSettings> {
        self.scope.settings()
    }

    pub fn registry(&self) -> &ValueRegistry {
        &self.shared.registry
    }

    /// A resolver over a child scope; data set on it never reaches `self`.
    pub fn derive_child(&self) -> Self {
        Self {
            scope: self.scope.derive_child(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Every resolver name tag deferred to so far.
    pub fn skipped_resolvers(&self) -> Vec<String> {
        self.shared.skipped.lock().iter().cloned().collect()
    }

    pub fn resolve_macros(&self, text: &str) -> String {
        self.resolve_detailed(text).text
    }

    pub fn resolve_detailed(&self, text: &str) -> ResolveOutput {
        let trace: SharedTrace = Rc::new(RefCell::new(ResolveTrace::default()));
        let text = self.resolve_text(text, &self.scope.settings(), 0, &trace);
        let trace = trace.borrow();
        ResolveOutput {
            text,
            cache_dependencies: trace.cache_dependencies.iter().cloned().collect(),
            skipped_resolvers: trace.skipped_resolvers.iter().cloned().collect(),
        }
    }

    /// Evaluates a bare expression and returns the raw result instead of text.
    pub fn evaluate_expression(&self, expression: &str) -> Result<Option<EvaluationResult>, MacroError> {
        let trace: SharedTrace = Rc::new(RefCell::new(ResolveTrace::default()));
        let request = ContextRequest::new(
            expression,
            ExpressionKind::Data,
            self.scope.settings(),
            0,
            trace,
        );
        let context = EvaluationContext::new(self.clone(), request);
        let tree = self.shared.evaluator.parse(expression, false)?;
        let result = self.shared.evaluator.evaluate(&tree, &context)?;
        if context.security_failed() {
            self.log_denied(&context);
        }
        Ok(result)
    }

    pub(crate) fn localizer(&self) -> &dyn Localizer {
        self.shared.localizer.as_ref()
    }

    pub(crate) fn security(&self) -> &dyn SecurityChecker {
        self.shared.security.as_ref()
    }

    pub(crate) fn resolve_text(
        &self,
        text: &str,
        settings: &Arc<ResolverSettings>,
        depth: usize,
        trace: &SharedTrace,
    ) -> String {
        if !contains_marker_start(text) {
            return text.to_string();
        }
        replace_markers(text, |marker| self.resolve_marker(marker, settings, depth, trace))
    }

    fn resolve_marker(
        &self,
        marker: &MacroMarker,
        base: &Arc<ResolverSettings>,
        depth: usize,
        trace: &SharedTrace,
    ) -> String {
        let started = Instant::now();
        let settings = marker.effective_settings(base);

        let Some(guard) = self.shared.active.try_enter(&marker.full_text) else {
            let error = MacroError::recursion(format!(
                "Recursive macro \"{}\" was skipped.",
                marker.full_text
            ));
            tracing::warn!(expression = %marker.full_text, "recursive macro");
            self.shared
                .audit
                .log_failure(&marker.full_text, &error.message, &error.code);
            return String::new();
        };

        self.scope.remove_dynamic(OUT_PARAMETER);
        let mut request = ContextRequest::new(
            marker.expression.clone(),
            marker.kind,
            Arc::clone(&settings),
            depth,
            Rc::clone(trace),
        );
        if marker.anonymous {
            request.identity = Identity::public();
        }
        request.default_value = marker.parameters.default_value.clone();
        request.resolver_tag = marker.parameters.resolver.clone();
        let context = EvaluationContext::new(self.clone(), request);

        if marker.kind == ExpressionKind::QueryString && marker.expression != QUERY_STRING_SOURCE {
            if let Some(query) = context.lookup(QUERY_STRING_SOURCE).into_value() {
                context.add_prioritized_source(query);
            }
        }

        if let Some(resolver_name) = context.deferred_resolver() {
            return self.skip(marker, resolver_name, trace);
        }

        let evaluated = self
            .shared
            .evaluator
            .parse(&marker.expression, false)
            .and_then(|tree| self.shared.evaluator.evaluate(&tree, &context));
        drop(guard);

        if context.security_failed() {
            self.log_denied(&context);
            return String::new();
        }

        let result = match evaluated {
            Ok(Some(result)) => result,
            Ok(None) => return self.unresolved(marker, &settings),
            Err(error) => {
                tracing::warn!(expression = %marker.full_text, code = %error.code, "{}", error.message);
                self.shared
                    .audit
                    .log_failure(&marker.full_text, &error.message, &error.code);
                return self.unresolved(marker, &settings);
            }
        };

        match result.outcome {
            Outcome::Skipped(resolver_name) => self.skip(marker, resolver_name, trace),
            Outcome::Unmatched => match context.applicable_default() {
                Some(default) => default.to_string(),
                None => self.unresolved(marker, &settings),
            },
            Outcome::Matched(value) => {
                let text = self.finalize(&value, &context, marker.allows_recursion());
                self.shared
                    .audit
                    .log_operation(&marker.full_text, &text, depth, started.elapsed());
                text
            }
        }
    }

    /// Leaves the marker for the resolver its tag names.
    fn skip(&self, marker: &MacroMarker, resolver_name: String, trace: &SharedTrace) -> String {
        tracing::debug!(expression = %marker.full_text, resolver = %resolver_name, "deferred");
        trace.borrow_mut().skipped_resolvers.insert(resolver_name.clone());
        self.shared.skipped.lock().insert(resolver_name);
        marker.full_text.clone()
    }

    fn unresolved(&self, marker: &MacroMarker, settings: &ResolverSettings) -> String {
        if settings.keep_unresolved {
            marker.full_text.clone()
        } else {
            String::new()
        }
    }

    fn log_denied(&self, context: &EvaluationContext) {
        let identity = context.identity();
        let error = MacroError::new(
            MacroErrorKind::Security,
            MacroErrorKind::Security.default_code(),
            format!(
                "Access denied for user \"{}\"{} while resolving \"{}\".",
                identity.user_name,
                if identity.is_public { " (public)" } else { "" },
                context.expression()
            ),
        );
        self.shared
            .audit
            .log_failure(context.expression(), &error.message, &error.code);
    }

    /// Evaluates a trusted alias expression; `None` on any miss, failure or cycle.
    pub(crate) fn evaluate_alias(&self, expression: &str, parent: &EvaluationContext) -> Option<MacroValue> {
        let key = format!("alias:{}", expression);
        let Some(_guard) = self.shared.active.try_enter(&key) else {
            tracing::debug!(expression, "alias cycle");
            return None;
        };
        let context = parent.for_alias(expression);
        let tree = self.shared.evaluator.parse(expression, true).ok()?;
        match self.shared.evaluator.evaluate(&tree, &context) {
            Ok(Some(result)) => result.into_value(),
            Ok(None) => None,
            Err(error) => {
                tracing::debug!(expression, code = %error.code, "alias failed: {}", error.message);
                None
            }
        }
    }
}

#[cfg(test)]
mod driver_tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::collaborators::MemoryAuditLog;
    use crate::evaluator::ExpressionTree;

    fn resolver_with_log() -> (MacroResolver, Arc<MemoryAuditLog>) {
        let log = Arc::new(MemoryAuditLog::default());
        let resolver = MacroResolver::new(MacroResolverOptions {
            audit_log: Some(log.clone()),
            registry: Some(Arc::new(ValueRegistry::new())),
            ..MacroResolverOptions::default()
        })
        .expect("resolver");
        (resolver, log)
    }

    #[test]
    fn text_without_markers_is_returned_unchanged() {
        let (resolver, log) = resolver_with_log();
        assert_eq!(resolver.resolve_macros("plain text {not a marker}"), "plain text {not a marker}");
        assert!(log.entries().is_empty());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let error = MacroResolver::new(MacroResolverOptions {
            settings: ResolverSettings {
                max_recursion_depth: 0,
                ..ResolverSettings::default()
            },
            ..MacroResolverOptions::default()
        })
        .err()
        .expect("config error");
        assert_eq!(error.code, "MACRO_CONFIG");
    }

    #[test]
    fn arithmetic_and_named_values_resolve() {
        let (resolver, log) = resolver_with_log();
        resolver.scope().set_named_value("price", 40);
        assert_eq!(resolver.resolve_macros("Total: {% price + 2 %}"), "Total: 42");
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn out_parameter_is_cleared_before_each_expression() {
        let (resolver, _) = resolver_with_log();
        resolver.scope().set_dynamic(OUT_PARAMETER, "stale");
        assert_eq!(resolver.resolve_macros("[{%out%}]"), "[]");
    }

    #[test]
    fn parse_errors_degrade_to_unresolved_policy() {
        let (resolver, log) = resolver_with_log();
        assert_eq!(resolver.resolve_macros("a{% 1 + %}b"), "ab");
        assert_eq!(log.failures_with_code("MACRO_PARSE").len(), 1);
        resolver.scope().update_settings(|settings| settings.keep_unresolved = true);
        assert_eq!(resolver.resolve_macros("a{% 1 + %}b"), "a{% 1 + %}b");
    }

    #[test]
    fn endless_loops_time_out() {
        let (resolver, log) = resolver_with_log();
        resolver
            .scope()
            .update_settings(|settings| settings.evaluation_timeout_ms = 20);
        assert_eq!(resolver.resolve_macros("[{% loop {} %}]"), "[]");
        assert_eq!(log.failures_with_code("MACRO_TIMEOUT").len(), 1);
    }

    #[test]
    fn foreign_resolver_tags_are_skipped_and_remembered() {
        let (resolver, _) = resolver_with_log();
        resolver.scope().set_named_value("x", 1);
        let output = resolver.resolve_detailed("{%x|(resolver)email%} {%x|(resolver)%}");
        assert_eq!(output.text, "{%x|(resolver)email%} 1");
        assert_eq!(output.skipped_resolvers, vec!["email".to_string()]);
        assert_eq!(resolver.skipped_resolvers(), vec!["email".to_string()]);
    }

    #[test]
    fn unmatched_marker_uses_default_parameter() {
        let (resolver, _) = resolver_with_log();
        assert_eq!(resolver.resolve_macros("{%missing|(default)n/a%}"), "n/a");
        resolver.scope().set_named_value("empty", "");
        assert_eq!(resolver.resolve_macros("{%empty|(default)none%}"), "none");
    }

    #[test]
    fn empty_context_value_stands_against_the_default() {
        let (resolver, _) = resolver_with_log();
        let query = BTreeMap::from([("id".to_string(), String::new())]);
        resolver
            .scope()
            .set_named_value("QueryString", MacroValue::StringMap(query));
        assert_eq!(resolver.resolve_macros("[{?id|(default)x?}]"), "[]");
        assert_eq!(resolver.resolve_macros("[{?page|(default)1?}]"), "[1]");
        resolver.scope().set_named_value("id", "");
        assert_eq!(resolver.resolve_macros("[{%id|(default)x%}]"), "[x]");
    }

    /// Answers every expression with 7, except `later`, which it defers itself.
    struct FixedEvaluator;

    impl ExpressionEvaluator for FixedEvaluator {
        fn parse(&self, expression: &str, _suppress_errors: bool) -> Result<ExpressionTree, MacroError> {
            Ok(ExpressionTree::empty(expression))
        }

        fn evaluate(
            &self,
            tree: &ExpressionTree,
            _context: &EvaluationContext,
        ) -> Result<Option<EvaluationResult>, MacroError> {
            if tree.expression() == "later" {
                return Ok(Some(EvaluationResult::skipped("batch")));
            }
            Ok(Some(EvaluationResult::matched(MacroValue::Int(7))))
        }
    }

    #[test]
    fn resolver_tags_are_honored_for_custom_evaluators() {
        let resolver = MacroResolver::new(MacroResolverOptions {
            evaluator: Some(Arc::new(FixedEvaluator)),
            registry: Some(Arc::new(ValueRegistry::new())),
            ..MacroResolverOptions::default()
        })
        .expect("resolver");
        let output = resolver.resolve_detailed("{%a%} {%a|(resolver)email%} {%later%}");
        assert_eq!(output.text, "7 {%a|(resolver)email%} {%later%}");
        assert_eq!(
            output.skipped_resolvers,
            vec!["batch".to_string(), "email".to_string()]
        );
    }

    #[test]
    fn evaluate_expression_returns_raw_values() {
        let (resolver, _) = resolver_with_log();
        resolver.scope().set_named_value("items", MacroValue::List(vec![1.into(), 2.into()]));
        let result = resolver
            .evaluate_expression("items")
            .expect("evaluates")
            .expect("has result");
        assert_eq!(
            result.into_value(),
            Some(MacroValue::List(vec![MacroValue::Int(1), MacroValue::Int(2)]))
        );
        assert!(resolver.evaluate_expression("1 +").is_err());
    }
}
