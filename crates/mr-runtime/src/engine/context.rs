use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mr_core::{Culture, Identity, LazyContext, MacroValue, ResolverSettings};

use super::driver::MacroResolver;
use crate::evaluator::{EvaluationResult, Outcome};
use crate::registry::ValueRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Data,
    Localization,
    QueryString,
    Alias,
}

/// What one top-level resolution call collected on the side.
#[derive(Debug, Default)]
pub(crate) struct ResolveTrace {
    pub(crate) cache_dependencies: BTreeSet<String>,
    pub(crate) skipped_resolvers: BTreeSet<String>,
}

pub(crate) type SharedTrace = Rc<RefCell<ResolveTrace>>;

pub(crate) struct ContextRequest {
    pub(crate) expression: String,
    pub(crate) kind: ExpressionKind,
    pub(crate) settings: Arc<ResolverSettings>,
    pub(crate) identity: Identity,
    pub(crate) check_security: bool,
    pub(crate) default_value: Option<String>,
    pub(crate) resolver_tag: Option<String>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) depth: usize,
    pub(crate) trace: SharedTrace,
}

impl ContextRequest {
    pub(crate) fn new(
        expression: impl Into<String>,
        kind: ExpressionKind,
        settings: Arc<ResolverSettings>,
        depth: usize,
        trace: SharedTrace,
    ) -> Self {
        Self {
            expression: expression.into(),
            kind,
            identity: settings.identity(),
            check_security: settings.check_security,
            settings,
            default_value: None,
            resolver_tag: None,
            deadline: None,
            depth,
            trace,
        }
    }
}

struct ContextState {
    resolver: MacroResolver,
    settings: Arc<ResolverSettings>,
    expression: String,
    kind: ExpressionKind,
    identity: Identity,
    check_security: bool,
    default_value: Option<String>,
    resolver_tag: Option<String>,
    deadline: Instant,
    depth: usize,
    prioritized_sources: RefCell<Vec<MacroValue>>,
    security_failed: Cell<bool>,
    context_used: Cell<bool>,
    member_missed: Cell<bool>,
    trace: SharedTrace,
}

/// Per-expression state handed to the evaluator; discarded after the expression.
#[derive(Clone)]
pub struct EvaluationContext {
    state: Rc<ContextState>,
}

impl EvaluationContext {
    pub(crate) fn new(resolver: MacroResolver, request: ContextRequest) -> Self {
        let deadline = request.deadline.unwrap_or_else(|| {
            Instant::now() + Duration::from_millis(request.settings.evaluation_timeout_ms)
        });
        Self {
            state: Rc::new(ContextState {
                resolver,
                settings: request.settings,
                expression: request.expression,
                kind: request.kind,
                identity: request.identity,
                check_security: request.check_security,
                default_value: request.default_value,
                resolver_tag: request.resolver_tag,
                deadline,
                depth: request.depth,
                prioritized_sources: RefCell::new(Vec::new()),
                security_failed: Cell::new(false),
                context_used: Cell::new(false),
                member_missed: Cell::new(false),
                trace: request.trace,
            }),
        }
    }

    /// Context for a trusted alias expression: same deadline and depth, no security check.
    pub(crate) fn for_alias(&self, expression: &str) -> Self {
        let mut request = ContextRequest::new(
            expression,
            ExpressionKind::Alias,
            Arc::clone(&self.state.settings),
            self.state.depth,
            Rc::clone(&self.state.trace),
        );
        request.identity = self.state.identity.clone();
        request.check_security = false;
        request.deadline = Some(self.state.deadline);
        Self::new(self.state.resolver.clone(), request)
    }

    pub fn expression(&self) -> &str {
        &self.state.expression
    }

    pub fn kind(&self) -> ExpressionKind {
        self.state.kind
    }

    pub fn settings(&self) -> &Arc<ResolverSettings> {
        &self.state.settings
    }

    pub fn culture(&self) -> &Culture {
        &self.state.settings.culture
    }

    pub fn identity(&self) -> &Identity {
        &self.state.identity
    }

    pub fn depth(&self) -> usize {
        self.state.depth
    }

    pub fn check_security(&self) -> bool {
        self.state.check_security
    }

    pub fn default_value(&self) -> Option<&str> {
        self.state.default_value.as_deref()
    }

    /// The marker's default, unless a prioritized context source supplied the value.
    /// A context value stands even when it is empty, such as `?id=` in a query string.
    pub fn applicable_default(&self) -> Option<&str> {
        if self.context_used() {
            return None;
        }
        self.default_value().filter(|default| !default.is_empty())
    }

    pub fn deadline(&self) -> Instant {
        self.state.deadline
    }

    pub fn is_timed_out(&self) -> bool {
        Instant::now() >= self.state.deadline
    }

    pub fn resolver_name(&self) -> String {
        self.state.resolver.name()
    }

    /// The name tag of another resolver this expression belongs to, if any.
    pub fn deferred_resolver(&self) -> Option<String> {
        let tag = self.state.resolver_tag.as_deref()?.trim();
        if tag.is_empty() || tag.eq_ignore_ascii_case(self.state.resolver.name().trim()) {
            return None;
        }
        Some(tag.to_string())
    }

    /// Sources probed before every other source, for this expression only.
    pub fn add_prioritized_source(&self, source: MacroValue) {
        self.state.prioritized_sources.borrow_mut().push(source);
    }

    pub fn security_failed(&self) -> bool {
        self.state.security_failed.get()
    }

    pub fn context_used(&self) -> bool {
        self.state.context_used.get()
    }

    pub fn member_missed(&self) -> bool {
        self.state.member_missed.get()
    }

    pub fn mark_member_missed(&self) {
        self.state.member_missed.set(true);
    }

    /// Wraps an outcome with the flags collected so far.
    pub fn result(&self, outcome: Outcome) -> EvaluationResult {
        EvaluationResult {
            outcome,
            security_passed: !self.security_failed(),
            context_used: self.context_used(),
        }
    }

    /// Localized resource text, or the key itself when no resource exists.
    pub fn resource_string(&self, key: &str) -> String {
        let key = key.trim();
        self.state
            .resolver
            .localizer()
            .get_string(key, &self.state.settings.culture)
            .unwrap_or_else(|| key.to_string())
    }

    /// The outermost resolution counts as the first level, so at most
    /// `max_recursion_depth` levels ever run.
    pub(crate) fn can_nest(&self) -> bool {
        self.state.depth + 1 < self.state.settings.max_recursion_depth
    }

    /// One nesting level deeper; past the depth limit the text is returned as-is.
    pub fn resolve_nested(&self, text: &str) -> String {
        if !self.can_nest() {
            return text.to_string();
        }
        let settings = Arc::new(self.nested_settings());
        self.state
            .resolver
            .resolve_text(text, &settings, self.state.depth + 1, &self.state.trace)
    }

    /// Settings for nested resolution; outer transforms are applied once by the caller.
    pub(crate) fn nested_settings(&self) -> ResolverSettings {
        let mut settings = ResolverSettings::clone(&self.state.settings);
        settings.encode_resolved_values = false;
        settings.avoid_sql_injection = false;
        settings
    }

    pub(crate) fn resolver(&self) -> &MacroResolver {
        &self.state.resolver
    }

    pub(crate) fn registry(&self) -> &ValueRegistry {
        self.state.resolver.registry()
    }

    pub(crate) fn trace(&self) -> &SharedTrace {
        &self.state.trace
    }

    pub(crate) fn prioritized_sources(&self) -> Vec<MacroValue> {
        self.state.prioritized_sources.borrow().clone()
    }

    pub(crate) fn mark_context_used(&self) {
        self.state.context_used.set(true);
    }

    pub(crate) fn record_dependency(&self, value: &MacroValue) {
        if !self.state.settings.track_cache_dependencies {
            return;
        }
        if let Some(key) = value.cache_dependency() {
            self.state.trace.borrow_mut().cache_dependencies.insert(key);
        }
    }

    /// `false` when the value is denied; the failure sticks to this context.
    pub(crate) fn passes_security(&self, value: &MacroValue) -> bool {
        if !self.state.check_security || !value.is_securable() {
            return true;
        }
        if self
            .state
            .resolver
            .security()
            .check_permission(value, &self.state.identity)
        {
            return true;
        }
        tracing::warn!(
            expression = %self.state.expression,
            user = %self.state.identity.user_name,
            "permission denied for {}",
            value.type_name()
        );
        self.state.security_failed.set(true);
        false
    }
}

impl LazyContext for EvaluationContext {
    fn resolve_macros(&self, text: &str) -> String {
        let settings = Arc::new(self.nested_settings());
        self.state
            .resolver
            .resolve_text(text, &settings, self.state.depth, &self.state.trace)
    }

    fn lookup_value(&self, name: &str) -> Option<MacroValue> {
        self.lookup(name).into_value()
    }

    fn culture(&self) -> &Culture {
        &self.state.settings.culture
    }

    fn identity(&self) -> &Identity {
        &self.state.identity
    }
}
