mod collaborators;
mod engine;
mod evaluator;
mod helpers;
mod registry;

pub use collaborators::{
    AllowAllSecurity, AuditEntry, AuditLog, ContextPropertyProvider, Localizer, MemoryAuditLog,
    ResourceLocalizer, SecurityChecker, StaticContextProvider, TracingAuditLog,
};
pub use engine::{
    EvaluationContext, ExpressionKind, MacroResolver, MacroResolverOptions, MacroScope,
    ResolveOutput, OUT_PARAMETER,
};
pub use evaluator::{EvaluationResult, ExpressionEvaluator, ExpressionTree, Outcome};
pub use helpers::rhai_bridge::RhaiEvaluator;
pub use helpers::text::{html_encode, sql_escape};
pub use registry::{FieldProducer, IndexHandler, NameHandler, RootProperty, ValueHook, ValueRegistry};
