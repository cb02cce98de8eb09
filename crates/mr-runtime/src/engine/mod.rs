mod active;
mod context;
mod driver;
mod lookup;
mod member;
mod postprocess;
mod scope;

pub use context::{EvaluationContext, ExpressionKind};
pub use driver::{MacroResolver, MacroResolverOptions, ResolveOutput, OUT_PARAMETER};
pub use scope::MacroScope;
