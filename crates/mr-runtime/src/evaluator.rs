use mr_core::{MacroError, MacroValue};

use crate::engine::EvaluationContext;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Matched(MacroValue),
    Unmatched,
    /// Deferred to the resolver carrying this name tag.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub outcome: Outcome,
    pub security_passed: bool,
    pub context_used: bool,
}

impl EvaluationResult {
    pub fn matched(value: MacroValue) -> Self {
        Self {
            outcome: Outcome::Matched(value),
            security_passed: true,
            context_used: false,
        }
    }

    pub fn unmatched() -> Self {
        Self {
            outcome: Outcome::Unmatched,
            security_passed: true,
            context_used: false,
        }
    }

    pub fn skipped(resolver_name: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skipped(resolver_name.into()),
            security_passed: true,
            context_used: false,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.outcome, Outcome::Matched(_))
    }

    pub fn value(&self) -> Option<&MacroValue> {
        match &self.outcome {
            Outcome::Matched(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<MacroValue> {
        match self.outcome {
            Outcome::Matched(value) => Some(value),
            _ => None,
        }
    }
}

/// A parsed expression. An empty tree evaluates to nothing.
#[derive(Debug, Clone)]
pub struct ExpressionTree {
    expression: String,
    ast: Option<rhai::AST>,
}

impl ExpressionTree {
    pub fn new(expression: impl Into<String>, ast: rhai::AST) -> Self {
        Self {
            expression: expression.into(),
            ast: Some(ast),
        }
    }

    pub fn empty(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ast: None,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn ast(&self) -> Option<&rhai::AST> {
        self.ast.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_none()
    }
}

pub trait ExpressionEvaluator: Send + Sync {
    /// With `suppress_errors`, malformed input yields an empty tree instead of `MACRO_PARSE`.
    fn parse(&self, expression: &str, suppress_errors: bool) -> Result<ExpressionTree, MacroError>;

    /// `Ok(None)` marks the expression as unevaluable.
    fn evaluate(
        &self,
        tree: &ExpressionTree,
        context: &EvaluationContext,
    ) -> Result<Option<EvaluationResult>, MacroError>;
}
