//! Argument constraints: a per-operation boolean pre-check over call arguments.
//!
//! Constraints are Cedar conditions. Each configured expression becomes the
//! `when` clause of a single permit policy, evaluated against a context of
//! `{ "args": <call arguments> }`:
//!
//! ```text
//! delete_rows: context.args.limit <= 100
//! ```
//!
//! Cedar has no floating point type, so arguments carrying floats fail to
//! evaluate rather than comparing.

use std::collections::HashMap;
use std::str::FromStr;

use cedar_policy::{
    Authorizer, Context, Decision, Entities, EntityId, EntityTypeName, EntityUid, PolicySet,
    Request,
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::protocol::ToolCall;

/// Errors from compiling or evaluating a constraint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// The expression is not a valid Cedar condition.
    #[error("invalid constraint for '{tool}': {details}")]
    Compile { tool: String, details: String },

    /// The expression could not be evaluated against these arguments.
    #[error("{details}")]
    Evaluation { tool: String, details: String },
}

/// Why a call was refused by its constraint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// The constraint evaluated to false.
    #[error("constraint returned false")]
    Rejected { tool: String },

    /// The constraint could not be evaluated.
    #[error("constraint failed to evaluate: {details}")]
    EvalFailed { tool: String, details: String },
}

/// Runs the constraint for `call`, if any.
///
/// # Errors
///
/// `Rejected` when the predicate is false, `EvalFailed` when it errors.
pub fn enforce(
    evaluator: &dyn ConstraintEvaluator,
    call: &ToolCall,
) -> Result<(), ConstraintViolation> {
    match evaluator.evaluate(&call.name, &call.arguments) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::info!(tool = %call.name, "call refused by constraint");
            Err(ConstraintViolation::Rejected {
                tool: call.name.clone(),
            })
        }
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "constraint failed to evaluate");
            Err(ConstraintViolation::EvalFailed {
                tool: call.name.clone(),
                details: e.to_string(),
            })
        }
    }
}

/// Boolean pre-check over an operation's arguments.
///
/// Returns `Ok(true)` when the call may proceed, `Ok(false)` when the
/// constraint rejects it, and an error when it cannot be evaluated. Operations
/// with no constraint always pass.
pub trait ConstraintEvaluator: Send + Sync {
    /// Evaluates the constraint configured for `tool`.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintError::Evaluation` when the expression fails at runtime.
    fn evaluate(&self, tool: &str, arguments: &Value) -> Result<bool, ConstraintError>;

    /// Whether `tool` has a constraint at all.
    fn has_constraint(&self, tool: &str) -> bool;
}

/// No constraints: every call passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConstraints;

impl ConstraintEvaluator for NoConstraints {
    fn evaluate(&self, _tool: &str, _arguments: &Value) -> Result<bool, ConstraintError> {
        Ok(true)
    }

    fn has_constraint(&self, _tool: &str) -> bool {
        false
    }
}

// ============================================================================
// Cedar
// ============================================================================

/// Constraint evaluator backed by Cedar conditions, compiled once at startup.
pub struct CedarConstraints {
    policies: HashMap<String, PolicySet>,
    authorizer: Authorizer,
    principal: EntityUid,
    action: EntityUid,
}

impl std::fmt::Debug for CedarConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&String> = self.policies.keys().collect();
        tools.sort();
        f.debug_struct("CedarConstraints").field("tools", &tools).finish()
    }
}

impl CedarConstraints {
    /// Compiles one expression per tool. Empty expressions are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintError::Compile` for the first expression that does
    /// not parse.
    pub fn compile<'a, I>(expressions: I) -> Result<Self, ConstraintError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut policies = HashMap::new();
        for (tool, expr) in expressions {
            let expr = expr.trim();
            if expr.is_empty() {
                continue;
            }
            let source = format!("permit(principal, action, resource) when {{ {expr} }};");
            let set = PolicySet::from_str(&source).map_err(|e| ConstraintError::Compile {
                tool: tool.to_string(),
                details: e.to_string(),
            })?;
            policies.insert(tool.to_string(), set);
        }

        Ok(Self {
            policies,
            authorizer: Authorizer::new(),
            principal: entity_uid("Relaygate::Agent", "client")?,
            action: entity_uid("Relaygate::Action", "call")?,
        })
    }

    /// Number of tools with a constraint.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl ConstraintEvaluator for CedarConstraints {
    fn evaluate(&self, tool: &str, arguments: &Value) -> Result<bool, ConstraintError> {
        let Some(policies) = self.policies.get(tool) else {
            return Ok(true);
        };
        let eval_err = |details: String| ConstraintError::Evaluation {
            tool: tool.to_string(),
            details,
        };

        let args = match arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };
        let context = Context::from_json_value(json!({ "args": args }), None)
            .map_err(|e| eval_err(e.to_string()))?;
        let resource = entity_uid("Relaygate::Tool", tool)?;
        let request = Request::new(
            self.principal.clone(),
            self.action.clone(),
            resource,
            context,
            None,
        )
        .map_err(|e| eval_err(e.to_string()))?;

        let response = self
            .authorizer
            .is_authorized(&request, policies, &Entities::empty());

        let errors: Vec<String> = response
            .diagnostics()
            .errors()
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            tracing::debug!(tool, errors = ?errors, "constraint evaluation failed");
            return Err(eval_err(errors.join("; ")));
        }

        let allowed = response.decision() == Decision::Allow;
        tracing::debug!(tool, allowed, "constraint evaluated");
        Ok(allowed)
    }

    fn has_constraint(&self, tool: &str) -> bool {
        self.policies.contains_key(tool)
    }
}

fn entity_uid(type_name: &str, id: &str) -> Result<EntityUid, ConstraintError> {
    let type_name = EntityTypeName::from_str(type_name).map_err(|e| ConstraintError::Compile {
        tool: id.to_string(),
        details: e.to_string(),
    })?;
    Ok(EntityUid::from_type_name_and_id(type_name, EntityId::new(id)))
}
