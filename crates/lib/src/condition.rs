//! Enable conditions attached to stanzas.
//!
//! Conditions are a closed boolean expression language over templates,
//! evaluated independently in every context.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::{Template, TemplateError, Vars};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error("{template} expands to {value:?}, expected true or false")]
  NotBoolean { template: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
  True,
  False,
  /// A template that must expand to `true` or `false`.
  Var(Template),
  Eq(Template, Template),
  Neq(Template, Template),
  And(Vec<Condition>),
  Or(Vec<Condition>),
  Not(Box<Condition>),
}

impl Condition {
  pub fn eval(&self, vars: &dyn Vars) -> Result<bool, ConditionError> {
    match self {
      Condition::True => Ok(true),
      Condition::False => Ok(false),
      Condition::Var(t) => {
        let value = t.expand(vars)?;
        match value.as_str() {
          "true" => Ok(true),
          "false" => Ok(false),
          _ => Err(ConditionError::NotBoolean {
            template: t.raw().to_string(),
            value,
          }),
        }
      }
      Condition::Eq(a, b) => Ok(a.expand(vars)? == b.expand(vars)?),
      Condition::Neq(a, b) => Ok(a.expand(vars)? != b.expand(vars)?),
      Condition::And(items) => {
        for item in items {
          if !item.eval(vars)? {
            return Ok(false);
          }
        }
        Ok(true)
      }
      Condition::Or(items) => {
        for item in items {
          if item.eval(vars)? {
            return Ok(true);
          }
        }
        Ok(false)
      }
      Condition::Not(inner) => Ok(!inner.eval(vars)?),
    }
  }

  /// Evaluate the conjunction of `conditions`; empty means enabled.
  pub fn eval_all(conditions: &[Condition], vars: &dyn Vars) -> Result<bool, ConditionError> {
    for c in conditions {
      if !c.eval(vars)? {
        return Ok(false);
      }
    }
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Context;
  use crate::path::Layout;

  fn ctx() -> Context {
    Context::new("default", "release", &Layout::new("_build")).with_var("has_node", "false")
  }

  #[test]
  fn eq_and_not() {
    let c = Condition::And(vec![
      Condition::Eq(Template::parse("%{profile}").unwrap(), Template::literal("release")),
      Condition::Not(Box::new(Condition::Var(Template::parse("%{has_node}").unwrap()))),
    ]);
    assert!(c.eval(&ctx()).unwrap());
  }

  #[test]
  fn or_short_circuits() {
    let c = Condition::Or(vec![Condition::True, Condition::Var(Template::parse("%{missing}").unwrap())]);
    assert!(c.eval(&ctx()).unwrap());
  }

  #[test]
  fn non_boolean_var_is_error() {
    let c = Condition::Var(Template::parse("%{profile}").unwrap());
    assert!(matches!(c.eval(&ctx()), Err(ConditionError::NotBoolean { .. })));
  }

  #[test]
  fn deserializes_from_json() {
    let c: Condition = serde_json::from_str(r#"{ "neq": ["%{profile}", "dev"] }"#).unwrap();
    assert!(c.eval(&ctx()).unwrap());
    let t: Condition = serde_json::from_str(r#""false""#).unwrap();
    assert_eq!(t, Condition::False);
  }

  #[test]
  fn empty_conjunction_is_enabled() {
    assert!(Condition::eval_all(&[], &ctx()).unwrap());
    assert!(!Condition::eval_all(&[Condition::True, Condition::False], &ctx()).unwrap());
  }
}
