//! Variable templates used in target specs, dependency lists and conditions.
//!
//! A template is literal text interleaved with `%{name}` references that are
//! expanded against a build context.
//!
//! # Escaping
//!
//! `%%{` produces a literal `%{`. A lone `%` passes through unchanged.
//!
//! # Example
//!
//! ```
//! use strata_lib::template::{Segment, Template};
//!
//! let t = Template::parse("%{profile}/out.txt").unwrap();
//! assert_eq!(t.segments(), &[
//!     Segment::Var("profile".to_string()),
//!     Segment::Literal("/out.txt".to_string()),
//! ]);
//! assert!(!t.is_literal());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A segment of parsed template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TemplateError {
  #[error("unclosed variable at position {0}")]
  Unclosed(usize),

  #[error("empty variable name at position {0}")]
  EmptyName(usize),

  #[error("unknown variable %{{{0}}}")]
  Unknown(String),
}

/// Source of variable values during expansion.
pub trait Vars {
  fn lookup(&self, name: &str) -> Option<String>;
}

/// Parsed template text. Keeps the original text for display and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
  raw: String,
  segments: Vec<Segment>,
}

impl Template {
  pub fn parse(input: &str) -> Result<Self, TemplateError> {
    Ok(Self {
      raw: input.to_string(),
      segments: parse(input)?,
    })
  }

  /// A template holding `text` verbatim.
  pub fn literal(text: &str) -> Self {
    let segments = if text.is_empty() {
      Vec::new()
    } else {
      vec![Segment::Literal(text.to_string())]
    };
    Self {
      raw: text.replace("%{", "%%{"),
      segments,
    }
  }

  pub fn raw(&self) -> &str {
    &self.raw
  }

  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  /// True when the template contains no variable references.
  pub fn is_literal(&self) -> bool {
    self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
  }

  /// The literal text, if the template has no variables.
  pub fn as_literal(&self) -> Option<String> {
    if !self.is_literal() {
      return None;
    }
    Some(
      self
        .segments
        .iter()
        .map(|s| match s {
          Segment::Literal(text) => text.as_str(),
          Segment::Var(_) => "",
        })
        .collect(),
    )
  }

  pub fn expand(&self, vars: &dyn Vars) -> Result<String, TemplateError> {
    let mut out = String::new();
    for segment in &self.segments {
      match segment {
        Segment::Literal(text) => out.push_str(text),
        Segment::Var(name) => {
          let value = vars.lookup(name).ok_or_else(|| TemplateError::Unknown(name.clone()))?;
          out.push_str(&value);
        }
      }
    }
    Ok(out)
  }
}

impl TryFrom<String> for Template {
  type Error = TemplateError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Template::parse(&value)
  }
}

impl From<Template> for String {
  fn from(value: Template) -> Self {
    value.raw
  }
}

impl fmt::Display for Template {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.raw)
  }
}

/// Parse template text into segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '%' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '%')) => {
        chars.next();
        match chars.peek() {
          Some((_, '{')) => {
            // %%{ -> literal %{
            chars.next();
            literal.push_str("%{");
          }
          _ => literal.push_str("%%"),
        }
      }
      Some((_, '{')) => {
        chars.next();

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut name = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }

        if !found_close {
          return Err(TemplateError::Unclosed(pos));
        }
        let name = name.trim();
        if name.is_empty() {
          return Err(TemplateError::EmptyName(pos));
        }
        segments.push(Segment::Var(name.to_string()));
      }
      _ => literal.push('%'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}
