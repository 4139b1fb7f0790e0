//! Per-pass generation environment: session, context and rule sink, plus
//! lowering of stanza-level declarations into rule dependencies.

use globset::Glob;

use crate::compile::CompileEnv;
use crate::condition::Condition;
use crate::context::Context;
use crate::path::{BuildPath, RelPath};
use crate::rules::{AliasKey, Dep, FilePredicate, Rule, RuleSink};
use crate::session::Session;
use crate::source_tree::SourceTree;
use crate::stanza::{DepDecl, Loc};
use crate::template::Template;
use crate::util::hash::RuleId;

use super::types::GenError;

pub struct GenEnv<'a> {
  pub session: &'a Session,
  /// Snapshot of the source tree this pass generates from.
  pub tree: &'a SourceTree,
  pub ctx: &'a Context,
  pub sink: &'a RuleSink<'a>,
}

impl<'a> GenEnv<'a> {
  pub fn build(&self, rel: &RelPath) -> BuildPath {
    self.ctx.build_path(rel)
  }

  pub fn add(&self, rule: Rule) -> Result<RuleId, GenError> {
    Ok(self.sink.add(rule)?)
  }

  pub fn alias_key(&self, dir: &RelPath, name: &str) -> AliasKey {
    AliasKey::new(self.build(dir), name)
  }

  pub fn compile_env<'b>(&'b self, dir: &'b RelPath, loc: &'b Loc) -> CompileEnv<'b> {
    CompileEnv {
      ctx: self.ctx,
      tree: self.tree,
      sink: self.sink,
      dir,
      loc,
    }
  }

  /// Evaluate an optional enable condition; absent means enabled.
  pub fn enabled(&self, loc: &Loc, condition: Option<&Condition>) -> Result<bool, GenError> {
    match condition {
      None => Ok(true),
      Some(c) => c.eval(self.ctx).map_err(|source| GenError::Condition {
        loc: loc.to_string(),
        source,
      }),
    }
  }

  pub fn expand(&self, loc: &Loc, template: &Template) -> Result<String, GenError> {
    template.expand(self.ctx).map_err(|source| GenError::Template {
      loc: loc.to_string(),
      source,
    })
  }

  /// Lower declared dependencies written relative to `dir`.
  pub fn lower_deps(&self, loc: &Loc, dir: &RelPath, decls: &[DepDecl]) -> Result<Vec<Dep>, GenError> {
    decls.iter().map(|d| self.lower_dep(loc, dir, d)).collect()
  }

  fn lower_dep(&self, loc: &Loc, dir: &RelPath, decl: &DepDecl) -> Result<Dep, GenError> {
    let dep = match decl {
      DepDecl::File(t) => Dep::File(self.build(&dir.join(&self.expand(loc, t)?))),
      DepDecl::SourceTree(t) => Dep::SourceTree(self.build(&dir.join(&self.expand(loc, t)?))),
      DepDecl::Alias(t) => Dep::Alias(self.lower_alias(loc, dir, t)?),
      DepDecl::AliasRec(t) => Dep::AliasRec(self.lower_alias(loc, dir, t)?),
      DepDecl::Glob(t) => {
        let rel = dir.join(&self.expand(loc, t)?);
        let (parent, pattern) = split(loc, &rel)?;
        Glob::new(&pattern).map_err(|e| GenError::Glob {
          loc: loc.to_string(),
          glob: pattern.clone(),
          message: e.to_string(),
        })?;
        Dep::Matching {
          dir: self.build(&parent),
          predicate: FilePredicate::Glob(pattern),
        }
      }
    };
    Ok(dep)
  }

  fn lower_alias(&self, loc: &Loc, dir: &RelPath, t: &Template) -> Result<AliasKey, GenError> {
    let rel = dir.join(&self.expand(loc, t)?);
    let (parent, name) = split(loc, &rel)?;
    Ok(AliasKey::new(self.build(&parent), &name))
  }
}

fn split(loc: &Loc, rel: &RelPath) -> Result<(RelPath, String), GenError> {
  match (rel.parent(), rel.basename()) {
    (Some(parent), Some(name)) => Ok((parent, name.to_string())),
    _ => Err(GenError::Stanza {
      loc: loc.to_string(),
      message: "dependency must name something inside the workspace".to_string(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::session;

  #[test]
  fn lowers_each_declaration_kind() {
    let session = session(SourceTree::builder().build());
    let tree = session.tree();
    let ctx = &session.workspace.contexts[0];
    let sink = RuleSink::new(&session.registry, ctx.build_path(&RelPath::new("t")));
    let env = GenEnv {
      session: &session,
      tree: &tree,
      ctx,
      sink: &sink,
    };
    let loc = Loc::file(RelPath::new("t/strata.json"));
    let dir = RelPath::new("t");
    let decls = vec![
      DepDecl::File(Template::parse("data/%{profile}.txt").unwrap()),
      DepDecl::Alias(Template::parse("../lib/check").unwrap()),
      DepDecl::AliasRec(Template::parse("runtest").unwrap()),
      DepDecl::SourceTree(Template::parse("fixtures").unwrap()),
      DepDecl::Glob(Template::parse("*.json").unwrap()),
    ];

    let deps = env.lower_deps(&loc, &dir, &decls).unwrap();
    let b = |p: &str| BuildPath::in_context("default", p);
    assert_eq!(deps, vec![
      Dep::File(b("t/data/dev.txt")),
      Dep::Alias(AliasKey::new(b("lib"), "check")),
      Dep::AliasRec(AliasKey::new(b("t"), "runtest")),
      Dep::SourceTree(b("t/fixtures")),
      Dep::Matching {
        dir: b("t"),
        predicate: FilePredicate::Glob("*.json".to_string()),
      },
    ]);
  }

  #[test]
  fn reports_bad_glob_and_unknown_variable() {
    let session = session(SourceTree::builder().build());
    let tree = session.tree();
    let ctx = &session.workspace.contexts[0];
    let sink = RuleSink::new(&session.registry, ctx.build_path(&RelPath::root()));
    let env = GenEnv {
      session: &session,
      tree: &tree,
      ctx,
      sink: &sink,
    };
    let loc = Loc::file(RelPath::new("strata.json"));

    let bad_glob = env.lower_deps(&loc, &RelPath::root(), &[DepDecl::Glob(Template::parse("[").unwrap())]);
    assert!(matches!(bad_glob, Err(GenError::Glob { .. })));

    let unknown = env.lower_deps(&loc, &RelPath::root(), &[DepDecl::File(Template::parse("%{nope}").unwrap())]);
    assert!(matches!(unknown, Err(GenError::Template { .. })));
  }
}
