//! Generators for the root marker, the install namespace and the reserved
//! subsystem namespaces.

use crate::consts::{ALIAS_DOC, CCOMP_DIR, DOC_HTML_DIR, KEEP_MARKER, ROOT_MARKER};
use crate::context::Context;
use crate::path::{BuildPath, RelPath};
use crate::rules::{Action, AliasKey, Dep, Rule, RuleSink};
use crate::session::Session;
use crate::stanza::{Library, Stanza};

use super::Orchestrator;
use super::classify::Subsystem;
use super::types::{DirKind, DirOutcome, GenError, Retain};

/// `install/<ctx>/<rel>`: every source directory is loaded first so the
/// install obligations of the whole context are known.
pub(super) async fn install(orch: &Orchestrator, dir: &BuildPath, ctx: &Context, rel: &RelPath) -> Result<DirOutcome, GenError> {
  let session = orch.session();
  let sources: Vec<BuildPath> = session.tree().dirs().map(|d| ctx.build_path(&d.path)).collect();
  orch.load_batch(Some(dir), &sources).await?;

  let sink = RuleSink::new(&session.registry, dir.clone());
  for entry in session.installs.entries(&ctx.name) {
    if entry.dst.parent().as_ref() != Some(rel) {
      continue;
    }
    let dst = BuildPath::in_install(&ctx.name, entry.dst.clone());
    sink.add(
      Rule::new(Action::Symlink {
        src: entry.src.clone(),
        dst: dst.clone(),
      })
      .target(dst)
      .dep(Dep::File(entry.src)),
    )?;
  }

  let retain = if rel.is_root() { Retain::All } else { Retain::Nothing };
  Ok(DirOutcome::new(dir.clone(), DirKind::Install).with_rules(sink.into_registered()).retaining(retain))
}

/// `.strata` and below: bootstrap rules and the keep marker.
pub(super) fn root_marker(session: &Session, dir: &BuildPath, ctx: &Context, rest: &[String]) -> Result<DirOutcome, GenError> {
  let sink = RuleSink::new(&session.registry, dir.clone());
  let marker = RelPath::new(ROOT_MARKER);

  let retain = match rest {
    [] => {
      let keep = ctx.build_path(&marker.join(KEEP_MARKER));
      sink.add(
        Rule::new(Action::WriteFile {
          dst: keep.clone(),
          contents: String::new(),
        })
        .target(keep),
      )?;
      Retain::these([CCOMP_DIR])
    }
    [only] if only == CCOMP_DIR => {
      let config = ctx.build_path(&marker.join(CCOMP_DIR).join("config"));
      sink.add(
        Rule::new(Action::run("detect-compiler", [
          "-o".to_string(),
          config.to_string(),
          format!("--profile={}", ctx.profile),
        ]))
        .target(config),
      )?;
      Retain::Nothing
    }
    _ => Retain::Nothing,
  };

  Ok(
    DirOutcome::new(dir.clone(), DirKind::RootMarker)
      .with_rules(sink.into_registered())
      .retaining(retain),
  )
}

fn visible_libraries(session: &Session) -> Vec<(RelPath, Library)> {
  session
    .tree()
    .dirs()
    .flat_map(|d| {
      d.stanzas.iter().filter_map(move |s| match s {
        Stanza::Library(lib) if session.package_visible(lib.package.as_deref()) => Some((d.path.clone(), lib.clone())),
        _ => None,
      })
    })
    .collect()
}

fn archive(ctx: &Context, dir: &RelPath, lib: &Library) -> BuildPath {
  ctx.build_path(&dir.join(&format!("{}.cma", lib.name)))
}

/// `.js`, `_doc` and `.ppx`. Each retains everything at its top level and
/// nothing extra below.
pub(super) fn generate(
  session: &Session,
  dir: &BuildPath,
  ctx: &Context,
  kind: Subsystem,
  rest: &[String],
) -> Result<DirOutcome, GenError> {
  let outcome = DirOutcome::new(
    dir.clone(),
    DirKind::Subsystem {
      name: kind.name().to_string(),
    },
  );
  if rest.is_empty() {
    return Ok(outcome.retaining(Retain::All));
  }

  let tree = session.tree();
  let sink = RuleSink::new(&session.registry, dir.clone());
  match (kind, rest) {
    (Subsystem::Js, [name]) => {
      if let Some((lib_dir, lib)) = tree.find_library(name) {
        let input = archive(ctx, &lib_dir, &lib);
        let output = dir.join(&format!("{}.cma.js", lib.name));
        sink.add(
          Rule::new(Action::run("js-compile", [
            "-o".to_string(),
            output.to_string(),
            input.to_string(),
          ]))
          .target(output)
          .dep(Dep::File(input)),
        )?;
      }
    }
    (Subsystem::Doc, [html]) if html == DOC_HTML_DIR => {
      let libs = visible_libraries(session);
      let index = dir.join("index.html");
      let mut pages = vec![Dep::File(index.clone())];
      let listing: String = libs.iter().map(|(_, lib)| format!("{}\n", lib.name)).collect();
      sink.add(
        Rule::new(Action::WriteFile {
          dst: index.clone(),
          contents: listing,
        })
        .target(index),
      )?;
      pages.extend(libs.iter().map(|(_, lib)| Dep::File(dir.join(&lib.name).join("index.html"))));
      sink.alias_deps(&AliasKey::new(dir.clone(), ALIAS_DOC), pages);
    }
    (Subsystem::Doc, [html, name]) if html == DOC_HTML_DIR => {
      if let Some((lib_dir, lib)) = visible_libraries(session).into_iter().find(|(_, l)| &l.name == name) {
        let input = archive(ctx, &lib_dir, &lib);
        let output = dir.join("index.html");
        sink.add(
          Rule::new(Action::run("doc-html", [
            "-o".to_string(),
            output.to_string(),
            input.to_string(),
          ]))
          .target(output)
          .dep(Dep::File(input)),
        )?;
      }
    }
    (Subsystem::Ppx, [key]) => {
      let names: Vec<String> = key.split('+').filter(|n| !n.is_empty()).map(str::to_string).collect();
      let deps: Vec<Dep> = names
        .iter()
        .filter_map(|n| tree.find_library(n))
        .map(|(lib_dir, lib)| Dep::File(archive(ctx, &lib_dir, &lib)))
        .collect();
      let driver = dir.join("ppx.exe");
      sink.add(
        Rule::new(Action::run(
          "link-ppx",
          ["-o".to_string(), driver.to_string()].into_iter().chain(names),
        ))
        .target(driver)
        .deps(deps),
      )?;
    }
    _ => {}
  }

  Ok(outcome.with_rules(sink.into_registered()))
}
