use anyhow::Result;
use serde::Serialize;

use strata_lib::context::Context;
use strata_lib::stanza::Project;

use super::Options;
use crate::output::{print_json, print_stat};

#[derive(Serialize)]
struct Info<'a> {
  root: String,
  build_dir: &'a str,
  project: &'a Project,
  contexts: &'a [Context],
}

pub fn cmd_info(opts: &Options) -> Result<()> {
  let session = opts.session()?;
  let tree = session.tree();
  let info = Info {
    root: session.workspace.root.display().to_string(),
    build_dir: &session.workspace.layout.build_dir,
    project: tree.project(),
    contexts: session.contexts(),
  };

  if opts.output.is_json() {
    return print_json(&info);
  }

  println!("Workspace:");
  print_stat("Root", &info.root);
  print_stat("Build dir", info.build_dir);
  println!("Project:");
  print_stat("Name", &info.project.name);
  if let Some(version) = &info.project.version {
    print_stat("Version", version);
  }
  if !info.project.packages.is_empty() {
    print_stat("Packages", &info.project.packages.join(", "));
  }
  println!("Contexts:");
  for ctx in info.contexts {
    print_stat(&ctx.name, &format!("profile {} in {}", ctx.profile, ctx.build_dir));
  }
  Ok(())
}
