//! Implementation of the `strata targets` command.

use anyhow::{Context, Result};

use super::{Options, build_dirs, runtime};
use crate::output::{print_info, print_json};

pub fn cmd_targets(opts: &Options, dir: Option<&str>) -> Result<()> {
  let orch = opts.orchestrator()?;
  let rt = runtime()?;

  let mut targets = Vec::new();
  for build_dir in build_dirs(&orch, dir.unwrap_or("."))? {
    let found = rt
      .block_on(orch.targets_under(&build_dir))
      .with_context(|| format!("Failed to generate rules under {}", build_dir))?;
    targets.extend(found);
  }

  let layout = &orch.session().workspace.layout;
  let rendered: Vec<String> = targets.iter().map(|t| layout.render(t)).collect();

  if opts.output.is_json() {
    return print_json(&rendered);
  }
  if rendered.is_empty() {
    print_info("No targets");
  }
  for target in rendered {
    println!("{}", target);
  }
  Ok(())
}
