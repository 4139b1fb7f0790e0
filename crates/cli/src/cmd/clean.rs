//! Implementation of the `strata clean` command.

use std::time::Instant;

use anyhow::{Context, Result};

use strata_lib::gc::{GcResult, stale_outputs};

use super::{Options, runtime};
use crate::output::{format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_clean(opts: &Options, dry_run: bool, context: Option<&str>) -> Result<()> {
  let start = Instant::now();
  let orch = opts.orchestrator()?;
  let rt = runtime()?;

  let names: Vec<String> = match context {
    Some(name) => vec![name.to_string()],
    None => orch.session().workspace.context_names(),
  };

  let mut results: Vec<(String, GcResult)> = Vec::new();
  for name in names {
    let result = rt
      .block_on(stale_outputs(&orch, &name, dry_run))
      .with_context(|| format!("Failed to clean context {}", name))?;
    results.push((name, result));
  }

  if opts.output.is_json() {
    return print_json(&results);
  }

  println!();
  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Clean complete!");
  }
  for (name, result) in &results {
    print_stat("Context", name);
    print_stat("Files removed", &result.stats.files_deleted.to_string());
    print_stat("Directories removed", &result.stats.dirs_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    if dry_run {
      for path in &result.deleted_paths {
        println!("    {}", path.display());
      }
    }
  }
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
