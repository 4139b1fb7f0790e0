//! Implementation of the `strata build` command.
//!
//! Resolves the requested targets, reports every failing one with hints, and
//! prints the rule plan an execution engine would run.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use strata_lib::resolve::{Resolver, Target, into_report};
use strata_lib::rules::Rule;
use strata_lib::rules::plan::RulePlan;
use strata_lib::util::hash::RuleId;

use super::{Options, runtime};
use crate::output::{describe_action, print_error, print_info, print_json, print_stat, print_success, truncate_hash};

#[derive(Serialize)]
struct PlannedRule<'a> {
  id: &'a RuleId,
  rule: &'a Rule,
}

#[derive(Serialize)]
struct BuildOutput<'a> {
  targets: &'a [Target],
  waves: Vec<Vec<PlannedRule<'a>>>,
}

pub fn cmd_build(opts: &Options, targets: &[String]) -> Result<()> {
  let orch = opts.orchestrator()?;
  let rt = runtime()?;

  let results = rt.block_on(Resolver::new(&orch).resolve_text(targets));
  let resolved = match into_report(results) {
    Ok(resolved) => resolved,
    Err(report) => {
      for err in &report.errors {
        print_error(&err.to_string());
        if !err.hints.is_empty() {
          eprintln!("  hint: did you mean {}?", err.hints.join(", "));
        }
      }
      std::process::exit(1);
    }
  };

  let plan = rt
    .block_on(RulePlan::for_targets(&orch, &resolved))
    .context("Failed to compute build plan")?;
  let waves = plan.waves().context("Failed to order build plan")?;

  if opts.output.is_json() {
    let waves = waves
      .iter()
      .map(|wave| {
        wave
          .iter()
          .filter_map(|id| plan.rule(id).map(|rule| PlannedRule { id, rule }))
          .collect()
      })
      .collect();
    return print_json(&BuildOutput {
      targets: &resolved,
      waves,
    });
  }

  if plan.is_empty() {
    print_info("Nothing to build");
    return Ok(());
  }

  let layout = &orch.session().workspace.layout;
  for (i, wave) in waves.iter().enumerate() {
    println!(
      "{}",
      format!("Wave {}", i + 1).if_supports_color(Stream::Stdout, |s| s.bold())
    );
    for id in wave {
      let Some(rule) = plan.rule(id) else {
        continue;
      };
      println!(
        "  {} {}",
        truncate_hash(&id.0).if_supports_color(Stream::Stdout, |s| s.dimmed()),
        describe_action(layout, rule)
      );
    }
  }

  println!();
  print_success("Plan complete");
  print_stat("Targets", &resolved.len().to_string());
  print_stat("Rules", &plan.len().to_string());
  print_stat("Waves", &waves.len().to_string());
  print_stat("Directories generated", &orch.generations().to_string());

  Ok(())
}
