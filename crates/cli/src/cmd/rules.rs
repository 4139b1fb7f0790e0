//! Implementation of the `strata rules` command.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use strata_lib::orchestrator::{DirOutcome, Retain};
use strata_lib::rules::{AliasKey, Rule};
use strata_lib::util::hash::RuleId;

use super::{Options, build_dirs, runtime};
use crate::output::{describe_action, print_json, print_stat};

#[derive(Serialize)]
struct DirReport {
  outcome: DirOutcome,
  rules: Vec<(RuleId, Rule)>,
  aliases: Vec<AliasKey>,
}

fn describe_retain(retain: &Retain) -> String {
  match retain {
    Retain::Nothing => "nothing".to_string(),
    Retain::All => "everything".to_string(),
    Retain::These(names) => names.iter().cloned().collect::<Vec<_>>().join(", "),
  }
}

pub fn cmd_rules(opts: &Options, dir: &str) -> Result<()> {
  let orch = opts.orchestrator()?;
  let rt = runtime()?;
  let registry = orch.registry();

  let mut reports = Vec::new();
  for build_dir in build_dirs(&orch, dir)? {
    let outcome = rt
      .block_on(orch.generate(&build_dir))
      .with_context(|| format!("Failed to generate rules for {}", build_dir))?;
    let rules = outcome
      .rules
      .rules
      .iter()
      .filter_map(|id| registry.rule(id).map(|r| (id.clone(), r)))
      .collect();
    reports.push(DirReport {
      aliases: registry.aliases_of(&outcome.dir),
      outcome: (*outcome).clone(),
      rules,
    });
  }

  if opts.output.is_json() {
    return print_json(&reports);
  }

  let layout = &orch.session().workspace.layout;
  for report in &reports {
    println!(
      "{}",
      layout
        .render(&report.outcome.dir)
        .if_supports_color(Stream::Stdout, |s| s.bold())
    );
    print_stat("Kind", &format!("{:?}", report.outcome.kind));
    print_stat("Retains", &describe_retain(&report.outcome.retain));
    print_stat("Rules", &report.rules.len().to_string());
    for (_, rule) in &report.rules {
      println!("    {}", describe_action(layout, rule));
    }
    if !report.aliases.is_empty() {
      print_stat("Aliases", &report.aliases.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", "));
    }
    println!();
  }

  Ok(())
}
