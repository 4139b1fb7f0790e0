//! CLI output formatting utilities.
//!
//! Colored status lines, human-readable sizes and durations, and one-line
//! descriptions of rule actions.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use strata_lib::path::Layout;
use strata_lib::rules::{Action, Rule};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;
  const GB: u64 = MB * 1024;

  if bytes >= GB {
    format!("{:.1} GB", bytes as f64 / GB as f64)
  } else if bytes >= MB {
    format!("{:.1} MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1} KB", bytes as f64 / KB as f64)
  } else {
    format!("{} B", bytes)
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

fn describe(action: &Action, layout: &Layout) -> String {
  match action {
    Action::Copy { src, dst } => format!("copy {} {} {}", layout.render_path(src), symbols::ARROW, layout.render(dst)),
    Action::Symlink { src, dst } => format!("link {} {} {}", layout.render(src), symbols::ARROW, layout.render(dst)),
    Action::WriteFile { dst, .. } => format!("write {}", layout.render(dst)),
    Action::Run { prog, args } => format!("run {} {}", prog, args.join(" ")),
    Action::Cram { script } => format!("cram {}", layout.render(script)),
    Action::Diff { expected, actual, .. } => format!("diff {} {}", layout.render(expected), layout.render(actual)),
    Action::Progn { actions } => actions
      .iter()
      .map(|a| describe(a, layout))
      .collect::<Vec<_>>()
      .join("; "),
    Action::Fail { message } => format!("fail: {}", message),
  }
}

/// One line per rule: its action, plus the alias it is attached to.
pub fn describe_action(layout: &Layout, rule: &Rule) -> String {
  let action = describe(&rule.action, layout);
  match &rule.alias {
    Some(alias) => format!("{} (alias {})", action, alias),
    None => action,
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
