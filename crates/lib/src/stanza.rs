//! Declarative stanzas attached to source directories.
//!
//! A directory's stanza list is the unit of rule generation for that
//! directory. Stanza kinds form a closed set; kinds this version does not know
//! deserialize to [`Stanza::Unknown`] and contribute nothing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::path::RelPath;
use crate::template::Template;

/// Where a stanza (or a discovered test) was declared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Loc {
  pub path: RelPath,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub index: Option<usize>,
}

impl Loc {
  pub fn file(path: RelPath) -> Self {
    Self { path, index: None }
  }

  pub fn stanza(file: RelPath, index: usize) -> Self {
    Self {
      path: file,
      index: Some(index),
    }
  }
}

impl fmt::Display for Loc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.index {
      Some(i) => write!(f, "{}#{}", self.path, i),
      None => write!(f, "{}", self.path),
    }
  }
}

/// Project-wide metadata declared at the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub name: String,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default)]
  pub packages: Vec<String>,
  /// When set, script-target artifacts are part of the `all` alias.
  #[serde(default)]
  pub explicit_js_mode: bool,
  #[serde(default)]
  pub formatting: Formatting,
}

impl Default for Project {
  fn default() -> Self {
    Self {
      name: "project".to_string(),
      version: None,
      packages: Vec::new(),
      explicit_js_mode: false,
      formatting: Formatting::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formatting {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_format_extensions")]
  pub extensions: Vec<String>,
}

impl Default for Formatting {
  fn default() -> Self {
    Self {
      enabled: true,
      extensions: default_format_extensions(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_format_extensions() -> Vec<String> {
  vec!["ml".to_string(), "mli".to_string()]
}

/// Contents of a directory's stanza file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSpec {
  /// Make this directory a group root owning all of its descendants.
  #[serde(default)]
  pub include_subdirs: bool,
  #[serde(default)]
  pub stanzas: Vec<Stanza>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  Byte,
  Native,
  Js,
}

fn default_modes() -> Vec<Mode> {
  vec![Mode::Native]
}

/// A dependency as written in a stanza, relative to the stanza's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepDecl {
  File(Template),
  Alias(Template),
  AliasRec(Template),
  SourceTree(Template),
  Glob(Template),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
  pub name: String,
  #[serde(default)]
  pub public_name: Option<String>,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub modules: Vec<String>,
  #[serde(default)]
  pub libraries: Vec<String>,
  #[serde(default)]
  pub preprocess: Vec<String>,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignLibrary {
  pub name: String,
  #[serde(default)]
  pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executables {
  pub names: Vec<String>,
  #[serde(default)]
  pub public_names: Vec<String>,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub modules: Vec<String>,
  #[serde(default)]
  pub libraries: Vec<String>,
  #[serde(default = "default_modes")]
  pub modes: Vec<Mode>,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tests {
  pub names: Vec<String>,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub modules: Vec<String>,
  #[serde(default)]
  pub libraries: Vec<String>,
  #[serde(default)]
  pub deps: Vec<DepDecl>,
  #[serde(default = "default_modes")]
  pub modes: Vec<Mode>,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasStanza {
  pub name: String,
  #[serde(default)]
  pub deps: Vec<DepDecl>,
  /// Command run when the alias is built.
  #[serde(default)]
  pub action: Option<Vec<Template>>,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
  #[default]
  Standard,
  /// Source files with the same names take precedence over the rule.
  Fallback,
  Promote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStanza {
  pub targets: Vec<String>,
  #[serde(default)]
  pub deps: Vec<DepDecl>,
  pub action: Vec<Template>,
  #[serde(default)]
  pub mode: RuleMode,
  #[serde(default)]
  pub alias: Option<String>,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFiles {
  /// Source directory relative to the stanza's directory.
  pub from: String,
  /// Basename glob selecting the files to copy.
  pub glob: String,
  #[serde(default)]
  pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
  Bin,
  Lib,
  Libexec,
  Share,
  Doc,
  Etc,
  Test,
}

impl Section {
  pub fn as_str(self) -> &'static str {
    match self {
      Section::Bin => "bin",
      Section::Lib => "lib",
      Section::Libexec => "libexec",
      Section::Share => "share",
      Section::Doc => "doc",
      Section::Etc => "etc",
      Section::Test => "test",
    }
  }

  /// Destination directory of this section for `package`, relative to the
  /// install root.
  pub fn install_dir(self, package: &str) -> RelPath {
    match self {
      Section::Bin => RelPath::new("bin"),
      other => RelPath::new(other.as_str()).join(package),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFile {
  pub src: String,
  #[serde(default)]
  pub dst: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStanza {
  pub section: Section,
  #[serde(default)]
  pub package: Option<String>,
  pub files: Vec<InstallFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
  pub name: String,
  pub package: String,
  #[serde(default)]
  pub libraries: Vec<String>,
  pub site: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documentation {
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub pages: Vec<String>,
}

/// Literate markdown files whose code blocks are checked as tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mdx {
  pub files: Vec<String>,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
}

/// Generates `<m>.ml`/`<m>.mli` for each module from a grammar `<m>.mly`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserGenerator {
  pub modules: Vec<String>,
  #[serde(default)]
  pub flags: Vec<String>,
}

/// A proof theory compiled module by module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theory {
  pub name: String,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub modules: Vec<String>,
}

/// Program extraction from a proof script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
  pub prelude: String,
  pub extracted_modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliesTo {
  /// Every test in this directory and all of its descendants.
  WholeSubtree,
  /// Tests in this directory whose names match one of the globs.
  Files(Vec<String>),
}

impl Default for AppliesTo {
  fn default() -> Self {
    AppliesTo::Files(vec!["*".to_string()])
  }
}

/// Configuration for shell-transcript tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CramStanza {
  #[serde(default)]
  pub applies_to: AppliesTo,
  #[serde(default)]
  pub enabled_if: Option<Condition>,
  #[serde(default)]
  pub deps: Vec<DepDecl>,
  #[serde(default)]
  pub alias: Option<String>,
  #[serde(default)]
  pub package: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stanza {
  Library(Library),
  ForeignLibrary(ForeignLibrary),
  Executables(Executables),
  Tests(Tests),
  Alias(AliasStanza),
  Rule(RuleStanza),
  CopyFiles(CopyFiles),
  Install(InstallStanza),
  Plugin(Plugin),
  Documentation(Documentation),
  Mdx(Mdx),
  ParserGenerator(ParserGenerator),
  Theory(Theory),
  Extraction(Extraction),
  Cram(CramStanza),
  #[serde(other)]
  Unknown,
}

impl Stanza {
  pub fn kind(&self) -> &'static str {
    match self {
      Stanza::Library(_) => "library",
      Stanza::ForeignLibrary(_) => "foreign_library",
      Stanza::Executables(_) => "executables",
      Stanza::Tests(_) => "tests",
      Stanza::Alias(_) => "alias",
      Stanza::Rule(_) => "rule",
      Stanza::CopyFiles(_) => "copy_files",
      Stanza::Install(_) => "install",
      Stanza::Plugin(_) => "plugin",
      Stanza::Documentation(_) => "documentation",
      Stanza::Mdx(_) => "mdx",
      Stanza::ParserGenerator(_) => "parser_generator",
      Stanza::Theory(_) => "theory",
      Stanza::Extraction(_) => "extraction",
      Stanza::Cram(_) => "cram",
      Stanza::Unknown => "unknown",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_dir_spec() {
    let spec: DirSpec = serde_json::from_str(
      r#"{
        "stanzas": [
          { "kind": "library", "name": "foo", "modules": ["a", "b"] },
          { "kind": "executables", "names": ["main"], "modes": ["native", "js"] },
          { "kind": "cram", "applies_to": "whole_subtree", "deps": [ { "file": "%{profile}.txt" } ] }
        ]
      }"#,
    )
    .unwrap();

    assert!(!spec.include_subdirs);
    assert_eq!(spec.stanzas.len(), 3);
    assert!(matches!(&spec.stanzas[0], Stanza::Library(l) if l.name == "foo"));
    assert!(matches!(&spec.stanzas[1], Stanza::Executables(e) if e.modes == vec![Mode::Native, Mode::Js]));
    assert!(matches!(&spec.stanzas[2], Stanza::Cram(c) if c.applies_to == AppliesTo::WholeSubtree));
  }

  #[test]
  fn unknown_kind_is_tolerated() {
    let spec: DirSpec =
      serde_json::from_str(r#"{ "stanzas": [ { "kind": "from_the_future", "anything": [1, 2] } ] }"#).unwrap();
    assert_eq!(spec.stanzas, vec![Stanza::Unknown]);
  }

  #[test]
  fn cram_defaults_apply_to_this_dir() {
    let c: CramStanza = serde_json::from_str("{}").unwrap();
    assert_eq!(c.applies_to, AppliesTo::Files(vec!["*".to_string()]));
  }

  #[test]
  fn section_install_dirs() {
    assert_eq!(Section::Bin.install_dir("pkg").as_str(), "bin");
    assert_eq!(Section::Lib.install_dir("pkg").as_str(), "lib/pkg");
  }

  #[test]
  fn loc_display() {
    assert_eq!(Loc::stanza(RelPath::new("src/strata.json"), 2).to_string(), "src/strata.json#2");
    assert_eq!(Loc::file(RelPath::new("t/a.t")).to_string(), "t/a.t");
  }
}
