//! strata-lib: lazy, per-directory rule generation for a multi-context build
//! system.
//!
//! The pieces, bottom up:
//! - `SourceTree`: the scanned project, one `SourceDir` (files plus stanzas)
//!   per directory
//! - `Orchestrator`: generates the rules of one build directory on demand,
//!   memoized and single-flight
//! - `Resolver`: turns command-line target text into files and aliases
//! - `RulePlan`: the rules needed for a set of targets, in execution waves
//! - `gc`: removes build outputs no rule produces any more

pub mod compile;
pub mod condition;
pub mod config;
pub mod consts;
pub mod context;
pub mod gc;
pub mod install;
pub mod memo;
pub mod orchestrator;
pub mod path;
pub mod resolve;
pub mod rules;
pub mod session;
pub mod source_tree;
pub mod stanza;
pub mod template;
pub mod util;
