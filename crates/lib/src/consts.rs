/// Length of the truncated hex digest used for rule identifiers.
pub const RULE_ID_PREFIX_LEN: usize = 20;

/// Default name of the build directory at the workspace root.
pub const DEFAULT_BUILD_DIR: &str = "_build";
/// Name of the install namespace inside the build directory.
pub const INSTALL_DIR: &str = "install";

pub const WORKSPACE_FILE: &str = "strata-workspace.json";
pub const PROJECT_FILE: &str = "strata-project.json";
pub const STANZA_FILE: &str = "strata.json";

pub const ENV_BUILD_DIR: &str = "STRATA_BUILD_DIR";
pub const ENV_PROFILE: &str = "STRATA_PROFILE";

pub const DEFAULT_CONTEXT: &str = "default";
pub const DEFAULT_PROFILE: &str = "dev";

// Reserved directory names routed to subsystem generators.
pub const ROOT_MARKER: &str = ".strata";
pub const CCOMP_DIR: &str = "ccomp";
pub const KEEP_MARKER: &str = "keep";
pub const JS_DIR: &str = ".js";
pub const DOC_DIR: &str = "_doc";
pub const DOC_HTML_DIR: &str = "_html";
pub const PPX_DIR: &str = ".ppx";
pub const FORMATTED_DIR: &str = ".formatted";
pub const BIN_DIR: &str = ".bin";
pub const UTOP_DIR: &str = ".utop";
pub const TOPMOD_DIR: &str = ".topmod";
pub const IDE_DIR: &str = ".merlin-conf";

/// Generated-view directories every regular directory keeps around.
pub const VIEW_DIRS: [&str; 5] = [FORMATTED_DIR, BIN_DIR, UTOP_DIR, TOPMOD_DIR, IDE_DIR];

// Built-in alias names.
pub const ALIAS_DEFAULT: &str = "default";
pub const ALIAS_ALL: &str = "all";
pub const ALIAS_RUNTEST: &str = "runtest";
pub const ALIAS_FMT: &str = "fmt";
pub const ALIAS_DOC: &str = "doc";
pub const ALIAS_INSTALL: &str = "install";

/// Suffixes of the bytecode-to-script artifacts excluded from the `all` alias.
pub const JS_SUFFIX: &str = ".bc.js";
pub const JS_RUNTIME_SUFFIX: &str = ".bc.runtime.js";

pub const CRAM_EXT: &str = ".t";
pub const CRAM_SCRIPT: &str = "run.t";
pub const CRAM_CORRECTED_EXT: &str = ".corrected";
