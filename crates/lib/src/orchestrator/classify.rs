//! Routing a build directory to the generator responsible for it.

use crate::consts::{BIN_DIR, DOC_DIR, FORMATTED_DIR, JS_DIR, PPX_DIR, ROOT_MARKER, UTOP_DIR};
use crate::path::{BuildPath, RelPath, Root};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
  /// Separate compilation to the script target.
  Js,
  Doc,
  Ppx,
}

impl Subsystem {
  pub fn name(self) -> &'static str {
    match self {
      Subsystem::Js => JS_DIR,
      Subsystem::Doc => DOC_DIR,
      Subsystem::Ppx => PPX_DIR,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
  Formatted,
  Bin,
  Utop,
}

impl View {
  pub fn name(self) -> &'static str {
    match self {
      View::Formatted => FORMATTED_DIR,
      View::Bin => BIN_DIR,
      View::Utop => UTOP_DIR,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirClass {
  Install(RelPath),
  /// Components below the root marker.
  RootMarker(Vec<String>),
  Subsystem { kind: Subsystem, rest: Vec<String> },
  View { view: View, parent: RelPath },
  Default(RelPath),
}

/// Classify `dir` by its components, in priority order: root marker,
/// reserved first component, reserved trailing component, everything else.
pub fn classify(dir: &BuildPath) -> DirClass {
  if let Root::Install(_) = dir.root {
    return DirClass::Install(dir.rel.clone());
  }

  let comps = dir.rel.components();
  let rest = |n: usize| comps[n..].iter().map(|c| c.to_string()).collect::<Vec<_>>();
  match comps.first().copied() {
    Some(ROOT_MARKER) => return DirClass::RootMarker(rest(1)),
    Some(JS_DIR) => {
      return DirClass::Subsystem {
        kind: Subsystem::Js,
        rest: rest(1),
      };
    }
    Some(DOC_DIR) => {
      return DirClass::Subsystem {
        kind: Subsystem::Doc,
        rest: rest(1),
      };
    }
    Some(PPX_DIR) => {
      return DirClass::Subsystem {
        kind: Subsystem::Ppx,
        rest: rest(1),
      };
    }
    _ => {}
  }

  let view = match dir.rel.basename() {
    Some(FORMATTED_DIR) => Some(View::Formatted),
    Some(BIN_DIR) => Some(View::Bin),
    Some(UTOP_DIR) => Some(View::Utop),
    _ => None,
  };
  match (view, dir.rel.parent()) {
    (Some(view), Some(parent)) => DirClass::View { view, parent },
    _ => DirClass::Default(dir.rel.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx(rel: &str) -> BuildPath {
    BuildPath::in_context("default", rel)
  }

  #[test]
  fn priority_order() {
    assert_eq!(classify(&ctx(".strata/ccomp")), DirClass::RootMarker(vec!["ccomp".to_string()]));
    assert_eq!(classify(&ctx(".js/.bin")), DirClass::Subsystem {
      kind: Subsystem::Js,
      rest: vec![".bin".to_string()],
    });
    assert_eq!(classify(&ctx("_doc/_html/core")), DirClass::Subsystem {
      kind: Subsystem::Doc,
      rest: vec!["_html".to_string(), "core".to_string()],
    });
    assert_eq!(classify(&ctx("src/.formatted")), DirClass::View {
      view: View::Formatted,
      parent: RelPath::new("src"),
    });
    assert_eq!(classify(&ctx(".bin")), DirClass::View {
      view: View::Bin,
      parent: RelPath::root(),
    });
    assert_eq!(classify(&ctx("src/.core.objs")), DirClass::Default(RelPath::new("src/.core.objs")));
    assert_eq!(classify(&ctx("")), DirClass::Default(RelPath::root()));
    assert_eq!(
      classify(&BuildPath::in_install("default", "bin")),
      DirClass::Install(RelPath::new("bin"))
    );
  }
}
