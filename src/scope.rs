//! Hierarchical event addresses.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A hierarchical address on the bus.
///
/// Scopes form a tree rooted at `/`. A scope is written as a slash-separated
/// path and stored in canonical form with a trailing slash, so `/a/b` and
/// `/a/b/` name the same scope `/a/b/`. Scopes compare, hash and sort by
/// their canonical string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
  canonical: String,
}

impl Scope {
  /// The root scope `/`, a super-scope of every scope.
  pub fn root() -> Scope {
    Scope { canonical: "/".to_string() }
  }

  /// Parses a scope string. Components are separated by `/` and may contain
  /// ASCII letters, digits, `_` and `-`. A trailing slash is optional.
  pub fn new(spec: &str) -> Result<Scope> {
    let Some(interior) = spec.strip_prefix('/') else {
      return Err(Error::Domain(format!("scope {spec:?} must start with '/'")));
    };
    let interior = interior.strip_suffix('/').unwrap_or(interior);

    let mut canonical = String::with_capacity(spec.len() + 1);
    canonical.push('/');
    if interior.is_empty() {
      return Ok(Scope { canonical });
    }
    for component in interior.split('/') {
      if component.is_empty() {
        return Err(Error::Domain(format!("scope {spec:?} contains an empty component")));
      }
      if !component
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
      {
        return Err(Error::Domain(format!(
          "invalid character in scope component {component:?}"
        )));
      }
      canonical.push_str(component);
      canonical.push('/');
    }
    Ok(Scope { canonical })
  }

  /// The canonical string form, e.g. `/a/b/`.
  pub fn as_str(&self) -> &str {
    &self.canonical
  }

  pub fn is_root(&self) -> bool {
    self.canonical == "/"
  }

  /// The path components, outermost first.
  pub fn components(&self) -> impl Iterator<Item = &str> {
    self.canonical.split('/').filter(|c| !c.is_empty())
  }

  /// All scopes of which `self` is a sub-scope, ordered from the root
  /// downwards. With `include_self`, `self` is the last element.
  pub fn super_scopes(&self, include_self: bool) -> Vec<Scope> {
    let mut result = vec![Scope::root()];
    let mut prefix = String::from("/");
    for component in self.components() {
      prefix.push_str(component);
      prefix.push('/');
      result.push(Scope { canonical: prefix.clone() });
    }
    if !include_self {
      result.pop();
    }
    result
  }

  /// Whether `other` lies in the subtree rooted at `self`.
  pub fn is_super_scope_of(&self, other: &Scope, include_equal: bool) -> bool {
    if self.canonical == other.canonical {
      return include_equal;
    }
    other.canonical.starts_with(&self.canonical)
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical)
  }
}

impl fmt::Debug for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Scope({})", self.canonical)
  }
}

impl FromStr for Scope {
  type Err = Error;

  fn from_str(s: &str) -> Result<Scope> {
    Scope::new(s)
  }
}

impl Serialize for Scope {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.canonical)
  }
}

impl<'de> Deserialize<'de> for Scope {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Scope, D::Error> {
    let spec = String::deserialize(deserializer)?;
    Scope::new(&spec).map_err(de::Error::custom)
  }
}
