//! Deterministic mapping from scopes to daemon group names.

use std::{
  collections::HashMap,
  sync::{Arc, RwLock},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  scope::Scope,
  spread::{GroupName, MAX_GROUP_NAME},
};

// Rationale for the bound: normally a system uses a limited set of scopes,
// which all stay cached. A system that fabricates scopes dynamically
// defeats any cache, so flushing wholesale loses nothing.
const MAX_CACHED_SCOPES: usize = 300;

/// The daemon group carrying events published exactly on `scope`: the
/// leading hex of the MD5 digest of the canonical scope string, truncated
/// to the daemon's name width.
pub fn group_for_scope(scope: &Scope) -> GroupName {
  let digest = md5::compute(scope.as_str().as_bytes());
  let hex = format!("{digest:x}");
  GroupName::new_unchecked(hex[..MAX_GROUP_NAME - 1].to_string())
}

/// Caches the group-name lists of scopes and their super-scopes.
pub struct GroupNameCache {
  cache: RwLock<HashMap<Scope, Arc<Vec<GroupName>>>>,
}

impl GroupNameCache {
  pub fn new() -> GroupNameCache {
    GroupNameCache { cache: RwLock::new(HashMap::new()) }
  }

  /// Group names for `scope` and all of its super-scopes, root first.
  pub fn groups_for(&self, scope: &Scope) -> Arc<Vec<GroupName>> {
    if let Some(groups) = self.cache.read().unwrap().get(scope) {
      return groups.clone();
    }

    let mut cache = self.cache.write().unwrap();
    // Another thread may have filled the slot between the locks.
    if let Some(groups) = cache.get(scope) {
      return groups.clone();
    }
    if cache.len() > MAX_CACHED_SCOPES {
      debug!("flushing group name cache");
      cache.clear();
    }
    let groups = Arc::new(
      scope
        .super_scopes(true)
        .iter()
        .map(group_for_scope)
        .collect::<Vec<_>>(),
    );
    cache.insert(scope.clone(), groups.clone());
    groups
  }

  #[cfg(test)]
  fn cached_scopes(&self) -> usize {
    self.cache.read().unwrap().len()
  }
}

impl Default for GroupNameCache {
  fn default() -> GroupNameCache {
    GroupNameCache::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn group_names_are_deterministic_and_bounded() {
    let scope = Scope::new("/a/b/").unwrap();
    let name = group_for_scope(&scope);
    assert_eq!(name, group_for_scope(&Scope::new("/a/b").unwrap()));
    assert_eq!(name.as_str().len(), MAX_GROUP_NAME - 1);
    assert!(name.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    assert_ne!(name, group_for_scope(&Scope::new("/a/").unwrap()));
  }

  #[test]
  fn group_name_matches_the_md5_of_the_canonical_string() {
    let scope = Scope::new("/").unwrap();
    let expected = format!("{:x}", md5::compute(b"/"));
    assert_eq!(group_for_scope(&scope).as_str(), &expected[..MAX_GROUP_NAME - 1]);
  }

  #[test]
  fn groups_for_covers_all_super_scopes_root_first() {
    let cache = GroupNameCache::new();
    let scope = Scope::new("/a/b/").unwrap();
    let groups = cache.groups_for(&scope);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0], group_for_scope(&Scope::root()));
    assert_eq!(groups[1], group_for_scope(&Scope::new("/a/").unwrap()));
    assert_eq!(groups[2], group_for_scope(&scope));

    assert_eq!(cache.groups_for(&Scope::root()).len(), 1);
  }

  #[test]
  fn lookups_are_cached_and_shared() {
    let cache = GroupNameCache::new();
    let scope = Scope::new("/cached/").unwrap();
    let first = cache.groups_for(&scope);
    let second = cache.groups_for(&scope);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.cached_scopes(), 1);
  }

  #[test]
  fn overflowing_the_cache_flushes_it() {
    let cache = GroupNameCache::new();
    for i in 0..=MAX_CACHED_SCOPES {
      cache.groups_for(&Scope::new(&format!("/scope{i}/")).unwrap());
    }
    assert_eq!(cache.cached_scopes(), MAX_CACHED_SCOPES + 1);
    // The next insertion finds the cache over the bound and clears it.
    cache.groups_for(&Scope::new("/overflow/").unwrap());
    assert_eq!(cache.cached_scopes(), 1);
  }
}
