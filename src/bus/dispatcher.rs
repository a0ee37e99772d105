//! Scope-based dispatch to weakly held sinks.

use std::{
  collections::HashMap,
  sync::{Arc, Weak},
};

use crate::{error::Error, scope::Scope, wire::Notification};

/// The bus-side view of a subscriber endpoint.
pub trait Sink: Send + Sync {
  fn handle_notification(&self, notification: &Notification);

  fn handle_error(&self, error: &Error);
}

/// Sinks registered by scope. Entries are weak so that dropping an
/// endpoint releases its registration without an explicit call; dead
/// entries are pruned opportunistically whenever they are visited.
#[derive(Default)]
pub(crate) struct ScopeDispatcher {
  sinks: HashMap<Scope, Vec<Weak<dyn Sink>>>,
}

impl ScopeDispatcher {
  pub fn new() -> ScopeDispatcher {
    ScopeDispatcher::default()
  }

  pub fn add_sink(&mut self, scope: Scope, sink: Weak<dyn Sink>) {
    self.sinks.entry(scope).or_default().push(sink);
  }

  pub fn remove_sink(&mut self, scope: &Scope, sink: &Arc<dyn Sink>) {
    if let Some(entries) = self.sinks.get_mut(scope) {
      entries.retain(|weak| {
        weak
          .upgrade()
          .is_some_and(|live| !Arc::ptr_eq(&live, sink))
      });
      if entries.is_empty() {
        self.sinks.remove(scope);
      }
    }
  }

  /// Calls `f` on every live sink registered at a super-scope of `scope`
  /// (inclusive), walking from the root downwards and in insertion order
  /// within one scope.
  pub fn map_sinks(&mut self, scope: &Scope, mut f: impl FnMut(&Arc<dyn Sink>)) {
    for super_scope in scope.super_scopes(true) {
      if let Some(entries) = self.sinks.get_mut(&super_scope) {
        entries.retain(|weak| match weak.upgrade() {
          Some(sink) => {
            f(&sink);
            true
          }
          None => false,
        });
      }
    }
  }

  /// Calls `f` on every live sink regardless of scope, for error
  /// broadcast.
  pub fn map_all_sinks(&mut self, mut f: impl FnMut(&Arc<dyn Sink>)) {
    for entries in self.sinks.values_mut() {
      entries.retain(|weak| match weak.upgrade() {
        Some(sink) => {
          f(&sink);
          true
        }
        None => false,
      });
    }
  }

  /// Number of live registrations.
  pub fn sink_count(&self) -> usize {
    self
      .sinks
      .values()
      .flatten()
      .filter(|weak| weak.upgrade().is_some())
      .count()
  }
}
