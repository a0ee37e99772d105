//! Reference-counted daemon group membership for one connection.

use std::{collections::HashMap, sync::Arc};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::Result,
  spread::{GroupName, SpreadConnection},
};

/// Tracks how many local sinks require each daemon group. The daemon only
/// sees the 0↔1 transitions. Not synchronized; the bus serializes access
/// under its sink lock.
pub(crate) struct Memberships {
  connection: Arc<SpreadConnection>,
  counts: HashMap<GroupName, usize>,
}

impl Memberships {
  pub fn new(connection: Arc<SpreadConnection>) -> Memberships {
    Memberships { connection, counts: HashMap::new() }
  }

  pub fn join(&mut self, group: &GroupName) -> Result<()> {
    match self.counts.get_mut(group) {
      Some(count) => {
        *count += 1;
        Ok(())
      }
      None => {
        self.connection.join(group)?;
        self.counts.insert(group.clone(), 1);
        Ok(())
      }
    }
  }

  pub fn leave(&mut self, group: &GroupName) -> Result<()> {
    match self.counts.get_mut(group) {
      Some(count) if *count > 1 => {
        *count -= 1;
        Ok(())
      }
      Some(_) => {
        self.counts.remove(group);
        self.connection.leave(group)
      }
      None => {
        debug_assert!(false, "leave without matching join for group {group}");
        error!("membership count underflow for group {group}");
        Ok(())
      }
    }
  }

  pub fn count(&self, group: &GroupName) -> usize {
    self.counts.get(group).copied().unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::spread::LoopbackDaemon;

  fn setup() -> (LoopbackDaemon, Memberships) {
    let daemon = LoopbackDaemon::new();
    let connection = Arc::new(SpreadConnection::new(
      Arc::new(daemon.clone()),
      "localhost",
      4803,
    ));
    connection.activate().unwrap();
    (daemon, Memberships::new(connection))
  }

  fn group(name: &str) -> GroupName {
    GroupName::new(name).unwrap()
  }

  #[test]
  fn daemon_sees_only_the_edge_transitions() {
    let (daemon, mut memberships) = setup();
    let g = group("refcounted");

    memberships.join(&g).unwrap();
    memberships.join(&g).unwrap();
    memberships.join(&g).unwrap();
    assert_eq!(memberships.count(&g), 3);
    assert_eq!(daemon.group_members(&g), 1);

    memberships.leave(&g).unwrap();
    memberships.leave(&g).unwrap();
    assert_eq!(memberships.count(&g), 1);
    assert_eq!(daemon.group_members(&g), 1);

    memberships.leave(&g).unwrap();
    assert_eq!(memberships.count(&g), 0);
    assert_eq!(daemon.group_members(&g), 0);
  }

  #[test]
  fn groups_are_counted_independently() {
    let (daemon, mut memberships) = setup();
    let a = group("ga");
    let b = group("gb");

    memberships.join(&a).unwrap();
    memberships.join(&b).unwrap();
    memberships.leave(&a).unwrap();
    assert_eq!(daemon.group_members(&a), 0);
    assert_eq!(daemon.group_members(&b), 1);
    memberships.leave(&b).unwrap();
    assert_eq!(daemon.group_members(&b), 0);
  }
}
