//! Everything the transport consumes from the Spread-style group
//! communication daemon: limits, group names, the client seam, the
//! connection wrapper and an in-process daemon emulation.

use std::fmt;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::error::{DaemonFault, Error, Result};

pub mod client;
pub mod connection;
pub mod loopback;
pub mod message;

pub use client::{DaemonClient, DaemonSession};
pub use connection::SpreadConnection;
pub use loopback::LoopbackDaemon;
pub use message::{ReceivedMessage, ServiceType, SpreadMessage};

/// Width of a daemon group name slot, including the C client's terminator.
/// Usable names are strictly shorter.
pub const MAX_GROUP_NAME: usize = 32;

/// Largest payload the daemon accepts in a single message.
pub const MAX_MESSAGE_LEN: usize = 180_000;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 4803;

/// Default cap on the serialized size of one notification fragment.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 100_000;

const_assert!(DEFAULT_MAX_FRAGMENT_SIZE <= MAX_MESSAGE_LEN);
const_assert!(MAX_GROUP_NAME <= 32);

/// A validated daemon group name: non-empty printable ASCII, strictly
/// shorter than [`MAX_GROUP_NAME`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
  pub fn new(name: impl Into<String>) -> Result<GroupName> {
    let name = name.into();
    if name.is_empty()
      || name.len() >= MAX_GROUP_NAME
      || !name.bytes().all(|b| b.is_ascii_graphic())
    {
      return Err(Error::Daemon(DaemonFault::IllegalGroup));
    }
    Ok(GroupName(name))
  }

  /// For names produced internally and known to satisfy the invariant.
  pub(crate) fn new_unchecked(name: String) -> GroupName {
    debug_assert!(!name.is_empty() && name.len() < MAX_GROUP_NAME);
    GroupName(name)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for GroupName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for GroupName {
  type Error = Error;

  fn try_from(name: String) -> Result<GroupName> {
    GroupName::new(name)
  }
}

impl From<GroupName> for String {
  fn from(name: GroupName) -> String {
    name.0
  }
}
