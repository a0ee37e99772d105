//! The seam to the daemon client library.
//!
//! The transport consumes only these capabilities from the daemon; the
//! daemon's own wire protocol stays behind this boundary. The default
//! in-process implementation is [`super::LoopbackDaemon`]; a binding to a
//! real daemon implements these traits against its client library.

use std::sync::Arc;

use crate::error::{ConnectFault, DaemonFault};

use super::{message::ReceivedMessage, GroupName, ServiceType};

/// One client session on a daemon.
///
/// Threading contract: `multicast` and `multigroup_multicast` may be called
/// concurrently with `receive`; no two threads call `receive` at the same
/// time. Implementations must not require external locking for this.
pub trait DaemonSession: Send + Sync {
  /// The private group name the daemon assigned to this session. Messages
  /// addressed to it reach exactly this session.
  fn private_group(&self) -> &GroupName;

  fn join(&self, group: &GroupName) -> Result<(), DaemonFault>;

  fn leave(&self, group: &GroupName) -> Result<(), DaemonFault>;

  /// Sends `data` to a single group.
  fn multicast(
    &self,
    service: ServiceType,
    self_discard: bool,
    group: &GroupName,
    data: &[u8],
  ) -> Result<(), DaemonFault>;

  /// Sends `data` to several groups at once; each joined session receives
  /// one copy even when it is a member of more than one of them.
  fn multigroup_multicast(
    &self,
    service: ServiceType,
    self_discard: bool,
    groups: &[GroupName],
    data: &[u8],
  ) -> Result<(), DaemonFault>;

  /// Blocks until the daemon delivers the next message on this session.
  fn receive(&self) -> Result<ReceivedMessage, DaemonFault>;

  /// Closes the session. A blocked `receive` on another thread returns
  /// `ConnectionClosed` afterwards.
  fn disconnect(&self) -> Result<(), DaemonFault>;
}

/// Connects sessions to a daemon endpoint.
pub trait DaemonClient: Send + Sync {
  fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn DaemonSession>, ConnectFault>;
}
