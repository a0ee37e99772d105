//! Message types exchanged with the daemon.

use bytes::Bytes;

use super::GroupName;

/// Daemon service classes. The discriminants mirror the service type bits
/// of the daemon wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ServiceType {
  Unreliable = 0x0000_0001,
  Reliable = 0x0000_0002,
  Fifo = 0x0000_0004,
}

/// An outgoing daemon message.
#[derive(Debug, Clone)]
pub struct SpreadMessage {
  pub service: ServiceType,
  /// Suppress the daemon's echo of this message to the sending session.
  /// The bus dispatches to local sinks itself, so its sends always set
  /// this; the self-addressed interrupt message must not.
  pub self_discard: bool,
  pub groups: Vec<GroupName>,
  pub data: Vec<u8>,
}

/// A message delivered by the daemon.
#[derive(Debug, Clone)]
pub enum ReceivedMessage {
  /// A payload-carrying multicast.
  Regular {
    /// Private group name of the sending session.
    sender: GroupName,
    /// The groups the message was addressed to.
    groups: Vec<GroupName>,
    data: Bytes,
  },
  /// A group membership change notice. The transport ignores these.
  Membership { group: GroupName },
}
