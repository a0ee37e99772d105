//! The event data model, as far as the transport reads and writes it.

use std::{any::Any, fmt, sync::Arc};

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

use crate::scope::Scope;

/// Identifies the participant that published an event. 16 random bytes,
/// drawn once per publishing endpoint.
#[derive(
  Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Readable, Writable, Serialize, Deserialize,
)]
pub struct SenderId {
  bytes: [u8; 16],
}

impl SenderId {
  pub fn random() -> SenderId {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    SenderId { bytes }
  }

  pub fn from_bytes(bytes: [u8; 16]) -> SenderId {
    SenderId { bytes }
  }

  pub fn as_bytes(&self) -> &[u8; 16] {
    &self.bytes
  }
}

impl fmt::Display for SenderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in &self.bytes {
      write!(f, "{byte:02x}")?;
    }
    Ok(())
  }
}

impl fmt::Debug for SenderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SenderId({self})")
  }
}

/// Uniquely identifies one event on the bus.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Readable,
  Writable,
  Serialize,
  Deserialize,
)]
pub struct EventId {
  pub sender_id: SenderId,
  pub sequence_number: u32,
}

impl EventId {
  pub fn new(sender_id: SenderId, sequence_number: u32) -> EventId {
    EventId { sender_id, sequence_number }
  }
}

/// Timestamps collected along an event's way through the system, in
/// microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
  /// When the event object was created by the publisher.
  pub create_time: Option<i64>,
  /// When the publishing endpoint handed the event to the daemon.
  pub send_time: Option<i64>,
  /// When the receiving endpoint rebuilt the event from the wire.
  pub receive_time: Option<i64>,
  /// When the event was handed to an application handler.
  pub deliver_time: Option<i64>,
}

pub(crate) fn now_micros() -> i64 {
  Utc::now().timestamp_micros()
}

impl MetaData {
  pub fn stamp_create_time(&mut self) {
    self.create_time = Some(now_micros());
  }

  pub fn stamp_send_time(&mut self) {
    self.send_time = Some(now_micros());
  }

  pub fn stamp_receive_time(&mut self) {
    self.receive_time = Some(now_micros());
  }

  pub fn stamp_deliver_time(&mut self) {
    self.deliver_time = Some(now_micros());
  }
}

/// An opaque, shareable payload. The transport never inspects it beyond
/// handing it to a converter.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// One application event.
///
/// The transport reads the scope, the payload and its type tag, and the
/// cause list; it assigns the id on first publication and fills the
/// metadata timestamps.
#[derive(Clone)]
pub struct Event {
  pub id: Option<EventId>,
  pub scope: Scope,
  pub data: Payload,
  pub data_type: String,
  pub meta: MetaData,
  pub causes: Vec<EventId>,
}

impl Event {
  pub fn new(scope: Scope, data: Payload, data_type: impl Into<String>) -> Event {
    let mut meta = MetaData::default();
    meta.stamp_create_time();
    Event {
      id: None,
      scope,
      data,
      data_type: data_type.into(),
      meta,
      causes: Vec::new(),
    }
  }
}

impl fmt::Debug for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Event")
      .field("id", &self.id)
      .field("scope", &self.scope)
      .field("data_type", &self.data_type)
      .field("meta", &self.meta)
      .field("causes", &self.causes)
      .finish_non_exhaustive()
  }
}
