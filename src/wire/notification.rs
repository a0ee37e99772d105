//! The serialized notification forms.

use bytes::Bytes;
use speedy::{Readable, Writable};

use crate::{
  error::{Error, Result},
  event::{EventId, MetaData},
  scope::Scope,
  spread::{GroupName, ServiceType},
};

/// Event metadata carried on the wire. Present on fragment 0 of an event
/// only; the remaining fragments carry just the event-id stub.
#[derive(Debug, Clone, PartialEq, Eq, Readable, Writable)]
pub struct FragmentHeader {
  pub scope: String,
  pub wire_schema: String,
  pub create_time: Option<i64>,
  pub send_time: Option<i64>,
  pub causes: Vec<EventId>,
}

/// One daemon message belonging to a (possibly multi-part) notification.
///
/// `num_data_parts` is identical on every fragment of an event and
/// `data_part` runs contiguously in `[0, num_data_parts)`.
#[derive(Debug, Clone, PartialEq, Eq, Readable, Writable)]
pub struct WireFragment {
  pub event_id: EventId,
  pub data_part: u32,
  pub num_data_parts: u32,
  pub header: Option<FragmentHeader>,
  pub data: Vec<u8>,
}

impl WireFragment {
  pub fn parse(buffer: &[u8]) -> Result<WireFragment> {
    WireFragment::read_from_buffer(buffer)
      .map_err(|e| Error::Protocol(format!("failed to parse fragmented notification: {e}")))
  }

  pub fn to_wire(&self) -> Result<Vec<u8>> {
    self
      .write_to_vec()
      .map_err(|e| Error::Protocol(format!("failed to serialize fragmented notification: {e}")))
  }
}

/// A complete notification, after any reassembly.
#[derive(Debug, Clone)]
pub struct Notification {
  pub event_id: EventId,
  pub scope: Scope,
  pub wire_schema: String,
  pub meta: MetaData,
  pub causes: Vec<EventId>,
  pub data: Bytes,
}

impl Notification {
  pub(crate) fn from_header(
    event_id: EventId,
    header: FragmentHeader,
    data: Bytes,
  ) -> Result<Notification> {
    let scope = Scope::new(&header.scope)
      .map_err(|_| Error::Protocol(format!("invalid scope {:?} in notification", header.scope)))?;
    Ok(Notification {
      event_id,
      scope,
      wire_schema: header.wire_schema,
      meta: MetaData {
        create_time: header.create_time,
        send_time: header.send_time,
        ..MetaData::default()
      },
      causes: header.causes,
      data,
    })
  }

  /// Builds a notification from the single fragment of an unsplit event.
  pub fn from_single_fragment(fragment: WireFragment) -> Result<Notification> {
    let header = fragment.header.ok_or_else(|| {
      Error::Protocol("single-part notification carries no header".to_string())
    })?;
    Notification::from_header(fragment.event_id, header, Bytes::from(fragment.data))
  }
}

/// What the sending endpoint hands to the bus: the assembled notification
/// for local fan-out plus its already-fragmented wire form and delivery
/// parameters for the daemon.
#[derive(Debug, Clone)]
pub struct OutgoingNotification {
  pub notification: Notification,
  pub service: ServiceType,
  pub groups: Vec<GroupName>,
  pub fragments: Vec<WireFragment>,
}
