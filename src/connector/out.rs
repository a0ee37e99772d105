//! The sending endpoint.

use std::sync::{
  atomic::{AtomicU32, Ordering},
  Arc,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  bus::Bus,
  converter::ConverterRegistry,
  error::{Error, Result},
  event::{Event, EventId, SenderId},
  qos::QosSpec,
  scope::Scope,
  spread::ServiceType,
  wire::{fragment_event, FragmentHeader, Notification, OutgoingNotification},
};

use super::ConnectorConfig;

/// Publishes events onto a bus.
///
/// The connector owns the sender identity: events without an id get one,
/// built from the connector's random sender id and a sequence counter.
/// `handle` may be called from any number of application threads.
pub struct OutConnector {
  bus: Arc<Bus>,
  converters: Arc<ConverterRegistry>,
  scope: Scope,
  active: bool,
  qos: QosSpec,
  service: ServiceType,
  max_fragment_size: usize,
  sender_id: SenderId,
  next_seq: AtomicU32,
}

impl OutConnector {
  pub(crate) fn new(
    bus: Arc<Bus>,
    converters: Arc<ConverterRegistry>,
    config: &ConnectorConfig,
  ) -> OutConnector {
    OutConnector {
      bus,
      converters,
      scope: Scope::root(),
      active: false,
      qos: config.qos,
      service: config.qos.service_type(),
      max_fragment_size: config.max_fragment_size,
      sender_id: SenderId::random(),
      next_seq: AtomicU32::new(0),
    }
  }

  pub fn transport_url(&self) -> String {
    self.bus.transport_url()
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn scope(&self) -> &Scope {
    &self.scope
  }

  /// The scope is informational for a sending endpoint; each event names
  /// its own. Still only changeable while inactive, like all connectors.
  pub fn set_scope(&mut self, scope: Scope) -> Result<()> {
    if self.active {
      return Err(Error::IllegalState("cannot change the scope of an active connector"));
    }
    self.scope = scope;
    Ok(())
  }

  pub fn activate(&mut self) -> Result<()> {
    if self.active {
      return Err(Error::IllegalState("connector is already active"));
    }
    self.active = true;
    Ok(())
  }

  pub fn deactivate(&mut self) -> Result<()> {
    if !self.active {
      return Err(Error::IllegalState("connector is not active"));
    }
    self.active = false;
    Ok(())
  }

  pub fn qos(&self) -> QosSpec {
    self.qos
  }

  pub fn set_qos(&mut self, qos: QosSpec) {
    self.qos = qos;
    self.service = qos.service_type();
    debug!("out connector now sends with service class {:?}", self.service);
  }

  /// Serializes, fragments and publishes one event. Errors from the
  /// daemon send propagate to the caller synchronously.
  pub fn handle(&self, event: &mut Event) -> Result<()> {
    let id = match event.id {
      Some(id) => id,
      None => {
        let id = EventId::new(self.sender_id, self.next_seq.fetch_add(1, Ordering::Relaxed));
        event.id = Some(id);
        id
      }
    };

    let converter = self.converters.serializer_for(&event.data_type)?;
    let wire_schema = converter.wire_schema().to_string();
    let payload = converter.serialize(&event.data)?;

    event.meta.stamp_send_time();

    let header = FragmentHeader {
      scope: event.scope.as_str().to_string(),
      wire_schema: wire_schema.clone(),
      create_time: event.meta.create_time,
      send_time: event.meta.send_time,
      causes: event.causes.clone(),
    };
    let fragments = fragment_event(id, header, &payload, self.max_fragment_size)?;
    trace!(
      "publishing event {id:?} on {} in {} fragment(s)",
      event.scope,
      fragments.len()
    );

    let groups = self.bus.groups_for(&event.scope);
    let outgoing = OutgoingNotification {
      notification: Notification {
        event_id: id,
        scope: event.scope.clone(),
        wire_schema,
        meta: event.meta,
        causes: event.causes.clone(),
        data: payload,
      },
      service: self.service,
      groups: groups.as_ref().clone(),
      fragments,
    };
    self.bus.handle_outgoing(&outgoing)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    bus::BusFactory,
    converter::ConverterError,
    spread::LoopbackDaemon,
  };

  fn connector() -> OutConnector {
    let factory = BusFactory::new(Arc::new(LoopbackDaemon::new()));
    factory
      .create_out_connector(
        &ConnectorConfig::default(),
        Arc::new(ConverterRegistry::with_default_converters()),
      )
      .unwrap()
  }

  fn event(payload: &str) -> Event {
    Event::new(
      Scope::new("/out/test/").unwrap(),
      Arc::new(payload.to_string()),
      "string",
    )
  }

  #[test]
  fn assigns_monotonic_event_ids_from_one_sender() {
    let mut connector = connector();
    connector.activate().unwrap();

    let mut first = event("1");
    let mut second = event("2");
    connector.handle(&mut first).unwrap();
    connector.handle(&mut second).unwrap();

    let first_id = first.id.unwrap();
    let second_id = second.id.unwrap();
    assert_eq!(first_id.sender_id, second_id.sender_id);
    assert_eq!(first_id.sequence_number, 0);
    assert_eq!(second_id.sequence_number, 1);
  }

  #[test]
  fn keeps_an_already_assigned_event_id() {
    let connector = connector();
    let preset = EventId::new(SenderId::from_bytes([4; 16]), 77);
    let mut published = event("kept");
    published.id = Some(preset);
    connector.handle(&mut published).unwrap();
    assert_eq!(published.id, Some(preset));
  }

  #[test]
  fn stamps_the_send_time() {
    let connector = connector();
    let mut published = event("stamped");
    assert!(published.meta.send_time.is_none());
    connector.handle(&mut published).unwrap();
    assert!(published.meta.send_time.is_some());
  }

  #[test]
  fn missing_converter_fails_before_anything_is_sent() {
    let connector = connector();
    let mut published = event("x");
    published.data_type = "unregistered".to_string();
    assert!(matches!(
      connector.handle(&mut published),
      Err(Error::Converter(ConverterError::NoConverterForType(_)))
    ));
  }

  #[test]
  fn scope_changes_are_rejected_while_active() {
    let mut connector = connector();
    connector.set_scope(Scope::new("/allowed/").unwrap()).unwrap();
    connector.activate().unwrap();
    assert!(matches!(
      connector.set_scope(Scope::new("/denied/").unwrap()),
      Err(Error::IllegalState(_))
    ));
  }
}
