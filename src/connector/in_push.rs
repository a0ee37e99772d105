//! The push-style receiving endpoint.

use std::sync::{Arc, Mutex};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  bus::{Bus, Sink},
  converter::ConverterRegistry,
  error::{report_error, Error, ErrorStrategy, Result},
  event::Event,
  qos::{QosSpec, Reliability},
  scope::Scope,
  wire::Notification,
};

use super::{notification_to_event, ConnectorConfig};

/// Receives events pushed by a connector.
pub trait EventHandler: Send + Sync {
  fn handle(&self, event: Event);
}

/// Subscribes to a scope and pushes matching events to its registered
/// handlers, synchronously on the bus's dispatch thread. Handlers must
/// therefore be quick and must not call back into the bus.
pub struct InPushConnector {
  bus: Arc<Bus>,
  shared: Arc<PushSink>,
  scope: Scope,
  active: bool,
  qos: QosSpec,
}

/// The sink registered with the bus. Held strongly by the connector and
/// weakly by the dispatcher.
struct PushSink {
  converters: Arc<ConverterRegistry>,
  handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
  error_strategy: ErrorStrategy,
}

impl Sink for PushSink {
  fn handle_notification(&self, notification: &Notification) {
    let mut event = match notification_to_event(&self.converters, notification) {
      Ok(event) => event,
      Err(error) => {
        report_error(
          self.error_strategy,
          "deserializing notification",
          &error,
          "Continuing with the next event",
          "Terminating",
        );
        return;
      }
    };
    event.meta.stamp_deliver_time();

    for handler in self.handlers.lock().unwrap().iter() {
      handler.handle(event.clone());
    }
  }

  fn handle_error(&self, error: &Error) {
    report_error(
      self.error_strategy,
      "receiving daemon messages",
      error,
      "Skipping the message",
      "Terminating",
    );
  }
}

impl InPushConnector {
  pub(crate) fn new(
    bus: Arc<Bus>,
    converters: Arc<ConverterRegistry>,
    config: &ConnectorConfig,
  ) -> InPushConnector {
    InPushConnector {
      bus,
      shared: Arc::new(PushSink {
        converters,
        handlers: Mutex::new(Vec::new()),
        error_strategy: config.error_strategy,
      }),
      scope: Scope::root(),
      active: false,
      qos: config.qos,
    }
  }

  fn as_sink(&self) -> Arc<dyn Sink> {
    self.shared.clone()
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

  pub fn set_scope(&mut self, scope: Scope) -> Result<()> {
    if self.active {
      return Err(Error::IllegalState("cannot change the scope of an active connector"));
    }
    self.scope = scope;
    Ok(())
  }

  pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
    self.shared.handlers.lock().unwrap().push(handler);
  }

  pub fn remove_handler(&self, handler: &Arc<dyn EventHandler>) {
    self
      .shared
      .handlers
      .lock()
      .unwrap()
      .retain(|registered| !Arc::ptr_eq(registered, handler));
  }

  /// Registers with the bus, which joins the daemon groups of the scope
  /// and its super-scopes.
  pub fn activate(&mut self) -> Result<()> {
    if self.active {
      return Err(Error::IllegalState("connector is already active"));
    }
    self.bus.add_sink(&self.scope, &self.as_sink())?;
    self.active = true;
    Ok(())
  }

  pub fn deactivate(&mut self) -> Result<()> {
    if !self.active {
      return Err(Error::IllegalState("connector is not active"));
    }
    self.bus.remove_sink(&self.scope, &self.as_sink())?;
    self.active = false;
    Ok(())
  }

  pub fn qos(&self) -> QosSpec {
    self.qos
  }

  /// Accepting less than fully reliable delivery means fragments may be
  /// lost for good, so stalled reassemblies must be evicted.
  pub fn set_qos(&mut self, qos: QosSpec) {
    self.qos = qos;
    if qos.reliability == Reliability::Unreliable {
      self.bus.set_pruning(true);
    }
  }
}

impl Drop for InPushConnector {
  fn drop(&mut self) {
    if self.active {
      if let Err(error) = self.bus.remove_sink(&self.scope, &self.as_sink()) {
        warn!("error removing sink of dropped connector: {error}");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex as StdMutex;

  use super::*;
  use crate::{bus::BusFactory, spread::LoopbackDaemon};

  struct Collector {
    events: StdMutex<Vec<Event>>,
  }

  impl EventHandler for Collector {
    fn handle(&self, event: Event) {
      self.events.lock().unwrap().push(event);
    }
  }

  fn setup() -> (BusFactory, InPushConnector, Arc<Collector>) {
    let factory = BusFactory::new(Arc::new(LoopbackDaemon::new()));
    let connector = factory
      .create_in_push_connector(
        &ConnectorConfig::default(),
        Arc::new(ConverterRegistry::with_default_converters()),
      )
      .unwrap();
    let collector = Arc::new(Collector { events: StdMutex::new(Vec::new()) });
    connector.add_handler(collector.clone());
    (factory, connector, collector)
  }

  #[test]
  fn activation_registers_with_the_bus() {
    let (factory, mut connector, _collector) = setup();
    connector.set_scope(Scope::new("/push/").unwrap()).unwrap();
    connector.activate().unwrap();

    let bus = factory.obtain("localhost", crate::spread::DEFAULT_PORT).unwrap();
    assert_eq!(bus.sink_count(), 1);
    assert!(matches!(connector.activate(), Err(Error::IllegalState(_))));

    connector.deactivate().unwrap();
    assert_eq!(bus.sink_count(), 0);
  }

  #[test]
  fn dropping_an_active_connector_releases_its_registration() {
    let (factory, mut connector, _collector) = setup();
    connector.activate().unwrap();
    let bus = factory.obtain("localhost", crate::spread::DEFAULT_PORT).unwrap();
    assert_eq!(bus.sink_count(), 1);
    drop(connector);
    assert_eq!(bus.sink_count(), 0);
  }

  #[test]
  fn unreliable_qos_enables_pool_pruning() {
    let (factory, mut connector, _collector) = setup();
    let bus = factory.obtain("localhost", crate::spread::DEFAULT_PORT).unwrap();

    connector.set_qos(QosSpec::new(
      crate::qos::Ordering::Ordered,
      Reliability::Reliable,
    ));
    assert!(!bus.is_pruning());

    connector.set_qos(QosSpec::new(
      crate::qos::Ordering::Unordered,
      Reliability::Unreliable,
    ));
    assert!(bus.is_pruning());
  }

  #[test]
  fn scope_changes_are_rejected_while_active() {
    let (_factory, mut connector, _collector) = setup();
    connector.activate().unwrap();
    assert!(matches!(
      connector.set_scope(Scope::new("/late/").unwrap()),
      Err(Error::IllegalState(_))
    ));
  }
}
