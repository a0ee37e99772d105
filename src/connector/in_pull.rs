//! The pull-style receiving endpoint.

use std::sync::{mpsc, Arc};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  bus::{Bus, Sink},
  converter::ConverterRegistry,
  error::{report_error, Error, ErrorStrategy, Result},
  event::Event,
  qos::QosSpec,
  scope::Scope,
  wire::Notification,
};

use super::{notification_to_event, ConnectorConfig};

/// Bound on notifications buffered between the dispatch thread and the
/// pulling participant. A participant that falls further behind loses
/// notifications, with a warning per loss.
const PULL_QUEUE_CAPACITY: usize = 1000;

type QueueItem = Result<Notification>;

/// Subscribes to a scope and queues matching notifications until the
/// participant asks for them. Deserialization happens on the pulling
/// thread, not on the bus's dispatch thread.
pub struct InPullConnector {
  bus: Arc<Bus>,
  converters: Arc<ConverterRegistry>,
  shared: Arc<PullSink>,
  queue: mpsc::Receiver<QueueItem>,
  scope: Scope,
  active: bool,
  qos: QosSpec,
  error_strategy: ErrorStrategy,
}

struct PullSink {
  queue: mpsc::SyncSender<QueueItem>,
}

impl Sink for PullSink {
  fn handle_notification(&self, notification: &Notification) {
    if self.queue.try_send(Ok(notification.clone())).is_err() {
      warn!(
        "dropping notification on {}: pull queue is full or abandoned",
        notification.scope
      );
    }
  }

  fn handle_error(&self, error: &Error) {
    if self.queue.try_send(Err(error.clone())).is_err() {
      warn!("dropping error report: pull queue is full or abandoned");
    }
  }
}

impl InPullConnector {
  pub(crate) fn new(
    bus: Arc<Bus>,
    converters: Arc<ConverterRegistry>,
    config: &ConnectorConfig,
  ) -> InPullConnector {
    let (sender, receiver) = mpsc::sync_channel(PULL_QUEUE_CAPACITY);
    InPullConnector {
      bus,
      converters,
      shared: Arc::new(PullSink { queue: sender }),
      queue: receiver,
      scope: Scope::root(),
      active: false,
      qos: config.qos,
      error_strategy: config.error_strategy,
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

  pub fn set_qos(&mut self, qos: QosSpec) {
    self.qos = qos;
  }

  /// Blocks until the next event arrives. Errors queued by the receive
  /// path surface here; deserialization failures follow the connector's
  /// error strategy and the continuing strategies move on to the next
  /// notification.
  pub fn pull(&self) -> Result<Event> {
    loop {
      let item = self
        .queue
        .recv()
        .map_err(|_| Error::IllegalState("pull queue disconnected"))?;
      if let Some(event) = self.item_to_event(item)? {
        return Ok(event);
      }
    }
  }

  /// Like [`pull`](Self::pull), but returns `None` instead of blocking
  /// when no notification is waiting.
  pub fn try_pull(&self) -> Result<Option<Event>> {
    loop {
      match self.queue.try_recv() {
        Ok(item) => {
          if let Some(event) = self.item_to_event(item)? {
            return Ok(Some(event));
          }
        }
        Err(mpsc::TryRecvError::Empty) => return Ok(None),
        Err(mpsc::TryRecvError::Disconnected) => {
          return Err(Error::IllegalState("pull queue disconnected"));
        }
      }
    }
  }

  /// `Ok(None)` means the item was consumed without producing an event
  /// and the caller should look at the next one.
  fn item_to_event(&self, item: QueueItem) -> Result<Option<Event>> {
    match item {
      Ok(notification) => match notification_to_event(&self.converters, &notification) {
        Ok(mut event) => {
          event.meta.stamp_deliver_time();
          Ok(Some(event))
        }
        Err(error) => {
          report_error(
            self.error_strategy,
            "deserializing notification",
            &error,
            "Continuing with the next notification",
            "Terminating",
          );
          Ok(None)
        }
      },
      Err(error) => Err(error),
    }
  }
}

impl Drop for InPullConnector {
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
  use super::*;
  use crate::{
    bus::BusFactory,
    connector::OutConnector,
    spread::{LoopbackDaemon, DEFAULT_PORT},
  };

  fn setup(scope: &str) -> (BusFactory, InPullConnector, OutConnector) {
    let factory = BusFactory::new(Arc::new(LoopbackDaemon::new()));
    let converters = Arc::new(ConverterRegistry::with_default_converters());
    let config = ConnectorConfig::default();

    let mut puller = factory
      .create_in_pull_connector(&config, converters.clone())
      .unwrap();
    puller.set_scope(Scope::new(scope).unwrap()).unwrap();
    puller.activate().unwrap();

    let mut publisher = factory.create_out_connector(&config, converters).unwrap();
    publisher.activate().unwrap();
    (factory, puller, publisher)
  }

  fn publish(publisher: &OutConnector, scope: &str, text: &str) {
    let mut event = Event::new(
      Scope::new(scope).unwrap(),
      Arc::new(text.to_string()),
      "string",
    );
    publisher.handle(&mut event).unwrap();
  }

  #[test]
  fn pull_returns_matching_events_in_order() {
    let (_factory, puller, publisher) = setup("/pull/");
    publish(&publisher, "/pull/a/", "first");
    publish(&publisher, "/pull/b/", "second");

    let first = puller.pull().unwrap();
    assert_eq!(first.data.downcast_ref::<String>().unwrap(), "first");
    assert_eq!(first.scope.as_str(), "/pull/a/");
    assert!(first.meta.receive_time.is_some());
    assert!(first.meta.deliver_time.is_some());

    let second = puller.pull().unwrap();
    assert_eq!(second.data.downcast_ref::<String>().unwrap(), "second");
  }

  #[test]
  fn try_pull_reports_an_empty_queue() {
    let (_factory, puller, publisher) = setup("/pull/");
    assert!(puller.try_pull().unwrap().is_none());

    publish(&publisher, "/pull/", "there");
    let event = puller.try_pull().unwrap().unwrap();
    assert_eq!(event.data.downcast_ref::<String>().unwrap(), "there");
    assert!(puller.try_pull().unwrap().is_none());
  }

  #[test]
  fn non_matching_scopes_are_not_queued() {
    let (_factory, puller, publisher) = setup("/pull/only/");
    publish(&publisher, "/pull/", "outside");
    assert!(puller.try_pull().unwrap().is_none());
  }

  #[test]
  fn undeserializable_notifications_are_skipped() {
    let factory = BusFactory::new(Arc::new(LoopbackDaemon::new()));
    let config = ConnectorConfig::default();

    // The publisher knows the string converter, the puller does not.
    let mut puller = factory
      .create_in_pull_connector(&config, Arc::new(ConverterRegistry::new()))
      .unwrap();
    puller.activate().unwrap();
    let mut publisher = factory
      .create_out_connector(
        &config,
        Arc::new(ConverterRegistry::with_default_converters()),
      )
      .unwrap();
    publisher.activate().unwrap();

    publish(&publisher, "/skipped/", "unreadable");
    assert!(puller.try_pull().unwrap().is_none());
  }
}
