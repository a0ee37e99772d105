//! The per-endpoint hub: one daemon connection, its group memberships,
//! and scope-based dispatch to local sinks.

use std::{
  sync::{Arc, Mutex, Weak},
  thread,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::{Error, ErrorStrategy, Result},
  scope::Scope,
  spread::{GroupName, SpreadConnection, SpreadMessage},
  wire::{AssemblyPool, Notification, OutgoingNotification, PoolConfig},
};

pub mod dispatcher;
pub mod factory;
pub mod group_names;
mod membership;
mod receiver;

pub use dispatcher::Sink;
pub use factory::BusFactory;
pub use group_names::{group_for_scope, GroupNameCache};

use dispatcher::ScopeDispatcher;
use membership::Memberships;
use receiver::{ReceiverHandler, ReceiverTask};

/// Manages and arbitrates one connection to a daemon.
///
/// Sending and receiving endpoints attach to the bus as sinks. Every
/// notification sent over the connection and every notification received
/// from it is dispatched to the sinks whose scope is a super-scope of the
/// notification's scope, so endpoints of one process hear each other
/// without a round-trip through the daemon.
///
/// Buses are obtained through [`BusFactory`], which shares one instance
/// per daemon endpoint and hands out `Arc`s; the factory itself keeps only
/// a weak reference, so the last endpoint dropping its `Arc` releases the
/// bus.
pub struct Bus {
  /// Self-reference handed to the receiver task's handler, so that the
  /// task never owns the bus.
  weak_self: Weak<Bus>,
  connection: Arc<SpreadConnection>,
  group_names: GroupNameCache,
  pool: Arc<AssemblyPool>,
  error_strategy: ErrorStrategy,
  sinks: Mutex<SinkState>,
  receiver: Mutex<ReceiverState>,
}

struct SinkState {
  dispatcher: ScopeDispatcher,
  memberships: Memberships,
}

#[derive(Default)]
struct ReceiverState {
  active: bool,
  task: Option<Arc<ReceiverTask>>,
  thread: Option<thread::JoinHandle<()>>,
}

/// Forwards receiver callbacks to the bus without keeping it alive; the
/// strong references run the other way (bus → receiver task).
struct WeakBusHandler {
  bus: Weak<Bus>,
}

impl ReceiverHandler for WeakBusHandler {
  fn on_incoming(&self, notification: Notification) {
    if let Some(bus) = self.bus.upgrade() {
      bus.handle_incoming(notification);
    }
  }

  fn on_error(&self, error: &Error) {
    if let Some(bus) = self.bus.upgrade() {
      bus.handle_error(error);
    }
  }
}

impl Bus {
  pub(crate) fn create(
    connection: Arc<SpreadConnection>,
    pool_config: PoolConfig,
    error_strategy: ErrorStrategy,
  ) -> Result<Arc<Bus>> {
    let pool = Arc::new(AssemblyPool::new(pool_config)?);
    Ok(Arc::new_cyclic(|weak_self| Bus {
      weak_self: weak_self.clone(),
      group_names: GroupNameCache::new(),
      pool,
      error_strategy,
      sinks: Mutex::new(SinkState {
        dispatcher: ScopeDispatcher::new(),
        memberships: Memberships::new(connection.clone()),
      }),
      receiver: Mutex::new(ReceiverState::default()),
      connection,
    }))
  }

  pub fn transport_url(&self) -> String {
    self.connection.transport_url()
  }

  pub fn is_active(&self) -> bool {
    self.receiver.lock().unwrap().active
  }

  /// Number of live sink registrations.
  pub fn sink_count(&self) -> usize {
    self.sinks.lock().unwrap().dispatcher.sink_count()
  }

  /// Opens the daemon connection and starts the receiver thread.
  pub fn activate(&self) -> Result<()> {
    let mut receiver = self.receiver.lock().unwrap();
    if receiver.active {
      return Err(Error::IllegalState("bus is already active"));
    }

    self.connection.activate()?;

    let handler = WeakBusHandler { bus: self.weak_self.clone() };
    let task = Arc::new(ReceiverTask::new(
      self.connection.clone(),
      self.pool.clone(),
      Box::new(handler),
      self.error_strategy,
    ));
    let running = task.clone();
    let thread = thread::Builder::new()
      .name("spreadbus-recv".to_string())
      .spawn(move || running.run())
      .map_err(|e| {
        let _ = self.connection.deactivate();
        Error::Domain(format!("failed to spawn the receiver thread: {e}"))
      })?;

    receiver.active = true;
    receiver.task = Some(task);
    receiver.thread = Some(thread);
    info!("activated bus on {}", self.transport_url());
    Ok(())
  }

  /// Stops the receiver thread (cancel flag plus self-addressed interrupt
  /// message, then join) and closes the connection.
  pub fn deactivate(&self) -> Result<()> {
    let mut receiver = self.receiver.lock().unwrap();
    if !receiver.active {
      return Err(Error::IllegalState("bus is not active"));
    }

    if let Some(task) = receiver.task.take() {
      task.cancel();
    }
    if let Err(error) = self.connection.interrupt_receive() {
      warn!("could not interrupt the receiver: {error}");
    }
    if let Some(thread) = receiver.thread.take() {
      if thread.join().is_err() {
        error!("receiver thread panicked");
      }
    }
    receiver.active = false;

    self.connection.deactivate()?;
    info!("deactivated bus on {}", self.transport_url());
    Ok(())
  }

  pub(crate) fn groups_for(&self, scope: &Scope) -> Arc<Vec<GroupName>> {
    self.group_names.groups_for(scope)
  }

  /// Enables or disables eviction of stalled reassemblies; used when a
  /// subscriber accepts less than fully reliable delivery.
  pub fn set_pruning(&self, enable: bool) {
    self.pool.set_pruning(enable);
  }

  pub fn is_pruning(&self) -> bool {
    self.pool.is_pruning()
  }

  /// How many incomplete reassemblies have been evicted on this bus.
  pub fn pruned_assemblies(&self) -> u64 {
    self.pool.pruned_total()
  }

  /// Registers `sink` under `scope` and joins the daemon groups of the
  /// scope and all its super-scopes.
  pub fn add_sink(&self, scope: &Scope, sink: &Arc<dyn Sink>) -> Result<()> {
    debug!("bus {} adding sink for scope {scope}", self.transport_url());
    let mut sinks = self.sinks.lock().unwrap();
    for group in self.group_names.groups_for(scope).iter() {
      sinks.memberships.join(group)?;
    }
    sinks.dispatcher.add_sink(scope.clone(), Arc::downgrade(sink));
    Ok(())
  }

  /// Removes the registration of `sink` under `scope` and leaves the
  /// matching daemon groups.
  pub fn remove_sink(&self, scope: &Scope, sink: &Arc<dyn Sink>) -> Result<()> {
    debug!("bus {} removing sink for scope {scope}", self.transport_url());
    let mut sinks = self.sinks.lock().unwrap();
    sinks.dispatcher.remove_sink(scope, sink);
    for group in self.group_names.groups_for(scope).iter() {
      sinks.memberships.leave(group)?;
    }
    Ok(())
  }

  /// Sends every fragment to the daemon, then fans the notification out
  /// to the local sinks under the notification's scope.
  pub fn handle_outgoing(&self, outgoing: &OutgoingNotification) -> Result<()> {
    trace!(
      "bus {} handling outgoing notification on {}",
      self.transport_url(),
      outgoing.notification.scope
    );
    for fragment in &outgoing.fragments {
      let message = SpreadMessage {
        service: outgoing.service,
        self_discard: true,
        groups: outgoing.groups.clone(),
        data: fragment.to_wire()?,
      };
      self.connection.send(&message)?;
    }

    let mut sinks = self.sinks.lock().unwrap();
    sinks
      .dispatcher
      .map_sinks(&outgoing.notification.scope, |sink| {
        sink.handle_notification(&outgoing.notification);
      });
    Ok(())
  }

  /// Fans a notification received from the daemon out to the local sinks.
  pub(crate) fn handle_incoming(&self, notification: Notification) {
    trace!(
      "bus {} handling incoming notification on {}",
      self.transport_url(),
      notification.scope
    );
    let mut sinks = self.sinks.lock().unwrap();
    sinks.dispatcher.map_sinks(&notification.scope, |sink| {
      sink.handle_notification(&notification);
    });
  }

  /// Reports a receive-path error to every sink, regardless of scope.
  pub(crate) fn handle_error(&self, error: &Error) {
    let mut sinks = self.sinks.lock().unwrap();
    sinks.dispatcher.map_all_sinks(|sink| sink.handle_error(error));
  }
}

impl Drop for Bus {
  fn drop(&mut self) {
    if self.is_active() {
      debug!("bus on {} dropped while active, deactivating", self.transport_url());
      if let Err(error) = self.deactivate() {
        warn!("error deactivating dropped bus: {error}");
      }
    }
  }
}

impl std::fmt::Debug for Bus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Bus")
      .field("url", &self.transport_url())
      .field("active", &self.is_active())
      .field("sinks", &self.sink_count())
      .finish()
  }
}
