//! Reassembly of fragmented notifications.
//!
//! Fragments of one event may arrive interleaved with other events'
//! fragments. Each event under reassembly has an [`Assembly`]; the
//! [`AssemblyPool`] keys assemblies by event id and evicts stalled ones
//! once pruning is enabled. Under fully reliable delivery the pool only
//! shrinks through completions, so pruning stays off; unreliable delivery
//! can strand incomplete assemblies forever, which is what the pruner is
//! for.

use std::{
  collections::{hash_map::Entry, HashMap},
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Condvar, Mutex,
  },
  thread,
  time::{Duration, Instant},
};

use bytes::BytesMut;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::{Error, Result},
  event::EventId,
};

use super::notification::{Notification, WireFragment};

/// Reassembly state for one event.
pub(crate) struct Assembly {
  parts: Vec<Option<WireFragment>>,
  received: usize,
  birth: Instant,
}

impl Assembly {
  pub fn new(fragment: WireFragment) -> Result<Assembly> {
    let num_parts = fragment.num_data_parts as usize;
    if num_parts == 0 {
      return Err(Error::Protocol(format!(
        "fragment of event {:?} declares zero data parts",
        fragment.event_id
      )));
    }
    let mut assembly = Assembly {
      parts: vec![None; num_parts],
      received: 0,
      birth: Instant::now(),
    };
    assembly.add(fragment)?;
    Ok(assembly)
  }

  /// Stores one fragment. Returns whether the assembly is now complete.
  pub fn add(&mut self, fragment: WireFragment) -> Result<bool> {
    trace!(
      "adding fragment {}/{} of event {:?} to assembly",
      fragment.data_part,
      fragment.num_data_parts,
      fragment.event_id
    );
    if fragment.num_data_parts as usize != self.parts.len() {
      return Err(Error::Protocol(format!(
        "inconsistent num_data_parts {} in fragment of event {:?}, expected {}",
        fragment.num_data_parts,
        fragment.event_id,
        self.parts.len()
      )));
    }
    let index = fragment.data_part as usize;
    if index >= self.parts.len() {
      return Err(Error::Protocol(format!(
        "data_part {} out of range for {} parts in event {:?}",
        fragment.data_part,
        self.parts.len(),
        fragment.event_id
      )));
    }
    if self.parts[index].is_some() {
      return Err(Error::Protocol(format!(
        "duplicate fragment ({}/{}) for sender {} and sequence number {}",
        fragment.data_part,
        fragment.num_data_parts,
        fragment.event_id.sender_id,
        fragment.event_id.sequence_number
      )));
    }
    self.parts[index] = Some(fragment);
    self.received += 1;
    Ok(self.is_complete())
  }

  pub fn is_complete(&self) -> bool {
    self.received == self.parts.len()
  }

  pub fn age(&self) -> Duration {
    self.birth.elapsed()
  }

  pub fn received_count(&self) -> usize {
    self.received
  }

  /// Joins the fragments into one notification, payload in index order.
  pub fn into_notification(self) -> Result<Notification> {
    debug_assert!(self.is_complete());
    let mut parts = self.parts;
    let first = parts[0]
      .take()
      .ok_or_else(|| Error::Protocol("joining an incomplete assembly".to_string()))?;
    let event_id = first.event_id;
    let header = first
      .header
      .ok_or_else(|| Error::Protocol("first fragment carries no notification header".to_string()))?;

    let mut data = BytesMut::from(&first.data[..]);
    for part in parts.into_iter().skip(1) {
      let part =
        part.ok_or_else(|| Error::Protocol("joining an incomplete assembly".to_string()))?;
      data.extend_from_slice(&part.data);
    }
    Notification::from_header(event_id, header, data.freeze())
  }
}

/// Pruning parameters: assemblies older than `max_age` are evicted, the
/// pruner wakes every `pruning_interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub max_age: Duration,
  pub pruning_interval: Duration,
}

impl Default for PoolConfig {
  fn default() -> PoolConfig {
    PoolConfig {
      max_age: Duration::from_secs(20),
      pruning_interval: Duration::from_millis(4000),
    }
  }
}

struct PoolShared {
  assemblies: Mutex<HashMap<EventId, Assembly>>,
  /// Incomplete assemblies discarded by the pruner, for observability.
  pruned_total: AtomicU64,
}

struct StopFlag {
  stopped: Mutex<bool>,
  wakeup: Condvar,
}

struct Pruner {
  stop: Arc<StopFlag>,
  thread: thread::JoinHandle<()>,
}

/// All assemblies currently in progress on one bus.
pub struct AssemblyPool {
  shared: Arc<PoolShared>,
  config: PoolConfig,
  pruner: Mutex<Option<Pruner>>,
}

impl AssemblyPool {
  pub fn new(config: PoolConfig) -> Result<AssemblyPool> {
    if config.max_age.is_zero() {
      return Err(Error::Domain("assembly max age must not be zero".to_string()));
    }
    if config.pruning_interval.is_zero() {
      return Err(Error::Domain("pruning interval must not be zero".to_string()));
    }
    Ok(AssemblyPool {
      shared: Arc::new(PoolShared {
        assemblies: Mutex::new(HashMap::new()),
        pruned_total: AtomicU64::new(0),
      }),
      config,
      pruner: Mutex::new(None),
    })
  }

  /// Routes one fragment into its assembly; returns the joined
  /// notification once the event is complete and removes its entry.
  pub fn add(&self, fragment: WireFragment) -> Result<Option<Notification>> {
    let mut assemblies = self.shared.assemblies.lock().unwrap();
    let key = fragment.event_id;

    let complete = match assemblies.entry(key) {
      Entry::Occupied(mut entry) => entry.get_mut().add(fragment)?,
      Entry::Vacant(entry) => {
        trace!("creating new assembly for event {key:?}");
        entry.insert(Assembly::new(fragment)?).is_complete()
      }
    };

    if complete {
      if let Some(assembly) = assemblies.remove(&key) {
        trace!("assembly for event {key:?} complete, {} remain", assemblies.len());
        return assembly.into_notification().map(Some);
      }
    }
    Ok(None)
  }

  pub fn len(&self) -> usize {
    self.shared.assemblies.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// How many incomplete assemblies the pruner has evicted so far.
  pub fn pruned_total(&self) -> u64 {
    self.shared.pruned_total.load(Ordering::Relaxed)
  }

  pub fn is_pruning(&self) -> bool {
    self.pruner.lock().unwrap().is_some()
  }

  /// Starts or stops the pruning task. Stopping joins the pruner thread.
  pub fn set_pruning(&self, enable: bool) {
    let mut pruner = self.pruner.lock().unwrap();
    match (enable, pruner.is_some()) {
      (true, false) => {
        debug!("starting assembly pruning");
        *pruner = Some(Pruner::spawn(self.shared.clone(), self.config.clone()));
      }
      (false, true) => {
        debug!("stopping assembly pruning");
        if let Some(pruner) = pruner.take() {
          pruner.stop_and_join();
        }
      }
      _ => {}
    }
  }
}

impl Drop for AssemblyPool {
  fn drop(&mut self) {
    self.set_pruning(false);
  }
}

impl Pruner {
  fn spawn(shared: Arc<PoolShared>, config: PoolConfig) -> Pruner {
    let stop = Arc::new(StopFlag {
      stopped: Mutex::new(false),
      wakeup: Condvar::new(),
    });
    let flag = stop.clone();
    let thread = thread::Builder::new()
      .name("spreadbus-pruner".to_string())
      .spawn(move || {
        let mut stopped = flag.stopped.lock().unwrap();
        loop {
          let (guard, _timeout) = flag
            .wakeup
            .wait_timeout(stopped, config.pruning_interval)
            .unwrap();
          stopped = guard;
          if *stopped {
            return;
          }
          Pruner::prune(&shared, config.max_age);
        }
      })
      .expect("failed to spawn the assembly pruning thread");
    Pruner { stop, thread }
  }

  fn prune(shared: &PoolShared, max_age: Duration) {
    let mut assemblies = shared.assemblies.lock().unwrap();
    let before = assemblies.len();
    assemblies.retain(|key, assembly| {
      let stale = assembly.age() > max_age;
      if stale {
        debug!(
          "pruning stale assembly for event {key:?} with {} received part(s)",
          assembly.received_count()
        );
      }
      !stale
    });
    let evicted = before - assemblies.len();
    if evicted > 0 {
      shared.pruned_total.fetch_add(evicted as u64, Ordering::Relaxed);
    }
  }

  fn stop_and_join(self) {
    *self.stop.stopped.lock().unwrap() = true;
    self.stop.wakeup.notify_all();
    if self.thread.join().is_err() {
      error!("assembly pruning thread panicked");
    }
  }
}
