//! The receive loop pulling messages off the daemon connection.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  error::{report_error, Error, ErrorStrategy, Result},
  spread::{ReceivedMessage, SpreadConnection},
  wire::{AssemblyPool, Notification, WireFragment},
};

/// Receives completed notifications and receive-path errors. The bus
/// implements this behind a weak reference so the running task cannot keep
/// it alive.
pub(crate) trait ReceiverHandler: Send + Sync {
  fn on_incoming(&self, notification: Notification);

  fn on_error(&self, error: &Error);
}

/// A cooperatively cancellable loop: receive, parse, reassemble, hand
/// over. Runs on its own thread; cancellation is the flag plus the
/// connection's self-addressed interrupt message.
pub(crate) struct ReceiverTask {
  connection: Arc<SpreadConnection>,
  pool: Arc<AssemblyPool>,
  handler: Box<dyn ReceiverHandler>,
  error_strategy: ErrorStrategy,
  cancelled: AtomicBool,
}

impl ReceiverTask {
  pub fn new(
    connection: Arc<SpreadConnection>,
    pool: Arc<AssemblyPool>,
    handler: Box<dyn ReceiverHandler>,
    error_strategy: ErrorStrategy,
  ) -> ReceiverTask {
    ReceiverTask {
      connection,
      pool,
      handler,
      error_strategy,
      cancelled: AtomicBool::new(false),
    }
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }

  pub fn run(&self) {
    trace!("receiver task starting on {}", self.connection.transport_url());
    while !self.cancelled.load(Ordering::Acquire) {
      match self.receive_one() {
        Ok(()) => {}
        Err(Error::Cancelled) => {
          debug!("receive interrupted, terminating receiver task");
          break;
        }
        Err(error @ (Error::Daemon(_) | Error::Connect { .. } | Error::IllegalState(_))) => {
          // The connection is unusable; there is nothing left to receive.
          report_error(
            self.error_strategy,
            "receiving from the daemon",
            &error,
            "Terminating receiving new messages",
            "Terminating the whole process as requested via configuration",
          );
          self.handler.on_error(&error);
          break;
        }
        Err(error) => {
          // Malformed notifications only affect the event in question.
          self.handler.on_error(&error);
        }
      }
    }
    trace!("receiver task finished");
  }

  fn receive_one(&self) -> Result<()> {
    let message = self.connection.receive()?;
    let ReceivedMessage::Regular { data, .. } = message else {
      debug!("ignoring membership message");
      return Ok(());
    };

    let fragment = WireFragment::parse(&data)?;
    trace!(
      "received fragment {}/{} of event {:?}",
      fragment.data_part,
      fragment.num_data_parts,
      fragment.event_id
    );

    let complete = if fragment.num_data_parts == 1 {
      // Unsplit events bypass the pool.
      Some(Notification::from_single_fragment(fragment)?)
    } else {
      self.pool.add(fragment)?
    };

    if let Some(notification) = complete {
      self.handler.on_incoming(notification);
    }
    Ok(())
  }
}
