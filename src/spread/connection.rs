//! Wrapper around one daemon client session.

use std::sync::{Arc, Mutex, RwLock};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::error::{DaemonFault, Error, Result};

use super::{
  client::{DaemonClient, DaemonSession},
  message::{ReceivedMessage, ServiceType, SpreadMessage},
  GroupName, MAX_MESSAGE_LEN,
};

/// One connection to a daemon, shared by every endpoint on a bus.
///
/// The connection is inactive after construction; `activate` opens the
/// session. `receive` may run concurrently with `send` and
/// `interrupt_receive` (sends are serialized internally, since daemon
/// client libraries are not reliably thread-safe on the sending side), but
/// only one thread may sit in `receive` at a time.
pub struct SpreadConnection {
  client: Arc<dyn DaemonClient>,
  host: String,
  port: u16,
  session: RwLock<Option<Arc<dyn DaemonSession>>>,
  send_lock: Mutex<()>,
}

impl SpreadConnection {
  pub fn new(client: Arc<dyn DaemonClient>, host: impl Into<String>, port: u16) -> SpreadConnection {
    SpreadConnection {
      client,
      host: host.into(),
      port,
      session: RwLock::new(None),
      send_lock: Mutex::new(()),
    }
  }

  pub fn transport_url(&self) -> String {
    format!("spread://{}:{}", self.host, self.port)
  }

  pub fn is_active(&self) -> bool {
    self.session.read().unwrap().is_some()
  }

  fn session(&self) -> Result<Arc<dyn DaemonSession>> {
    self
      .session
      .read()
      .unwrap()
      .clone()
      .ok_or(Error::IllegalState("connection is not active"))
  }

  /// Opens the session. The daemon assigns the private group name that
  /// `interrupt_receive` later targets.
  pub fn activate(&self) -> Result<()> {
    let mut slot = self.session.write().unwrap();
    if slot.is_some() {
      return Err(Error::IllegalState("connection is already active"));
    }
    debug!("connecting to spread daemon at {}", self.transport_url());
    let session = self
      .client
      .connect(&self.host, self.port)
      .map_err(|fault| Error::Connect { url: self.transport_url(), fault })?;
    info!(
      "connected to spread daemon at {}, private group is {}",
      self.transport_url(),
      session.private_group()
    );
    *slot = Some(session);
    Ok(())
  }

  /// Closes the session. Errors from the close call are dropped; there is
  /// no way to recover from them and the connection becomes inactive
  /// either way.
  pub fn deactivate(&self) -> Result<()> {
    let mut slot = self.session.write().unwrap();
    let Some(session) = slot.take() else {
      return Err(Error::IllegalState("connection is not active"));
    };
    if let Err(fault) = session.disconnect() {
      warn!("error closing daemon session: {fault}");
    }
    Ok(())
  }

  pub fn private_group(&self) -> Result<GroupName> {
    Ok(self.session()?.private_group().clone())
  }

  pub fn join(&self, group: &GroupName) -> Result<()> {
    self.session()?.join(group).map_err(|fault| {
      error!("error joining group {group}: {fault}");
      Error::Daemon(fault)
    })
  }

  pub fn leave(&self, group: &GroupName) -> Result<()> {
    self.session()?.leave(group).map_err(|fault| {
      error!("error leaving group {group}: {fault}");
      Error::Daemon(fault)
    })
  }

  /// Transmits one message. Uses single-group multicast when the message
  /// is addressed to exactly one group.
  pub fn send(&self, message: &SpreadMessage) -> Result<()> {
    let session = self.session()?;
    if message.groups.is_empty() {
      return Err(Error::Daemon(DaemonFault::IllegalMessage));
    }
    if message.data.len() > MAX_MESSAGE_LEN {
      return Err(Error::Daemon(DaemonFault::MessageTooLong {
        size: message.data.len(),
        limit: MAX_MESSAGE_LEN,
      }));
    }

    let _sending = self.send_lock.lock().unwrap();
    if let [group] = message.groups.as_slice() {
      session.multicast(message.service, message.self_discard, group, &message.data)?;
    } else {
      session.multigroup_multicast(
        message.service,
        message.self_discard,
        &message.groups,
        &message.data,
      )?;
    }
    Ok(())
  }

  /// Blocks until the daemon delivers a message. Returns
  /// [`Error::Cancelled`] when the message is the connection's own
  /// interrupt marker: a regular message addressed to exactly its private
  /// group.
  pub fn receive(&self) -> Result<ReceivedMessage> {
    let session = self.session()?;
    let message = session.receive().map_err(Error::Daemon)?;
    if let ReceivedMessage::Regular { groups, .. } = &message {
      if let [group] = groups.as_slice() {
        if group == session.private_group() {
          return Err(Error::Cancelled);
        }
      }
    }
    Ok(message)
  }

  /// Wakes up a blocked `receive` by sending an empty message to the
  /// session's own private group. Safe to call from any thread.
  pub fn interrupt_receive(&self) -> Result<()> {
    let session = self.session()?;
    let _sending = self.send_lock.lock().unwrap();
    session
      .multicast(ServiceType::Reliable, false, session.private_group(), &[])
      .map_err(Error::Daemon)
  }
}

impl std::fmt::Debug for SpreadConnection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SpreadConnection")
      .field("url", &self.transport_url())
      .field("active", &self.is_active())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::super::LoopbackDaemon;
  use super::*;
  use crate::error::ConnectFault;

  fn active_connection(daemon: &LoopbackDaemon) -> SpreadConnection {
    let connection = SpreadConnection::new(Arc::new(daemon.clone()), "localhost", 4803);
    connection.activate().unwrap();
    connection
  }

  #[test]
  fn activation_is_a_one_way_toggle() {
    let daemon = LoopbackDaemon::new();
    let connection = active_connection(&daemon);
    assert!(connection.is_active());
    assert!(matches!(connection.activate(), Err(Error::IllegalState(_))));
    connection.deactivate().unwrap();
    assert!(!connection.is_active());
    assert!(matches!(connection.deactivate(), Err(Error::IllegalState(_))));
  }

  #[test]
  fn refused_connections_carry_the_classified_fault() {
    let daemon = LoopbackDaemon::new();
    daemon.refuse_connections_with(ConnectFault::QuotaExceeded);
    let connection = SpreadConnection::new(Arc::new(daemon), "localhost", 4803);
    match connection.activate() {
      Err(Error::Connect { url, fault }) => {
        assert_eq!(url, "spread://localhost:4803");
        assert_eq!(fault, ConnectFault::QuotaExceeded);
      }
      other => panic!("expected a connect error, got {other:?}"),
    }
  }

  #[test]
  fn transport_url_is_formed_from_host_and_port() {
    let daemon = LoopbackDaemon::new();
    let connection = SpreadConnection::new(Arc::new(daemon), "daemonhost", 4811);
    assert_eq!(connection.transport_url(), "spread://daemonhost:4811");
  }

  #[test]
  fn send_rejects_oversized_and_unaddressed_messages() {
    let daemon = LoopbackDaemon::new();
    let connection = active_connection(&daemon);

    let unaddressed = SpreadMessage {
      service: ServiceType::Reliable,
      self_discard: true,
      groups: vec![],
      data: vec![1, 2, 3],
    };
    assert!(matches!(
      connection.send(&unaddressed),
      Err(Error::Daemon(DaemonFault::IllegalMessage))
    ));

    let oversized = SpreadMessage {
      service: ServiceType::Reliable,
      self_discard: true,
      groups: vec![GroupName::new("g").unwrap()],
      data: vec![0; MAX_MESSAGE_LEN + 1],
    };
    assert!(matches!(
      connection.send(&oversized),
      Err(Error::Daemon(DaemonFault::MessageTooLong { .. }))
    ));
  }

  #[test]
  fn interrupt_cancels_a_blocked_receive() {
    let daemon = LoopbackDaemon::new();
    let connection = Arc::new(active_connection(&daemon));

    let receiver = {
      let connection = Arc::clone(&connection);
      std::thread::spawn(move || connection.receive())
    };
    // Give the receiver a moment to block on the empty mailbox.
    std::thread::sleep(std::time::Duration::from_millis(50));
    connection.interrupt_receive().unwrap();
    assert!(matches!(receiver.join().unwrap(), Err(Error::Cancelled)));
  }

  #[test]
  fn messages_flow_between_joined_sessions() {
    let daemon = LoopbackDaemon::new();
    let sender = active_connection(&daemon);
    let receiver = active_connection(&daemon);

    let group = GroupName::new("testgroup").unwrap();
    receiver.join(&group).unwrap();

    let message = SpreadMessage {
      service: ServiceType::Fifo,
      self_discard: true,
      groups: vec![group.clone()],
      data: b"ping".to_vec(),
    };
    sender.send(&message).unwrap();

    match receiver.receive().unwrap() {
      ReceivedMessage::Regular { sender: from, groups, data } => {
        assert_eq!(from, sender.private_group().unwrap());
        assert_eq!(groups, vec![group]);
        assert_eq!(&data[..], b"ping");
      }
      other => panic!("expected a regular message, got {other:?}"),
    }
  }
}
