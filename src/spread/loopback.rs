//! An in-process daemon emulation.
//!
//! Routes messages between the sessions of one [`LoopbackDaemon`] with the
//! semantics the transport relies on: group membership, per-sender FIFO
//! delivery, private groups and self-discard. Reliability knobs are moot in
//! one address space, so every service class is delivered reliably and in
//! a total order. Useful for tests and for wiring participants of a single
//! process together without a running daemon.

use std::{
  collections::{HashMap, VecDeque},
  sync::{Arc, Condvar, Mutex},
};

use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::error::{ConnectFault, DaemonFault};

use super::{
  client::{DaemonClient, DaemonSession},
  message::{ReceivedMessage, ServiceType},
  GroupName, MAX_GROUP_NAME,
};

/// The daemon stand-in. Cloning yields another handle onto the same
/// daemon, so every clone connects sessions into one routing domain.
#[derive(Clone, Default)]
pub struct LoopbackDaemon {
  core: Arc<DaemonCore>,
}

#[derive(Default)]
struct DaemonCore {
  state: Mutex<CoreState>,
}

#[derive(Default)]
struct CoreState {
  next_session: u32,
  sessions: Vec<Arc<SessionShared>>,
  /// Members per group, in join order.
  groups: HashMap<GroupName, Vec<Arc<SessionShared>>>,
  refusal: Option<ConnectFault>,
}

struct SessionShared {
  private_group: GroupName,
  inbox: Mutex<Inbox>,
  readable: Condvar,
}

#[derive(Default)]
struct Inbox {
  queue: VecDeque<ReceivedMessage>,
  closed: bool,
}

impl LoopbackDaemon {
  pub fn new() -> LoopbackDaemon {
    LoopbackDaemon::default()
  }

  /// Makes all further connection attempts fail with `fault`.
  pub fn refuse_connections_with(&self, fault: ConnectFault) {
    self.core.state.lock().unwrap().refusal = Some(fault);
  }

  /// Number of live sessions joined to `group`.
  pub fn group_members(&self, group: &GroupName) -> usize {
    self
      .core
      .state
      .lock()
      .unwrap()
      .groups
      .get(group)
      .map_or(0, Vec::len)
  }

  pub fn session_count(&self) -> usize {
    self.core.state.lock().unwrap().sessions.len()
  }
}

impl DaemonClient for LoopbackDaemon {
  fn connect(
    &self,
    host: &str,
    _port: u16,
  ) -> Result<Arc<dyn DaemonSession>, ConnectFault> {
    let mut state = self.core.state.lock().unwrap();
    if let Some(fault) = &state.refusal {
      return Err(fault.clone());
    }

    state.next_session += 1;
    let mut name = format!("#p{:05}#", state.next_session);
    name.extend(
      host
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .take(MAX_GROUP_NAME - 1 - name.len()),
    );
    let shared = Arc::new(SessionShared {
      private_group: GroupName::new_unchecked(name),
      inbox: Mutex::new(Inbox::default()),
      readable: Condvar::new(),
    });
    state.sessions.push(shared.clone());
    debug!("loopback daemon accepted session {}", shared.private_group);

    Ok(Arc::new(LoopbackSession { core: self.core.clone(), shared }))
  }
}

struct LoopbackSession {
  core: Arc<DaemonCore>,
  shared: Arc<SessionShared>,
}

impl SessionShared {
  fn deliver(&self, message: ReceivedMessage) {
    let mut inbox = self.inbox.lock().unwrap();
    if inbox.closed {
      return;
    }
    inbox.queue.push_back(message);
    self.readable.notify_one();
  }
}

impl LoopbackSession {
  fn send_to_groups(
    &self,
    self_discard: bool,
    groups: &[GroupName],
    data: &[u8],
  ) -> Result<(), DaemonFault> {
    // The whole routing step runs under the core lock, which is what
    // gives the emulation its total delivery order.
    let state = self.core.state.lock().unwrap();
    if !state.sessions.iter().any(|s| Arc::ptr_eq(s, &self.shared)) {
      return Err(DaemonFault::IllegalSession);
    }

    let mut recipients: Vec<&Arc<SessionShared>> = Vec::new();
    for group in groups {
      for member in state.groups.get(group).into_iter().flatten() {
        if !recipients.iter().any(|r| Arc::ptr_eq(r, member)) {
          recipients.push(member);
        }
      }
      // Private groups address a single session directly.
      for session in &state.sessions {
        if session.private_group == *group
          && !recipients.iter().any(|r| Arc::ptr_eq(r, session))
        {
          recipients.push(session);
        }
      }
    }

    let message = ReceivedMessage::Regular {
      sender: self.shared.private_group.clone(),
      groups: groups.to_vec(),
      data: Bytes::copy_from_slice(data),
    };
    for recipient in recipients {
      if self_discard && Arc::ptr_eq(recipient, &self.shared) {
        continue;
      }
      recipient.deliver(message.clone());
    }
    Ok(())
  }
}

impl DaemonSession for LoopbackSession {
  fn private_group(&self) -> &GroupName {
    &self.shared.private_group
  }

  fn join(&self, group: &GroupName) -> Result<(), DaemonFault> {
    let mut state = self.core.state.lock().unwrap();
    if !state.sessions.iter().any(|s| Arc::ptr_eq(s, &self.shared)) {
      return Err(DaemonFault::IllegalSession);
    }
    let members = state.groups.entry(group.clone()).or_default();
    if !members.iter().any(|m| Arc::ptr_eq(m, &self.shared)) {
      members.push(self.shared.clone());
    }
    Ok(())
  }

  fn leave(&self, group: &GroupName) -> Result<(), DaemonFault> {
    let mut state = self.core.state.lock().unwrap();
    if !state.sessions.iter().any(|s| Arc::ptr_eq(s, &self.shared)) {
      return Err(DaemonFault::IllegalSession);
    }
    if let Some(members) = state.groups.get_mut(group) {
      members.retain(|m| !Arc::ptr_eq(m, &self.shared));
      if members.is_empty() {
        state.groups.remove(group);
      }
    }
    Ok(())
  }

  fn multicast(
    &self,
    _service: ServiceType,
    self_discard: bool,
    group: &GroupName,
    data: &[u8],
  ) -> Result<(), DaemonFault> {
    self.send_to_groups(self_discard, std::slice::from_ref(group), data)
  }

  fn multigroup_multicast(
    &self,
    _service: ServiceType,
    self_discard: bool,
    groups: &[GroupName],
    data: &[u8],
  ) -> Result<(), DaemonFault> {
    if groups.is_empty() {
      return Err(DaemonFault::IllegalMessage);
    }
    self.send_to_groups(self_discard, groups, data)
  }

  fn receive(&self) -> Result<ReceivedMessage, DaemonFault> {
    let mut inbox = self.shared.inbox.lock().unwrap();
    loop {
      if let Some(message) = inbox.queue.pop_front() {
        return Ok(message);
      }
      if inbox.closed {
        return Err(DaemonFault::ConnectionClosed);
      }
      inbox = self.shared.readable.wait(inbox).unwrap();
    }
  }

  fn disconnect(&self) -> Result<(), DaemonFault> {
    let mut state = self.core.state.lock().unwrap();
    state.sessions.retain(|s| !Arc::ptr_eq(s, &self.shared));
    state
      .groups
      .retain(|_, members| {
        members.retain(|m| !Arc::ptr_eq(m, &self.shared));
        !members.is_empty()
      });
    drop(state);

    let mut inbox = self.shared.inbox.lock().unwrap();
    inbox.closed = true;
    self.shared.readable.notify_all();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn connect(daemon: &LoopbackDaemon) -> Arc<dyn DaemonSession> {
    daemon.connect("localhost", 4803).unwrap()
  }

  fn group(name: &str) -> GroupName {
    GroupName::new(name).unwrap()
  }

  #[test]
  fn private_groups_are_unique_and_well_formed() {
    let daemon = LoopbackDaemon::new();
    let a = connect(&daemon);
    let b = connect(&daemon);
    assert_ne!(a.private_group(), b.private_group());
    assert!(a.private_group().as_str().len() < MAX_GROUP_NAME);
  }

  fn payload_of(message: ReceivedMessage) -> Bytes {
    match message {
      ReceivedMessage::Regular { data, .. } => data,
      other => panic!("expected a regular message, got {other:?}"),
    }
  }

  #[test]
  fn members_of_a_group_receive_one_copy_each() {
    let daemon = LoopbackDaemon::new();
    let sender = connect(&daemon);
    let receiver = connect(&daemon);
    receiver.join(&group("a")).unwrap();
    receiver.join(&group("b")).unwrap();

    // Addressed to both groups, but the member must see a single copy;
    // the marker sent afterwards must be the next thing in the mailbox.
    sender
      .multigroup_multicast(
        ServiceType::Fifo,
        true,
        &[group("a"), group("b")],
        b"payload",
      )
      .unwrap();
    sender
      .multicast(ServiceType::Fifo, true, receiver.private_group(), b"marker")
      .unwrap();

    assert_eq!(&payload_of(receiver.receive().unwrap())[..], b"payload");
    assert_eq!(&payload_of(receiver.receive().unwrap())[..], b"marker");
  }

  #[test]
  fn self_discard_suppresses_the_echo() {
    let daemon = LoopbackDaemon::new();
    let session = connect(&daemon);
    session.join(&group("g")).unwrap();

    session
      .multicast(ServiceType::Reliable, true, &group("g"), b"quiet")
      .unwrap();
    session
      .multicast(ServiceType::Reliable, false, &group("g"), b"loud")
      .unwrap();

    // The discarded echo never arrived, so the loud one is first in line.
    assert_eq!(&payload_of(session.receive().unwrap())[..], b"loud");
  }

  #[test]
  fn private_group_addressing_reaches_exactly_one_session() {
    let daemon = LoopbackDaemon::new();
    let a = connect(&daemon);
    let b = connect(&daemon);

    a.multicast(ServiceType::Reliable, false, b.private_group(), b"direct")
      .unwrap();
    match b.receive().unwrap() {
      ReceivedMessage::Regular { sender, data, .. } => {
        assert_eq!(&sender, a.private_group());
        assert_eq!(&data[..], b"direct");
      }
      other => panic!("unexpected message {other:?}"),
    }
  }

  #[test]
  fn disconnect_wakes_a_blocked_receive() {
    let daemon = LoopbackDaemon::new();
    let session = connect(&daemon);
    let waiter = {
      let session = Arc::clone(&session);
      std::thread::spawn(move || session.receive())
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    session.disconnect().unwrap();
    assert!(matches!(
      waiter.join().unwrap(),
      Err(DaemonFault::ConnectionClosed)
    ));
    assert_eq!(daemon.session_count(), 0);
  }

  #[test]
  fn operations_on_a_closed_session_report_illegal_session() {
    let daemon = LoopbackDaemon::new();
    let session = connect(&daemon);
    session.disconnect().unwrap();
    assert!(matches!(
      session.join(&group("g")),
      Err(DaemonFault::IllegalSession)
    ));
    assert!(matches!(
      session.multicast(ServiceType::Reliable, true, &group("g"), b""),
      Err(DaemonFault::IllegalSession)
    ));
  }
}
