//! Splitting serialized events into daemon-sized fragments.

use crate::{
  error::{Error, Result},
  event::EventId,
};

use super::notification::{FragmentHeader, WireFragment};

/// Floor on the payload space every fragment must leave after its header.
pub const MIN_DATA_SPACE: usize = 5;

/// Produces the fragments that carry `payload` for one event, each with a
/// serialized size of at most `max_fragment_size`.
///
/// Fragment 0 carries the full header; later fragments only the event-id
/// stub, which frees most of their budget for payload. An empty payload
/// still yields one fragment, so subscribers see the event.
pub fn fragment_event(
  event_id: EventId,
  header: FragmentHeader,
  payload: &[u8],
  max_fragment_size: usize,
) -> Result<Vec<WireFragment>> {
  let mut fragments = Vec::new();
  let mut offset = 0;
  loop {
    let part = fragments.len() as u32;
    let mut fragment = WireFragment {
      event_id,
      data_part: part,
      // Fixed up below once the final count is known; the u32 wire width
      // keeps the fragment size independent of the value.
      num_data_parts: 1,
      header: if part == 0 { Some(header.clone()) } else { None },
      data: Vec::new(),
    };

    let header_size = fragment.to_wire()?.len();
    if header_size >= max_fragment_size.saturating_sub(MIN_DATA_SPACE) {
      return Err(Error::Protocol(
        "event meta-data too big for fragmentation".to_string(),
      ));
    }

    let chunk = (max_fragment_size - header_size).min(payload.len() - offset);
    fragment.data = payload[offset..offset + chunk].to_vec();
    offset += chunk;
    fragments.push(fragment);

    if offset >= payload.len() {
      break;
    }
  }

  let count = fragments.len() as u32;
  for fragment in &mut fragments {
    fragment.num_data_parts = count;
  }
  Ok(fragments)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::SenderId;

  fn header() -> FragmentHeader {
    FragmentHeader {
      scope: "/fragmentation/test/".to_string(),
      wire_schema: "bytes".to_string(),
      create_time: Some(1),
      send_time: Some(2),
      causes: vec![],
    }
  }

  fn event_id() -> EventId {
    EventId::new(SenderId::from_bytes([3; 16]), 21)
  }

  fn join(fragments: &[WireFragment]) -> Vec<u8> {
    fragments.iter().flat_map(|f| f.data.clone()).collect()
  }

  #[test]
  fn small_payloads_yield_a_single_full_fragment() {
    let fragments = fragment_event(event_id(), header(), b"hello", 100_000).unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].data_part, 0);
    assert_eq!(fragments[0].num_data_parts, 1);
    assert!(fragments[0].header.is_some());
    assert_eq!(fragments[0].data, b"hello");
  }

  #[test]
  fn empty_payloads_still_produce_a_fragment() {
    let fragments = fragment_event(event_id(), header(), b"", 100_000).unwrap();
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].data.is_empty());
  }

  #[test]
  fn large_payloads_split_into_three_bounded_parts() {
    let payload = vec![0x5a; 250_000];
    let fragments = fragment_event(event_id(), header(), &payload, 100_000).unwrap();

    assert_eq!(fragments.len(), 3);
    for (index, fragment) in fragments.iter().enumerate() {
      assert_eq!(fragment.data_part, index as u32);
      assert_eq!(fragment.num_data_parts, 3);
      assert_eq!(fragment.event_id, event_id());
      assert_eq!(fragment.header.is_some(), index == 0);
      assert!(fragment.to_wire().unwrap().len() <= 100_000);
    }
    assert_eq!(join(&fragments), payload);
  }

  #[test]
  fn later_fragments_carry_more_payload_than_the_first() {
    let payload = vec![1; 300_000];
    let fragments = fragment_event(event_id(), header(), &payload, 100_000).unwrap();
    assert!(fragments[1].data.len() > fragments[0].data.len());
    assert_eq!(join(&fragments), payload);
  }

  #[test]
  fn oversized_meta_data_is_rejected() {
    let mut fat = header();
    fat.scope = format!("/{}/", "x".repeat(120));
    let result = fragment_event(event_id(), fat, b"payload", 128);
    match result {
      Err(Error::Protocol(message)) => assert!(message.contains("meta-data too big")),
      other => panic!("expected a protocol error, got {other:?}"),
    }
  }
}
