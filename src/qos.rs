//! Quality-of-service requests and their mapping onto daemon service
//! classes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  spread::ServiceType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ordering {
  Unordered,
  Ordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
  Unreliable,
  Reliable,
}

/// The guarantees a participant requests for its events. The default is
/// the strongest combination, ordered and reliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QosSpec {
  pub ordering: Ordering,
  pub reliability: Reliability,
}

impl Default for QosSpec {
  fn default() -> QosSpec {
    QosSpec {
      ordering: Ordering::Ordered,
      reliability: Reliability::Reliable,
    }
  }
}

impl QosSpec {
  pub fn new(ordering: Ordering, reliability: Reliability) -> QosSpec {
    QosSpec { ordering, reliability }
  }

  /// The daemon service class that realizes this request. FIFO delivery
  /// subsumes reliability, so both ordered rows map to it.
  pub fn service_type(&self) -> ServiceType {
    match (self.ordering, self.reliability) {
      (Ordering::Unordered, Reliability::Unreliable) => ServiceType::Unreliable,
      (Ordering::Unordered, Reliability::Reliable) => ServiceType::Reliable,
      (Ordering::Ordered, Reliability::Unreliable) => ServiceType::Fifo,
      (Ordering::Ordered, Reliability::Reliable) => ServiceType::Fifo,
    }
  }

  pub fn is_reliable(&self) -> bool {
    self.reliability == Reliability::Reliable
  }
}

impl FromStr for Ordering {
  type Err = Error;

  fn from_str(s: &str) -> Result<Ordering> {
    match s {
      "unordered" => Ok(Ordering::Unordered),
      "ordered" => Ok(Ordering::Ordered),
      other => Err(Error::UnsupportedQos(format!("unknown ordering {other:?}"))),
    }
  }
}

impl FromStr for Reliability {
  type Err = Error;

  fn from_str(s: &str) -> Result<Reliability> {
    match s {
      "unreliable" => Ok(Reliability::Unreliable),
      "reliable" => Ok(Reliability::Reliable),
      other => Err(Error::UnsupportedQos(format!(
        "unknown reliability {other:?}"
      ))),
    }
  }
}
