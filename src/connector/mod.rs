//! Participant-facing endpoints onto a bus.

use std::collections::HashMap;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
  converter::ConverterRegistry,
  error::{Error, ErrorStrategy, Result},
  event::Event,
  qos::QosSpec,
  spread::{DEFAULT_HOST, DEFAULT_MAX_FRAGMENT_SIZE, DEFAULT_PORT},
  wire::Notification,
};

pub mod in_pull;
pub mod in_push;
pub mod out;

pub use in_pull::InPullConnector;
pub use in_push::{EventHandler, InPushConnector};
pub use out::OutConnector;

/// Per-participant transport options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
  pub host: String,
  pub port: u16,
  pub max_fragment_size: usize,
  pub qos: QosSpec,
  pub error_strategy: ErrorStrategy,
}

impl Default for ConnectorConfig {
  fn default() -> ConnectorConfig {
    ConnectorConfig {
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
      max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
      qos: QosSpec::default(),
      error_strategy: ErrorStrategy::default(),
    }
  }
}

impl ConnectorConfig {
  /// Parses the string-keyed option table of a participant configuration.
  /// Unknown keys are ignored with a warning, so shared configurations
  /// may carry options of other transports.
  pub fn from_properties(properties: &HashMap<String, String>) -> Result<ConnectorConfig> {
    let mut config = ConnectorConfig::default();
    for (key, value) in properties {
      match key.as_str() {
        "host" => config.host = value.clone(),
        "port" => {
          config.port = value
            .parse()
            .map_err(|_| Error::Domain(format!("invalid port {value:?}")))?;
        }
        "maxfragmentsize" => {
          config.max_fragment_size = value
            .parse()
            .map_err(|_| Error::Domain(format!("invalid fragment size {value:?}")))?;
        }
        "ordering" => config.qos.ordering = value.parse()?,
        "reliability" => config.qos.reliability = value.parse()?,
        "errorstrategy" => config.error_strategy = value.parse()?,
        other => warn!("ignoring unknown transport option {other:?}"),
      }
    }
    Ok(config)
  }
}

/// Rebuilds an application event from a notification, stamping the
/// receive time.
pub(crate) fn notification_to_event(
  converters: &ConverterRegistry,
  notification: &Notification,
) -> Result<Event> {
  let converter = converters.deserializer_for(&notification.wire_schema)?;
  let (data_type, data) = converter.deserialize(&notification.wire_schema, &notification.data)?;

  let mut meta = notification.meta;
  meta.stamp_receive_time();
  Ok(Event {
    id: Some(notification.event_id),
    scope: notification.scope.clone(),
    data,
    data_type,
    meta,
    causes: notification.causes.clone(),
  })
}
