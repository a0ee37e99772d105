//! Creation and sharing of buses and the endpoints attached to them.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, Weak},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  connector::{ConnectorConfig, InPullConnector, InPushConnector, OutConnector},
  converter::ConverterRegistry,
  error::Result,
  spread::{DaemonClient, SpreadConnection},
  wire::PoolConfig,
};

use super::Bus;

/// Hands out one shared [`Bus`] per daemon endpoint.
///
/// The factory holds only weak references: a bus lives exactly as long as
/// endpoints hold on to it, and a later request for the same endpoint
/// creates a fresh one.
pub struct BusFactory {
  client: Arc<dyn DaemonClient>,
  pool_config: PoolConfig,
  buses: Mutex<HashMap<(String, u16), Weak<Bus>>>,
}

impl BusFactory {
  pub fn new(client: Arc<dyn DaemonClient>) -> BusFactory {
    BusFactory::with_pool_config(client, PoolConfig::default())
  }

  pub fn with_pool_config(client: Arc<dyn DaemonClient>, pool_config: PoolConfig) -> BusFactory {
    BusFactory {
      client,
      pool_config,
      buses: Mutex::new(HashMap::new()),
    }
  }

  /// Returns the live bus for `host:port`, or connects, activates and
  /// registers a new one.
  pub fn obtain(&self, host: &str, port: u16) -> Result<Arc<Bus>> {
    let mut buses = self.buses.lock().unwrap();
    let key = (host.to_string(), port);

    if let Some(bus) = buses.get(&key).and_then(Weak::upgrade) {
      debug!("found existing bus for {host}:{port}");
      return Ok(bus);
    }

    debug!("creating new bus for {host}:{port}");
    let connection = Arc::new(SpreadConnection::new(self.client.clone(), host, port));
    let bus = Bus::create(connection, self.pool_config.clone(), Default::default())?;
    bus.activate()?;
    buses.insert(key, Arc::downgrade(&bus));
    Ok(bus)
  }

  pub fn create_out_connector(
    &self,
    config: &ConnectorConfig,
    converters: Arc<ConverterRegistry>,
  ) -> Result<OutConnector> {
    let bus = self.obtain(&config.host, config.port)?;
    Ok(OutConnector::new(bus, converters, config))
  }

  pub fn create_in_push_connector(
    &self,
    config: &ConnectorConfig,
    converters: Arc<ConverterRegistry>,
  ) -> Result<InPushConnector> {
    let bus = self.obtain(&config.host, config.port)?;
    Ok(InPushConnector::new(bus, converters, config))
  }

  pub fn create_in_pull_connector(
    &self,
    config: &ConnectorConfig,
    converters: Arc<ConverterRegistry>,
  ) -> Result<InPullConnector> {
    let bus = self.obtain(&config.host, config.port)?;
    Ok(InPullConnector::new(bus, converters, config))
  }
}
