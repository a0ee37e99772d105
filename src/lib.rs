//! Scoped publish/subscribe event bus transport over a Spread-style group
//! communication daemon.
//!
//! Events are published on hierarchical [`Scope`]s and delivered to every
//! subscriber whose scope is a prefix of the published scope. The daemon
//! contributes ordered, reliable multicast to named groups; this crate
//! maps scopes onto daemon groups, fragments payloads that exceed the
//! daemon's per-message limit and reassembles them on arrival, and
//! multiplexes all endpoints of a process over one daemon connection per
//! endpoint address.
//!
//! # Architecture
//!
//! * A [`bus::Bus`] owns one daemon connection, the reference-counted
//!   group memberships and the receive thread, and dispatches
//!   notifications to local sinks by scope prefix. Buses are shared: the
//!   [`bus::BusFactory`] hands out one per `(host, port)`.
//! * Connectors are the participant-facing endpoints:
//!   [`connector::OutConnector`] publishes, [`connector::InPushConnector`]
//!   pushes received events into handlers, [`connector::InPullConnector`]
//!   queues them until the participant asks.
//! * [`converter::Converter`]s translate between typed payloads and
//!   tagged byte strings on the wire.
//! * The daemon itself stays behind the [`spread::DaemonClient`] seam.
//!   [`spread::LoopbackDaemon`] is an in-process implementation for tests
//!   and single-process wiring; bindings to a real daemon implement the
//!   same traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use spreadbus::{
//!   bus::BusFactory,
//!   connector::{ConnectorConfig, EventHandler},
//!   converter::ConverterRegistry,
//!   event::Event,
//!   scope::Scope,
//!   spread::LoopbackDaemon,
//! };
//!
//! struct Printer;
//!
//! impl EventHandler for Printer {
//!   fn handle(&self, event: Event) {
//!     println!("{}: {:?}", event.scope, event.data.downcast_ref::<String>());
//!   }
//! }
//!
//! fn main() -> spreadbus::Result<()> {
//!   let factory = BusFactory::new(Arc::new(LoopbackDaemon::new()));
//!   let converters = Arc::new(ConverterRegistry::with_default_converters());
//!   let config = ConnectorConfig::default();
//!
//!   let mut subscriber = factory.create_in_push_connector(&config, converters.clone())?;
//!   subscriber.set_scope(Scope::new("/sensors/")?)?;
//!   subscriber.add_handler(Arc::new(Printer));
//!   subscriber.activate()?;
//!
//!   let mut publisher = factory.create_out_connector(&config, converters)?;
//!   publisher.activate()?;
//!
//!   let mut event = Event::new(
//!     Scope::new("/sensors/door/")?,
//!     Arc::new("open".to_string()),
//!     "string",
//!   );
//!   publisher.handle(&mut event)?;
//!   Ok(())
//! }
//! ```

pub mod bus;
pub mod connector;
pub mod converter;
pub mod error;
pub mod event;
pub mod qos;
pub mod scope;
pub mod spread;
pub mod wire;

pub use crate::{
  bus::{Bus, BusFactory},
  connector::{ConnectorConfig, EventHandler, InPullConnector, InPushConnector, OutConnector},
  converter::{Converter, ConverterRegistry},
  error::{Error, ErrorStrategy, Result},
  event::{Event, EventId, MetaData, Payload, SenderId},
  qos::{Ordering, QosSpec, Reliability},
  scope::Scope,
};
