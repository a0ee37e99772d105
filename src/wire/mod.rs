//! Wire framing of notifications: fragmentation on send, reassembly on
//! receive.

pub mod assembly;
pub mod fragment;
pub mod notification;

pub use assembly::{AssemblyPool, PoolConfig};
pub use fragment::{fragment_event, MIN_DATA_SPACE};
pub use notification::{FragmentHeader, Notification, OutgoingNotification, WireFragment};
