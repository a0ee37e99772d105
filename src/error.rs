//! Error taxonomy of the transport and the error-strategy policy applied
//! where failures cannot be propagated to a caller.

use std::str::FromStr;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::converter::ConverterError;

pub type Result<T> = std::result::Result<T, Error>;

/// Classified reasons the daemon may refuse a new session.
///
/// These mirror the connect status codes of the daemon client library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFault {
  #[error("daemon unreachable, check host and port")]
  Unreachable,
  #[error("socket error while contacting the daemon")]
  SocketError,
  #[error("communication errors occurred during connection setup")]
  ConnectionClosed,
  #[error("daemon or client library version mismatch")]
  VersionMismatch,
  #[error("protocol error during connection setup")]
  ProtocolError,
  #[error("private name violated length or character requirements")]
  IllegalName,
  #[error("private name is not unique on this daemon")]
  NameNotUnique,
  #[error("daemon connection quota exhausted")]
  QuotaExceeded,
  #[error("daemon rejected the authentication attempt")]
  AuthRejected,
}

/// Classified I/O failures on an established daemon session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonFault {
  #[error("the session given to the operation was illegal")]
  IllegalSession,
  #[error("the message had an illegal structure")]
  IllegalMessage,
  #[error("the group name was illegal")]
  IllegalGroup,
  #[error("communication errors occurred during the operation")]
  ConnectionClosed,
  #[error("the groups array cannot hold the full destination list")]
  GroupsTooShort,
  #[error("the receive buffer cannot hold the full message")]
  BufferTooShort,
  #[error("message of {size} bytes exceeds the daemon limit of {limit} bytes")]
  MessageTooLong { size: usize, limit: usize },
}

#[derive(Debug, Clone, Error)]
pub enum Error {
  /// The daemon refused or failed the connection attempt.
  #[error("connecting to {url} failed: {fault}")]
  Connect {
    url: String,
    #[source]
    fault: ConnectFault,
  },

  /// I/O failure on an established daemon session.
  #[error("daemon communication error: {0}")]
  Daemon(#[from] DaemonFault),

  /// Malformed or inconsistent notification data on the wire.
  #[error("protocol error: {0}")]
  Protocol(String),

  #[error(transparent)]
  Converter(#[from] ConverterError),

  /// An operation was attempted in the wrong lifecycle state.
  #[error("illegal state: {0}")]
  IllegalState(&'static str),

  /// A configuration value outside its valid domain.
  #[error("{0}")]
  Domain(String),

  #[error("unsupported quality of service: {0}")]
  UnsupportedQos(String),

  /// Internal control-flow signal raised when a blocking receive is
  /// interrupted via a self-addressed message. Never surfaced to sinks.
  #[error("receive interrupted")]
  Cancelled,
}

/// What to do with an error that has no caller to propagate to, e.g. a
/// deserialization failure on the receive path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
  /// Record the error in the log and continue.
  #[default]
  Log,
  /// Write the error to standard error and continue.
  Print,
  /// Log the error as fatal and terminate the process.
  Exit,
}

impl FromStr for ErrorStrategy {
  type Err = Error;

  fn from_str(s: &str) -> Result<ErrorStrategy> {
    match s {
      "log" => Ok(ErrorStrategy::Log),
      "print" => Ok(ErrorStrategy::Print),
      "exit" => Ok(ErrorStrategy::Exit),
      other => Err(Error::Domain(format!("unknown error strategy {other:?}"))),
    }
  }
}

/// Applies `strategy` to an error raised while `context`.
///
/// `continue_description` and `abort_description` tell the reader what
/// happens next under the continuing and terminating strategies.
pub(crate) fn report_error(
  strategy: ErrorStrategy,
  context: &str,
  error: &Error,
  continue_description: &str,
  abort_description: &str,
) {
  match strategy {
    ErrorStrategy::Log => {
      error!("error {context}: {error}. {continue_description}");
    }
    ErrorStrategy::Print => {
      eprintln!("Error {context}: {error}\n{continue_description}");
    }
    ErrorStrategy::Exit => {
      error!("error {context}: {error}. {abort_description}");
      std::process::exit(1);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_strategy_parses_known_names() {
    assert_eq!("log".parse::<ErrorStrategy>().unwrap(), ErrorStrategy::Log);
    assert_eq!("print".parse::<ErrorStrategy>().unwrap(), ErrorStrategy::Print);
    assert_eq!("exit".parse::<ErrorStrategy>().unwrap(), ErrorStrategy::Exit);
    assert!("abort".parse::<ErrorStrategy>().is_err());
  }

  #[test]
  fn connect_fault_is_carried_as_source() {
    let error = Error::Connect {
      url: "spread://localhost:4803".to_string(),
      fault: ConnectFault::VersionMismatch,
    };
    let rendered = error.to_string();
    assert!(rendered.contains("spread://localhost:4803"));
    assert!(rendered.contains("version mismatch"));
  }
}
