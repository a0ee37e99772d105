//! The payload converter seam.
//!
//! Converters turn typed payloads into opaque byte strings tagged with a
//! wire schema, and back. The transport only ever talks to this interface;
//! applications register their own converters next to the fundamental
//! string and bytes ones.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use thiserror::Error;

use crate::event::Payload;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConverterError {
  #[error("no converter for data type {0:?}")]
  NoConverterForType(String),
  #[error("no converter for wire schema {0:?}")]
  NoConverterForSchema(String),
  #[error("serialization failed: {0}")]
  Serialization(String),
  #[error("deserialization failed: {0}")]
  Deserialization(String),
}

pub trait Converter: Send + Sync {
  /// The payload type tag this converter serializes.
  fn data_type(&self) -> &str;

  /// The schema tag written next to payloads this converter produced.
  fn wire_schema(&self) -> &str;

  fn serialize(&self, data: &Payload) -> Result<Bytes, ConverterError>;

  /// Returns the reconstructed payload together with its data type tag.
  fn deserialize(&self, wire_schema: &str, wire: &[u8]) -> Result<(String, Payload), ConverterError>;
}

/// Converts `String` payloads to and from UTF-8 bytes.
pub struct StringConverter;

impl Converter for StringConverter {
  fn data_type(&self) -> &str {
    "string"
  }

  fn wire_schema(&self) -> &str {
    "utf-8-string"
  }

  fn serialize(&self, data: &Payload) -> Result<Bytes, ConverterError> {
    let string = data
      .downcast_ref::<String>()
      .ok_or_else(|| ConverterError::Serialization("payload is not a String".to_string()))?;
    Ok(Bytes::copy_from_slice(string.as_bytes()))
  }

  fn deserialize(&self, _wire_schema: &str, wire: &[u8]) -> Result<(String, Payload), ConverterError> {
    let string = std::str::from_utf8(wire)
      .map_err(|e| ConverterError::Deserialization(format!("invalid utf-8 payload: {e}")))?;
    Ok(("string".to_string(), Arc::new(string.to_string())))
  }
}

/// Passes raw `Bytes` payloads through unchanged.
pub struct BytesConverter;

impl Converter for BytesConverter {
  fn data_type(&self) -> &str {
    "bytes"
  }

  fn wire_schema(&self) -> &str {
    "bytes"
  }

  fn serialize(&self, data: &Payload) -> Result<Bytes, ConverterError> {
    let bytes = data
      .downcast_ref::<Bytes>()
      .ok_or_else(|| ConverterError::Serialization("payload is not Bytes".to_string()))?;
    Ok(bytes.clone())
  }

  fn deserialize(&self, _wire_schema: &str, wire: &[u8]) -> Result<(String, Payload), ConverterError> {
    Ok(("bytes".to_string(), Arc::new(Bytes::copy_from_slice(wire))))
  }
}

/// Looks converters up by data type on the sending side and by wire schema
/// on the receiving side. Registering a converter replaces earlier ones
/// for the same tags.
pub struct ConverterRegistry {
  by_data_type: HashMap<String, Arc<dyn Converter>>,
  by_wire_schema: HashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
  pub fn new() -> ConverterRegistry {
    ConverterRegistry {
      by_data_type: HashMap::new(),
      by_wire_schema: HashMap::new(),
    }
  }

  /// A registry with the fundamental converters present.
  pub fn with_default_converters() -> ConverterRegistry {
    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(StringConverter));
    registry.register(Arc::new(BytesConverter));
    registry
  }

  pub fn register(&mut self, converter: Arc<dyn Converter>) {
    self
      .by_data_type
      .insert(converter.data_type().to_string(), converter.clone());
    self
      .by_wire_schema
      .insert(converter.wire_schema().to_string(), converter);
  }

  pub fn serializer_for(&self, data_type: &str) -> Result<&Arc<dyn Converter>, ConverterError> {
    self
      .by_data_type
      .get(data_type)
      .ok_or_else(|| ConverterError::NoConverterForType(data_type.to_string()))
  }

  pub fn deserializer_for(&self, wire_schema: &str) -> Result<&Arc<dyn Converter>, ConverterError> {
    self
      .by_wire_schema
      .get(wire_schema)
      .ok_or_else(|| ConverterError::NoConverterForSchema(wire_schema.to_string()))
  }
}

impl Default for ConverterRegistry {
  fn default() -> ConverterRegistry {
    ConverterRegistry::with_default_converters()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn string_converter_round_trips() {
    let converter = StringConverter;
    let payload: Payload = Arc::new("gr\u{fc}ezi".to_string());
    let wire = converter.serialize(&payload).unwrap();
    let (data_type, back) = converter.deserialize("utf-8-string", &wire).unwrap();
    assert_eq!(data_type, "string");
    assert_eq!(back.downcast_ref::<String>().unwrap(), "gr\u{fc}ezi");
  }

  #[test]
  fn string_converter_rejects_foreign_payloads_and_bad_utf8() {
    let converter = StringConverter;
    let not_a_string: Payload = Arc::new(17u32);
    assert!(matches!(
      converter.serialize(&not_a_string),
      Err(ConverterError::Serialization(_))
    ));
    assert!(matches!(
      converter.deserialize("utf-8-string", &[0xff, 0xfe]),
      Err(ConverterError::Deserialization(_))
    ));
  }

  #[test]
  fn registry_looks_up_by_both_tags() {
    let registry = ConverterRegistry::with_default_converters();
    assert_eq!(registry.serializer_for("string").unwrap().wire_schema(), "utf-8-string");
    assert_eq!(registry.deserializer_for("bytes").unwrap().data_type(), "bytes");
    assert!(matches!(
      registry.serializer_for("protobuf"),
      Err(ConverterError::NoConverterForType(_))
    ));
    assert!(matches!(
      registry.deserializer_for("image/png"),
      Err(ConverterError::NoConverterForSchema(_))
    ));
  }
}
