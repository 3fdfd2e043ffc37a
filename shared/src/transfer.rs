//! Keyed-field wire messages.
//!
//! A [`Transfer`] is a map from string keys to primitive values plus the
//! address it is going to or came from. Its payload is the bincode form of
//! the field map. Bulk data (snapshots, map layouts, bolt lists) travels as
//! nested bincode blobs inside single fields.

use crate::MessageType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Key of the field selecting the message kind.
pub const TYPE_KEY: &str = "type";

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to encode transfer: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode transfer: {0}")]
    Decode(#[source] bincode::Error),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("field `{key}` is not {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("unknown message type {0}")]
    UnknownMessage(i64),
    #[error("transfer has no destination")]
    MissingDestination,
    #[error("transfer has no source")]
    MissingSource,
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<MessageType> for Value {
    fn from(value: MessageType) -> Self {
        Value::Int(value as i64)
    }
}

/// Where a transfer is headed (outgoing) or where it came from (incoming).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Destination(SocketAddr),
    Source(SocketAddr),
}

/// One wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    fields: BTreeMap<String, Value>,
    payload: Vec<u8>,
    route: Route,
}

impl Transfer {
    pub fn message_type(&self) -> Result<MessageType, TransferError> {
        MessageType::try_from(self.get_int(TYPE_KEY)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn require(&self, key: &str) -> Result<&Value, TransferError> {
        self.fields
            .get(key)
            .ok_or_else(|| TransferError::MissingField(key.to_string()))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, TransferError> {
        match self.require(key)? {
            Value::Int(value) => Ok(*value),
            _ => Err(wrong_type(key, "an integer")),
        }
    }

    /// Reads a float; integer fields are widened.
    pub fn get_float(&self, key: &str) -> Result<f64, TransferError> {
        match self.require(key)? {
            Value::Float(value) => Ok(*value),
            Value::Int(value) => Ok(*value as f64),
            _ => Err(wrong_type(key, "a number")),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, TransferError> {
        match self.require(key)? {
            Value::Text(value) => Ok(value),
            _ => Err(wrong_type(key, "text")),
        }
    }

    pub fn get_blob(&self, key: &str) -> Result<&[u8], TransferError> {
        match self.require(key)? {
            Value::Blob(value) => Ok(value),
            _ => Err(wrong_type(key, "a blob")),
        }
    }

    /// Decodes a nested blob written with [`TransferBuilder::add_encoded`].
    pub fn get_decoded<T: DeserializeOwned>(&self, key: &str) -> Result<T, TransferError> {
        bincode::deserialize(self.get_blob(key)?).map_err(TransferError::Decode)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        match self.route {
            Route::Destination(addr) => Some(addr),
            Route::Source(_) => None,
        }
    }

    pub fn source(&self) -> Option<SocketAddr> {
        match self.route {
            Route::Source(addr) => Some(addr),
            Route::Destination(_) => None,
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> TransferError {
    TransferError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// Stages fields and routing, then produces [`Transfer`]s.
///
/// `encode(false)` keeps the staged fields so one builder can fan the same
/// message out to several destinations; call [`cleanup`](Self::cleanup)
/// afterwards, or use [`encode_for_all`](Self::encode_for_all).
#[derive(Debug, Default)]
pub struct TransferBuilder {
    fields: BTreeMap<String, Value>,
    route: Option<Route>,
}

impl TransferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Stages `value` as a nested bincode blob.
    pub fn add_encoded<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, TransferError> {
        let blob = bincode::serialize(value).map_err(TransferError::Encode)?;
        Ok(self.add(key, blob))
    }

    pub fn set_destination(&mut self, addr: SocketAddr) -> &mut Self {
        self.route = Some(Route::Destination(addr));
        self
    }

    pub fn set_source(&mut self, addr: SocketAddr) -> &mut Self {
        self.route = Some(Route::Source(addr));
        self
    }

    /// Serializes the staged fields for the staged destination.
    pub fn encode(&mut self, reset: bool) -> Result<Transfer, TransferError> {
        let result = self.build();
        if reset {
            self.cleanup();
        }
        result
    }

    fn build(&self) -> Result<Transfer, TransferError> {
        let destination = match self.route {
            Some(Route::Destination(addr)) => addr,
            _ => return Err(TransferError::MissingDestination),
        };
        let payload = bincode::serialize(&self.fields).map_err(TransferError::Encode)?;
        Ok(Transfer {
            fields: self.fields.clone(),
            payload,
            route: Route::Destination(destination),
        })
    }

    /// One transfer per address with the staged fields, then cleans up.
    pub fn encode_for_all(
        &mut self,
        addresses: impl IntoIterator<Item = SocketAddr>,
    ) -> Result<Vec<Transfer>, TransferError> {
        let mut transfers = Vec::new();
        for addr in addresses {
            self.set_destination(addr);
            match self.encode(false) {
                Ok(transfer) => transfers.push(transfer),
                Err(e) => {
                    self.cleanup();
                    return Err(e);
                }
            }
        }
        self.cleanup();
        Ok(transfers)
    }

    /// Parses a received payload, tagging it with the staged source.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Transfer, TransferError> {
        let source = match self.route {
            Some(Route::Source(addr)) => addr,
            _ => return Err(TransferError::MissingSource),
        };
        self.cleanup();

        let fields: BTreeMap<String, Value> =
            bincode::deserialize(payload).map_err(TransferError::Decode)?;
        let transfer = Transfer {
            fields,
            payload: payload.to_vec(),
            route: Route::Source(source),
        };
        transfer.message_type()?;
        Ok(transfer)
    }

    pub fn cleanup(&mut self) {
        self.fields.clear();
        self.route = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GameState, PlayerState, Vec2};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn receive(transfer: &Transfer, from: SocketAddr) -> Transfer {
        let mut decoder = TransferBuilder::new();
        decoder.set_source(from);
        decoder.decode(transfer.payload()).unwrap()
    }

    #[test]
    fn test_encode_decode_fields() {
        let mut builder = TransferBuilder::new();
        builder
            .add(TYPE_KEY, MessageType::FireGun)
            .add("timestamp", 12.5)
            .add("x", 0.6f32)
            .add("username", "alice")
            .set_destination(addr(7654));

        let transfer = builder.encode(true).unwrap();
        assert_eq!(transfer.destination(), Some(addr(7654)));

        let received = receive(&transfer, addr(5000));
        assert_eq!(received.source(), Some(addr(5000)));
        assert_eq!(received.destination(), None);
        assert_eq!(received.message_type().unwrap(), MessageType::FireGun);
        assert_eq!(received.get_float("timestamp").unwrap(), 12.5);
        assert_eq!(received.get_str("username").unwrap(), "alice");
        assert_eq!(received.payload(), transfer.payload());
    }

    #[test]
    fn test_encode_resets_staged_fields() {
        let mut builder = TransferBuilder::new();
        builder.add(TYPE_KEY, MessageType::Hello).set_destination(addr(1));
        builder.encode(true).unwrap();

        assert!(matches!(
            builder.encode(true),
            Err(TransferError::MissingDestination)
        ));

        builder.set_destination(addr(1));
        let empty = builder.encode(true).unwrap();
        assert!(empty.get(TYPE_KEY).is_none());
    }

    #[test]
    fn test_fan_out_shares_fields() {
        let mut builder = TransferBuilder::new();
        builder
            .add(TYPE_KEY, MessageType::PlayerPickedFlag)
            .add("player", "2");

        let transfers = builder
            .encode_for_all([addr(1), addr(2), addr(3)])
            .unwrap();

        assert_eq!(transfers.len(), 3);
        for (transfer, port) in transfers.iter().zip([1, 2, 3]) {
            assert_eq!(transfer.destination(), Some(addr(port)));
            assert_eq!(transfer.payload(), transfers[0].payload());
        }

        builder.set_destination(addr(4));
        assert!(builder.encode(true).unwrap().get("player").is_none());
    }

    #[test]
    fn test_nested_blob() {
        let player = PlayerState::new("0", "alice", Vec2::new(5.0, 5.0), 10.0);
        let state = GameState::capture(10.0, [&player]);

        let mut builder = TransferBuilder::new();
        builder.add(TYPE_KEY, MessageType::GlobalState);
        builder.add_encoded("state", &state).unwrap();
        builder.set_destination(addr(9));
        let transfer = builder.encode(true).unwrap();

        let received = receive(&transfer, addr(7654));
        let decoded: GameState = received.get_decoded("state").unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_wrong_types_and_missing_fields() {
        let mut builder = TransferBuilder::new();
        builder
            .add(TYPE_KEY, MessageType::UpdateInput)
            .add("input", "+left")
            .set_destination(addr(1));
        let transfer = builder.encode(true).unwrap();

        assert!(matches!(
            transfer.get_int("input"),
            Err(TransferError::WrongType { .. })
        ));
        assert!(matches!(
            transfer.get_str("missing"),
            Err(TransferError::MissingField(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut decoder = TransferBuilder::new();
        decoder.set_source(addr(1));
        assert!(matches!(
            decoder.decode(&[0xFF, 0x01]),
            Err(TransferError::Decode(_))
        ));

        decoder.set_source(addr(1));
        assert!(decoder.decode(&[]).is_err());
    }

    #[test]
    fn test_decode_requires_known_type() {
        let mut builder = TransferBuilder::new();
        builder.add("id", "3").set_destination(addr(1));
        let untyped = builder.encode(true).unwrap();

        let mut decoder = TransferBuilder::new();
        decoder.set_source(addr(2));
        assert!(matches!(
            decoder.decode(untyped.payload()),
            Err(TransferError::MissingField(_))
        ));

        builder.add(TYPE_KEY, 250i64).set_destination(addr(1));
        let unknown = builder.encode(true).unwrap();
        decoder.set_source(addr(2));
        assert!(matches!(
            decoder.decode(unknown.payload()),
            Err(TransferError::UnknownMessage(250))
        ));
    }

    #[test]
    fn test_decode_without_source() {
        let mut decoder = TransferBuilder::new();
        assert!(matches!(
            decoder.decode(&[]),
            Err(TransferError::MissingSource)
        ));
    }
}
