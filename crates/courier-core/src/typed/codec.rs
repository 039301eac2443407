//! PayloadCodec - Message と TransportMessage の相互変換 (JSON)
//!
//! # デシリアライズフロー
//! 1. content-type header を確認（無ければ JSON とみなす）
//! 2. message-type header で registry から decoder を引く
//! 3. serde_json で具体型に戻して IncomingMessage に包む

use crate::domain::{BusError, Headers, TransportMessage, header_names};
use crate::typed::message::{IncomingMessage, Message};
use crate::typed::registry::HandlerRegistry;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode<M: Message>(&self, message: &M) -> Result<TransportMessage, BusError> {
        let body = serde_json::to_vec(message).map_err(|source| BusError::Serialization {
            message_type: M::TYPE,
            source,
        })?;
        let mut headers = Headers::new();
        headers.insert(header_names::CONTENT_TYPE, JSON_CONTENT_TYPE);
        headers.insert(header_names::MESSAGE_TYPE, M::TYPE);
        Ok(TransportMessage::new(headers, body))
    }

    pub fn decode(
        &self,
        registry: &HandlerRegistry,
        message: &TransportMessage,
    ) -> Result<IncomingMessage, BusError> {
        if let Some(content_type) = message.headers.get(header_names::CONTENT_TYPE)
            && !content_type.starts_with("application/json")
        {
            return Err(BusError::UnsupportedContentType(content_type.to_string()));
        }
        let message_type = message
            .headers
            .message_type()
            .ok_or(BusError::MissingHeader(header_names::MESSAGE_TYPE))?;

        registry
            .decode(message_type, &message.body)
            .ok_or_else(|| BusError::UnknownMessageType(message_type.to_string()))?
            .map_err(|source| BusError::Deserialization {
                message_type: message_type.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::typed::message::testing::Ping;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_message::<Ping>();
        registry
    }

    #[test]
    fn encode_sets_type_and_content_type() {
        let message = PayloadCodec.encode(&Ping { value: 1 }).unwrap();

        assert_eq!(message.headers.message_type(), Some(Ping::TYPE));
        assert_eq!(
            message.headers.get(header_names::CONTENT_TYPE),
            Some(JSON_CONTENT_TYPE)
        );
        assert_eq!(message.body, br#"{"value":1}"#.to_vec());
    }

    #[test]
    fn decode_resolves_the_registered_type() {
        let encoded = PayloadCodec.encode(&Ping { value: 42 }).unwrap();
        let incoming = PayloadCodec.decode(&registry(), &encoded).unwrap();

        assert_eq!(incoming.downcast_ref::<Ping>(), Some(&Ping { value: 42 }));
    }

    #[test]
    fn malformed_body_is_a_deserialization_error() {
        let mut encoded = PayloadCodec.encode(&Ping { value: 42 }).unwrap();
        encoded.body = b"{not json".to_vec();

        let err = PayloadCodec.decode(&registry(), &encoded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deserialization);
        assert!(matches!(err, BusError::Deserialization { .. }));
    }

    #[test]
    fn unknown_type_and_foreign_content_type_are_rejected() {
        let mut encoded = PayloadCodec.encode(&Ping { value: 1 }).unwrap();
        let err = PayloadCodec.decode(&HandlerRegistry::new(), &encoded).unwrap_err();
        assert!(matches!(err, BusError::UnknownMessageType(t) if t == Ping::TYPE));

        encoded
            .headers
            .insert(header_names::CONTENT_TYPE, "application/x-protobuf");
        let err = PayloadCodec.decode(&registry(), &encoded).unwrap_err();
        assert!(matches!(err, BusError::UnsupportedContentType(_)));
    }
}
