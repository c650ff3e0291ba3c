//! # Envelope Codec
//!
//! Turns a typed packet into a complete frame and back.
//!
//! ## Envelope Layout (before encryption)
//! ```text
//! [typeId: 16] [correlationId: 16] [bodyLength: u32 LE] [body: bodyLength] [zero padding]
//! ```
//!
//! The whole envelope is encrypted as one block when a [`CryptoProvider`] is configured,
//! then a 4-byte little-endian length prefix is put in front. The result is exactly
//! what [`StreamFramer`](crate::core::framer::StreamFramer) consumes on the other side.
//!
//! Plain envelopes shorter than [`MIN_FRAME_SIZE`] are zero-padded up to it.
//! `bodyLength` delimits the body, so the padding is invisible to decode.

use crate::config::TransportConfig;
use crate::core::framer::{LENGTH_PREFIX_SIZE, MIN_FRAME_SIZE};
use crate::core::ids::{CorrelationId, PacketId};
use crate::core::registry::{Packet, PacketPayload, TypeRegistry};
use crate::core::serialization::SerializationFormat;
use crate::crypto::CryptoProvider;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::trace;

/// typeId + correlationId + bodyLength
pub const ENVELOPE_HEADER_SIZE: usize = 16 + 16 + 4;

/// A packet ready for the outbound queue.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub packet_id: PacketId,
    pub correlation_id: CorrelationId,
    /// Length prefix plus (possibly encrypted) envelope.
    pub frame: Bytes,
}

/// A packet recovered from one frame payload.
#[derive(Clone)]
pub struct DecodedPacket {
    pub packet_id: PacketId,
    /// Name the type was registered under.
    pub name: Arc<str>,
    pub correlation_id: CorrelationId,
    pub payload: PacketPayload,
}

impl std::fmt::Debug for DecodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedPacket")
            .field("packet_id", &self.packet_id)
            .field("name", &self.name)
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

/// Stateless encoder/decoder shared by every connection of a client or server.
pub struct EnvelopeCodec {
    registry: Arc<TypeRegistry>,
    format: SerializationFormat,
    crypto: Option<Arc<dyn CryptoProvider>>,
    max_frame_size: usize,
}

impl EnvelopeCodec {
    pub fn new(
        registry: Arc<TypeRegistry>,
        format: SerializationFormat,
        crypto: Option<Arc<dyn CryptoProvider>>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            registry,
            format,
            crypto,
            max_frame_size: max_frame_size.max(MIN_FRAME_SIZE),
        }
    }

    /// Codec for the body format, crypto mode, and frame limit in `transport`.
    pub fn from_config(registry: Arc<TypeRegistry>, transport: &TransportConfig) -> Result<Self> {
        Ok(Self::new(
            registry,
            transport.body_format,
            transport.crypto.build()?,
            transport.max_frame_size,
        ))
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode `packet` into a complete frame.
    ///
    /// A fresh correlation id is assigned when `correlation_id` is `None`; a given
    /// one is written unchanged.
    pub fn encode<T: Packet>(
        &self,
        packet: &T,
        correlation_id: Option<CorrelationId>,
    ) -> Result<EncodedPacket> {
        let packet_id = self.registry.id_of::<T>()?;
        let correlation_id = correlation_id.unwrap_or_default();

        let body = self.format.serialize(packet)?;
        let body_len =
            u32::try_from(body.len()).map_err(|_| ProtocolError::OversizedPacket(body.len()))?;

        let mut envelope =
            Vec::with_capacity((ENVELOPE_HEADER_SIZE + body.len()).max(MIN_FRAME_SIZE));
        envelope.extend_from_slice(packet_id.as_bytes());
        envelope.extend_from_slice(correlation_id.as_bytes());
        envelope.extend_from_slice(&body_len.to_le_bytes());
        envelope.extend_from_slice(&body);
        if envelope.len() < MIN_FRAME_SIZE {
            envelope.resize(MIN_FRAME_SIZE, 0);
        }

        let payload = match &self.crypto {
            Some(crypto) => {
                global_metrics().encryption();
                crypto.encrypt(&envelope).inspect_err(|_| global_metrics().crypto_failure())?
            }
            None => envelope,
        };

        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(&payload);

        trace!(%packet_id, %correlation_id, frame_len = frame.len(), "Encoded packet");
        Ok(EncodedPacket {
            packet_id,
            correlation_id,
            frame: frame.freeze(),
        })
    }

    /// Decode one frame payload, as yielded by the framer (no length prefix).
    pub fn decode(&self, frame: &[u8]) -> Result<DecodedPacket> {
        let envelope: Cow<'_, [u8]> = match &self.crypto {
            Some(crypto) => {
                global_metrics().decryption();
                Cow::Owned(
                    crypto
                        .decrypt(frame)
                        .inspect_err(|_| global_metrics().crypto_failure())?,
                )
            }
            None => Cow::Borrowed(frame),
        };

        if envelope.len() < ENVELOPE_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacket(
                constants::ERR_SHORT_ENVELOPE.into(),
            ));
        }

        let mut header = &envelope[..ENVELOPE_HEADER_SIZE];
        let mut type_bytes = [0u8; 16];
        let mut correlation_bytes = [0u8; 16];
        header.copy_to_slice(&mut type_bytes);
        header.copy_to_slice(&mut correlation_bytes);
        let body_len = header.get_u32_le() as usize;

        let body = ENVELOPE_HEADER_SIZE
            .checked_add(body_len)
            .and_then(|end| envelope.get(ENVELOPE_HEADER_SIZE..end))
            .ok_or_else(|| ProtocolError::InvalidPacket(constants::ERR_BODY_OVERRUN.into()))?;

        let packet_id = PacketId::from_bytes(type_bytes);
        let correlation_id = CorrelationId::from_bytes(correlation_bytes);
        let descriptor = self.registry.descriptor(&packet_id)?;
        let payload = descriptor.decode(self.format, body)?;

        trace!(%packet_id, %correlation_id, name = descriptor.name(), "Decoded packet");
        Ok(DecodedPacket {
            packet_id,
            name: descriptor.shared_name(),
            correlation_id,
            payload,
        })
    }
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("format", &self.format)
            .field("crypto", &self.crypto.as_ref().map(|c| c.name()))
            .field("max_frame_size", &self.max_frame_size)
            .field("registered_types", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::core::framer::StreamFramer;
    use crate::crypto::SymmetricCrypto;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {}

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Chat {
        from: String,
        text: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Unlisted {
        n: u8,
    }

    fn registry() -> Arc<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        registry.register::<Ping>("Ping").unwrap();
        registry.register::<Chat>("Chat").unwrap();
        Arc::new(registry)
    }

    fn plain() -> EnvelopeCodec {
        EnvelopeCodec::new(registry(), SerializationFormat::Json, None, 4096)
    }

    fn strip_prefix(encoded: &EncodedPacket) -> &[u8] {
        &encoded.frame[LENGTH_PREFIX_SIZE..]
    }

    #[test]
    fn test_small_packet_padded_to_floor() {
        let codec = plain();
        let encoded = codec.encode(&Ping {}, None).unwrap();
        assert_eq!(strip_prefix(&encoded).len(), MIN_FRAME_SIZE);
        assert_eq!(&encoded.frame[..4], &(MIN_FRAME_SIZE as u32).to_le_bytes());

        let decoded = codec.decode(strip_prefix(&encoded)).unwrap();
        assert!(decoded.payload.downcast_ref::<Ping>().is_some());
    }

    #[test]
    fn test_correlation_id_assigned_or_preserved() {
        let codec = plain();
        let fresh = codec.encode(&Ping {}, None).unwrap();
        assert!(!fresh.correlation_id.as_uuid().is_nil());

        let fixed = CorrelationId::new();
        let encoded = codec.encode(&Ping {}, Some(fixed)).unwrap();
        assert_eq!(encoded.correlation_id, fixed);
        assert_eq!(codec.decode(strip_prefix(&encoded)).unwrap().correlation_id, fixed);
    }

    #[test]
    fn test_fields_survive_with_symmetric_crypto() {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(SymmetricCrypto::generate().unwrap());
        let codec = EnvelopeCodec::new(registry(), SerializationFormat::Json, Some(crypto), 4096);
        let chat = Chat {
            from: "ana".into(),
            text: "hello over aes".into(),
        };

        let encoded = codec.encode(&chat, None).unwrap();
        let decoded = codec.decode(strip_prefix(&encoded)).unwrap();
        assert_eq!(decoded.payload.downcast_ref::<Chat>(), Some(&chat));
        assert_eq!(&*decoded.name, "Chat");
    }

    #[test]
    fn test_unregistered_type_rejected_on_encode() {
        assert!(matches!(
            plain().encode(&Unlisted { n: 1 }, None),
            Err(ProtocolError::UnregisteredType(_))
        ));
    }

    #[test]
    fn test_unknown_id_rejected_on_decode() {
        let mut other = TypeRegistry::new();
        other.register::<Unlisted>("Unlisted").unwrap();
        let sender = EnvelopeCodec::new(Arc::new(other), SerializationFormat::Json, None, 4096);

        let encoded = sender.encode(&Unlisted { n: 3 }, None).unwrap();
        assert!(matches!(
            plain().decode(strip_prefix(&encoded)),
            Err(ProtocolError::UnknownPacketId(_))
        ));
    }

    #[test]
    fn test_malformed_envelopes_rejected() {
        let codec = plain();
        assert!(matches!(
            codec.decode(&[0u8; 20]),
            Err(ProtocolError::InvalidPacket(_))
        ));

        let encoded = codec.encode(&Ping {}, None).unwrap();
        let mut tampered = strip_prefix(&encoded).to_vec();
        tampered[32..36].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            codec.decode(&tampered),
            Err(ProtocolError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let codec = EnvelopeCodec::new(registry(), SerializationFormat::Json, None, 128);
        let chat = Chat {
            from: "x".into(),
            text: "y".repeat(200),
        };
        assert!(matches!(
            codec.encode(&chat, None),
            Err(ProtocolError::OversizedPacket(_))
        ));
    }

    #[test]
    fn test_frames_feed_the_framer() {
        let codec = plain();
        let mut wire = Vec::new();
        for i in 0..3 {
            let chat = Chat {
                from: "bo".into(),
                text: format!("line {i}"),
            };
            wire.extend_from_slice(&codec.encode(&chat, None).unwrap().frame);
        }

        let mut framer = StreamFramer::new();
        let frames = framer.resolve(&wire);
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            let decoded = codec.decode(frame).unwrap();
            let chat = decoded.payload.downcast_ref::<Chat>().unwrap();
            assert_eq!(chat.text, format!("line {i}"));
        }
    }

    #[test]
    fn test_binary_formats_roundtrip() {
        for format in [SerializationFormat::Bincode, SerializationFormat::MessagePack] {
            let codec = EnvelopeCodec::new(registry(), format, None, 4096);
            let chat = Chat {
                from: "cy".into(),
                text: format.name().into(),
            };
            let encoded = codec.encode(&chat, None).unwrap();
            let decoded = codec.decode(strip_prefix(&encoded)).unwrap();
            assert_eq!(decoded.payload.downcast_ref::<Chat>(), Some(&chat));
        }
    }
}
