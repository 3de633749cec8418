//! Wire codec for [`Message`]
//!
//! Frame layout (little endian):
//!
//! ```text
//! +-------+---------+------+----------------------------------------------+
//! | magic | version | type | id | sender | recipient | expiry | headers | body |
//! |  u16  |   u8    |  u8  |            length-prefixed fields            |
//! +-------+---------+------+----------------------------------------------+
//! ```
//!
//! Strings and byte blobs are `u32` length followed by the data. Optional
//! values carry a one byte presence flag.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{ApplicationError, Error, Result};
use crate::message::*;
use crate::types::ParticipantId;

/// Frame magic ("IL")
pub const FRAME_MAGIC: u16 = 0x4C49;

/// Current frame version
pub const FRAME_VERSION: u8 = 1;

const OUTCOME_RESPONSE: u8 = 0;
const OUTCOME_APPLICATION_ERROR: u8 = 1;
const OUTCOME_FAILURE: u8 = 2;

/// Serialization collaborator
pub trait MessageCodec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Bytes>;
    fn decode(&self, data: &[u8]) -> Result<Message>;
}

/// Default length-prefixed binary codec
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl MessageCodec for BinaryCodec {
    fn encode(&self, message: &Message) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_u16_le(FRAME_MAGIC);
        buf.put_u8(FRAME_VERSION);
        buf.put_u8(message.message_type() as u8);
        put_str(&mut buf, &message.id)?;
        put_str(&mut buf, message.sender.as_str())?;
        put_str(&mut buf, &message.recipient)?;
        buf.put_u64_le(message.expiry_ms);
        put_map(&mut buf, &message.headers)?;
        encode_payload(&mut buf, &message.payload)?;
        Ok(buf.freeze())
    }

    fn decode(&self, data: &[u8]) -> Result<Message> {
        let mut reader = Reader::new(data);
        let magic = reader.u16()?;
        if magic != FRAME_MAGIC {
            return Err(Error::Serialization(format!("bad frame magic {:#06x}", magic)));
        }
        let version = reader.u8()?;
        if version != FRAME_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported frame version {}",
                version
            )));
        }
        let raw_type = reader.u8()?;
        let message_type = MessageType::from_u8(raw_type)
            .ok_or_else(|| Error::Serialization(format!("unknown message type {}", raw_type)))?;

        let id = reader.string()?;
        let sender = ParticipantId::new(reader.string()?);
        let recipient = reader.string()?;
        let expiry_ms = reader.u64()?;
        let headers = reader.map()?;
        let payload = decode_payload(&mut reader, message_type)?;

        if reader.has_remaining() {
            return Err(Error::Serialization(format!(
                "{} trailing bytes after message",
                reader.remaining()
            )));
        }

        Ok(Message {
            id,
            sender,
            recipient,
            expiry_ms,
            headers,
            payload,
        })
    }
}

fn encode_payload(buf: &mut BytesMut, payload: &Payload) -> Result<()> {
    match payload {
        Payload::Request(request) => {
            put_str(buf, &request.request_reply_id)?;
            put_str(buf, &request.method_name)?;
            put_str_list(buf, &request.param_datatypes)?;
            put_bytes(buf, &request.params)?;
            put_opt_str(buf, request.stateless_method_id.as_deref())?;
        }
        Payload::OneWay(request) => {
            put_str(buf, &request.method_name)?;
            put_str_list(buf, &request.param_datatypes)?;
            put_bytes(buf, &request.params)?;
        }
        Payload::Reply(reply) => {
            put_str(buf, &reply.request_reply_id)?;
            put_opt_str(buf, reply.stateless_method_id.as_deref())?;
            put_opt_str(buf, reply.request_message_id.as_deref())?;
            match &reply.outcome {
                ReplyOutcome::Response(response) => {
                    buf.put_u8(OUTCOME_RESPONSE);
                    put_bytes(buf, response)?;
                }
                ReplyOutcome::ApplicationError(error) => {
                    buf.put_u8(OUTCOME_APPLICATION_ERROR);
                    put_str(buf, &error.enumeration)?;
                    put_str(buf, &error.value)?;
                    put_opt_str(buf, error.message.as_deref())?;
                }
                ReplyOutcome::Failure(reason) => {
                    buf.put_u8(OUTCOME_FAILURE);
                    put_str(buf, reason)?;
                }
            }
        }
        Payload::SubscriptionRequest(request) => {
            put_str(buf, &request.subscription_id)?;
            put_str(buf, &request.name)?;
            put_qos(buf, &request.qos);
            match &request.variant {
                SubscriptionVariant::Attribute => {}
                SubscriptionVariant::Broadcast { filter_parameters } => {
                    put_map(buf, filter_parameters)?;
                }
                SubscriptionVariant::Multicast {
                    multicast_id,
                    partitions,
                } => {
                    put_str(buf, multicast_id)?;
                    put_str_list(buf, partitions)?;
                }
            }
        }
        Payload::SubscriptionReply(reply) => {
            put_str(buf, &reply.subscription_id)?;
            put_opt_str(buf, reply.error.as_deref())?;
        }
        Payload::SubscriptionStop(stop) => {
            put_str(buf, &stop.subscription_id)?;
        }
        Payload::Publication(publication) => {
            put_str(buf, &publication.subscription_id)?;
            match &publication.value {
                Ok(value) => {
                    buf.put_u8(OUTCOME_RESPONSE);
                    put_bytes(buf, value)?;
                }
                Err(reason) => {
                    buf.put_u8(OUTCOME_FAILURE);
                    put_str(buf, reason)?;
                }
            }
        }
        Payload::Multicast(publication) => {
            put_str(buf, &publication.multicast_id)?;
            put_bytes(buf, &publication.values)?;
        }
    }
    Ok(())
}

fn decode_payload(reader: &mut Reader<'_>, message_type: MessageType) -> Result<Payload> {
    let payload = match message_type {
        MessageType::Request => Payload::Request(Request {
            request_reply_id: reader.string()?,
            method_name: reader.string()?,
            param_datatypes: reader.string_list()?,
            params: reader.bytes()?,
            stateless_method_id: reader.opt_string()?,
        }),
        MessageType::OneWay => Payload::OneWay(OneWayRequest {
            method_name: reader.string()?,
            param_datatypes: reader.string_list()?,
            params: reader.bytes()?,
        }),
        MessageType::Reply => {
            let request_reply_id = reader.string()?;
            let stateless_method_id = reader.opt_string()?;
            let request_message_id = reader.opt_string()?;
            let outcome = match reader.u8()? {
                OUTCOME_RESPONSE => ReplyOutcome::Response(reader.bytes()?),
                OUTCOME_APPLICATION_ERROR => {
                    let enumeration = reader.string()?;
                    let value = reader.string()?;
                    let message = reader.opt_string()?;
                    ReplyOutcome::ApplicationError(ApplicationError {
                        enumeration,
                        value,
                        message,
                    })
                }
                OUTCOME_FAILURE => ReplyOutcome::Failure(reader.string()?),
                tag => {
                    return Err(Error::Serialization(format!("unknown reply outcome {}", tag)))
                }
            };
            Payload::Reply(Reply {
                request_reply_id,
                stateless_method_id,
                request_message_id,
                outcome,
            })
        }
        MessageType::SubscriptionRequest
        | MessageType::BroadcastSubscriptionRequest
        | MessageType::MulticastSubscriptionRequest => {
            let subscription_id = reader.string()?;
            let name = reader.string()?;
            let qos = reader.qos()?;
            let variant = match message_type {
                MessageType::BroadcastSubscriptionRequest => SubscriptionVariant::Broadcast {
                    filter_parameters: reader.map()?,
                },
                MessageType::MulticastSubscriptionRequest => SubscriptionVariant::Multicast {
                    multicast_id: reader.string()?,
                    partitions: reader.string_list()?,
                },
                _ => SubscriptionVariant::Attribute,
            };
            Payload::SubscriptionRequest(SubscriptionRequest {
                subscription_id,
                name,
                qos,
                variant,
            })
        }
        MessageType::SubscriptionReply => Payload::SubscriptionReply(SubscriptionReply {
            subscription_id: reader.string()?,
            error: reader.opt_string()?,
        }),
        MessageType::SubscriptionStop => Payload::SubscriptionStop(SubscriptionStop {
            subscription_id: reader.string()?,
        }),
        MessageType::Publication => {
            let subscription_id = reader.string()?;
            let value = match reader.u8()? {
                OUTCOME_RESPONSE => Ok(reader.bytes()?),
                OUTCOME_FAILURE => Err(reader.string()?),
                tag => {
                    return Err(Error::Serialization(format!(
                        "unknown publication outcome {}",
                        tag
                    )))
                }
            };
            Payload::Publication(Publication {
                subscription_id,
                value,
            })
        }
        MessageType::Multicast => Payload::Multicast(MulticastPublication {
            multicast_id: reader.string()?,
            values: reader.bytes()?,
        }),
    };
    Ok(payload)
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Serialization(format!("field of {} bytes too large", len)))?;
    buf.put_u32_le(len);
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    put_len(buf, data.len())?;
    buf.put_slice(data);
    Ok(())
}

fn put_str(buf: &mut BytesMut, value: &str) -> Result<()> {
    put_bytes(buf, value.as_bytes())
}

fn put_opt_str(buf: &mut BytesMut, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_str(buf, value)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

fn put_str_list(buf: &mut BytesMut, values: &[String]) -> Result<()> {
    put_len(buf, values.len())?;
    for value in values {
        put_str(buf, value)?;
    }
    Ok(())
}

fn put_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) -> Result<()> {
    put_len(buf, map.len())?;
    for (key, value) in map {
        put_str(buf, key)?;
        put_str(buf, value)?;
    }
    Ok(())
}

fn put_qos(buf: &mut BytesMut, qos: &SubscriptionQos) {
    buf.put_u64_le(qos.min_interval.as_millis() as u64);
    match qos.expiry_ms {
        Some(expiry) => {
            buf.put_u8(1);
            buf.put_u64_le(expiry);
        }
        None => buf.put_u8(0),
    }
    match qos.alert_after_interval {
        Some(interval) => {
            buf.put_u8(1);
            buf.put_u64_le(interval.as_millis() as u64);
        }
        None => buf.put_u8(0),
    }
    buf.put_u64_le(qos.publication_ttl.as_millis() as u64);
}

/// Bounds-checked reader over a frame
struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn has_remaining(&self) -> bool {
        self.cursor.has_remaining()
    }

    fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn need(&self, len: usize, what: &str) -> Result<()> {
        if self.cursor.remaining() < len {
            return Err(Error::Serialization(format!(
                "truncated frame: {} needs {} bytes, {} left",
                what,
                len,
                self.cursor.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.cursor.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2, "u16")?;
        Ok(self.cursor.get_u16_le())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.cursor.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.cursor.get_u64_le())
    }

    fn flag(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Serialization(format!("invalid presence flag {}", other))),
        }
    }

    fn bytes(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.need(len, "blob")?;
        Ok(self.cursor.copy_to_bytes(len))
    }

    fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::Serialization(format!("invalid utf-8 string: {}", e)))
    }

    fn opt_string(&mut self) -> Result<Option<String>> {
        if self.flag()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    fn string_list(&mut self) -> Result<Vec<String>> {
        let count = self.u32()? as usize;
        // every entry needs at least its length prefix
        self.need(count.saturating_mul(4), "string list")?;
        (0..count).map(|_| self.string()).collect()
    }

    fn map(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.u32()? as usize;
        self.need(count.saturating_mul(8), "map")?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.string()?;
            let value = self.string()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn qos(&mut self) -> Result<SubscriptionQos> {
        let min_interval = Duration::from_millis(self.u64()?);
        let expiry_ms = if self.flag()? { Some(self.u64()?) } else { None };
        let alert_after_interval = if self.flag()? {
            Some(Duration::from_millis(self.u64()?))
        } else {
            None
        };
        let publication_ttl = Duration::from_millis(self.u64()?);
        Ok(SubscriptionQos {
            min_interval,
            expiry_ms,
            alert_after_interval,
            publication_ttl,
        })
    }
}
