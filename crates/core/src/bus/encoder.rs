//! 总线消息线上编码
//!
//! 二进制格式：定长 bus id | 1 字节类型 | 若干 (4 字节大端长度 + UTF-8 键)

use std::sync::Arc;

use strata_common::DEFAULT_BUS_ID_WIDTH;
use strata_config::BusEncoding;
use strata_errors::{CacheError, CacheResult};
use strata_ports::{BusEncoder, BusMessage, BusMessageType};

const TYPE_SET: u8 = 0x01;
const TYPE_DELETE: u8 = 0x02;
const TYPE_CLEAR: u8 = 0x03;

/// 按配置选择编码器
pub fn encoder_for(encoding: BusEncoding, id_width: usize) -> Arc<dyn BusEncoder> {
    match encoding {
        BusEncoding::Json => Arc::new(JsonEncoder),
        BusEncoding::Binary => Arc::new(BinaryEncoder::new(id_width)),
    }
}

/// JSON 文本编码
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl BusEncoder for JsonEncoder {
    fn encode(&self, message: &BusMessage) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, payload: &[u8]) -> CacheResult<BusMessage> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// 紧凑二进制编码
#[derive(Debug, Clone, Copy)]
pub struct BinaryEncoder {
    id_width: usize,
}

impl BinaryEncoder {
    pub fn new(id_width: usize) -> Self {
        Self { id_width }
    }

    pub fn id_width(&self) -> usize {
        self.id_width
    }
}

impl Default for BinaryEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_ID_WIDTH)
    }
}

impl BusEncoder for BinaryEncoder {
    fn encode(&self, message: &BusMessage) -> CacheResult<Vec<u8>> {
        if message.bus_id.len() != self.id_width {
            return Err(CacheError::bus(format!(
                "Bus id '{}' must be exactly {} bytes",
                message.bus_id, self.id_width
            )));
        }

        let keys_len: usize = message.keys.iter().map(|k| 4 + k.len()).sum();
        let mut buf = Vec::with_capacity(self.id_width + 1 + keys_len);
        buf.extend_from_slice(message.bus_id.as_bytes());
        buf.push(match message.message_type {
            BusMessageType::Set => TYPE_SET,
            BusMessageType::Delete => TYPE_DELETE,
            BusMessageType::Clear => TYPE_CLEAR,
        });

        for key in &message.keys {
            let len = u32::try_from(key.len())
                .map_err(|_| CacheError::bus(format!("Key too long to encode: {} bytes", key.len())))?;
            buf.extend_from_slice(&len.to_be_bytes());
            buf.extend_from_slice(key.as_bytes());
        }

        Ok(buf)
    }

    fn decode(&self, payload: &[u8]) -> CacheResult<BusMessage> {
        if payload.len() < self.id_width + 1 {
            return Err(CacheError::bus(format!(
                "Bus payload too short: {} bytes",
                payload.len()
            )));
        }

        let bus_id = std::str::from_utf8(&payload[..self.id_width])
            .map_err(|e| CacheError::bus(format!("Invalid bus id: {}", e)))?
            .to_string();

        let message_type = match payload[self.id_width] {
            TYPE_SET => BusMessageType::Set,
            TYPE_DELETE => BusMessageType::Delete,
            TYPE_CLEAR => BusMessageType::Clear,
            other => {
                return Err(CacheError::bus(format!(
                    "Unknown bus message type: {:#04x}",
                    other
                )));
            }
        };

        let mut keys = Vec::new();
        let mut rest = &payload[self.id_width + 1..];
        while !rest.is_empty() {
            let (len_bytes, tail) = rest
                .split_first_chunk::<4>()
                .ok_or_else(|| CacheError::bus("Truncated key length"))?;
            let len = u32::from_be_bytes(*len_bytes) as usize;
            if tail.len() < len {
                return Err(CacheError::bus(format!(
                    "Truncated key: expected {} bytes, got {}",
                    len,
                    tail.len()
                )));
            }
            let (key, tail) = tail.split_at(len);
            let key = std::str::from_utf8(key)
                .map_err(|e| CacheError::bus(format!("Invalid key: {}", e)))?;
            keys.push(key.to_string());
            rest = tail;
        }

        Ok(BusMessage {
            bus_id,
            message_type,
            keys,
        })
    }
}
