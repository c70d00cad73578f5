use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use chrono::{DateTime, Utc};
use gateway_protocol::{ByteOrder, DataType, FieldSpec, GatewayValue};

use crate::ParseError;

fn read_int(raw: &[u8], order: ByteOrder, signed: bool) -> i64 {
    let mut buf = [0u8; 8];
    match order {
        ByteOrder::Big => buf[8 - raw.len()..].copy_from_slice(raw),
        ByteOrder::Little => buf[..raw.len()].copy_from_slice(raw),
    }
    let unsigned = match order {
        ByteOrder::Big => BigEndian::read_u64(&buf),
        ByteOrder::Little => LittleEndian::read_u64(&buf),
    };
    if signed && !raw.is_empty() {
        let bits = raw.len() * 8;
        let sign_bit = 1u64 << (bits - 1);
        if unsigned & sign_bit != 0 {
            return (unsigned as i64) - (1i64 << bits);
        }
    }
    unsigned as i64
}

fn read_float(raw: &[u8], order: ByteOrder) -> f64 {
    match (raw.len(), order) {
        (4, ByteOrder::Big) => BigEndian::read_f32(raw) as f64,
        (4, ByteOrder::Little) => LittleEndian::read_f32(raw) as f64,
        (8, ByteOrder::Big) => BigEndian::read_f64(raw),
        (8, ByteOrder::Little) => LittleEndian::read_f64(raw),
        _ => 0.0,
    }
}

/// Decode one field's raw bytes per its `data_type`/`byte_order`, applying
/// `value = raw * scale + offset_value` for numeric types.
pub fn decode_field(field: &FieldSpec, raw: &[u8]) -> Result<GatewayValue, ParseError> {
    let err = |reason: String| ParseError::InvalidFieldData { field: field.name.clone(), reason };

    match field.data_type {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let v = read_int(raw, field.byte_order, true);
            Ok(scaled(field, v as f64))
        }
        DataType::Uint8 | DataType::Uint16 | DataType::Uint32 | DataType::Uint64 => {
            let v = read_int(raw, field.byte_order, false);
            Ok(scaled(field, v as f64))
        }
        DataType::Float32 | DataType::Float64 => {
            if raw.len() != 4 && raw.len() != 8 {
                return Err(err(format!("float field must be 4 or 8 bytes, got {}", raw.len())));
            }
            Ok(scaled(field, read_float(raw, field.byte_order)))
        }
        DataType::String => {
            let trimmed = trim_trailing_nul(raw);
            let s = std::str::from_utf8(trimmed).map_err(|e| err(e.to_string()))?;
            Ok(GatewayValue::String(s.to_string()))
        }
        DataType::Bytes => Ok(GatewayValue::Bytes(raw.to_vec())),
        DataType::Boolean => Ok(GatewayValue::Bool(raw.iter().any(|b| *b != 0))),
        DataType::Timestamp => {
            let secs = read_int(raw, field.byte_order, false) as f64 * field.scale + field.offset_value;
            let dt = DateTime::<Utc>::from_timestamp(secs as i64, 0).ok_or_else(|| err("timestamp out of range".to_string()))?;
            Ok(GatewayValue::String(dt.to_rfc3339()))
        }
    }
}

fn scaled(field: &FieldSpec, raw_value: f64) -> GatewayValue {
    let value = raw_value * field.scale + field.offset_value;
    if field.scale == 1.0 && field.offset_value == 0.0 {
        GatewayValue::Int(value as i64)
    } else {
        GatewayValue::Float(value)
    }
}

fn trim_trailing_nul(raw: &[u8]) -> &[u8] {
    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &raw[..end]
}

/// Decode a delimited-frame token (already UTF-8 text) per `data_type`.
pub fn token_to_value(field: &FieldSpec, text: &str) -> Result<GatewayValue, ParseError> {
    let err = |reason: String| ParseError::InvalidFieldData { field: field.name.clone(), reason };
    match field.data_type {
        DataType::String => Ok(GatewayValue::String(text.to_string())),
        DataType::Bytes => Ok(GatewayValue::Bytes(text.as_bytes().to_vec())),
        DataType::Boolean => Ok(GatewayValue::Bool(text == "1" || text.eq_ignore_ascii_case("true"))),
        DataType::Float32 | DataType::Float64 => {
            let v: f64 = text.parse().map_err(|_| err(format!("'{text}' is not a valid float")))?;
            Ok(GatewayValue::Float(v * field.scale + field.offset_value))
        }
        DataType::Timestamp => Ok(GatewayValue::String(text.to_string())),
        _ => {
            let v: i64 = text.parse().map_err(|_| err(format!("'{text}' is not a valid integer")))?;
            Ok(scaled(field, v as f64))
        }
    }
}
