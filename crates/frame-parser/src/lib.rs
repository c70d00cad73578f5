//! Deterministic binary/delimited frame decoding.
//!
//! No I/O, no retry, no async — a pure function from schema + bytes to a
//! decoded [`gateway_protocol::GatewayValue`] or a [`ParseError`]. Frame
//! parsing either succeeds outright or fails outright; a failed parse still
//! lets its envelope continue through the pipeline tagged with the error
//! (see `gateway-core::pipeline`), it never panics or retries here.

mod checksum;
mod decode;

use gateway_protocol::{ByteOrder, ChecksumType, FieldSpec, FrameSchema, FrameType, GatewayValue};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("frame too short: need at least {needed} bytes, got {got}")]
    InsufficientLength { needed: usize, got: usize },
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
    #[error("invalid field data for '{field}': {reason}")]
    InvalidFieldData { field: String, reason: String },
    #[error("unsupported schema: {0}")]
    UnsupportedSchema(String),
}

/// Decode `data` according to `schema`, returning a `GatewayValue::Map` with
/// one key per field, in declaration order.
pub fn parse_frame(schema: &FrameSchema, data: &[u8]) -> Result<GatewayValue, ParseError> {
    schema
        .validate()
        .map_err(ParseError::UnsupportedSchema)?;

    match schema.frame_type {
        FrameType::Fixed => parse_fixed(schema, data),
        FrameType::Variable => parse_variable(schema, data),
        FrameType::Delimited => parse_delimited(schema, data),
    }
}

fn parse_fixed(schema: &FrameSchema, data: &[u8]) -> Result<GatewayValue, ParseError> {
    let total = schema.total_length.expect("validated: fixed frame has total_length");
    if data.len() < total {
        return Err(ParseError::InsufficientLength { needed: total, got: data.len() });
    }
    verify_checksum(schema, data)?;
    decode_fields(&schema.fields, data)
}

/// Variable frames carry a 2-byte big-endian length prefix giving the total
/// frame length (prefix included); fields are laid out after it using their
/// configured offsets, which are relative to the start of the frame
/// (including the 2-byte prefix).
fn parse_variable(schema: &FrameSchema, data: &[u8]) -> Result<GatewayValue, ParseError> {
    if data.len() < 2 {
        return Err(ParseError::InsufficientLength { needed: 2, got: data.len() });
    }
    let declared_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() < declared_len {
        return Err(ParseError::InsufficientLength { needed: declared_len, got: data.len() });
    }
    let frame = &data[..declared_len];
    verify_checksum(schema, frame)?;
    decode_fields(&schema.fields, frame)
}

/// Delimited frames split on `schema.delimiter` into tokens; each field's
/// `offset` selects the token index (its `length` is unused).
fn parse_delimited(schema: &FrameSchema, data: &[u8]) -> Result<GatewayValue, ParseError> {
    let delimiter = schema
        .delimiter
        .ok_or_else(|| ParseError::UnsupportedSchema("delimited frame missing delimiter".to_string()))?;
    let tokens: Vec<&[u8]> = data.split(|b| *b == delimiter).collect();
    verify_checksum(schema, data)?;

    let mut map = gateway_protocol::value::GatewayMap::new();
    for field in &schema.fields {
        let token = tokens.get(field.offset).ok_or_else(|| ParseError::InvalidFieldData {
            field: field.name.clone(),
            reason: format!("token index {} out of range ({} tokens)", field.offset, tokens.len()),
        })?;
        let text = std::str::from_utf8(token).map_err(|e| ParseError::InvalidFieldData {
            field: field.name.clone(),
            reason: e.to_string(),
        })?;
        map.insert(field.name.clone(), decode::token_to_value(field, text)?);
    }
    Ok(GatewayValue::Map(map))
}

fn verify_checksum(schema: &FrameSchema, data: &[u8]) -> Result<(), ParseError> {
    let Some(spec) = &schema.checksum else { return Ok(()) };
    if spec.checksum_type == ChecksumType::None {
        return Ok(());
    }
    let end = spec.offset.checked_add(spec.length).ok_or_else(|| ParseError::InvalidFieldData {
        field: "checksum".to_string(),
        reason: "offset+length overflow".to_string(),
    })?;
    if data.len() < end {
        return Err(ParseError::InsufficientLength { needed: end, got: data.len() });
    }
    let payload = &data[..spec.offset];
    let expected = &data[spec.offset..end];
    let computed = checksum::compute(spec.checksum_type, payload);
    if computed.as_slice() != expected {
        return Err(ParseError::ChecksumMismatch {
            expected: hex_string(expected),
            computed: hex_string(&computed),
        });
    }
    Ok(())
}

fn decode_fields(fields: &[FieldSpec], data: &[u8]) -> Result<GatewayValue, ParseError> {
    let mut map = gateway_protocol::value::GatewayMap::new();
    for field in fields {
        let end = field.offset.checked_add(field.length).ok_or_else(|| ParseError::InvalidFieldData {
            field: field.name.clone(),
            reason: "offset+length overflow".to_string(),
        })?;
        if data.len() < end {
            return Err(ParseError::InsufficientLength { needed: end, got: data.len() });
        }
        let raw = &data[field.offset..end];
        let value = decode::decode_field(field, raw)?;
        map.insert(field.name.clone(), value);
    }
    Ok(GatewayValue::Map(map))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
