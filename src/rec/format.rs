//! Record wire format
//!
//! A `.rec` file is a plain concatenation of self-framed records. Every record
//! is readable on its own, so a file cut off at any byte still replays as an
//! ordered stream up to the last complete record.
//!
//! ## Record Layout (little-endian)
//!
//! 1. **Magic** (2 bytes) - `0x0D 0xA4`
//! 2. **Body length** (4 bytes) - `u32`, bytes following this field
//! 3. **Body**
//!    - `data_type` `u32`
//!    - `sent_us` `i64`, `sample_us` `i64`
//!    - `sender_stamp` `u32`
//!    - `payload_len` `u32` followed by the payload
//!
//! ## Payloads
//!
//! - Image reading (`1055`): `fourcc [u8; 4]`, `width u32`, `height u32`,
//!   `data_len u32`, data
//! - Recorder command (`11`): `command u8` (1 = start, 2 = stop)

use crate::types::{
    Envelope, FourCc, IMAGE_READING_TYPE, ImageReading, RECORDER_COMMAND_TYPE, RemoteCommand,
    Timestamp,
};
use crate::{RecorderError, Result};
use tracing::trace;

pub const RECORD_MAGIC: [u8; 2] = [0x0D, 0xA4];
/// Magic plus body length.
pub const RECORD_HEADER_SIZE: usize = 6;
/// Envelope body before the payload bytes.
const ENVELOPE_FIXED_SIZE: usize = 4 + 8 + 8 + 4 + 4;
/// Image reading payload before the image bytes.
const IMAGE_FIXED_SIZE: usize = 4 + 4 + 4 + 4;
/// Bodies above this size indicate corruption, not a real frame.
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

/// Body length the record for `envelope` declares in its header.
///
/// Records above [`MAX_BODY_SIZE`] cannot be replayed and must not be written.
pub fn record_body_len(envelope: &Envelope) -> usize {
    ENVELOPE_FIXED_SIZE + envelope.payload.len()
}

/// Serialize an envelope into one framed record.
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let body_len = record_body_len(envelope);
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + body_len);

    out.extend_from_slice(&RECORD_MAGIC);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.extend_from_slice(&envelope.data_type.to_le_bytes());
    out.extend_from_slice(&envelope.sent.as_micros().to_le_bytes());
    out.extend_from_slice(&envelope.sample.as_micros().to_le_bytes());
    out.extend_from_slice(&envelope.sender_stamp.to_le_bytes());
    out.extend_from_slice(&(envelope.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&envelope.payload);

    trace!(data_type = envelope.data_type, bytes = out.len(), "Encoded record");
    out
}

/// Decode the record at the start of `data`.
///
/// Returns `Ok(None)` when `data` ends before the record does (a truncated
/// tail), otherwise the envelope and the number of bytes it occupied.
pub fn decode_envelope(data: &[u8]) -> Result<Option<(Envelope, usize)>> {
    if data.len() < RECORD_HEADER_SIZE {
        return Ok(None);
    }
    if data[..2] != RECORD_MAGIC {
        return Err(RecorderError::parse(
            "Record header",
            format!("Bad magic {:#04x} {:#04x}", data[0], data[1]),
        ));
    }

    let body_len = parse_u32_le(data, 2)? as usize;
    if body_len < ENVELOPE_FIXED_SIZE || body_len > MAX_BODY_SIZE {
        return Err(RecorderError::parse(
            "Record header",
            format!("Body length {} outside {}..={}", body_len, ENVELOPE_FIXED_SIZE, MAX_BODY_SIZE),
        ));
    }

    let total = RECORD_HEADER_SIZE + body_len;
    if data.len() < total {
        return Ok(None);
    }
    let body = &data[RECORD_HEADER_SIZE..total];

    let data_type = parse_u32_le(body, 0)?;
    let sent = Timestamp::from_micros(parse_i64_le(body, 4)?);
    let sample = Timestamp::from_micros(parse_i64_le(body, 12)?);
    let sender_stamp = parse_u32_le(body, 20)?;
    let payload_len = parse_u32_le(body, 24)? as usize;

    if ENVELOPE_FIXED_SIZE + payload_len != body_len {
        return Err(RecorderError::parse(
            "Record body",
            format!("Payload length {} does not fill body of {} bytes", payload_len, body_len),
        ));
    }

    let envelope = Envelope {
        data_type,
        sent,
        sample,
        sender_stamp,
        payload: body[ENVELOPE_FIXED_SIZE..].to_vec(),
    };
    Ok(Some((envelope, total)))
}

pub fn encode_image_reading(reading: &ImageReading) -> Vec<u8> {
    let mut out = Vec::with_capacity(IMAGE_FIXED_SIZE + reading.data.len());
    out.extend_from_slice(&reading.fourcc.0);
    out.extend_from_slice(&reading.width.to_le_bytes());
    out.extend_from_slice(&reading.height.to_le_bytes());
    out.extend_from_slice(&(reading.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&reading.data);
    out
}

pub fn decode_image_reading(payload: &[u8]) -> Result<ImageReading> {
    if payload.len() < IMAGE_FIXED_SIZE {
        return Err(RecorderError::parse(
            "Image reading",
            format!("Payload of {} bytes is shorter than {}", payload.len(), IMAGE_FIXED_SIZE),
        ));
    }
    let fourcc = FourCc([payload[0], payload[1], payload[2], payload[3]]);
    let width = parse_u32_le(payload, 4)?;
    let height = parse_u32_le(payload, 8)?;
    let data_len = parse_u32_le(payload, 12)? as usize;
    if IMAGE_FIXED_SIZE + data_len != payload.len() {
        return Err(RecorderError::parse(
            "Image reading",
            format!("Data length {} does not match payload of {} bytes", data_len, payload.len()),
        ));
    }
    Ok(ImageReading { fourcc, width, height, data: payload[IMAGE_FIXED_SIZE..].to_vec() })
}

/// Wrap an image reading into an envelope stamped with `sent` and `sample`.
pub fn image_envelope(
    reading: &ImageReading,
    sent: Timestamp,
    sample: Timestamp,
    sender_stamp: u32,
) -> Envelope {
    Envelope {
        data_type: IMAGE_READING_TYPE,
        sent,
        sample,
        sender_stamp,
        payload: encode_image_reading(reading),
    }
}

/// Wrap a recorder command into an envelope.
pub fn command_envelope(command: RemoteCommand, sent: Timestamp, sender_stamp: u32) -> Envelope {
    Envelope {
        data_type: RECORDER_COMMAND_TYPE,
        sent,
        sample: sent,
        sender_stamp,
        payload: vec![command.code()],
    }
}

/// Extract a recorder command, `Ok(None)` for envelopes of any other type.
pub fn decode_command(envelope: &Envelope) -> Result<Option<RemoteCommand>> {
    if envelope.data_type != RECORDER_COMMAND_TYPE {
        return Ok(None);
    }
    let code = *envelope
        .payload
        .first()
        .ok_or_else(|| RecorderError::parse("Recorder command", "Empty payload"))?;
    RemoteCommand::from_code(code)
        .map(Some)
        .ok_or_else(|| RecorderError::parse("Recorder command", format!("Unknown command {}", code)))
}

fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data.get(offset..offset + 4).ok_or_else(|| {
        RecorderError::parse(
            "Integer parsing",
            format!("Insufficient data for u32 at offset {} (have {})", offset, data.len()),
        )
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn parse_i64_le(data: &[u8], offset: usize) -> Result<i64> {
    let bytes = data.get(offset..offset + 8).ok_or_else(|| {
        RecorderError::parse(
            "Long integer parsing",
            format!("Insufficient data for i64 at offset {} (have {})", offset, data.len()),
        )
    })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(raw))
}
