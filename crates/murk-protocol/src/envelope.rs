/// Binary envelope codec — the framing every Murk exchange travels in.
///
/// Layout:
///
/// ```text
/// [checksum: 4 bytes LE] [version: varint] [tag count: varint]
/// [tags: 1 byte each] [per message: body length varint + body]
/// ```
///
/// The checksum is CRC-32 over every byte after the checksum field. It
/// is validated first, before anything else is parsed — a frame that
/// fails it is never partially trusted. The version must fall inside
/// the supported inclusive range; the gate fires before any message
/// body is decoded. The tag header and the message list must agree
/// exactly; unknown tags fail loudly.
///
/// The encoded frame is plaintext only in the codec's eyes: the crypto
/// envelope seals the whole frame before it reaches the transport, so
/// the checksum covers ciphertext-adjacent framing, not decrypted
/// message content.
use crate::error::MurkProtocolError;
use crate::message::{Message, MessageTag};
use crate::types::{MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION, PROTOCOL_VERSION};

/// Upper bound on messages per envelope, to cap decode allocations.
const MAX_MESSAGES: u64 = 1024;

/// Encode an ordered list of messages into one framed envelope.
pub fn encode(messages: &[Message]) -> Result<Vec<u8>, MurkProtocolError> {
    encode_with_version(messages, PROTOCOL_VERSION)
}

/// Encode with an explicit version (tests and federation compat).
pub fn encode_with_version(
    messages: &[Message],
    version: u64,
) -> Result<Vec<u8>, MurkProtocolError> {
    let mut frame = Vec::with_capacity(64 + messages.len() * 32);

    // Placeholder checksum, patched below.
    frame.extend_from_slice(&[0u8; 4]);

    put_varint(&mut frame, version);
    put_varint(&mut frame, messages.len() as u64);
    for message in messages {
        frame.push(message.tag() as u8);
    }
    for message in messages {
        let body = message.encode_body()?;
        put_varint(&mut frame, body.len() as u64);
        frame.extend_from_slice(&body);
    }

    let checksum = crc32fast::hash(&frame[4..]);
    frame[..4].copy_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Decode one framed envelope into its ordered message list.
pub fn decode(frame: &[u8]) -> Result<Vec<Message>, MurkProtocolError> {
    if frame.len() < 4 {
        return Err(MurkProtocolError::Truncated);
    }
    let stored = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let computed = crc32fast::hash(&frame[4..]);
    if stored != computed {
        return Err(MurkProtocolError::ChecksumMismatch);
    }

    let mut cursor = &frame[4..];
    let version = take_varint(&mut cursor)?;
    if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
        return Err(MurkProtocolError::UnsupportedVersion {
            version,
            min: MIN_SUPPORTED_VERSION,
            max: MAX_SUPPORTED_VERSION,
        });
    }

    let count = take_varint(&mut cursor)?;
    if count > MAX_MESSAGES {
        return Err(MurkProtocolError::Deserialization(format!(
            "envelope claims {count} messages (max {MAX_MESSAGES})"
        )));
    }
    let count = count as usize;

    if cursor.len() < count {
        return Err(MurkProtocolError::Truncated);
    }
    let mut tags = Vec::with_capacity(count);
    for &raw in &cursor[..count] {
        tags.push(MessageTag::from_u8(raw)?);
    }
    cursor = &cursor[count..];

    let mut messages = Vec::with_capacity(count);
    for tag in tags {
        let length = take_varint(&mut cursor)? as usize;
        if cursor.len() < length {
            return Err(MurkProtocolError::Truncated);
        }
        let (body, rest) = cursor.split_at(length);
        messages.push(Message::decode_body(tag, body)?);
        cursor = rest;
    }

    if !cursor.is_empty() {
        return Err(MurkProtocolError::Deserialization(format!(
            "{} trailing bytes after last message",
            cursor.len()
        )));
    }
    Ok(messages)
}

// ── Varint (LEB128, unsigned) ──────────────────────────────────────────

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn take_varint(cursor: &mut &[u8]) -> Result<u64, MurkProtocolError> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = cursor.split_first().ok_or(MurkProtocolError::Truncated)?;
        *cursor = rest;
        // The tenth byte may only carry u64's last bit.
        if shift == 63 && byte & 0x7E != 0 {
            return Err(MurkProtocolError::Deserialization(
                "varint overflows u64".into(),
            ));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(MurkProtocolError::Deserialization(
        "varint too long".into(),
    ))
}
