//! Protocol codec
//!
//! Encoding and decoding functions for OP_MSG frames.
//!
//! ## Wire Format
//!
//! ### Header (16 bytes, little-endian)
//! ```text
//! ┌────────────┬────────────┬────────────┬────────────┐
//! │ Length (4) │ ReqID (4)  │ RespTo (4) │ OpCode (4) │
//! └────────────┴────────────┴────────────┴────────────┘
//! ```
//!
//! ### Body
//! ```text
//! ┌───────────┬──────────┬──────────────────┬─────┬──────────────┐
//! │ Flags (4) │ Kind (1) │  Section payload │ ... │ [CRC-32C (4)]│
//! └───────────┴──────────┴──────────────────┴─────┴──────────────┘
//! ```

use bson::{Bson, Document};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DocwireError, Result};

/// Header size: length + request id + response to + opcode
pub const HEADER_SIZE: usize = 16;

/// OP_MSG opcode
pub const OP_MSG: i32 = 2013;

/// Maximum message size (48 MB)
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// Flag bit: a CRC-32C trails the message
const CHECKSUM_PRESENT: u32 = 1;

/// Section kinds
const KIND_BODY: u8 = 0;
const KIND_SEQUENCE: u8 = 1;

/// A decoded OP_MSG frame
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Identifier of this message
    pub request_id: i32,

    /// Request this message answers (0 for requests)
    pub response_to: i32,

    /// OP_MSG flag bits
    pub flags: u32,

    /// Body document; kind-1 sequences are folded in under their identifier
    pub body: Document,
}

impl Message {
    /// A request frame
    pub fn request(request_id: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to: 0,
            flags: 0,
            body,
        }
    }

    /// A reply frame answering `request_id`
    pub fn reply(request_id: i32, response_to: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to,
            flags: 0,
            body,
        }
    }
}

// =============================================================================
// Message Encoding/Decoding
// =============================================================================

/// Encode a message to bytes
///
/// Format: header (16) + flags (4) + kind 0 (1) + body document
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 5 + 64);

    // Header, length patched once the body is written
    buf.put_i32_le(0);
    buf.put_i32_le(message.request_id);
    buf.put_i32_le(message.response_to);
    buf.put_i32_le(OP_MSG);

    // Checksums are never emitted
    buf.put_u32_le(message.flags & !CHECKSUM_PRESENT);
    buf.put_u8(KIND_BODY);

    let mut writer = buf.writer();
    message.body.to_writer(&mut writer)?;
    let mut buf = writer.into_inner();

    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(DocwireError::Protocol(format!(
            "Message too large: {} bytes (max {})",
            buf.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let length = (buf.len() as i32).to_le_bytes();
    buf[..4].copy_from_slice(&length);

    Ok(buf.to_vec())
}

/// Decode a message from bytes
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < HEADER_SIZE {
        return Err(DocwireError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    // Parse header
    let mut header = &bytes[..HEADER_SIZE];
    let length = header.get_i32_le();
    let request_id = header.get_i32_le();
    let response_to = header.get_i32_le();
    let op_code = header.get_i32_le();

    if op_code != OP_MSG {
        return Err(DocwireError::Protocol(format!(
            "Unsupported opcode: {}",
            op_code
        )));
    }

    // Validate length
    if length < (HEADER_SIZE + 5) as i32 || length as usize > MAX_MESSAGE_SIZE {
        return Err(DocwireError::Protocol(format!(
            "Invalid message length: {}",
            length
        )));
    }

    let length = length as usize;
    if bytes.len() < length {
        return Err(DocwireError::Protocol(format!(
            "Incomplete message: expected {} bytes, got {}",
            length,
            bytes.len()
        )));
    }

    let mut rest = &bytes[HEADER_SIZE..length];
    let flags = rest.get_u32_le();

    // Strip the trailing checksum; it is not verified
    if flags & CHECKSUM_PRESENT != 0 {
        if rest.len() < 4 {
            return Err(DocwireError::Protocol("Missing checksum".to_string()));
        }
        rest = &rest[..rest.len() - 4];
    }

    let mut body: Option<Document> = None;
    let mut sequences: Vec<(String, Vec<Document>)> = Vec::new();

    while rest.has_remaining() {
        match rest.get_u8() {
            KIND_BODY => {
                if body.is_some() {
                    return Err(DocwireError::Protocol(
                        "Multiple body sections".to_string(),
                    ));
                }
                let (document, remaining) = read_document(rest)?;
                body = Some(document);
                rest = remaining;
            }
            KIND_SEQUENCE => {
                let (sequence, remaining) = read_sequence(rest)?;
                sequences.push(sequence);
                rest = remaining;
            }
            kind => {
                return Err(DocwireError::Protocol(format!(
                    "Unknown section kind: {}",
                    kind
                )))
            }
        }
    }

    let mut body = body.ok_or_else(|| DocwireError::Protocol("Missing body section".to_string()))?;
    for (identifier, documents) in sequences {
        body.insert(
            identifier,
            documents.into_iter().map(Bson::Document).collect::<Vec<_>>(),
        );
    }

    Ok(Message {
        request_id,
        response_to,
        flags,
        body,
    })
}

/// Read one BSON document off the front of `bytes`
fn read_document(bytes: &[u8]) -> Result<(Document, &[u8])> {
    if bytes.len() < 5 {
        return Err(DocwireError::Protocol(
            "Truncated document".to_string(),
        ));
    }

    let doc_len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if doc_len < 5 || doc_len as usize > bytes.len() {
        return Err(DocwireError::Protocol(format!(
            "Invalid document length: {} ({} bytes available)",
            doc_len,
            bytes.len()
        )));
    }

    let (doc_bytes, remaining) = bytes.split_at(doc_len as usize);
    let document = Document::from_reader(doc_bytes)?;
    Ok((document, remaining))
}

/// Read a kind-1 document sequence off the front of `bytes`
fn read_sequence(bytes: &[u8]) -> Result<((String, Vec<Document>), &[u8])> {
    if bytes.len() < 4 {
        return Err(DocwireError::Protocol("Truncated sequence".to_string()));
    }

    let size = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if size < 5 || size as usize > bytes.len() {
        return Err(DocwireError::Protocol(format!(
            "Invalid sequence size: {}",
            size
        )));
    }

    let (section, remaining) = bytes.split_at(size as usize);
    let section = &section[4..];

    let nul = section
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| DocwireError::Protocol("Unterminated sequence identifier".to_string()))?;
    let identifier = String::from_utf8(section[..nul].to_vec())
        .map_err(|e| DocwireError::Protocol(format!("Invalid sequence identifier: {}", e)))?;

    let mut documents = Vec::new();
    let mut cursor = &section[nul + 1..];
    while !cursor.is_empty() {
        let (document, next) = read_document(cursor)?;
        documents.push(document);
        cursor = next;
    }

    Ok(((identifier, documents), remaining))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete message from a stream
///
/// Waits until a complete frame is received or an error occurs
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    // Read the length prefix first
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = i32::from_le_bytes(length_buf);

    // Validate length
    if length < HEADER_SIZE as i32 || length as usize > MAX_MESSAGE_SIZE {
        return Err(DocwireError::Protocol(format!(
            "Invalid message length: {} (max {})",
            length, MAX_MESSAGE_SIZE
        )));
    }

    // Read the rest of the frame
    let mut frame = vec![0u8; length as usize];
    frame[..4].copy_from_slice(&length_buf);
    reader.read_exact(&mut frame[4..]).await?;

    decode_message(&frame)
}

/// Write a message to a stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let bytes = encode_message(message)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
