//! Frame encoding and decoding
//!
//! Every message on every endpoint is a single block:
//!
//! ```text
//! [blockLength: u16 BE][payload: blockLength bytes]
//! ```
//!
//! Pull payloads are a plain sequence of strings. Request payloads start with
//! a `u16` request type followed by the strings of that request. A string is
//! encoded as
//!
//! ```text
//! [n: u32 BE][n bytes, the last one NUL]
//! ```
//!
//! with `n = 0` standing for the empty string (Qt `QDataStream` char layout).

use crate::error::{ProtocolError, Result};
use crate::messages::{Request, RequestType};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Read;

#[cfg(feature = "async")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the block length prefix
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a block can carry
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize;

const STRING_LENGTH_SIZE: usize = 4;

/// Append one length-prefixed, NUL terminated string
fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32((value.len() + 1) as u32);
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Take one string off the front of `buf`
///
/// `total` is the payload length, used to report offsets.
fn take_string(buf: &mut &[u8], total: usize) -> Result<String> {
    let offset = total - buf.remaining();

    if buf.remaining() < STRING_LENGTH_SIZE {
        return Err(ProtocolError::IncompleteFrame {
            expected: STRING_LENGTH_SIZE,
            actual: buf.remaining(),
        });
    }

    let length = buf.get_u32() as usize;
    if length == 0 {
        return Ok(String::new());
    }

    if buf.remaining() < length {
        return Err(ProtocolError::IncompleteFrame {
            expected: length,
            actual: buf.remaining(),
        });
    }

    let remaining: &[u8] = *buf;
    let (bytes, rest) = remaining.split_at(length);
    *buf = rest;

    match bytes.split_last() {
        Some((&0, text)) => String::from_utf8(text.to_vec())
            .map_err(|_| ProtocolError::InvalidUtf8 { offset }),
        _ => Err(ProtocolError::MalformedString { offset }),
    }
}

/// Read strings until the payload is exhausted
fn take_strings(buf: &mut &[u8], total: usize) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    while buf.has_remaining() {
        strings.push(take_string(buf, total)?);
    }
    Ok(strings)
}

/// Prepend the block length to a finished payload
fn finish_block(payload: BytesMut) -> Result<Vec<u8>> {
    if payload.len() > MAX_BLOCK_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_BLOCK_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_u16(payload.len() as u16);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Encode a pull-endpoint block carrying one string per entry
///
/// # Example
/// ```
/// use protocol::{encode_block, split_frame, decode_block};
///
/// let frame = encode_block(&["1 2 3 4 5 1"]).unwrap();
/// let payload = split_frame(&frame).unwrap();
/// assert_eq!(decode_block(payload).unwrap(), vec!["1 2 3 4 5 1".to_string()]);
/// ```
pub fn encode_block<S: AsRef<str>>(strings: &[S]) -> Result<Vec<u8>> {
    let mut payload = BytesMut::new();
    for value in strings {
        put_string(&mut payload, value.as_ref());
    }
    finish_block(payload)
}

/// Decode the payload of a pull-endpoint block
pub fn decode_block(payload: &[u8]) -> Result<Vec<String>> {
    let mut buf = payload;
    take_strings(&mut buf, payload.len())
}

/// Validate a complete frame and return its payload
///
/// Trailing bytes after the declared block are ignored.
pub fn split_frame(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::IncompleteFrame {
            expected: LENGTH_PREFIX_SIZE,
            actual: frame.len(),
        });
    }

    let length = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let end = LENGTH_PREFIX_SIZE + length;
    if frame.len() < end {
        return Err(ProtocolError::IncompleteFrame {
            expected: end,
            actual: frame.len(),
        });
    }

    Ok(&frame[LENGTH_PREFIX_SIZE..end])
}

/// Encode a `rule-update` request frame
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    let mut payload = BytesMut::new();
    payload.put_u16(request.request_type() as u16);

    match request {
        Request::UploadRuleSet(rules) => {
            for rule in rules {
                put_string(&mut payload, rule);
            }
        }
        Request::LoadRuleSet(path) | Request::SaveRuleSet(path) => {
            put_string(&mut payload, path);
        }
    }

    finish_block(payload)
}

/// Decode the payload of a `rule-update` request frame
pub fn decode_request(payload: &[u8]) -> Result<Request> {
    let mut buf = payload;
    if buf.remaining() < 2 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 2,
            actual: buf.remaining(),
        });
    }

    let request_type = RequestType::try_from(buf.get_u16())?;
    let mut strings = take_strings(&mut buf, payload.len())?;

    match request_type {
        RequestType::UploadRuleSet => Ok(Request::UploadRuleSet(strings)),
        RequestType::LoadRuleSet | RequestType::SaveRuleSet => {
            if strings.len() != 1 {
                return Err(ProtocolError::UnexpectedStringCount {
                    expected: 1,
                    actual: strings.len(),
                });
            }
            let path = strings.remove(0);
            Ok(match request_type {
                RequestType::LoadRuleSet => Request::LoadRuleSet(path),
                _ => Request::SaveRuleSet(path),
            })
        }
    }
}

/// Read one frame from a blocking reader and return its payload
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    let length = u16::from_be_bytes(prefix) as usize;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Async: read one frame and return its payload
#[cfg(feature = "async")]
pub async fn read_frame_async<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    read_payload_async(reader, prefix).await
}

/// Async: read one frame, or `None` if the peer closed before sending anything
///
/// A client on the `rule-update` endpoint with nothing to say simply closes
/// the connection; that is not an error.
#[cfg(feature = "async")]
pub async fn read_optional_frame_async<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read(&mut prefix).await? {
        0 => return Ok(None),
        1 => {
            reader.read_exact(&mut prefix[1..]).await?;
        }
        _ => {}
    }
    read_payload_async(reader, prefix).await.map(Some)
}

#[cfg(feature = "async")]
async fn read_payload_async<R>(reader: &mut R, prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let length = u16::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Async: write a complete frame and flush it
#[cfg(feature = "async")]
pub async fn write_frame_async<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
