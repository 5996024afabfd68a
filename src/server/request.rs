//! Just enough HTTP to route a viewer
//!
//! Only the request line matters. Headers are read to find the end of the
//! request and then ignored.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, ProtocolError};

/// Path prefix of stream routes
pub const STREAM_PREFIX: &str = "/stream/";

/// Read the request head: up to a blank line, or whatever arrived before EOF
pub async fn read_request_head<R>(reader: &mut R, max_size: usize) -> Result<String, Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(512);

    loop {
        if head_complete(&buf) {
            break;
        }
        if buf.len() > max_size {
            return Err(ProtocolError::HeaderTooLarge(max_size).into());
        }
        if reader.read_buf(&mut buf).await? == 0 {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn head_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

/// Extract the path of a `GET <path> <version>` request line
pub fn parse_request_path(head: &str) -> Result<&str, ProtocolError> {
    let line = head.lines().next().unwrap_or_default();

    let target = line
        .strip_prefix("GET ")
        .ok_or(ProtocolError::MalformedRequestLine)?;

    match target.rsplit_once(' ') {
        Some((path, _version)) if !path.is_empty() => Ok(path),
        _ => Err(ProtocolError::MalformedRequestLine),
    }
}

/// Route key of a stream path: whatever follows `/stream/`
pub fn route_key(path: &str) -> Option<&str> {
    path.split(STREAM_PREFIX).nth(1).filter(|key| !key.is_empty())
}
