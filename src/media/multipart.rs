//! `multipart/x-mixed-replace` framing
//!
//! Browsers render an MJPEG stream as a never-ending HTTP response whose body
//! is a sequence of parts, each replacing the previous image:
//!
//! ```text
//! --<boundary>\r\n
//! Content-type: image/jpeg\r\n
//! Content-length: <N>\r\n
//! X-Timestamp: <unix-epoch-float>\r\n\r\n
//! <N bytes of JPEG>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::Frame;

/// Default boundary token
pub const DEFAULT_BOUNDARY: &str = "frame";

/// Server name sent in the preamble
pub const SERVER_NAME: &str = "mjpeg-relay";

/// Encode one frame as a multipart part
pub fn encode_part(boundary: &str, frame: &Frame) -> Bytes {
    let header = format!(
        "--{}\r\nContent-type: image/jpeg\r\nContent-length: {}\r\nX-Timestamp: {:.6}\r\n\r\n",
        boundary,
        frame.len(),
        frame.unix_timestamp()
    );

    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.data);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Response head that upgrades a request into a multipart stream
pub fn preamble(boundary: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.0 200 OK\r\n\
         Connection: keep-alive\r\n\
         Server: {}\r\n\
         Cache-Control: no-store, no-cache, must-revalidate\r\n\
         Cache-Control: pre-check=0, post-check=0, max-age=0\r\n\
         Pragma: no-cache\r\n\
         Expires: -1\r\n\
         Content-Type: multipart/x-mixed-replace;boundary={}\r\n\
         \r\n",
        SERVER_NAME, boundary
    ))
}

/// Response for routes that do not resolve to a stream
pub fn redirect() -> Bytes {
    Bytes::from_static(b"HTTP/1.0 302 Found\r\nLocation: /\r\nContent-Length: 0\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_encode_part() {
        let ts = UNIX_EPOCH + Duration::from_micros(1_700_000_000_250_000);
        let frame = Frame::new(Bytes::from_static(b"JPEGDATA"), 1, 1, ts);

        let part = encode_part("frame", &frame);

        let expected = b"--frame\r\n\
            Content-type: image/jpeg\r\n\
            Content-length: 8\r\n\
            X-Timestamp: 1700000000.250000\r\n\r\n\
            JPEGDATA\r\n";
        assert_eq!(&part[..], &expected[..]);
    }

    #[test]
    fn test_encode_part_custom_boundary() {
        let frame = Frame::new(Bytes::new(), 0, 0, UNIX_EPOCH);
        let part = encode_part("cam0", &frame);

        assert!(part.starts_with(b"--cam0\r\n"));
        assert!(part.ends_with(b"\r\n\r\n\r\n"));
    }

    #[test]
    fn test_preamble() {
        let head = preamble("frame");
        let text = std::str::from_utf8(&head).unwrap();

        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.contains("Pragma: no-cache\r\n"));
        assert!(text.contains("Content-Type: multipart/x-mixed-replace;boundary=frame\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_redirect() {
        assert!(redirect().starts_with(b"HTTP/1.0 302"));
    }
}
