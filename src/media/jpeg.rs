//! JPEG handling for MJPEG feeds
//!
//! An MJPEG feed is a byte stream of back-to-back JPEG images, possibly
//! wrapped in multipart framing we do not care about. Frames are found by
//! scanning for the SOI/EOI markers:
//!
//! ```text
//! ... junk ... | FF D8 | segments ... scan data ... | FF D9 | ... next ...
//!              |  SOI  |                            |  EOI  |
//! ```
//!
//! Decoding only walks the segment headers up to the first SOF segment to
//! recover the image dimensions. Pixel data is never touched; frames are
//! relayed as-is.
//!
//! The one image this crate encodes itself is [`blank_jpeg`], a flat gray
//! frame used as the default placeholder while a feed is down.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default cap on buffered bytes without a complete frame (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Dimensions recovered from a JPEG frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegInfo {
    /// Sample precision in bits
    pub precision: u8,
    /// Image width in pixels
    pub width: u16,
    /// Image height in pixels
    pub height: u16,
    /// Number of color components
    pub components: u8,
}

/// Accumulates feed bytes and slices out complete JPEG images
#[derive(Debug)]
pub struct JpegExtractor {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl JpegExtractor {
    /// Create an extractor with the default frame size cap
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create an extractor that gives up after `max_frame_size` buffered bytes
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append a chunk of feed bytes
    ///
    /// Fails if the buffer grows past the frame size cap without producing a
    /// frame. The buffer is cleared in that case.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() > self.max_frame_size {
            self.buffer.clear();
            return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
        }

        Ok(())
    }

    /// Take the next complete JPEG out of the buffer
    ///
    /// Bytes before the start marker are discarded. Everything after the end
    /// marker stays buffered for the next call.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let start = match find_marker(&self.buffer, SOI, 0) {
            Some(pos) => pos,
            None => {
                // A trailing 0xFF may be the first half of a split SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let discard = self.buffer.len() - keep;
                self.buffer.advance(discard);
                return None;
            }
        };

        let end = find_marker(&self.buffer, EOI, start + SOI.len())?;

        self.buffer.advance(start);
        Some(self.buffer.split_to(end - start + EOI.len()).freeze())
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for JpegExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(data: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// Start-of-frame markers carry the image dimensions. 0xC4 (DHT), 0xC8 (JPG)
/// and 0xCC (DAC) share the range but are not frame headers.
fn is_start_of_frame(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Markers with no length field
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD8)
}

/// Walk the segment headers of a JPEG image until its frame header
pub fn parse_header(data: &[u8]) -> Result<JpegInfo, ProtocolError> {
    if data.len() < SOI.len() || data[..SOI.len()] != SOI {
        return Err(ProtocolError::MissingStartMarker);
    }

    let mut buf = &data[SOI.len()..];

    loop {
        if !buf.has_remaining() {
            return Err(ProtocolError::TruncatedJpeg);
        }

        let lead = buf.get_u8();
        if lead != 0xFF {
            return Err(ProtocolError::InvalidMarker(lead));
        }

        // Any number of 0xFF fill bytes may precede the marker code
        let mut marker = 0xFF;
        while buf.has_remaining() {
            marker = buf.get_u8();
            if marker != 0xFF {
                break;
            }
        }
        if marker == 0xFF {
            return Err(ProtocolError::TruncatedJpeg);
        }

        if is_standalone(marker) {
            continue;
        }

        // Scan data or end of image before any frame header
        if marker == 0xDA || marker == 0xD9 {
            return Err(ProtocolError::MissingFrameHeader);
        }

        if buf.remaining() < 2 {
            return Err(ProtocolError::TruncatedJpeg);
        }
        let length = buf.get_u16() as usize;
        if length < 2 || buf.remaining() < length - 2 {
            return Err(ProtocolError::TruncatedJpeg);
        }

        if is_start_of_frame(marker) {
            if length < 8 {
                return Err(ProtocolError::TruncatedJpeg);
            }
            let precision = buf.get_u8();
            let height = buf.get_u16();
            let width = buf.get_u16();
            let components = buf.get_u8();

            return Ok(JpegInfo {
                precision,
                width,
                height,
                components,
            });
        }

        buf.advance(length - 2);
    }
}

/// Encode a uniform mid-gray baseline JPEG
///
/// Every 8x8 block has a zero DC difference and no AC coefficients. With
/// one-code Huffman tables that makes the scan two zero bits per block.
pub fn blank_jpeg(width: u16, height: u16) -> Bytes {
    let width = width.max(1);
    let height = height.max(1);
    let blocks = (width as usize).div_ceil(8) * (height as usize).div_ceil(8);
    let scan_bits = blocks * 2;

    let mut buf = BytesMut::with_capacity(160 + scan_bits / 8);
    buf.put_slice(&SOI);

    // DQT: table 0, 8-bit entries, all ones
    buf.put_slice(&[0xFF, 0xDB]);
    buf.put_u16(67);
    buf.put_u8(0x00);
    buf.put_bytes(1, 64);

    // SOF0: 8-bit precision, one component using table 0
    buf.put_slice(&[0xFF, 0xC0]);
    buf.put_u16(11);
    buf.put_u8(8);
    buf.put_u16(height);
    buf.put_u16(width);
    buf.put_u8(1);
    buf.put_slice(&[0x01, 0x11, 0x00]);

    // DHT: DC and AC table 0, a single 1-bit code for symbol 0
    for class in [0x00, 0x10] {
        buf.put_slice(&[0xFF, 0xC4]);
        buf.put_u16(20);
        buf.put_u8(class);
        buf.put_u8(1);
        buf.put_bytes(0, 15);
        buf.put_u8(0x00);
    }

    // SOS: one component, full spectral range
    buf.put_slice(&[0xFF, 0xDA]);
    buf.put_u16(8);
    buf.put_slice(&[0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);

    buf.put_bytes(0, scan_bits / 8);
    let tail = scan_bits % 8;
    if tail > 0 {
        // Pad the last byte with ones
        buf.put_u8(0xFF >> tail);
    }

    buf.put_slice(&EOI);
    buf.freeze()
}

/// Build a small but structurally valid baseline JPEG for tests
#[cfg(test)]
pub(crate) fn sample_jpeg(width: u16, height: u16, fill: u8) -> Bytes {
    assert_ne!(fill, 0xFF, "fill byte must not look like a marker");

    let mut data = Vec::new();
    data.extend_from_slice(&SOI);
    // APP0 segment with a 2-byte body
    data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
    // SOF0: length 11, precision 8, height, width, 1 component
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
    // SOS header then some entropy-coded bytes
    data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
    data.extend_from_slice(&[fill; 16]);
    data.extend_from_slice(&EOI);
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_frame_keeps_trailing_bytes() {
        let jpeg = sample_jpeg(4, 2, 0x11);
        let mut extractor = JpegExtractor::new();

        extractor.push(&jpeg).unwrap();
        extractor.push(&[0xFF, 0xD8, 0x01, 0x02]).unwrap();

        let frame = extractor.next_frame().unwrap();
        assert_eq!(frame, jpeg);

        // Start of the next image stays buffered
        assert_eq!(extractor.buffered(), &[0xFF, 0xD8, 0x01, 0x02]);
        assert!(extractor.next_frame().is_none());
        assert_eq!(extractor.buffered(), &[0xFF, 0xD8, 0x01, 0x02]);
    }

    #[test]
    fn test_extract_frame_split_across_chunks() {
        let jpeg = sample_jpeg(8, 8, 0x22);
        let mut extractor = JpegExtractor::new();

        let (a, b) = jpeg.split_at(jpeg.len() - 1);
        extractor.push(a).unwrap();
        assert!(extractor.next_frame().is_none());

        extractor.push(b).unwrap();
        assert_eq!(extractor.next_frame().unwrap(), jpeg);
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_extract_multiple_frames_in_one_chunk() {
        let first = sample_jpeg(2, 2, 0x01);
        let second = sample_jpeg(3, 3, 0x02);

        let mut chunk = b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        chunk.extend_from_slice(&first);
        chunk.extend_from_slice(b"\r\n--boundary\r\n\r\n");
        chunk.extend_from_slice(&second);

        let mut extractor = JpegExtractor::new();
        extractor.push(&chunk).unwrap();

        assert_eq!(extractor.next_frame().unwrap(), first);
        assert_eq!(extractor.next_frame().unwrap(), second);
        assert!(extractor.next_frame().is_none());
    }

    #[test]
    fn test_junk_without_start_marker_is_discarded() {
        let mut extractor = JpegExtractor::new();
        extractor.push(&[0x00, 0x01, 0x02, 0xFF]).unwrap();

        assert!(extractor.next_frame().is_none());
        // Only the possible half marker survives
        assert_eq!(extractor.buffered(), &[0xFF]);

        extractor.push(&[0xD8]).unwrap();
        assert!(extractor.next_frame().is_none());
        assert_eq!(extractor.buffered(), &SOI);
    }

    #[test]
    fn test_end_marker_before_start_marker_is_ignored() {
        let jpeg = sample_jpeg(2, 2, 0x05);
        let mut extractor = JpegExtractor::new();

        extractor.push(&EOI).unwrap();
        extractor.push(&jpeg).unwrap();

        assert_eq!(extractor.next_frame().unwrap(), jpeg);
    }

    #[test]
    fn test_frame_size_cap() {
        let mut extractor = JpegExtractor::with_max_frame_size(8);
        extractor.push(&SOI).unwrap();

        let result = extractor.push(&[0u8; 16]);
        assert_eq!(result, Err(ProtocolError::FrameTooLarge(8)));
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_parse_header() {
        let jpeg = sample_jpeg(480, 360, 0x33);
        let info = parse_header(&jpeg).unwrap();

        assert_eq!(info.width, 480);
        assert_eq!(info.height, 360);
        assert_eq!(info.precision, 8);
        assert_eq!(info.components, 1);
    }

    #[test]
    fn test_parse_header_errors() {
        assert_eq!(
            parse_header(&[0x00, 0x01]),
            Err(ProtocolError::MissingStartMarker)
        );
        assert_eq!(parse_header(&SOI), Err(ProtocolError::TruncatedJpeg));
        assert_eq!(
            parse_header(&[0xFF, 0xD8, 0x12]),
            Err(ProtocolError::InvalidMarker(0x12))
        );
        assert_eq!(
            parse_header(&[0xFF, 0xD8, 0xFF, 0xD9]),
            Err(ProtocolError::MissingFrameHeader)
        );

        // SOF segment length runs past the data
        let truncated = [0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08];
        assert_eq!(parse_header(&truncated), Err(ProtocolError::TruncatedJpeg));
    }

    #[test]
    fn test_parse_header_skips_fill_bytes() {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xFF, 0xFF];
        data.extend_from_slice(&[0xC2, 0x00, 0x08, 0x08, 0x00, 0x10, 0x00, 0x20, 0x03]);

        let info = parse_header(&data).unwrap();
        assert_eq!(info.width, 32);
        assert_eq!(info.height, 16);
        assert_eq!(info.components, 3);
    }

    #[test]
    fn test_blank_jpeg() {
        let jpeg = blank_jpeg(480, 360);
        let info = parse_header(&jpeg).unwrap();
        assert_eq!((info.width, info.height), (480, 360));
        assert_eq!(info.components, 1);

        // 60x45 blocks at two bits each
        let scan = 60 * 45 * 2 / 8;
        assert!(jpeg.ends_with(&EOI));
        assert!(jpeg[jpeg.len() - 2 - scan..jpeg.len() - 2].iter().all(|&b| b == 0));

        let mut extractor = JpegExtractor::new();
        extractor.push(&jpeg).unwrap();
        assert_eq!(extractor.next_frame().unwrap(), jpeg);
        assert!(extractor.is_empty());
    }

    #[test]
    fn test_blank_jpeg_pads_partial_byte() {
        // 1 block, 2 bits of scan data
        let jpeg = blank_jpeg(0, 5);
        let info = parse_header(&jpeg).unwrap();
        assert_eq!((info.width, info.height), (1, 5));
        assert_eq!(jpeg[jpeg.len() - 3], 0x3F);
    }
}
