//! Frame codec for noisy async streams
//!
//! The probe shares its output channel with whatever else the surrounding
//! process tree prints. Writing is therefore one contiguous `write_all`
//! followed by a flush per frame, and reading scans for [`MAGIC`] and treats
//! everything before it as noise.

use crate::frame::{HEADER_SIZE, MAGIC};
use crate::{Frame, ProtocolError};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size accepted when decoding (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for encoding/decoding frames over async streams
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum payload size accepted by the decoder
    max_frame_size: usize,
    /// Noise bytes skipped so far
    discarded: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
            discarded: 0,
        }
    }

    /// Write a frame to an async writer and flush it
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = frame.encode();
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the next frame from an async reader, skipping noise
    ///
    /// Returns `Ok(None)` once the reader is exhausted and nothing but noise
    /// remains buffered.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Frame>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.try_decode_frame()? {
                return Ok(Some(frame));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.starts_with(&MAGIC) {
                    return Err(ProtocolError::TruncatedFrame {
                        buffered: self.read_buf.len(),
                    });
                }
                self.discard(self.read_buf.len());
                return Ok(None);
            }

            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Feed raw channel bytes to the decoder
    pub fn extend(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Try to decode a frame from the internal buffer
    ///
    /// A length above the configured maximum is reported as
    /// [`ProtocolError::FrameTooLarge`] and the offending marker is dropped,
    /// so the next call resumes scanning behind it.
    pub fn try_decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match find_marker(&self.read_buf) {
            Some(pos) => self.discard(pos),
            None => {
                let keep = partial_marker_len(&self.read_buf);
                self.discard(self.read_buf.len() - keep);
                return Ok(None);
            }
        }

        if self.read_buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let frame_len = (&self.read_buf[MAGIC.len()..HEADER_SIZE]).get_u32() as usize;

        if frame_len > self.max_frame_size {
            self.discard(MAGIC.len());
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < HEADER_SIZE + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(HEADER_SIZE);
        let frame_data = self.read_buf.split_to(frame_len);

        let payload = String::from_utf8(frame_data.to_vec())
            .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
        Frame::new(payload).map(Some)
    }

    /// Number of noise bytes skipped so far
    pub fn discarded_bytes(&self) -> usize {
        self.discarded
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    fn discard(&mut self, n: usize) {
        self.read_buf.advance(n);
        self.discarded += n;
    }
}

/// Offset of the first complete marker in `buf`
fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC.len()).position(|window| window == MAGIC)
}

/// Length of the longest suffix of `buf` that is a proper prefix of the marker
fn partial_marker_len(buf: &[u8]) -> usize {
    (1..MAGIC.len())
        .rev()
        .find(|&k| buf.len() >= k && buf[buf.len() - k..] == MAGIC[..k])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use bytes::BufMut;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_read_frame() {
        let codec = FrameCodec::new();
        let frame = Frame::new("test payload").unwrap();

        let mut buffer = Vec::new();
        codec.write_frame(&mut buffer, &frame).await.unwrap();
        assert_eq!(buffer, frame.encode().to_vec());

        let mut codec2 = FrameCodec::new();
        let mut cursor = Cursor::new(buffer);
        let decoded = codec2.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_noise_between_frames() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"Starting proxy...\n");
        stream.extend_from_slice(&encode("first").unwrap());
        stream.extend_from_slice(b"Read line: 'probe-url'\n\xc0garbage\xff");
        stream.extend_from_slice(&encode("second").unwrap());
        stream.extend_from_slice(b"Goodbye.\n");

        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(stream);

        let first = codec.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first.payload(), "first");
        let second = codec.read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(second.payload(), "second");
        assert!(codec.read_frame(&mut cursor).await.unwrap().is_none());

        let noise = b"Starting proxy...\n".len()
            + b"Read line: 'probe-url'\n\xc0garbage\xff".len()
            + b"Goodbye.\n".len();
        assert_eq!(codec.discarded_bytes(), noise);
    }

    #[test]
    fn test_partial_frame_decoding() {
        let encoded = encode("partial").unwrap();
        let mut codec = FrameCodec::new();

        // Split inside the marker, inside the length and inside the payload.
        for chunk in [&encoded[..2], &encoded[2..6], &encoded[6..10]] {
            codec.extend(chunk);
            assert!(codec.try_decode_frame().unwrap().is_none());
        }
        codec.extend(&encoded[10..]);

        let frame = codec.try_decode_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), "partial");
        assert_eq!(codec.buffer_size(), 0);
        assert_eq!(codec.discarded_bytes(), 0);
    }

    #[test]
    fn test_partial_marker_is_retained() {
        let mut codec = FrameCodec::new();
        codec.extend(b"noise\xc0\xc1");

        assert!(codec.try_decode_frame().unwrap().is_none());
        assert_eq!(codec.buffer_size(), 2);
        assert_eq!(codec.discarded_bytes(), 5);

        codec.extend(&[0xFE, 0xFF, 0, 0, 0, 2]);
        codec.extend(b"ok");
        assert_eq!(codec.try_decode_frame().unwrap().unwrap().payload(), "ok");
    }

    #[test]
    fn test_frame_too_large_resyncs() {
        let mut codec = FrameCodec::with_max_frame_size(100);

        let mut bogus = BytesMut::new();
        bogus.put_slice(&MAGIC);
        bogus.put_u32(1_000_000);
        codec.extend(&bogus);
        codec.extend(&encode("after").unwrap());

        let result = codec.try_decode_frame();
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { size: 1_000_000, max: 100 })));

        let frame = codec.try_decode_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), "after");
    }

    #[test]
    fn test_invalid_utf8_payload() {
        let mut codec = FrameCodec::new();

        let mut invalid = BytesMut::new();
        invalid.put_slice(&MAGIC);
        invalid.put_u32(2);
        invalid.put_slice(&[0xFF, 0xFE]);
        codec.extend(&invalid);

        let result = codec.try_decode_frame();
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8(_))));
        assert_eq!(codec.buffer_size(), 0);
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let encoded = encode("cut short").unwrap();
        let mut cursor = Cursor::new(encoded[..encoded.len() - 3].to_vec());

        let mut codec = FrameCodec::new();
        let result = codec.read_frame(&mut cursor).await;
        assert!(matches!(result, Err(ProtocolError::TruncatedFrame { .. })));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(Vec::<u8>::new());

        let result = codec.read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_noise_only_stream() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(b"just some log output\n\xc0".to_vec());

        assert!(codec.read_frame(&mut cursor).await.unwrap().is_none());
        assert_eq!(codec.discarded_bytes(), 22);
    }

    proptest! {
        #[test]
        fn test_codec_roundtrip_properties(
            payload in ".*",
            noise in prop::collection::vec(0u8..0xC0, 0..64),
        ) {
            tokio_test::block_on(async {
                let mut stream = noise.clone();
                stream.extend_from_slice(&encode(&payload)?);
                stream.extend_from_slice(&noise);

                let mut codec = FrameCodec::new();
                let mut cursor = Cursor::new(stream);
                let decoded = codec.read_frame(&mut cursor).await?.unwrap();

                prop_assert_eq!(decoded.payload(), payload.as_str());
                prop_assert_eq!(decoded.payload_size(), payload.len());
                prop_assert!(codec.read_frame(&mut cursor).await?.is_none());

                Ok(())
            })?;
        }

        #[test]
        fn test_split_points_do_not_matter(
            payloads in prop::collection::vec(".{0,32}", 1..5),
            split in 1usize..17,
        ) {
            let mut stream = Vec::new();
            for payload in &payloads {
                stream.extend_from_slice(b"noise ");
                stream.extend_from_slice(&encode(payload).unwrap());
            }

            let mut codec = FrameCodec::new();
            let mut decoded = Vec::new();
            for chunk in stream.chunks(split) {
                codec.extend(chunk);
                while let Some(frame) = codec.try_decode_frame().unwrap() {
                    decoded.push(frame.into_payload());
                }
            }

            prop_assert_eq!(decoded, payloads);
        }
    }
}
