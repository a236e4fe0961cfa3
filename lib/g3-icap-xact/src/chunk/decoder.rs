/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::parse::{ChunkedLine, IcapLineParseError};

#[derive(Debug, Error)]
pub enum ChunkedDecodeError {
    #[error("invalid chunk size line: {0}")]
    InvalidChunkLine(IcapLineParseError),
    #[error("chunk line too long (> {0})")]
    TooLongLine(usize),
    #[error("no end whitespace found after chunk data")]
    InvalidChunkEnd,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DecodeState {
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailer,
    Done,
}

/// Incremental decoder for the chunked ICAP body of a reply.
///
/// Decoded data is handed to a sink that may accept less than offered, in
/// which case decoding pauses until more space is available.
pub struct ChunkedBodyDecoder {
    line_max_size: usize,
    state: DecodeState,
    ieof: bool,
    wait_space: bool,
    decoded: u64,
}

impl ChunkedBodyDecoder {
    pub fn new(line_max_size: usize) -> Self {
        ChunkedBodyDecoder {
            line_max_size,
            state: DecodeState::ChunkSize,
            ieof: false,
            wait_space: false,
            decoded: 0,
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    #[inline]
    pub fn needs_more_space(&self) -> bool {
        self.wait_space
    }

    #[inline]
    pub fn needs_more_data(&self) -> bool {
        !self.is_done() && !self.wait_space
    }

    /// Whether the last chunk carried the `ieof` extension.
    #[inline]
    pub fn ieof(&self) -> bool {
        self.ieof
    }

    #[inline]
    pub fn decoded_size(&self) -> u64 {
        self.decoded
    }

    fn take_line(&self, input: &mut BytesMut) -> Result<Option<BytesMut>, ChunkedDecodeError> {
        match memchr::memchr(b'\n', input) {
            Some(p) => {
                if p + 1 > self.line_max_size {
                    return Err(ChunkedDecodeError::TooLongLine(self.line_max_size));
                }
                Ok(Some(input.split_to(p + 1)))
            }
            None => {
                if input.len() > self.line_max_size {
                    return Err(ChunkedDecodeError::TooLongLine(self.line_max_size));
                }
                Ok(None)
            }
        }
    }

    /// Decode as much of `input` as possible, consuming what has been decoded.
    pub fn decode<F>(&mut self, input: &mut BytesMut, mut sink: F) -> Result<(), ChunkedDecodeError>
    where
        F: FnMut(&[u8]) -> usize,
    {
        self.wait_space = false;
        loop {
            match self.state {
                DecodeState::ChunkSize => {
                    let Some(line) = self.take_line(input)? else {
                        return Ok(());
                    };
                    let chunk =
                        ChunkedLine::parse(&line).map_err(ChunkedDecodeError::InvalidChunkLine)?;
                    if chunk.chunk_size == 0 {
                        self.ieof = chunk.ieof();
                        self.state = DecodeState::Trailer;
                    } else {
                        self.state = DecodeState::ChunkData(chunk.chunk_size);
                    }
                }
                DecodeState::ChunkData(left) => {
                    if input.is_empty() {
                        return Ok(());
                    }
                    let len = usize::try_from(left)
                        .unwrap_or(usize::MAX)
                        .min(input.len());
                    let accepted = sink(&input[..len]).min(len);
                    input.advance(accepted);
                    self.decoded += accepted as u64;
                    let left = left - accepted as u64;
                    if left == 0 {
                        self.state = DecodeState::ChunkDataEnd;
                    } else {
                        self.state = DecodeState::ChunkData(left);
                        if accepted < len {
                            self.wait_space = true;
                            return Ok(());
                        }
                    }
                }
                DecodeState::ChunkDataEnd => match input.first() {
                    None => return Ok(()),
                    Some(b'\n') => {
                        input.advance(1);
                        self.state = DecodeState::ChunkSize;
                    }
                    Some(b'\r') => match input.get(1) {
                        None => return Ok(()),
                        Some(b'\n') => {
                            input.advance(2);
                            self.state = DecodeState::ChunkSize;
                        }
                        Some(_) => return Err(ChunkedDecodeError::InvalidChunkEnd),
                    },
                    Some(_) => return Err(ChunkedDecodeError::InvalidChunkEnd),
                },
                DecodeState::Trailer => {
                    let Some(line) = self.take_line(input)? else {
                        return Ok(());
                    };
                    if line.as_ref() == b"\r\n" || line.as_ref() == b"\n" {
                        self.state = DecodeState::Done;
                    }
                }
                DecodeState::Done => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{close_chunk, last_chunk, open_chunk};

    fn decode_all(data: &[u8]) -> (Vec<u8>, ChunkedBodyDecoder) {
        let mut decoder = ChunkedBodyDecoder::new(1024);
        let mut input = BytesMut::from(data);
        let mut output = Vec::new();
        decoder
            .decode(&mut input, |d| {
                output.extend_from_slice(d);
                d.len()
            })
            .unwrap();
        (output, decoder)
    }

    #[test]
    fn encode_decode() {
        let mut sizes = vec![0usize];
        sizes.extend((0..16).map(|_| fastrand::usize(1..=64 * 1024)));
        for size in sizes {
            let payload: Vec<u8> = (0..size).map(|_| fastrand::u8(..)).collect();

            let mut buf = Vec::new();
            if size > 0 {
                open_chunk(&mut buf, size, false);
                buf.extend_from_slice(&payload);
                close_chunk(&mut buf);
            }
            last_chunk(&mut buf, false);

            let (output, decoder) = decode_all(&buf);
            assert!(decoder.is_done());
            assert_eq!(decoder.decoded_size(), size as u64);
            assert_eq!(output, payload);
        }
    }

    #[test]
    fn split_input() {
        let data = b"5\r\nhello\r\n6; name=value\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\nnext";
        let mut decoder = ChunkedBodyDecoder::new(1024);
        let mut input = BytesMut::new();
        let mut output = Vec::new();
        for b in data.iter() {
            input.extend_from_slice(&[*b]);
            decoder
                .decode(&mut input, |d| {
                    output.extend_from_slice(d);
                    d.len()
                })
                .unwrap();
        }
        assert!(decoder.is_done());
        assert_eq!(output, b"hello world");
        assert_eq!(input.as_ref(), b"next");
    }

    #[test]
    fn limited_sink() {
        let mut decoder = ChunkedBodyDecoder::new(1024);
        let mut input = BytesMut::from(&b"a\r\n0123456789\r\n0\r\n\r\n"[..]);
        let mut output = Vec::new();
        decoder
            .decode(&mut input, |d| {
                let n = d.len().min(4);
                output.extend_from_slice(&d[..n]);
                n
            })
            .unwrap();
        assert!(decoder.needs_more_space());
        assert!(!decoder.needs_more_data());
        assert_eq!(output, b"0123");

        decoder
            .decode(&mut input, |d| {
                output.extend_from_slice(d);
                d.len()
            })
            .unwrap();
        assert!(decoder.is_done());
        assert_eq!(output, b"0123456789");
    }

    #[test]
    fn ieof_extension() {
        let (_, decoder) = decode_all(b"0; ieof\r\n\r\n");
        assert!(decoder.is_done());
        assert!(decoder.ieof());
    }

    #[test]
    fn invalid() {
        let mut decoder = ChunkedBodyDecoder::new(1024);
        let mut input = BytesMut::from(&b"3\r\nabcX\r\n"[..]);
        assert!(decoder.decode(&mut input, |d| d.len()).is_err());

        let mut decoder = ChunkedBodyDecoder::new(8);
        let mut input = BytesMut::from(&b"000000000000003\r\n"[..]);
        assert!(decoder.decode(&mut input, |d| d.len()).is_err());

        let mut decoder = ChunkedBodyDecoder::new(1024);
        let mut input = BytesMut::from(&b"zz\r\n"[..]);
        assert!(decoder.decode(&mut input, |d| d.len()).is_err());
    }
}
