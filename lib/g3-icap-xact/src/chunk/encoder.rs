/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::Write;

pub fn open_chunk(buf: &mut Vec<u8>, size: usize, ieof: bool) {
    if ieof {
        let _ = write!(buf, "{size:x}; ieof\r\n");
    } else {
        let _ = write!(buf, "{size:x}\r\n");
    }
}

pub fn close_chunk(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"\r\n");
}

/// The zero size chunk ending a body, optionally marked as the end of a preview.
pub fn last_chunk(buf: &mut Vec<u8>, ieof: bool) {
    open_chunk(buf, 0, ieof);
    close_chunk(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_chunk() {
        let mut buf = Vec::new();
        open_chunk(&mut buf, 26, false);
        buf.extend_from_slice(b"abcdefghijklmnopqrstuvwxyz");
        close_chunk(&mut buf);
        assert_eq!(
            buf.as_slice(),
            b"1a\r\nabcdefghijklmnopqrstuvwxyz\r\n".as_slice()
        );
    }

    #[test]
    fn terminating() {
        let mut buf = Vec::new();
        last_chunk(&mut buf, false);
        assert_eq!(buf.as_slice(), b"0\r\n\r\n");

        let mut buf = Vec::new();
        last_chunk(&mut buf, true);
        assert_eq!(buf.as_slice(), b"0; ieof\r\n\r\n");
    }
}
