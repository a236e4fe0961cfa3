/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod encoder;
pub use encoder::{close_chunk, last_chunk, open_chunk};

mod decoder;
pub use decoder::{ChunkedBodyDecoder, ChunkedDecodeError};
