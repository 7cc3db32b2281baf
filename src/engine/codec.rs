//! Serialized block format for persisted partitions.
//!
//! A block is one partition written as an Arrow IPC stream and then compressed
//! with Zstandard. The same bytes back serialized memory blocks, off-heap blocks
//! and disk blocks. This module is a safe, panic-free wrapper around the `zstd`
//! crate and Arrow's IPC stream reader/writer.

use std::io::{Cursor, Write};

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use zstd::stream::{Decoder, Encoder};

use crate::error::tambakError;

//==================================================================================
// 1. Zstd layer
//==================================================================================

/// Compresses a byte slice using the Zstandard algorithm, writing to an output buffer.
fn compress_slice(
    input_bytes: &[u8],
    output_buf: &mut Vec<u8>,
    level: i32,
) -> Result<(), tambakError> {
    let mut encoder =
        Encoder::new(output_buf, level).map_err(|e| tambakError::ZstdError(e.to_string()))?;
    encoder
        .write_all(input_bytes)
        .map_err(|e| tambakError::ZstdError(e.to_string()))?;

    // `finish` is essential to finalize the Zstd frame.
    encoder
        .finish()
        .map_err(|e| tambakError::ZstdError(e.to_string()))?;
    Ok(())
}

/// Decompresses a Zstandard-compressed byte slice, writing to an output buffer.
fn decompress_slice(input_bytes: &[u8], output_buf: &mut Vec<u8>) -> Result<(), tambakError> {
    let mut decoder =
        Decoder::new(input_bytes).map_err(|e| tambakError::ZstdError(e.to_string()))?;
    std::io::copy(&mut decoder, output_buf).map_err(|e| tambakError::ZstdError(e.to_string()))?;
    Ok(())
}

//==================================================================================
// 2. Public block API
//==================================================================================

/// Serializes one partition into a compressed block.
pub(crate) fn encode_block(batch: &RecordBatch, level: i32) -> Result<Vec<u8>, tambakError> {
    let mut ipc_bytes = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut ipc_bytes, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }

    let mut compressed = Vec::new();
    compress_slice(&ipc_bytes, &mut compressed, level)?;
    Ok(compressed)
}

/// Restores a partition from a block produced by `encode_block`.
pub(crate) fn decode_block(bytes: &[u8]) -> Result<RecordBatch, tambakError> {
    let mut ipc_bytes = Vec::new();
    decompress_slice(bytes, &mut ipc_bytes)?;

    let reader = StreamReader::try_new(Cursor::new(ipc_bytes), None)?;
    let schema = reader.schema();
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema)),
        1 => Ok(batches.remove(0)),
        _ => Ok(arrow::compute::concat_batches(&schema, &batches)?),
    }
}
