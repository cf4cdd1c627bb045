use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{ErrorKind, TunnelResult};
use crate::tunnel_error;

/// Bytes of one encoded batch and the number of records they carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBatch {
    pub bytes: Bytes,
    pub record_count: u64,
}

impl EncodedBatch {
    pub fn new(bytes: impl Into<Bytes>, record_count: u64) -> Self {
        Self {
            bytes: bytes.into(),
            record_count,
        }
    }
}

/// Encodes caller batches into the bytes streamed for a block.
///
/// The encoding must match the data format announced when the block is opened.
pub trait BatchCodec: Send + Sync {
    type Batch: ?Sized;

    fn encode(&self, batch: &Self::Batch) -> TunnelResult<EncodedBatch>;
}

/// Passes already encoded batches through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBatchCodec;

impl BatchCodec for RawBatchCodec {
    type Batch = EncodedBatch;

    fn encode(&self, batch: &Self::Batch) -> TunnelResult<EncodedBatch> {
        Ok(batch.clone())
    }
}

/// Encodes a slice of records as newline-delimited JSON, one record per line.
#[derive(Debug, Clone, Copy)]
pub struct JsonLinesCodec<T> {
    _record: PhantomData<fn(&T)>,
}

impl<T> JsonLinesCodec<T> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BatchCodec for JsonLinesCodec<T>
where
    T: Serialize,
{
    type Batch = [T];

    fn encode(&self, batch: &Self::Batch) -> TunnelResult<EncodedBatch> {
        let mut buffer = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buffer, record).map_err(|err| {
                tunnel_error!(
                    ErrorKind::SerializationError,
                    "Encoding a record failed",
                    source: err
                )
            })?;
            buffer.push(b'\n');
        }

        Ok(EncodedBatch::new(buffer, batch.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Event {
        id: u32,
        name: &'static str,
    }

    #[test]
    fn json_lines_encodes_one_record_per_line() {
        let codec = JsonLinesCodec::<Event>::new();
        let encoded = codec
            .encode(&[
                Event { id: 1, name: "open" },
                Event { id: 2, name: "close" },
            ])
            .unwrap();

        assert_eq!(encoded.record_count, 2);
        assert_eq!(
            encoded.bytes,
            Bytes::from_static(b"{\"id\":1,\"name\":\"open\"}\n{\"id\":2,\"name\":\"close\"}\n")
        );
    }

    #[test]
    fn raw_codec_passes_bytes_through() {
        let batch = EncodedBatch::new(Bytes::from_static(b"abc"), 3);
        assert_eq!(RawBatchCodec.encode(&batch).unwrap(), batch);
    }
}
