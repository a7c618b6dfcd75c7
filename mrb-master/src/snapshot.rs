//! Snapshot codec: each job persists as two blobs in the lock service, a
//! compressed `JobDescriptor` and a compressed `JobCollection` holding the
//! job state, the allocation history and the input split list. Encoding is
//! an explicit serialize-then-compress pipeline (prost, then Snappy);
//! decoding is the inverse.

use prost::Message;
use snap::raw::{Decoder, Encoder};
use thiserror::Error;

use crate::alloc::InputChunk;
use crate::core::master::{InputInfo, JobAllocation, JobCollection, JobDescriptor, JobState};
use crate::job_tracker::AllocateItem;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snappy: {0}")]
    Compression(#[from] snap::Error),
    #[error("protobuf: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub fn encode_descriptor(desc: &JobDescriptor) -> Result<Vec<u8>, SnapshotError> {
    let buf = desc.encode_to_vec();
    Ok(Encoder::new().compress_vec(&buf)?)
}

pub fn decode_descriptor(blob: &[u8]) -> Result<JobDescriptor, SnapshotError> {
    let buf = Decoder::new().decompress_vec(blob)?;
    Ok(JobDescriptor::decode(buf.as_slice())?)
}

pub fn encode_job_data(
    state: JobState,
    history: &[AllocateItem],
    inputs: &[InputChunk],
) -> Result<Vec<u8>, SnapshotError> {
    let collection = JobCollection {
        state: state as i32,
        allocations: history.iter().map(JobAllocation::from).collect(),
        inputs: inputs
            .iter()
            .map(|chunk| InputInfo {
                input_file: chunk.input_file.clone(),
                offset: chunk.offset,
                size: chunk.size,
            })
            .collect(),
    };
    let buf = collection.encode_to_vec();
    Ok(Encoder::new().compress_vec(&buf)?)
}

pub fn decode_job_data(
    blob: &[u8],
) -> Result<(JobState, Vec<AllocateItem>, Vec<InputChunk>), SnapshotError> {
    let buf = Decoder::new().decompress_vec(blob)?;
    let collection = JobCollection::decode(buf.as_slice())?;
    let state = collection.state();
    let history = collection.allocations.iter().map(AllocateItem::from).collect();
    let inputs = collection
        .inputs
        .iter()
        .map(|input| InputChunk {
            input_file: input.input_file.clone(),
            offset: input.offset,
            size: input.size,
        })
        .collect();
    Ok((state, history, inputs))
}

impl From<&AllocateItem> for JobAllocation {
    fn from(item: &AllocateItem) -> Self {
        JobAllocation {
            resource_no: item.resource_no,
            attempt: item.attempt,
            endpoint: item.endpoint.clone(),
            state: item.state as i32,
            alloc_time: item.alloc_time,
            period: item.period,
            is_map: item.is_map,
        }
    }
}

impl From<&JobAllocation> for AllocateItem {
    fn from(alloc: &JobAllocation) -> Self {
        AllocateItem {
            resource_no: alloc.resource_no,
            attempt: alloc.attempt,
            endpoint: alloc.endpoint.clone(),
            state: alloc.state(),
            alloc_time: alloc.alloc_time,
            period: alloc.period,
            is_map: alloc.is_map,
        }
    }
}
