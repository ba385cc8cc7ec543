use rkyv::{AlignedVec, Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeState};
use crate::registry::JobRegistry;

/// Error type for versioned envelope codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    /// Data is too short to contain a version header
    #[error("data too short to contain version header")]
    TooShort,
    /// Version byte doesn't match expected version
    #[error("unsupported version: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u8, found: u8 },
    /// Underlying rkyv serialization/deserialization error
    #[error("rkyv error: {0}")]
    Rkyv(String),
    /// The stored job type tag has no registered factory
    #[error("job type not registered: {0}")]
    JobNotRegistered(String),
    /// The job payload could not be produced or revived
    #[error("payload error: {0}")]
    Payload(String),
}

/// Version for the stored envelope format.
/// When evolving the schema, bump this and add migration logic in decode.
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the version header - just a single byte.
/// Alignment is handled at decode time by copying into an AlignedVec.
const VERSION_HEADER_SIZE: usize = 1;

/// Wire shape of an envelope. The job itself travels as opaque payload
/// bytes; the registry factory revives it on decode.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
struct StoredEnvelope {
    id: String,
    job_type: String,
    tries: u32,
    state: EnvelopeState,
    created_at_ms: i64,
    payload: Vec<u8>,
}

/// Prepend a single version byte to the rkyv-serialized data.
#[inline]
fn prepend_version(version: u8, data: AlignedVec) -> Vec<u8> {
    let mut result = Vec::with_capacity(VERSION_HEADER_SIZE + data.len());
    result.push(version);
    result.extend_from_slice(&data);
    result
}

/// Strip the version byte and return the remaining data, validating the version matches.
/// Copies into an AlignedVec to ensure proper alignment for rkyv deserialization.
#[inline]
fn strip_version(expected: u8, data: &[u8]) -> Result<AlignedVec, CodecError> {
    if data.len() < VERSION_HEADER_SIZE {
        return Err(CodecError::TooShort);
    }
    let found = data[0];
    if found != expected {
        return Err(CodecError::UnsupportedVersion { expected, found });
    }
    let rkyv_data = &data[VERSION_HEADER_SIZE..];
    let mut aligned = AlignedVec::with_capacity(rkyv_data.len());
    aligned.extend_from_slice(rkyv_data);
    Ok(aligned)
}

/// Serialize an envelope, including the job's own payload bytes.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let payload = envelope
        .payload()
        .map_err(|e| CodecError::Payload(e.to_string()))?;
    let stored = StoredEnvelope {
        id: envelope.id().to_string(),
        job_type: envelope.job_type().to_string(),
        tries: envelope.tries(),
        state: envelope.state(),
        created_at_ms: envelope.created_at_ms(),
        payload,
    };
    let data = rkyv::to_bytes::<StoredEnvelope, 256>(&stored)
        .map_err(|e| CodecError::Rkyv(e.to_string()))?;
    Ok(prepend_version(ENVELOPE_VERSION, data))
}

/// Deserialize an envelope, reviving the job through its registered factory.
pub fn decode_envelope(bytes: &[u8], registry: &JobRegistry) -> Result<Envelope, CodecError> {
    let data = strip_version(ENVELOPE_VERSION, bytes)?;
    let archived = rkyv::check_archived_root::<StoredEnvelope>(&data)
        .map_err(|e| CodecError::Rkyv(e.to_string()))?;
    let mut des = rkyv::Infallible;
    let stored: StoredEnvelope = RkyvDeserialize::deserialize(archived, &mut des)
        .unwrap_or_else(|_| unreachable!("infallible deserialization for StoredEnvelope"));

    let factory = registry
        .resolve(&stored.job_type)
        .ok_or_else(|| CodecError::JobNotRegistered(stored.job_type.clone()))?;
    let job = factory(&stored.payload).map_err(|e| CodecError::Payload(e.to_string()))?;

    Ok(Envelope::from_parts(
        stored.id,
        stored.job_type,
        job,
        stored.tries,
        stored.state,
        stored.created_at_ms,
    ))
}
