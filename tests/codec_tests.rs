//! Tests for the versioned envelope codec: round trips, version handling,
//! and decode failures for unknown job types and corrupt bytes.


use hopper::codec::{decode_envelope, encode_envelope, CodecError, ENVELOPE_VERSION};
use hopper::envelope::{Envelope, EnvelopeState};
use hopper::registry::JobRegistry;

use test_helpers::*;

fn probe_registry() -> JobRegistry {
    let registry = JobRegistry::new();
    registry.register::<ProbeJob>(PROBE_JOB_TYPE);
    registry
}

#[test]
fn round_trip_preserves_bookkeeping() {
    let registry = probe_registry();
    let job = ProbeJob::new("codec-bookkeeping", Behavior::Succeed);
    let envelope = Envelope::from_parts(
        "envelope-1".to_string(),
        PROBE_JOB_TYPE.to_string(),
        Box::new(job),
        3,
        EnvelopeState::Running,
        1_700_000_000_000,
    );

    let bytes = encode_envelope(&envelope).expect("encode");
    assert_eq!(bytes[0], ENVELOPE_VERSION);

    let decoded = decode_envelope(&bytes, &registry).expect("decode");
    assert_eq!(decoded.id(), "envelope-1");
    assert_eq!(decoded.job_type(), PROBE_JOB_TYPE);
    assert_eq!(decoded.tries(), 3);
    assert_eq!(decoded.state(), EnvelopeState::Running);
    assert_eq!(decoded.created_at_ms(), 1_700_000_000_000);
}

#[test]
fn round_trip_revives_job_policy() {
    let registry = probe_registry();
    let job = ProbeJob::new("codec-policy", Behavior::Fail)
        .with_max_tries(7)
        .with_timeout_ms(5_000)
        .with_retry_until_ms(1_800_000_000_000)
        .with_expiration_ms(1_900_000_000_000);
    let envelope = Envelope::new(Box::new(job));

    let bytes = encode_envelope(&envelope).expect("encode");
    let decoded = decode_envelope(&bytes, &registry).expect("decode");

    // Policy lives on the revived job, reachable through the envelope
    assert_eq!(decoded.max_tries(), 7);
    assert_eq!(decoded.timeout_ms(), 5_000);
    assert_eq!(decoded.retry_until_ms(), Some(1_800_000_000_000));
    assert_eq!(decoded.expiration_ms(), Some(1_900_000_000_000));
    assert!(!decoded.continue_in_background());

    // The payload itself survives byte for byte
    let revived: ProbeJob =
        serde_json::from_slice(&decoded.payload().expect("payload")).expect("payload json");
    assert_eq!(revived.probe_key, "codec-policy");
    assert_eq!(revived.max_tries, 7);
}

#[test]
fn fresh_envelope_round_trip_keeps_defaults() {
    let registry = probe_registry();
    let envelope = Envelope::new(Box::new(ProbeJob::new("codec-defaults", Behavior::Succeed)));

    let bytes = encode_envelope(&envelope).expect("encode");
    let decoded = decode_envelope(&bytes, &registry).expect("decode");

    assert_eq!(decoded.id(), envelope.id());
    assert_eq!(decoded.tries(), 0);
    assert_eq!(decoded.state(), EnvelopeState::Created);
    assert_eq!(decoded.created_at_ms(), envelope.created_at_ms());
    assert_eq!(decoded, envelope);
}

#[test]
fn decode_unregistered_job_type_fails() {
    let envelope = Envelope::new(Box::new(GhostJob));
    let bytes = encode_envelope(&envelope).expect("encode");

    // A registry without the ghost tag cannot revive the job
    let registry = probe_registry();
    match decode_envelope(&bytes, &registry) {
        Err(CodecError::JobNotRegistered(tag)) => assert_eq!(tag, "hopper.test.ghost"),
        other => panic!("expected JobNotRegistered, got {:?}", other),
    }
}

#[test]
fn decode_empty_bytes_fails() {
    let registry = probe_registry();
    match decode_envelope(&[], &registry) {
        Err(CodecError::TooShort) => {}
        other => panic!("expected TooShort, got {:?}", other),
    }
}

#[test]
fn decode_wrong_version_fails() {
    let registry = probe_registry();
    let envelope = Envelope::new(Box::new(ProbeJob::new("codec-version", Behavior::Succeed)));
    let mut bytes = encode_envelope(&envelope).expect("encode");
    bytes[0] = ENVELOPE_VERSION + 1;

    match decode_envelope(&bytes, &registry) {
        Err(CodecError::UnsupportedVersion { expected, found }) => {
            assert_eq!(expected, ENVELOPE_VERSION);
            assert_eq!(found, ENVELOPE_VERSION + 1);
        }
        other => panic!("expected UnsupportedVersion, got {:?}", other),
    }
}

#[test]
fn decode_corrupt_archive_fails() {
    let registry = probe_registry();
    let mut bytes = vec![ENVELOPE_VERSION];
    bytes.extend_from_slice(b"definitely not an archive");

    match decode_envelope(&bytes, &registry) {
        Err(CodecError::Rkyv(_)) => {}
        other => panic!("expected Rkyv error, got {:?}", other),
    }
}
