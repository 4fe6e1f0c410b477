//! Link outbox (C4) and ACK layer (C5).
//!
//! The outbox is a bounded FIFO of fully-built envelopes awaiting
//! acknowledgement from the companion app. Enqueue is content-addressed and
//! idempotent; overflow evicts the oldest entry; everything durable here
//! goes through a single [`osm_store::Store`] transaction so an enqueue,
//! eviction, or ACK-removal either fully happened or didn't (§4.2, §4.4).

use osm_proto::constants::{MAX_MSG_SIZE, MAX_OUTBOX};
use osm_store::clock::TimeProvider;
use osm_store::{MsgDigest, OutboxRecord, Store, StoreError};
use sha2::{Digest, Sha512};
use std::collections::VecDeque;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("payload of {0} bytes exceeds MAX_MSG_SIZE")]
    OversizedMessage(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `msg_id(payload) := first 8 bytes of SHA-512(payload)` (§4.5).
pub fn msg_id(payload: &[u8]) -> MsgDigest {
    let digest = Sha512::digest(payload);
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    id
}

/// Builds the ACK fragment a receiver emits upon successful reassembly.
pub fn build_ack(payload: &[u8]) -> Vec<u8> {
    osm_proto::ack_fragment(&msg_id(payload))
}

/// Enqueues `payload` (idempotent on `msg_id`), evicting the oldest entry if
/// the outbox is already at `MAX_OUTBOX`. Returns the entry's `msg_id`.
pub fn enqueue(
    store: &mut Store,
    clock: &dyn TimeProvider,
    payload: Vec<u8>,
) -> Result<MsgDigest, LinkError> {
    if payload.len() > MAX_MSG_SIZE {
        return Err(LinkError::OversizedMessage(payload.len()));
    }
    let id = msg_id(&payload);
    if store.outbox().iter().any(|e| e.msg_id == id) {
        return Ok(id);
    }

    let entry = OutboxRecord {
        msg_id: id,
        payload,
        enqueued_at: clock.now_ms(),
        retry_count: 0,
    };

    if store.outbox().len() >= MAX_OUTBOX {
        let oldest = store.outbox().front().expect("len >= MAX_OUTBOX > 0").msg_id;
        tracing::debug!(msg_id = ?oldest, "outbox full, evicting oldest entry");
        store.outbox_insert_with_eviction(oldest, entry)?;
    } else {
        store.outbox_insert(entry)?;
    }
    Ok(id)
}

/// Builds an [`OutboxRecord`] and enqueues it without going through `Store`
/// directly, for callers (C6) that already have a `Store` transaction method
/// bundling the enqueue with another mutation (see
/// [`osm_store::Store::upsert_contact_and_enqueue`]).
pub fn build_entry(clock: &dyn TimeProvider, payload: Vec<u8>) -> Result<OutboxRecord, LinkError> {
    if payload.len() > MAX_MSG_SIZE {
        return Err(LinkError::OversizedMessage(payload.len()));
    }
    Ok(OutboxRecord {
        msg_id: msg_id(&payload),
        payload,
        enqueued_at: clock.now_ms(),
        retry_count: 0,
    })
}

/// Processes an incoming ACK fragment's raw payload. Removes the matching
/// outbox entry if present; returns whether anything was removed. A
/// malformed (non-8-byte) or unknown-id ACK is silently discarded, never an
/// error (§4.5, §7).
pub fn handle_ack(store: &mut Store, ack_payload: &[u8]) -> Result<bool, LinkError> {
    let Ok(id): Result<MsgDigest, _> = ack_payload.try_into() else {
        tracing::debug!(len = ack_payload.len(), "malformed ACK payload, discarding");
        return Ok(false);
    };
    if !store.outbox().iter().any(|e| e.msg_id == id) {
        return Ok(false);
    }
    store.outbox_remove(id)?;
    Ok(true)
}

/// Drives fragment-by-fragment delivery of the outbox head. Fragments of
/// different entries are never interleaved: a session only ever has one
/// entry's fragment train in flight, and `reset` (called on every new CA
/// session) forces that train to restart from its `START` (§4.4, §5).
#[derive(Default)]
pub struct SendSession {
    head_msg_id: Option<MsgDigest>,
    pending: VecDeque<Vec<u8>>,
}

impl SendSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call when a CA session begins (including reconnects) so delivery of
    /// whatever is currently at the head restarts from its `START`.
    pub fn reset(&mut self) {
        self.head_msg_id = None;
        self.pending.clear();
    }

    /// Returns the next fragment to hand to the transport, if the outbox is
    /// non-empty and the CA is ready for one. Intended to be called once per
    /// tick while a CA session is present.
    pub fn poll(&mut self, outbox: &VecDeque<OutboxRecord>) -> Option<Vec<u8>> {
        let head = outbox.front()?;
        if self.head_msg_id != Some(head.msg_id) {
            self.head_msg_id = Some(head.msg_id);
            self.pending = osm_proto::fragment_message(&head.payload)
                .expect("outbox entries are validated to MAX_MSG_SIZE at enqueue")
                .into();
        }
        self.pending.pop_front()
    }
}
