//! KEX state machine (C6): per-contact lifecycle, the pending-key queue, and
//! the transitions that bind a received pubkey to a name (§4.6).
//!
//! ```text
//! (none) --ADD(name)-->          PENDING_SENT (I)      enqueues OSM:KEY:<my_pk>
//! (none) --CREATE(pending_pk)--> PENDING_RECEIVED (R)  no outbox
//! PENDING_RECEIVED --COMPLETE--> ESTABLISHED (R)       enqueues OSM:KEY:<my_pk>
//! PENDING_SENT --ASSIGN(pk)----> ESTABLISHED (I)       no outbox
//! ```
//!
//! Contact creation/status-change and its outbox enqueue (where one exists)
//! always land in the same `Store` transaction, never two.

use osm_crypto::{Identity, PublicKey};
use osm_store::clock::TimeProvider;
use osm_store::{ContactId, ContactRecord, ContactStatus, PendingKeyRecord, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum KexError {
    #[error("a contact named {0:?} already exists")]
    NameConflict(String),
    #[error("name exceeds 63 bytes")]
    NameTooLong,
    #[error("that key is already pending")]
    DuplicatePending,
    #[error("no such contact")]
    ContactNotFound,
    #[error("no pending key to consume")]
    NoPendingKey,
    #[error("more than one pending key; operator must pick one")]
    AmbiguousPendingKey,
    #[error("{0}")]
    WrongState(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Link(#[from] osm_link::LinkError),
}

const fn osm_contacts_name_limit() -> usize {
    63
}

/// Returns the device identity, generating and persisting one if absent
/// ("created on first startup via C6 on demand", §3).
pub fn ensure_identity(store: &mut Store) -> Result<Identity, KexError> {
    if let Some(identity) = store.identity() {
        return Ok(identity.clone());
    }
    let identity = Identity::generate();
    store.set_identity(identity.clone())?;
    Ok(identity)
}

/// `CMD:KEYGEN`.
pub fn keygen(store: &mut Store) -> Result<PublicKey, KexError> {
    Ok(ensure_identity(store)?.pk)
}

/// `CMD:SET_IDENTITY:<pk_b64>:<sk_b64>`.
pub fn set_identity(store: &mut Store, pk: osm_crypto::PublicKey, sk: osm_crypto::SecretKey) -> Result<(), KexError> {
    store.set_identity(Identity::from_keypair(pk, sk))?;
    Ok(())
}

fn kex_envelope(pk: PublicKey) -> Vec<u8> {
    format!("OSM:KEY:{}", pk.to_base64()).into_bytes()
}

fn check_name(store: &Store, name: &str) -> Result<(), KexError> {
    if name.len() > osm_contacts_name_limit() {
        return Err(KexError::NameTooLong);
    }
    if store.contact_by_name(name).is_some() {
        return Err(KexError::NameConflict(name.to_string()));
    }
    Ok(())
}

fn sole_pending_key(store: &Store) -> Result<PublicKey, KexError> {
    match store.pending_keys().len() {
        0 => Err(KexError::NoPendingKey),
        1 => Ok(store.pending_keys()[0].pubkey),
        _ => Err(KexError::AmbiguousPendingKey),
    }
}

/// An incoming `OSM:KEY:<pubkey>` (§4.7 dispatch). Appended to the
/// pending-key queue unless the pubkey is already pending or already bound
/// to a contact, in which case it is rejected (`DUPLICATE_PENDING`, no side
/// effects).
pub fn submit_pending_key(store: &mut Store, clock: &dyn TimeProvider, pubkey: PublicKey) -> Result<(), KexError> {
    let already_pending = store.pending_keys().iter().any(|p| p.pubkey == pubkey);
    let already_bound = store.contacts().any(|c| c.peer_pubkey == Some(pubkey));
    if already_pending || already_bound {
        return Err(KexError::DuplicatePending);
    }
    store.add_pending_key(PendingKeyRecord {
        pubkey,
        received_at: clock.now_ms(),
    })?;
    tracing::debug!("KEX queued for assignment");
    Ok(())
}

/// `CMD:ADD:<name>`: `(none) --ADD--> PENDING_SENT`, enqueueing our pubkey.
pub fn add(store: &mut Store, clock: &dyn TimeProvider, name: &str) -> Result<ContactId, KexError> {
    check_name(store, name)?;
    let identity = ensure_identity(store)?;
    let id = store.allocate_contact_id();
    let contact = ContactRecord {
        id,
        name: name.to_string(),
        status: ContactStatus::PendingSent,
        peer_pubkey: None,
        unread: 0,
    };
    let entry = osm_link::build_entry(clock, kex_envelope(identity.pk))?;
    store.upsert_contact_and_enqueue(contact, entry)?;
    Ok(id)
}

/// `CMD:CREATE:<name>`: promotes the sole pending key to a new
/// `PENDING_RECEIVED` contact. No outbox entry.
pub fn create(store: &mut Store, name: &str) -> Result<ContactId, KexError> {
    check_name(store, name)?;
    let pubkey = sole_pending_key(store)?;
    let id = store.allocate_contact_id();
    let contact = ContactRecord {
        id,
        name: name.to_string(),
        status: ContactStatus::PendingReceived,
        peer_pubkey: Some(pubkey),
        unread: 0,
    };
    store.consume_pending_key_into_contact(pubkey, contact)?;
    Ok(id)
}

/// `CMD:COMPLETE:<name>`: `PENDING_RECEIVED --> ESTABLISHED`, enqueueing our
/// pubkey so the responder's peer learns it in turn.
pub fn complete(store: &mut Store, clock: &dyn TimeProvider, name: &str) -> Result<(), KexError> {
    let mut contact = store.contact_by_name(name).cloned().ok_or(KexError::ContactNotFound)?;
    if contact.status != ContactStatus::PendingReceived {
        return Err(KexError::WrongState("COMPLETE is only legal from PENDING_RECEIVED"));
    }
    let identity = ensure_identity(store)?;
    contact.status = ContactStatus::Established;
    let entry = osm_link::build_entry(clock, kex_envelope(identity.pk))?;
    store.upsert_contact_and_enqueue(contact, entry)?;
    Ok(())
}

/// `CMD:ASSIGN:<name>`: `PENDING_SENT --> ESTABLISHED` by binding the sole
/// pending key. No outbox entry (the peer already has our pubkey from `ADD`).
pub fn assign(store: &mut Store, name: &str) -> Result<(), KexError> {
    let mut contact = store.contact_by_name(name).cloned().ok_or(KexError::ContactNotFound)?;
    if contact.status != ContactStatus::PendingSent {
        return Err(KexError::WrongState("ASSIGN requires a PENDING_SENT contact"));
    }
    let pubkey = sole_pending_key(store)?;
    contact.peer_pubkey = Some(pubkey);
    contact.status = ContactStatus::Established;
    store.consume_pending_key_into_contact(pubkey, contact)?;
    Ok(())
}
