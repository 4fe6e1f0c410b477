//! Contact book and per-contact thread (C8): the operations the command
//! dispatcher and UI drive directly. Every mutation here ends in exactly one
//! [`osm_store::Store`] commit (§4.8 "all mutations are followed by a C2
//! commit").

use osm_crypto::PublicKey;
use osm_store::clock::TimeProvider;
use osm_store::{ContactId, ContactRecord, ContactStatus, Direction, MessageRecord, Store, StoreError};

pub const MAX_NAME_LEN: usize = 63;
pub const MAX_PLAINTEXT_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ContactsError {
    #[error("a contact named {0:?} already exists")]
    NameConflict(String),
    #[error("no such contact")]
    ContactNotFound,
    #[error("no message matches that text")]
    MessageNotFound,
    #[error("a contact already has that peer key")]
    PeerKeyConflict,
    #[error("name exceeds {MAX_NAME_LEN} bytes")]
    NameTooLong,
    #[error("message exceeds {MAX_PLAINTEXT_LEN} bytes")]
    PlaintextTooLong,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn find_by_name(store: &Store, name: &str) -> Option<ContactRecord> {
    store.contact_by_name(name).cloned()
}

/// `add_contact(name, optional_peer_pk) → id` (§4.8). If `peer_pk` is given
/// the contact starts `ESTABLISHED`; otherwise `PENDING_SENT` (the `ADD`
/// half of the KEX lifecycle, §4.6).
pub fn add_contact(
    store: &mut Store,
    name: &str,
    peer_pk: Option<PublicKey>,
) -> Result<ContactId, ContactsError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ContactsError::NameTooLong);
    }
    if store.contact_by_name(name).is_some() {
        return Err(ContactsError::NameConflict(name.to_string()));
    }
    if let Some(pk) = peer_pk {
        if store
            .contacts()
            .any(|c| c.status == ContactStatus::Established && c.peer_pubkey == Some(pk))
        {
            return Err(ContactsError::PeerKeyConflict);
        }
    }

    let id = store.allocate_contact_id();
    let status = if peer_pk.is_some() {
        ContactStatus::Established
    } else {
        ContactStatus::PendingSent
    };
    store.upsert_contact(ContactRecord {
        id,
        name: name.to_string(),
        status,
        peer_pubkey: peer_pk,
        unread: 0,
    })?;
    Ok(id)
}

/// `rename_contact(old, new)`: unique, preserves thread (thread is keyed by
/// contact id, not name, so renaming never touches it).
pub fn rename_contact(store: &mut Store, old: &str, new: &str) -> Result<(), ContactsError> {
    if new.len() > MAX_NAME_LEN {
        return Err(ContactsError::NameTooLong);
    }
    let mut contact = find_by_name(store, old).ok_or(ContactsError::ContactNotFound)?;
    if old != new && store.contact_by_name(new).is_some() {
        return Err(ContactsError::NameConflict(new.to_string()));
    }
    contact.name = new.to_string();
    store.upsert_contact(contact)?;
    Ok(())
}

/// `delete_contact(name)`: cascades the thread; pending keys are unaffected.
pub fn delete_contact(store: &mut Store, name: &str) -> Result<(), ContactsError> {
    let contact = find_by_name(store, name).ok_or(ContactsError::ContactNotFound)?;
    store.delete_contact(contact.id)?;
    Ok(())
}

/// `append_incoming(contact_id, plaintext)`: increments `unread` (§4.8, C7's
/// successful-decrypt path).
pub fn append_incoming(
    store: &mut Store,
    clock: &dyn TimeProvider,
    contact_id: ContactId,
    plaintext: &str,
) -> Result<(), ContactsError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(ContactsError::PlaintextTooLong);
    }
    let contact = store.contact(contact_id).cloned().ok_or(ContactsError::ContactNotFound)?;
    let message = MessageRecord {
        id: store.allocate_message_id(),
        contact_id,
        direction: Direction::In,
        timestamp: clock.now_ms(),
        plaintext: plaintext.to_string(),
    };
    store.append_incoming_message(contact, message)?;
    Ok(())
}

/// `append_outgoing(contact_id, plaintext)`: no unread change.
pub fn append_outgoing(
    store: &mut Store,
    clock: &dyn TimeProvider,
    contact_id: ContactId,
    plaintext: &str,
) -> Result<(), ContactsError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(ContactsError::PlaintextTooLong);
    }
    if store.contact(contact_id).is_none() {
        return Err(ContactsError::ContactNotFound);
    }
    let message = MessageRecord {
        id: store.allocate_message_id(),
        contact_id,
        direction: Direction::Out,
        timestamp: clock.now_ms(),
        plaintext: plaintext.to_string(),
    };
    store.append_message(message)?;
    Ok(())
}

/// `delete_message(text)`: deletes the single message whose plaintext
/// matches `text` exactly in the given contact's thread (§4.8, `CMD:DELETE_MSG`).
pub fn delete_message(store: &mut Store, contact_id: ContactId, text: &str) -> Result<(), ContactsError> {
    let message_id = store
        .thread(contact_id)
        .iter()
        .find(|m| m.plaintext == text)
        .map(|m| m.id)
        .ok_or(ContactsError::MessageNotFound)?;
    store.delete_message(contact_id, message_id)?;
    Ok(())
}

/// Contacts in id order (§4.8 "enumerate contacts (in id order)").
pub fn list_contacts(store: &Store) -> impl Iterator<Item = &ContactRecord> {
    store.contacts()
}

/// A contact's thread in insertion order.
pub fn thread(store: &Store, contact_id: ContactId) -> &[MessageRecord] {
    store.thread(contact_id)
}

/// `CMD:RECV_COUNT:<name>`: count of `IN` messages for a contact by name.
pub fn recv_count(store: &Store, name: &str) -> Result<usize, ContactsError> {
    let contact = store.contact_by_name(name).ok_or(ContactsError::ContactNotFound)?;
    Ok(store
        .thread(contact.id)
        .iter()
        .filter(|m| m.direction == Direction::In)
        .count())
}
