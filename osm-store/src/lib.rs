//! Persistent store (C2): atomic, crash-safe, journaled persistence of
//! identity, contacts, messages, pending keys, and the outbox.
//!
//! Every mutating call on [`Store`] appends exactly one journal transaction
//! (§4.2 "atomicity per transaction") before updating the in-memory image,
//! so a crash either sees the whole mutation or none of it. Startup replays
//! the journal once (`O(total records)`); a corrupt or truncated tail is
//! discarded by [`journal::Journal::read_all`] rather than surfaced,
//! matching the "no partial reads" contract — if even the identity record
//! is unrecoverable, `Store::open` starts from an empty image and the
//! caller (C6) regenerates identity on first use.

pub mod clock;
mod journal;

use journal::Journal;
use osm_crypto::{Identity, PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub type ContactId = u32;
pub type MessageId = u64;
pub type MsgDigest = [u8; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    PendingSent,
    PendingReceived,
    Established,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: ContactId,
    pub name: String,
    pub status: ContactStatus,
    pub peer_pubkey: Option<PublicKey>,
    pub unread: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub contact_id: ContactId,
    pub direction: Direction,
    pub timestamp: i64,
    pub plaintext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingKeyRecord {
    pub pubkey: PublicKey,
    pub received_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub msg_id: MsgDigest,
    pub payload: Vec<u8>,
    pub enqueued_at: i64,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Record {
    SetIdentity { pk: [u8; 32], sk: [u8; 32] },
    UpsertContact(ContactRecord),
    DeleteContact(ContactId),
    AppendMessage(MessageRecord),
    DeleteMessage { contact_id: ContactId, message_id: MessageId },
    AddPendingKey(PendingKeyRecord),
    RemovePendingKey(PublicKey),
    OutboxInsert(OutboxRecord),
    OutboxRemove(MsgDigest),
}

/// The full in-memory image, backed durably by the journal.
#[derive(Default)]
pub struct Store {
    path: PathBuf,
    journal: Option<Journal>,
    identity: Option<Identity>,
    contacts: BTreeMap<ContactId, ContactRecord>,
    messages: BTreeMap<ContactId, Vec<MessageRecord>>,
    pending_keys: Vec<PendingKeyRecord>,
    outbox: VecDeque<OutboxRecord>,
    next_contact_id: ContactId,
    next_message_id: MessageId,
}

impl Store {
    /// Opens (or creates) the journal at `path` and replays it into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut journal = Journal::open(&path)?;
        let mut store = Store {
            path,
            journal: None,
            ..Default::default()
        };

        for raw in journal.read_all()? {
            match rmp_serde::from_slice::<Vec<Record>>(&raw) {
                Ok(records) => {
                    for record in records {
                        store.apply(record);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable journal record");
                }
            }
        }
        store.journal = Some(journal);
        Ok(store)
    }

    fn apply(&mut self, record: Record) {
        match record {
            Record::SetIdentity { pk, sk } => {
                self.identity = Some(Identity::from_keypair(PublicKey(pk), SecretKey(sk)));
            }
            Record::UpsertContact(c) => {
                self.next_contact_id = self.next_contact_id.max(c.id + 1);
                self.contacts.insert(c.id, c);
            }
            Record::DeleteContact(id) => {
                self.contacts.remove(&id);
                self.messages.remove(&id);
            }
            Record::AppendMessage(m) => {
                self.next_message_id = self.next_message_id.max(m.id + 1);
                self.messages.entry(m.contact_id).or_default().push(m);
            }
            Record::DeleteMessage { contact_id, message_id } => {
                if let Some(thread) = self.messages.get_mut(&contact_id) {
                    thread.retain(|m| m.id != message_id);
                }
            }
            Record::AddPendingKey(p) => self.pending_keys.push(p),
            Record::RemovePendingKey(pk) => self.pending_keys.retain(|p| p.pubkey != pk),
            Record::OutboxInsert(e) => self.outbox.push_back(e),
            Record::OutboxRemove(id) => self.outbox.retain(|e| e.msg_id != id),
        }
    }

    fn commit(&mut self, records: Vec<Record>) -> Result<(), StoreError> {
        let raw = rmp_serde::to_vec(&records)?;
        self.journal
            .as_mut()
            .expect("journal initialized by open()")
            .append(&raw)?;
        for record in records {
            self.apply(record);
        }
        Ok(())
    }

    // ---- identity ----

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: Identity) -> Result<(), StoreError> {
        self.commit(vec![Record::SetIdentity {
            pk: identity.pk.0,
            sk: identity.sk.0,
        }])
    }

    // ---- contacts ----

    pub fn contacts(&self) -> impl Iterator<Item = &ContactRecord> {
        self.contacts.values()
    }

    pub fn contact(&self, id: ContactId) -> Option<&ContactRecord> {
        self.contacts.get(&id)
    }

    pub fn contact_by_name(&self, name: &str) -> Option<&ContactRecord> {
        self.contacts.values().find(|c| c.name == name)
    }

    pub fn allocate_contact_id(&mut self) -> ContactId {
        let id = self.next_contact_id;
        self.next_contact_id += 1;
        id
    }

    pub fn upsert_contact(&mut self, contact: ContactRecord) -> Result<(), StoreError> {
        self.commit(vec![Record::UpsertContact(contact)])
    }

    pub fn delete_contact(&mut self, id: ContactId) -> Result<(), StoreError> {
        self.commit(vec![Record::DeleteContact(id)])
    }

    // ---- messages ----

    pub fn thread(&self, contact_id: ContactId) -> &[MessageRecord] {
        self.messages
            .get(&contact_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn allocate_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    pub fn append_message(&mut self, message: MessageRecord) -> Result<(), StoreError> {
        self.commit(vec![Record::AppendMessage(message)])
    }

    pub fn delete_message(&mut self, contact_id: ContactId, message_id: MessageId) -> Result<(), StoreError> {
        self.commit(vec![Record::DeleteMessage { contact_id, message_id }])
    }

    /// Atomically bumps a contact's `unread` counter and appends the
    /// incoming message that caused it, so the two never diverge across a
    /// crash.
    pub fn append_incoming_message(
        &mut self,
        mut contact: ContactRecord,
        message: MessageRecord,
    ) -> Result<(), StoreError> {
        contact.unread += 1;
        self.commit(vec![Record::UpsertContact(contact), Record::AppendMessage(message)])
    }

    // ---- pending keys ----

    pub fn pending_keys(&self) -> &[PendingKeyRecord] {
        &self.pending_keys
    }

    pub fn add_pending_key(&mut self, pending: PendingKeyRecord) -> Result<(), StoreError> {
        self.commit(vec![Record::AddPendingKey(pending)])
    }

    pub fn remove_pending_key(&mut self, pubkey: PublicKey) -> Result<(), StoreError> {
        self.commit(vec![Record::RemovePendingKey(pubkey)])
    }

    /// Removes a pending key and, in the same transaction, installs the
    /// contact it is bound to (`CREATE`/`ASSIGN`).
    pub fn consume_pending_key_into_contact(
        &mut self,
        pubkey: PublicKey,
        contact: ContactRecord,
    ) -> Result<(), StoreError> {
        self.commit(vec![Record::RemovePendingKey(pubkey), Record::UpsertContact(contact)])
    }

    // ---- outbox ----

    pub fn outbox(&self) -> &VecDeque<OutboxRecord> {
        &self.outbox
    }

    pub fn outbox_insert(&mut self, entry: OutboxRecord) -> Result<(), StoreError> {
        self.commit(vec![Record::OutboxInsert(entry)])
    }

    /// Evicts the oldest entry and inserts the new one in a single
    /// transaction, so overflow eviction is itself durable (§4.4).
    pub fn outbox_insert_with_eviction(
        &mut self,
        evict: MsgDigest,
        entry: OutboxRecord,
    ) -> Result<(), StoreError> {
        self.commit(vec![Record::OutboxRemove(evict), Record::OutboxInsert(entry)])
    }

    pub fn outbox_remove(&mut self, msg_id: MsgDigest) -> Result<(), StoreError> {
        self.commit(vec![Record::OutboxRemove(msg_id)])
    }

    /// Records a contact status transition together with an outbox enqueue
    /// in one transaction (used by KEX `ASSIGN`/`COMPLETE`, which both fill
    /// in a peer pubkey or flip status and queue an `OSM:KEY:` envelope).
    pub fn upsert_contact_and_enqueue(
        &mut self,
        contact: ContactRecord,
        entry: OutboxRecord,
    ) -> Result<(), StoreError> {
        self.commit(vec![Record::UpsertContact(contact), Record::OutboxInsert(entry)])
    }

    /// Rewrites the journal to hold exactly the current in-memory image,
    /// discarding historical transaction noise. Not required by any
    /// testable property, but keeps long-lived devices' journals from
    /// growing without bound.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let mut records = Vec::new();
        if let Some(identity) = &self.identity {
            records.push(Record::SetIdentity {
                pk: identity.pk.0,
                sk: identity.sk.0,
            });
        }
        for contact in self.contacts.values() {
            records.push(Record::UpsertContact(contact.clone()));
        }
        for thread in self.messages.values() {
            for message in thread {
                records.push(Record::AppendMessage(message.clone()));
            }
        }
        for pending in &self.pending_keys {
            records.push(Record::AddPendingKey(pending.clone()));
        }
        for entry in &self.outbox {
            records.push(Record::OutboxInsert(entry.clone()));
        }

        let raw: Vec<Vec<u8>> = records
            .iter()
            .map(|r| rmp_serde::to_vec(std::slice::from_ref(r)))
            .collect::<Result<_, _>>()?;
        Journal::rewrite(&self.path, &raw)?;
        self.journal = Some(Journal::open(&self.path)?);
        Ok(())
    }
}
