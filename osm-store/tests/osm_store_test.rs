use osm_crypto::{Identity, PublicKey};
use osm_store::{ContactRecord, ContactStatus, Direction, MessageRecord, OutboxRecord, Store};
use std::path::PathBuf;
use tempfile::TempDir;

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("osm.journal")
}

#[test]
fn fresh_store_has_no_identity() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(store_path(&dir)).unwrap();
    assert!(store.identity().is_none());
}

#[test]
fn identity_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    let identity = Identity::generate();
    let pk = identity.pk;
    {
        let mut store = Store::open(&path).unwrap();
        store.set_identity(identity).unwrap();
    }
    let store = Store::open(&path).unwrap();
    assert_eq!(store.identity().unwrap().pk, pk);
}

#[test]
fn outbox_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    {
        let mut store = Store::open(&path).unwrap();
        for i in 0..5u8 {
            store
                .outbox_insert(OutboxRecord {
                    msg_id: [i; 8],
                    payload: vec![i],
                    enqueued_at: 0,
                    retry_count: 0,
                })
                .unwrap();
        }
    }
    let store = Store::open(&path).unwrap();
    assert_eq!(store.outbox().len(), 5);
}

#[test]
fn corrupt_tail_is_discarded_not_partial() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    {
        let mut store = Store::open(&path).unwrap();
        store
            .outbox_insert(OutboxRecord {
                msg_id: [1; 8],
                payload: vec![1],
                enqueued_at: 0,
                retry_count: 0,
            })
            .unwrap();
    }
    // Simulate a crash mid-append: truncate the last byte of the file.
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.pop();
    std::fs::write(&path, bytes).unwrap();

    let store = Store::open(&path).unwrap();
    assert_eq!(store.outbox().len(), 0);
}

#[test]
fn contact_delete_cascades_messages() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(store_path(&dir)).unwrap();
    let id = store.allocate_contact_id();
    store
        .upsert_contact(ContactRecord {
            id,
            name: "bob".into(),
            status: ContactStatus::Established,
            peer_pubkey: Some(PublicKey([1; 32])),
            unread: 0,
        })
        .unwrap();
    let mid = store.allocate_message_id();
    store
        .append_message(MessageRecord {
            id: mid,
            contact_id: id,
            direction: Direction::In,
            timestamp: 0,
            plaintext: "hi".into(),
        })
        .unwrap();
    assert_eq!(store.thread(id).len(), 1);

    store.delete_contact(id).unwrap();
    assert!(store.contact(id).is_none());
    assert_eq!(store.thread(id).len(), 0);
}
