use osm_link::{enqueue, handle_ack, LinkError, SendSession};
use osm_proto::constants::{MAX_MSG_SIZE, MAX_OUTBOX};
use osm_store::clock::ManualTimeProvider;
use osm_store::Store;
use tempfile::TempDir;

fn open_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("osm.journal")).unwrap();
    (dir, store)
}

#[test]
fn enqueue_is_idempotent_on_msg_id() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let id1 = enqueue(&mut store, &clock, b"hello".to_vec()).unwrap();
    let id2 = enqueue(&mut store, &clock, b"hello".to_vec()).unwrap();
    assert_eq!(id1, id2);
    assert_eq!(store.outbox().len(), 1);
}

#[test]
fn oversized_payload_is_rejected() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let payload = vec![0u8; MAX_MSG_SIZE + 1];
    assert!(matches!(
        enqueue(&mut store, &clock, payload),
        Err(LinkError::OversizedMessage(_))
    ));
}

#[test]
fn overflow_evicts_oldest_first() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let mut ids = Vec::new();
    for i in 0..(MAX_OUTBOX + 3) {
        ids.push(enqueue(&mut store, &clock, format!("msg-{i}").into_bytes()).unwrap());
    }
    assert_eq!(store.outbox().len(), MAX_OUTBOX);
    let present: Vec<_> = store.outbox().iter().map(|e| e.msg_id).collect();
    for evicted in &ids[..3] {
        assert!(!present.contains(evicted), "expected oldest entries evicted first");
    }
    for kept in &ids[3..] {
        assert!(present.contains(kept));
    }
}

#[test]
fn ack_removes_matching_entry_and_ignores_unknown() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let id = enqueue(&mut store, &clock, b"payload".to_vec()).unwrap();

    assert!(!handle_ack(&mut store, &[0xAA; 8]).unwrap());
    assert_eq!(store.outbox().len(), 1);

    assert!(handle_ack(&mut store, &id).unwrap());
    assert_eq!(store.outbox().len(), 0);
}

#[test]
fn malformed_ack_payload_is_discarded_not_error() {
    let (_dir, mut store) = open_store();
    assert!(!handle_ack(&mut store, &[1, 2, 3]).unwrap());
}

#[test]
fn outbox_survives_restart_with_same_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("osm.journal");
    let clock = ManualTimeProvider::new(0);
    let mut ids = Vec::new();
    {
        let mut store = Store::open(&path).unwrap();
        for i in 0..5 {
            ids.push(enqueue(&mut store, &clock, format!("m{i}").into_bytes()).unwrap());
        }
    }
    let store = Store::open(&path).unwrap();
    assert_eq!(store.outbox().len(), 5);
    let restored: Vec<_> = store.outbox().iter().map(|e| e.msg_id).collect();
    assert_eq!(restored, ids);
}

#[test]
fn send_session_delivers_fragments_in_order_without_interleaving() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    enqueue(&mut store, &clock, vec![1u8; 500]).unwrap();
    enqueue(&mut store, &clock, vec![2u8; 500]).unwrap();

    let mut session = SendSession::new();
    let mut first_entry_fragments = Vec::new();
    loop {
        let frag = session.poll(store.outbox()).unwrap();
        let is_start = frag[0] & 0x01 != 0;
        if is_start && !first_entry_fragments.is_empty() {
            // we've moved on to the second entry's START without the
            // first entry's fragments ever interleaving with it.
            break;
        }
        first_entry_fragments.push(frag);
    }
    // all collected fragments belong to one message: only the last has END set
    for (i, f) in first_entry_fragments.iter().enumerate() {
        let is_end = f[0] & 0x02 != 0;
        assert_eq!(is_end, i == first_entry_fragments.len() - 1);
    }
}

#[test]
fn reset_restarts_head_from_start() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    enqueue(&mut store, &clock, vec![9u8; 500]).unwrap();

    let mut session = SendSession::new();
    let first = session.poll(store.outbox()).unwrap();
    let _second = session.poll(store.outbox()).unwrap();

    session.reset();
    let after_reset = session.poll(store.outbox()).unwrap();
    assert_eq!(first, after_reset);
}
