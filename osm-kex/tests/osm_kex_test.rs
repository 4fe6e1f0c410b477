use osm_crypto::PublicKey;
use osm_kex::{add, assign, complete, create, submit_pending_key, KexError};
use osm_store::clock::ManualTimeProvider;
use osm_store::{ContactRecord, ContactStatus, Store};
use tempfile::TempDir;

fn open_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("osm.journal")).unwrap();
    (dir, store)
}

#[test]
fn add_generates_identity_and_enqueues_kex() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let id = add(&mut store, &clock, "bob").unwrap();
    assert_eq!(store.contact(id).unwrap().status, ContactStatus::PendingSent);
    assert_eq!(store.outbox().len(), 1);
    assert!(store.identity().is_some());
}

#[test]
fn submit_pending_key_dedups() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let pk = PublicKey([3; 32]);
    submit_pending_key(&mut store, &clock, pk).unwrap();
    assert!(matches!(
        submit_pending_key(&mut store, &clock, pk),
        Err(KexError::DuplicatePending)
    ));
    assert_eq!(store.pending_keys().len(), 1);
}

#[test]
fn submit_pending_key_rejects_already_bound() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    let pk = PublicKey([3; 32]);
    let id = store.allocate_contact_id();
    store
        .upsert_contact(ContactRecord {
            id,
            name: "bob".into(),
            status: ContactStatus::Established,
            peer_pubkey: Some(pk),
            unread: 0,
        })
        .unwrap();
    assert!(matches!(
        submit_pending_key(&mut store, &clock, pk),
        Err(KexError::DuplicatePending)
    ));
}

#[test]
fn full_two_party_kex_leaves_both_established() {
    let (_dir, mut alice_store) = open_store();
    let (_dir2, mut bob_store) = open_store();
    let clock = ManualTimeProvider::new(0);

    // Alice: ADD Bob.
    add(&mut alice_store, &clock, "bob").unwrap();
    let alice_pk = alice_store.identity().unwrap().pk;

    // Bob receives Alice's KEX.
    submit_pending_key(&mut bob_store, &clock, alice_pk).unwrap();
    create(&mut bob_store, "alice").unwrap();
    complete(&mut bob_store, &clock, "alice").unwrap();
    let bob_pk = bob_store.identity().unwrap().pk;
    assert_eq!(
        bob_store.contact_by_name("alice").unwrap().status,
        ContactStatus::Established
    );

    // Alice receives Bob's KEX.
    submit_pending_key(&mut alice_store, &clock, bob_pk).unwrap();
    assign(&mut alice_store, "bob").unwrap();

    let alice_view = alice_store.contact_by_name("bob").unwrap();
    assert_eq!(alice_view.status, ContactStatus::Established);
    assert_eq!(alice_view.peer_pubkey, Some(bob_pk));

    let bob_view = bob_store.contact_by_name("alice").unwrap();
    assert_eq!(bob_view.peer_pubkey, Some(alice_pk));
}

#[test]
fn assign_without_pending_key_fails() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    add(&mut store, &clock, "bob").unwrap();
    assert!(matches!(assign(&mut store, "bob"), Err(KexError::NoPendingKey)));
}

#[test]
fn complete_requires_pending_received() {
    let (_dir, mut store) = open_store();
    let clock = ManualTimeProvider::new(0);
    add(&mut store, &clock, "bob").unwrap();
    assert!(matches!(
        complete(&mut store, &clock, "bob"),
        Err(KexError::WrongState(_))
    ));
}
