use osm_core::OsmCore;
use osm_store::clock::ManualTimeProvider;
use tempfile::TempDir;

fn open_core() -> (TempDir, OsmCore) {
    let dir = TempDir::new().unwrap();
    let core = OsmCore::open_with_clock(dir.path(), Box::new(ManualTimeProvider::new(0))).unwrap();
    (dir, core)
}

/// Fragments an envelope the way the wire codec would and feeds each
/// fragment through `on_fragment`, exactly as a transport adapter does.
fn deliver_envelope(core: &mut OsmCore, envelope: &[u8]) {
    for frag in osm_proto::fragment_message(envelope).unwrap() {
        core.on_fragment(&frag);
    }
}

#[test]
fn keygen_then_identity_round_trip() {
    let (_dir, mut core) = open_core();
    assert_eq!(core.dispatch("CMD:KEYGEN"), "CMD:OK:keygen");
    let reply = core.dispatch("CMD:IDENTITY");
    assert!(reply.starts_with("CMD:IDENTITY:"));
}

#[test]
fn identity_before_keygen_errors() {
    let (_dir, mut core) = open_core();
    assert_eq!(core.dispatch("CMD:IDENTITY"), "CMD:ERR:no_identity");
}

#[test]
fn unknown_verb_errors() {
    let (_dir, mut core) = open_core();
    assert_eq!(core.dispatch("CMD:NOPE"), "CMD:ERR:unknown_verb");
}

#[test]
fn add_then_state_shows_pending_sent() {
    let (_dir, mut core) = open_core();
    let reply = core.dispatch("CMD:ADD:bob");
    assert!(reply.starts_with("CMD:OK:add:"));
    let state = core.dispatch("CMD:STATE");
    assert!(state.contains("PENDING_SENT"));
    assert!(state.contains("CMD:STATE:OUTBOX:1"));
    assert!(state.ends_with("CMD:STATE:END"));
}

#[test]
fn full_kex_and_send_via_commands() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let mut alice = OsmCore::open_with_clock(dir_a.path(), Box::new(ManualTimeProvider::new(0))).unwrap();
    let mut bob = OsmCore::open_with_clock(dir_b.path(), Box::new(ManualTimeProvider::new(0))).unwrap();

    alice.dispatch("CMD:ADD:bob");
    let alice_pk = match alice.dispatch("CMD:IDENTITY") {
        s if s.starts_with("CMD:IDENTITY:") => s["CMD:IDENTITY:".len()..].to_string(),
        other => panic!("unexpected: {other}"),
    };

    deliver_envelope(&mut bob, format!("OSM:KEY:{alice_pk}").as_bytes());
    assert_eq!(bob.dispatch("CMD:CREATE:alice"), "CMD:OK:create:0");
    assert_eq!(bob.dispatch("CMD:COMPLETE:alice"), "CMD:OK:complete");
    let bob_pk = match bob.dispatch("CMD:IDENTITY") {
        s if s.starts_with("CMD:IDENTITY:") => s["CMD:IDENTITY:".len()..].to_string(),
        other => panic!("unexpected: {other}"),
    };

    deliver_envelope(&mut alice, format!("OSM:KEY:{bob_pk}").as_bytes());
    assert_eq!(alice.dispatch("CMD:ASSIGN:bob"), "CMD:OK:assign");

    let send_reply = alice.dispatch("CMD:SEND:bob:hello bob");
    assert_eq!(send_reply, "CMD:OK:send");

    // Drain alice's outbox fragments straight into bob's reassembler.
    loop {
        match alice.tick() {
            Some(frag) => {
                bob.on_fragment(&frag);
            }
            None => break,
        }
    }
    assert_eq!(bob.dispatch("CMD:RECV_COUNT:alice"), "CMD:RECV_COUNT:1");
}
