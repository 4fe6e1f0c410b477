//! Envelope parser & router (C7): the boundary between a fully reassembled
//! wire payload and the KEX/decrypt pipelines (§4.7).
//!
//! Nothing here ever returns an error that could abort the link — a
//! malformed or undecryptable envelope is always logged and dropped, never
//! propagated, matching §7's "no error in C7 ever kills the link".

use osm_crypto::{open, CryptoError, PublicKey};
use osm_store::clock::TimeProvider;
use osm_store::{ContactId, ContactStatus, Store};

const KEY_PREFIX: &str = "OSM:KEY:";
const MSG_PREFIX: &str = "OSM:MSG:";

/// What happened to a routed envelope. Informational only — callers should
/// not branch on this to decide whether to retry or escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    PendingKeyQueued,
    PendingKeyRejectedDuplicate,
    PendingKeyMalformed,
    MessageDelivered(ContactId),
    MessageUndeliverable,
    UnknownEnvelope,
}

fn trim_trailing_ws(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n', ' ', '\t'])
}

/// Routes one fully reassembled incoming payload (§4.7).
pub fn route(store: &mut Store, clock: &dyn TimeProvider, payload: &[u8]) -> RouteOutcome {
    let text = match std::str::from_utf8(payload) {
        Ok(t) => t,
        Err(_) => {
            tracing::debug!("dropping non-UTF-8 envelope");
            return RouteOutcome::UnknownEnvelope;
        }
    };
    let text = trim_trailing_ws(text);

    if let Some(body) = text.strip_prefix(KEY_PREFIX) {
        return route_key(store, clock, body);
    }
    if let Some(body) = text.strip_prefix(MSG_PREFIX) {
        return route_msg(store, clock, body);
    }

    tracing::debug!(prefix = %text.get(..8.min(text.len())).unwrap_or(text), "unknown envelope prefix");
    RouteOutcome::UnknownEnvelope
}

fn route_key(store: &mut Store, clock: &dyn TimeProvider, body: &str) -> RouteOutcome {
    let pubkey = match PublicKey::from_base64(body) {
        Ok(pk) => pk,
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed OSM:KEY: envelope");
            return RouteOutcome::PendingKeyMalformed;
        }
    };
    match osm_kex::submit_pending_key(store, clock, pubkey) {
        Ok(()) => RouteOutcome::PendingKeyQueued,
        Err(_) => RouteOutcome::PendingKeyRejectedDuplicate,
    }
}

fn route_msg(store: &mut Store, clock: &dyn TimeProvider, body: &str) -> RouteOutcome {
    let Some(identity) = store.identity().cloned() else {
        tracing::debug!("dropping OSM:MSG: envelope, no identity yet");
        return RouteOutcome::MessageUndeliverable;
    };

    // Speculative decryption across every ESTABLISHED contact: the wire
    // payload carries no sender identity by design (§4.7, §9).
    let established: Vec<(ContactId, PublicKey)> = store
        .contacts()
        .filter(|c| c.status == ContactStatus::Established)
        .filter_map(|c| c.peer_pubkey.map(|pk| (c.id, pk)))
        .collect();

    for (contact_id, peer_pk) in established {
        match open(body, &peer_pk, &identity.sk) {
            Ok(plaintext) => {
                let Ok(text) = String::from_utf8(plaintext) else {
                    tracing::warn!(contact_id, "authenticated message was not valid UTF-8, dropping");
                    return RouteOutcome::MessageUndeliverable;
                };
                if let Err(e) = osm_contacts::append_incoming(store, clock, contact_id, &text) {
                    tracing::warn!(contact_id, error = %e, "failed to store authenticated message");
                    return RouteOutcome::MessageUndeliverable;
                }
                return RouteOutcome::MessageDelivered(contact_id);
            }
            Err(CryptoError::AuthFail) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed OSM:MSG: envelope");
                return RouteOutcome::MessageUndeliverable;
            }
        }
    }

    tracing::debug!("OSM:MSG: envelope authenticated under no established contact, dropping");
    RouteOutcome::MessageUndeliverable
}
