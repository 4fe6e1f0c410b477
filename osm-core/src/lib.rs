//! Command dispatcher (C9) and the single-threaded event loop that wires
//! every other component together (§4.9, §5).
//!
//! [`OsmCore`] owns all in-memory state (the store, the send/reassembly
//! sessions, the notion of which conversation the UI currently has open) and
//! is driven by exactly three event sources, matching §5's scheduling model:
//! a transport byte delivery ([`OsmCore::on_bytes`]), a command line
//! ([`OsmCore::dispatch`]), and a periodic tick ([`OsmCore::tick`]).

use osm_crypto::{PublicKey, SecretKey};
use osm_link::SendSession;
use osm_proto::{Accepted, Reassembler};
use osm_store::clock::{SystemTimeProvider, TimeProvider};
use osm_store::{ContactId, ContactStatus, Direction, Store, StoreError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum OsmError {
    #[error("failed to open persistent store: {0}")]
    Store(#[from] StoreError),
}

/// Everything the core owns across a process lifetime.
pub struct OsmCore {
    store: Store,
    clock: Box<dyn TimeProvider>,
    send_session: SendSession,
    reassembler: Reassembler,
    active_contact: Option<ContactId>,
}

impl OsmCore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, OsmError> {
        Self::open_with_clock(data_dir, Box::new(SystemTimeProvider))
    }

    pub fn open_with_clock(data_dir: impl AsRef<Path>, clock: Box<dyn TimeProvider>) -> Result<Self, OsmError> {
        let store = Store::open(data_dir.as_ref().join("osm.journal"))?;
        Ok(OsmCore {
            store,
            clock,
            send_session: SendSession::new(),
            reassembler: Reassembler::new(),
            active_contact: None,
        })
    }

    /// Call when a CA session begins (including reconnects): outbox
    /// delivery of the current head restarts from its `START` (§4.4).
    pub fn on_ca_connected(&mut self) {
        self.send_session.reset();
    }

    /// Feeds one raw fragment received from the CA→OSM direction. Returns an
    /// ACK fragment to send back, if the fragment completed a reassembly.
    pub fn on_fragment(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        match self.reassembler.accept(raw) {
            Accepted::Complete(payload) => {
                let ack = osm_link::build_ack(&payload);
                osm_envelope::route(&mut self.store, self.clock.as_ref(), &payload);
                Some(ack)
            }
            Accepted::Ack(payload) => {
                if let Err(e) = osm_link::handle_ack(&mut self.store, &payload) {
                    tracing::warn!(error = %e, "failed to process ACK");
                }
                None
            }
            Accepted::Pending => None,
            Accepted::Dropped(reason) => {
                tracing::debug!(?reason, "dropped incoming fragment");
                None
            }
        }
    }

    /// Periodic tick (~10 Hz): drives outbox flushing. Returns the next
    /// fragment to send, if the CA is ready for one.
    pub fn tick(&mut self) -> Option<Vec<u8>> {
        self.send_session.poll(self.store.outbox())
    }

    /// Dispatches one `CMD:<verb>[:<arg>...]` line, returning the response
    /// line(s) (joined by `\n` for multi-line responses such as `CMD:STATE`).
    pub fn dispatch(&mut self, line: &str) -> String {
        let Some(rest) = line.strip_prefix("CMD:") else {
            return "CMD:ERR:malformed".to_string();
        };
        let (verb, args) = match rest.split_once(':') {
            Some((v, a)) => (v, a),
            None => (rest, ""),
        };

        match verb {
            "KEYGEN" => match osm_kex::keygen(&mut self.store) {
                Ok(_) => "CMD:OK:keygen".to_string(),
                Err(e) => err_line(&e.to_string()),
            },
            "IDENTITY" => match self.store.identity() {
                Some(id) => format!("CMD:IDENTITY:{}", id.pk.to_base64()),
                None => "CMD:ERR:no_identity".to_string(),
            },
            "PRIVKEY" => match self.store.identity() {
                Some(id) => format!("CMD:PRIVKEY:{}", id.sk.to_base64()),
                None => "CMD:ERR:no_identity".to_string(),
            },
            "SET_IDENTITY" => self.cmd_set_identity(args),
            "ADD" => self.cmd_add(args),
            "ADD_CONTACT" => self.cmd_add_contact(args),
            "CREATE" => self.cmd_create(args),
            "COMPLETE" => self.cmd_complete(args),
            "ASSIGN" => self.cmd_assign(args),
            "DELETE" => self.cmd_delete(args),
            "RENAME" => self.cmd_rename(args),
            "SEND" | "UI_COMPOSE" => self.cmd_send(args, verb),
            "UI_REPLY" => self.cmd_ui_reply(args),
            "UI_OPEN" => self.cmd_ui_open(args),
            "RECV_COUNT" => self.cmd_recv_count(args),
            "DELETE_MSG" => self.cmd_delete_msg(args),
            "STATE" => self.cmd_state(),
            _ => "CMD:ERR:unknown_verb".to_string(),
        }
    }

    fn cmd_set_identity(&mut self, args: &str) -> String {
        let Some((pk_b64, sk_b64)) = args.split_once(':') else {
            return "CMD:ERR:malformed".to_string();
        };
        let pk = match PublicKey::from_base64(pk_b64) {
            Ok(pk) => pk,
            Err(_) => return "CMD:ERR:bad_base64".to_string(),
        };
        let sk = match SecretKey::from_base64(sk_b64) {
            Ok(sk) => sk,
            Err(_) => return "CMD:ERR:bad_base64".to_string(),
        };
        match osm_kex::set_identity(&mut self.store, pk, sk) {
            Ok(()) => "CMD:OK:set_identity".to_string(),
            Err(e) => err_line(&e.to_string()),
        }
    }

    fn cmd_add(&mut self, name: &str) -> String {
        match osm_kex::add(&mut self.store, self.clock.as_ref(), name) {
            Ok(id) => format!("CMD:OK:add:{id}"),
            Err(e) => kex_err_line(&e),
        }
    }

    fn cmd_add_contact(&mut self, args: &str) -> String {
        let mut parts = args.splitn(3, ':');
        let (Some(name), Some("2"), Some(pk_b64)) = (parts.next(), parts.next(), parts.next()) else {
            return "CMD:ERR:malformed".to_string();
        };
        let pk = match PublicKey::from_base64(pk_b64) {
            Ok(pk) => pk,
            Err(_) => return "CMD:ERR:bad_base64".to_string(),
        };
        match osm_contacts::add_contact(&mut self.store, name, Some(pk)) {
            Ok(id) => format!("CMD:OK:add_contact:{id}"),
            Err(e) => contacts_err_line(&e),
        }
    }

    fn cmd_create(&mut self, name: &str) -> String {
        match osm_kex::create(&mut self.store, name) {
            Ok(id) => format!("CMD:OK:create:{id}"),
            Err(e) => kex_err_line(&e),
        }
    }

    fn cmd_complete(&mut self, name: &str) -> String {
        match osm_kex::complete(&mut self.store, self.clock.as_ref(), name) {
            Ok(()) => "CMD:OK:complete".to_string(),
            Err(e) => kex_err_line(&e),
        }
    }

    fn cmd_assign(&mut self, name: &str) -> String {
        match osm_kex::assign(&mut self.store, name) {
            Ok(()) => "CMD:OK:assign".to_string(),
            Err(e) => kex_err_line(&e),
        }
    }

    fn cmd_delete(&mut self, name: &str) -> String {
        if self.store.contact_by_name(name).map(|c| c.id) == self.active_contact {
            self.active_contact = None;
        }
        match osm_contacts::delete_contact(&mut self.store, name) {
            Ok(()) => "CMD:OK:delete".to_string(),
            Err(e) => contacts_err_line(&e),
        }
    }

    fn cmd_rename(&mut self, args: &str) -> String {
        let Some((old, new)) = args.split_once(':') else {
            return "CMD:ERR:malformed".to_string();
        };
        match osm_contacts::rename_contact(&mut self.store, old, new) {
            Ok(()) => "CMD:OK:rename".to_string(),
            Err(e) => contacts_err_line(&e),
        }
    }

    fn cmd_send(&mut self, args: &str, verb: &str) -> String {
        let Some((name, text)) = args.split_once(':') else {
            return "CMD:ERR:malformed".to_string();
        };
        let Some(contact) = self.store.contact_by_name(name).cloned() else {
            return "CMD:ERR:contact_not_found".to_string();
        };
        let reply = self.send_to_contact(&contact, text);
        if reply.starts_with("CMD:OK") {
            self.active_contact = Some(contact.id);
            format!("CMD:OK:{}", verb.to_ascii_lowercase())
        } else {
            reply
        }
    }

    fn cmd_ui_reply(&mut self, text: &str) -> String {
        let Some(contact_id) = self.active_contact else {
            return "CMD:ERR:no_active_conversation".to_string();
        };
        let Some(contact) = self.store.contact(contact_id).cloned() else {
            self.active_contact = None;
            return "CMD:ERR:contact_not_found".to_string();
        };
        let reply = self.send_to_contact(&contact, text);
        if reply.starts_with("CMD:OK") {
            "CMD:OK:ui_reply".to_string()
        } else {
            reply
        }
    }

    fn cmd_ui_open(&mut self, name: &str) -> String {
        match self.store.contact_by_name(name) {
            Some(c) => {
                self.active_contact = Some(c.id);
                "CMD:OK:ui_open".to_string()
            }
            None => "CMD:ERR:contact_not_found".to_string(),
        }
    }

    /// Shared `SEND`/`UI_COMPOSE`/`UI_REPLY` body: append outgoing, seal,
    /// enqueue. Requires the contact be `ESTABLISHED`.
    fn send_to_contact(&mut self, contact: &osm_store::ContactRecord, text: &str) -> String {
        let Some(peer_pk) = contact.peer_pubkey.filter(|_| contact.status == ContactStatus::Established) else {
            return "CMD:ERR:not_established".to_string();
        };
        let Some(identity) = self.store.identity().cloned() else {
            return "CMD:ERR:no_identity".to_string();
        };
        if let Err(e) = osm_contacts::append_outgoing(&mut self.store, self.clock.as_ref(), contact.id, text) {
            return contacts_err_line(&e);
        }
        let sealed = osm_crypto::seal(text.as_bytes(), &peer_pk, &identity.sk);
        let envelope = format!("OSM:MSG:{sealed}").into_bytes();
        match osm_link::enqueue(&mut self.store, self.clock.as_ref(), envelope) {
            Ok(_) => "CMD:OK".to_string(),
            Err(e) => err_line(&e.to_string()),
        }
    }

    fn cmd_recv_count(&mut self, name: &str) -> String {
        match osm_contacts::recv_count(&self.store, name) {
            Ok(n) => format!("CMD:RECV_COUNT:{n}"),
            Err(e) => contacts_err_line(&e),
        }
    }

    fn cmd_delete_msg(&mut self, text: &str) -> String {
        let Some(contact_id) = self.active_contact else {
            return "CMD:ERR:no_active_conversation".to_string();
        };
        match osm_contacts::delete_message(&mut self.store, contact_id, text) {
            Ok(()) => "CMD:OK:delete_msg".to_string(),
            Err(e) => contacts_err_line(&e),
        }
    }

    fn cmd_state(&self) -> String {
        let mut lines = Vec::new();
        match self.store.identity() {
            Some(id) => lines.push(format!("CMD:STATE:IDENTITY:{}", id.pk.to_base64())),
            None => lines.push("CMD:STATE:IDENTITY:none".to_string()),
        }
        lines.push(format!("CMD:STATE:PENDING:{}", self.store.pending_keys().len()));
        lines.push(format!("CMD:STATE:OUTBOX:{}", self.store.outbox().len()));
        match self.active_contact.and_then(|id| self.store.contact(id)) {
            Some(c) => lines.push(format!("CMD:STATE:ACTIVE:{}", c.name)),
            None => lines.push("CMD:STATE:ACTIVE:none".to_string()),
        }
        for c in self.store.contacts() {
            lines.push(format!(
                "CMD:STATE:CONTACT:{}:{}:{}:{}",
                c.id,
                c.name,
                status_str(c.status),
                c.unread
            ));
            for m in self.store.thread(c.id) {
                lines.push(format!(
                    "CMD:STATE:THREAD:{}:{}:{}:{}",
                    c.id,
                    direction_str(m.direction),
                    m.timestamp,
                    m.plaintext
                ));
            }
        }
        lines.push("CMD:STATE:END".to_string());
        lines.join("\n")
    }
}

fn status_str(status: ContactStatus) -> &'static str {
    match status {
        ContactStatus::PendingSent => "PENDING_SENT",
        ContactStatus::PendingReceived => "PENDING_RECEIVED",
        ContactStatus::Established => "ESTABLISHED",
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Out => "OUT",
        Direction::In => "IN",
    }
}

fn err_line(kind: &str) -> String {
    format!("CMD:ERR:{kind}")
}

fn kex_err_line(e: &osm_kex::KexError) -> String {
    use osm_kex::KexError::*;
    let kind = match e {
        NameConflict(_) => "name_taken",
        NameTooLong => "name_too_long",
        DuplicatePending => "already_pending",
        ContactNotFound => "contact_not_found",
        NoPendingKey => "no_pending_key",
        AmbiguousPendingKey => "ambiguous_pending_key",
        WrongState(_) => "wrong_state",
        Store(_) => "store_error",
        Link(_) => "oversized_message",
    };
    err_line(kind)
}

fn contacts_err_line(e: &osm_contacts::ContactsError) -> String {
    use osm_contacts::ContactsError::*;
    let kind = match e {
        NameConflict(_) => "name_taken",
        ContactNotFound => "contact_not_found",
        MessageNotFound => "message_not_found",
        NameTooLong => "name_too_long",
        PlaintextTooLong => "plaintext_too_long",
        PeerKeyConflict => "peer_key_conflict",
        Store(_) => "store_error",
    };
    err_line(kind)
}
