//! Event fan-out to connected sockets.
//!
//! Each published event gets the next hub-wide sequence number, is
//! serialized once, and is offered to every recipient's bounded queue with
//! `try_send`. Publishing never waits on a socket: a recipient whose queue is
//! full is closed and the rest still get the event.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::connection::{Connection, Enqueue};
use super::events::Event;
use super::registry::SharedTable;

/// Who an event is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every connection.
    All,
    /// Every connection except those of one user.
    AllExcept(String),
    /// Every connection of one user.
    User(String),
    /// Every connection of any listed user.
    Users(Vec<String>),
    /// Every connection subscribed to a server.
    Server(String),
}

#[derive(Clone)]
pub struct Broadcaster {
    table: SharedTable,
    seq: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new(table: SharedTable) -> Self {
        Self {
            table,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deliver `event` to everybody in `scope`. Returns how many connections
    /// accepted it.
    pub fn publish(&self, scope: &Scope, event: &Event) -> usize {
        let recipients = self.recipients(scope);
        if recipients.is_empty() {
            return 0;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = match event.encode(Some(seq)) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(?err, op = %event.op, "failed to encode event");
                return 0;
            }
        };

        let delivered = recipients
            .iter()
            .filter(|conn| conn.try_enqueue(frame.clone()) == Enqueue::Queued)
            .count();

        tracing::trace!(op = %event.op, seq, ?scope, delivered, "event published");
        delivered
    }

    pub fn to_all(&self, event: &Event) -> usize {
        self.publish(&Scope::All, event)
    }

    pub fn to_all_except(&self, user_id: &str, event: &Event) -> usize {
        self.publish(&Scope::AllExcept(user_id.to_string()), event)
    }

    pub fn to_user(&self, user_id: &str, event: &Event) -> usize {
        self.publish(&Scope::User(user_id.to_string()), event)
    }

    pub fn to_users(&self, user_ids: &[String], event: &Event) -> usize {
        self.publish(&Scope::Users(user_ids.to_vec()), event)
    }

    pub fn to_server(&self, server_id: &str, event: &Event) -> usize {
        self.publish(&Scope::Server(server_id.to_string()), event)
    }

    /// The most recently assigned sequence number.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    fn recipients(&self, scope: &Scope) -> Vec<Arc<Connection>> {
        let table = self.table.read();
        match scope {
            Scope::All => table.all(),
            Scope::AllExcept(user_id) => table
                .all()
                .into_iter()
                .filter(|conn| &conn.user_id != user_id)
                .collect(),
            Scope::User(user_id) => table.connections_of(user_id),
            Scope::Users(user_ids) => {
                let unique: HashSet<&String> = user_ids.iter().collect();
                unique
                    .into_iter()
                    .flat_map(|user_id| table.connections_of(user_id))
                    .collect()
            }
            Scope::Server(server_id) => table.connections_in_server(server_id),
        }
    }
}
