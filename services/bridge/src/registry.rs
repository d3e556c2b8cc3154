//! Session registry and connection records.
//!
//! The registry owns every live session; fan-out code works against
//! [`SessionHandle`] snapshots so no socket write ever happens while the
//! registry lock is held, and a handle outliving its session degrades to a
//! harmless failed queue send.

use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Length of the random id minted at accept time.
const SESSION_ID_LEN: usize = 10;

/// Queue of outbound protocol lines for one session's writer task.
pub type Outbox = mpsc::Sender<String>;

/// A snapshot of one session, safe to hold across I/O.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    outbox: Outbox,
}

impl SessionHandle {
    /// Queue `line` for delivery.  A closed outbox means the session is
    /// already being torn down; the line is silently dropped.
    pub async fn send(&self, line: impl Into<String>) {
        let _ = self.outbox.send(line.into()).await;
    }
}

struct SessionEntry {
    name: String,
    client_type: String,
    keep_history: bool,
    outbox: Outbox,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a new session: mint a fresh id and insert it with the default
    /// display name `Client <id>`.
    pub fn register(&self, outbox: Outbox) -> String {
        let mut sessions = self.sessions.lock().unwrap();
        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            id = generate_session_id();
        }
        sessions.insert(
            id.clone(),
            SessionEntry {
                name: format!("Client {id}"),
                client_type: String::new(),
                keep_history: false,
                outbox,
            },
        );
        id
    }

    pub fn resolve(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(id).map(|entry| SessionHandle {
            id: id.to_owned(),
            outbox: entry.outbox.clone(),
        })
    }

    /// Copy out every live session for fan-out.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| SessionHandle {
                id: id.clone(),
                outbox: entry.outbox.clone(),
            })
            .collect()
    }

    /// Remove the session.  Returns whether it was still present, making the
    /// disconnect path idempotent.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.lock().unwrap().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(id)
    }

    pub fn set_name(&self, id: &str, name: &str) {
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(id) {
            entry.name = name.to_owned();
        }
    }

    pub fn name(&self, id: &str) -> Option<String> {
        self.sessions.lock().unwrap().get(id).map(|e| e.name.clone())
    }

    pub fn set_client_type(&self, id: &str, client_type: &str) {
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(id) {
            entry.client_type = client_type.to_owned();
        }
    }

    pub fn client_type(&self, id: &str) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.client_type.clone())
    }

    pub fn set_keep_history(&self, id: &str, keep: bool) {
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(id) {
            entry.keep_history = keep;
        }
    }

    pub fn keep_history(&self, id: &str) -> Option<bool> {
        self.sessions.lock().unwrap().get(id).map(|e| e.keep_history)
    }

    /// Queue `line` to every live session.
    pub async fn broadcast(&self, line: &str) {
        for handle in self.snapshot() {
            handle.send(line).await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new()
    }
}

fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Connection records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connected,
    Disconnected,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Connected => "CONNECTED",
            ClientStatus::Disconnected => "DISCONNECTED",
        }
    }
}

/// The instructor-console view of a session.  Outlives the session just long
/// enough for the departure broadcast to make its round trip over the bus.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub client_id: String,
    pub client_name: String,
    pub learner_name: String,
    pub client_connection: String,
    pub client_type: String,
    pub role: String,
    pub client_status: ClientStatus,
    pub connect_time: u64,
}

impl ConnectionRecord {
    pub fn new(client_id: &str) -> Self {
        ConnectionRecord {
            client_id: client_id.to_owned(),
            client_name: format!("Client {client_id}"),
            learner_name: String::new(),
            client_connection: String::new(),
            client_type: String::new(),
            role: String::new(),
            client_status: ClientStatus::Connected,
            connect_time: epoch_seconds(),
        }
    }

    /// The `[SYS]UPDATE_CLIENT=` bus command describing this record.
    pub fn to_sys_update(&self) -> String {
        format!(
            "[SYS]UPDATE_CLIENT=client_id={};client_name={};learner_name={};client_connection={};client_type={};role={};client_status={};connect_time={}",
            self.client_id,
            self.client_name,
            self.learner_name,
            self.client_connection,
            self.client_type,
            self.role,
            self.client_status.as_str(),
            self.connect_time,
        )
    }

    /// One row of the `REQUEST=CLIENTS` CSV reply.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.client_id,
            self.client_name,
            self.learner_name,
            self.client_connection,
            self.client_type,
            self.role,
            self.client_status.as_str(),
            self.connect_time,
        )
    }
}

pub const CSV_HEADER: &str =
    "client_id,client_name,learner_name,client_connection,client_type,role,client_status,connect_time";

pub struct ConnectionTable {
    records: Mutex<HashMap<String, ConnectionRecord>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, record: ConnectionRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.client_id.clone(), record);
    }

    pub fn get(&self, client_id: &str) -> Option<ConnectionRecord> {
        self.records.lock().unwrap().get(client_id).cloned()
    }

    /// Apply `mutate` to the record for `client_id`, creating a default one
    /// first when absent.  Returns the record after mutation.
    pub fn update(
        &self,
        client_id: &str,
        mutate: impl FnOnce(&mut ConnectionRecord),
    ) -> ConnectionRecord {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(client_id.to_owned())
            .or_insert_with(|| ConnectionRecord::new(client_id));
        mutate(record);
        record.clone()
    }

    /// Flip the record to DISCONNECTED; `None` if no record exists.
    pub fn mark_disconnected(&self, client_id: &str) -> Option<ConnectionRecord> {
        let mut records = self.records.lock().unwrap();
        records.get_mut(client_id).map(|record| {
            record.client_status = ClientStatus::Disconnected;
            record.clone()
        })
    }

    pub fn remove(&self, client_id: &str) -> bool {
        self.records.lock().unwrap().remove(client_id).is_some()
    }

    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.connect_time.cmp(&b.connect_time).then_with(|| a.client_id.cmp(&b.client_id)));
        records
    }

    /// The full `REQUEST=CLIENTS` reply: header plus one row per record.
    pub fn to_csv(&self) -> String {
        let mut out = String::from(CSV_HEADER);
        out.push('\n');
        for record in self.snapshot() {
            out.push_str(&record.to_csv_row());
            out.push('\n');
        }
        out
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        ConnectionTable::new()
    }
}

pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
