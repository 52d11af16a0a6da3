//! JSON-RPC 2.0 client for `deltachat-rpc-server`.
//!
//! Requests and responses are newline-delimited JSON on the server's stdio.
//! A reader thread hands each response to the caller waiting on its id, and an
//! event pump keeps one `get_next_event` call in flight, routing the result to
//! a per-account queue.

use crate::cancel::CancelToken;
use crate::relay::client::{MessageSnapshot, MessagingClient};
use crate::relay::error::{RelayError, Result};
use crate::relay::event::{AccountEvent, AccountId, ChatId, ContactId, Event, MsgId};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Environment variable the server reads its accounts directory from.
const ACCOUNTS_PATH_ENV: &str = "DC_ACCOUNTS_PATH";

/// Events kept per account before the oldest are discarded.
const EVENT_BACKLOG_LIMIT: usize = 10_000;

/// How long to wait for the server to exit after closing its stdin.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = std::result::Result<Value, RemoteError>;

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: MsgId,
    #[serde(default)]
    text: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, Sender<Reply>>,
}

struct Transport {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    next_id: AtomicU64,
    pending: Mutex<Pending>,
}

impl Transport {
    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(RelayError::Closed);
            }
            pending.waiters.insert(id, tx);
        }

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(id, method, "RPC request");
        if let Err(e) = self.write_line(&request) {
            lock(&self.pending).waiters.remove(&id);
            return Err(e);
        }

        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(RelayError::Remote {
                method: method.to_string(),
                code: remote.code,
                message: remote.message,
            }),
            Err(_) => Err(RelayError::Closed),
        }
    }

    fn write_line(&self, request: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(RelayError::Closed)?;
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    fn dispatch(&self, line: &str) {
        let response: Response = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed RPC response");
                return;
            }
        };
        let Some(id) = response.id else {
            debug!("Ignoring RPC notification");
            return;
        };
        let reply = match response.error {
            Some(error) => Err(error),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        match lock(&self.pending).waiters.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => warn!(id, "RPC response for unknown request"),
        }
    }

    fn close(&self) {
        let mut pending = lock(&self.pending);
        pending.closed = true;
        pending.waiters.clear();
    }
}

/// Per-account event queues fed by the event pump.
#[derive(Default)]
struct EventRouter {
    state: Mutex<RouterState>,
}

#[derive(Default)]
struct RouterState {
    closed: bool,
    senders: HashMap<AccountId, Sender<Event>>,
    receivers: HashMap<AccountId, Receiver<Event>>,
}

impl EventRouter {
    fn receiver(&self, account: AccountId) -> Receiver<Event> {
        let mut state = lock(&self.state);
        if let Some(rx) = state.receivers.get(&account) {
            return rx.clone();
        }
        let (tx, rx) = unbounded();
        if !state.closed {
            state.senders.insert(account, tx);
        }
        state.receivers.insert(account, rx.clone());
        rx
    }

    fn route(&self, event: AccountEvent) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        if !state.senders.contains_key(&event.context_id) {
            let (tx, rx) = unbounded();
            state.senders.insert(event.context_id, tx);
            state.receivers.insert(event.context_id, rx);
        }
        // Nobody drains the sender account's queue while probing.
        if let Some(rx) = state.receivers.get(&event.context_id) {
            if rx.len() >= EVENT_BACKLOG_LIMIT && rx.try_recv().is_ok() {
                trace!(account = %event.context_id, "Event backlog full, dropped oldest event");
            }
        }
        if let Some(tx) = state.senders.get(&event.context_id) {
            let _ = tx.send(event.event);
        }
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.senders.clear();
    }
}

/// The server runs in its own process group so a terminal Ctrl-C reaches
/// only cmping.
fn server_command(program: &str, accounts_dir: &Path) -> Command {
    let mut command = Command::new(program);
    command.env(ACCOUNTS_PATH_ENV, accounts_dir);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

/// [`MessagingClient`] backed by a `deltachat-rpc-server` process.
pub struct RpcClient {
    transport: Arc<Transport>,
    router: Arc<EventRouter>,
    child: Option<Child>,
}

impl RpcClient {
    /// Spawn `program` with its accounts stored under `accounts_dir`.
    pub fn spawn(program: &str, accounts_dir: &Path) -> Result<Self> {
        debug!(program, accounts_dir = %accounts_dir.display(), "Spawning RPC server");
        let mut child = server_command(program, accounts_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::Protocol("RPC server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::Protocol("RPC server stdout unavailable".into()))?;

        let mut client = Self::from_streams(stdout, stdin)?;
        client.child = Some(child);
        Ok(client)
    }

    /// Build a client over an already-connected pair of streams.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let transport = Arc::new(Transport {
            writer: Mutex::new(Some(Box::new(writer))),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Pending::default()),
        });
        let router = Arc::new(EventRouter::default());

        let reader_transport = Arc::clone(&transport);
        thread::Builder::new()
            .name("rpc-reader".into())
            .spawn(move || {
                for line in BufReader::new(reader).lines() {
                    match line {
                        Ok(line) if line.trim().is_empty() => continue,
                        Ok(line) => reader_transport.dispatch(&line),
                        Err(e) => {
                            warn!(error = %e, "RPC read failed");
                            break;
                        }
                    }
                }
                debug!("RPC stream closed");
                reader_transport.close();
            })?;

        let pump_transport = Arc::clone(&transport);
        let pump_router = Arc::clone(&router);
        thread::Builder::new()
            .name("rpc-events".into())
            .spawn(move || {
                loop {
                    let raw = match pump_transport.call("get_next_event", json!([])) {
                        Ok(raw) => raw,
                        Err(RelayError::Closed) => break,
                        Err(e) => {
                            warn!(error = %e, "Event pump stopped");
                            break;
                        }
                    };
                    match serde_json::from_value::<AccountEvent>(raw) {
                        Ok(event) => pump_router.route(event),
                        Err(e) => warn!(error = %e, "Dropping undecodable event"),
                    }
                }
                pump_router.close();
            })?;

        Ok(Self {
            transport,
            router,
            child: None,
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.transport.call(method, params)?;
        Ok(serde_json::from_value(value)?)
    }

    fn call_unit(&self, method: &str, params: Value) -> Result<()> {
        self.transport.call(method, params).map(|_| ())
    }
}

impl MessagingClient for RpcClient {
    fn account_ids(&self) -> Result<Vec<AccountId>> {
        self.call("get_all_account_ids", json!([]))
    }

    fn add_account(&self) -> Result<AccountId> {
        self.call("add_account", json!([]))
    }

    fn configured_addr(&self, account: AccountId) -> Result<Option<String>> {
        self.call("get_config", json!([account, "configured_addr"]))
    }

    fn configure_from_qr(&self, account: AccountId, qr: &str) -> Result<()> {
        self.call_unit("set_config_from_qr", json!([account, qr]))?;
        self.call_unit("configure", json!([account]))
    }

    fn start_io(&self, account: AccountId) -> Result<()> {
        self.call_unit("start_io", json!([account]))
    }

    fn stop_io(&self, account: AccountId) -> Result<()> {
        self.call_unit("stop_io", json!([account]))
    }

    fn create_chat(&self, account: AccountId, peer_addr: &str) -> Result<ChatId> {
        let contact: ContactId =
            self.call("create_contact", json!([account, peer_addr, Value::Null]))?;
        self.call("create_chat_by_contact_id", json!([account, contact]))
    }

    fn send_text(&self, account: AccountId, chat: ChatId, text: &str) -> Result<MsgId> {
        self.call("misc_send_text_message", json!([account, chat, text]))
    }

    fn message(&self, account: AccountId, msg: MsgId) -> Result<MessageSnapshot> {
        let wire: WireMessage = self.call("get_message", json!([account, msg]))?;
        Ok(MessageSnapshot {
            id: wire.id,
            text: wire.text,
        })
    }

    fn next_event(&self, account: AccountId, cancel: &CancelToken) -> Result<Option<Event>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let events = self.router.receiver(account);
        select! {
            recv(events) -> event => event.map(Some).map_err(|_| RelayError::Closed),
            recv(cancel.listener()) -> _ => Ok(None),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        // Closing stdin asks the server to shut down.
        lock(&self.transport.writer).take();
        let Some(child) = self.child.as_mut() else {
            return;
        };
        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "RPC server exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(50));
                }
                _ => break,
            }
        }
        warn!("RPC server did not exit in time, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
}
