//! Server-side STOMP engine.
//!
//! [`ServerEngine`] accepts one client session: it negotiates the protocol
//! version, keeps the subscription/ack/transaction books, emits receipts,
//! and reports violations as ERROR frames that echo the offending frame.
//! Broker concerns (routing, queues, fan-out, authentication decisions)
//! stay with the embedder behind [`ServerHost`].
//!
//! Inbound dispatch per received frame, in order:
//! 1. decode the command (case-insensitive), reject unknown ones
//! 2. gate everything but CONNECT/STOMP on an established session
//! 3. route `transaction`-tagged frames into their buffer (BEGIN, COMMIT
//!    and ABORT dispatch normally)
//! 4. run the per-command handler
//! 5. answer a `receipt` header with a RECEIPT frame
//!
//! COMMIT replays buffered frames through steps 1-4 with the `transaction`
//! header stripped, so receipts are only ever emitted at reception.

use std::collections::HashMap;
use std::rc::Rc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ErrorKind, Result, StompError};
use crate::heartbeat::{Heartbeat, HeartbeatHost};
use crate::host::{Login, ServerHost, SessionIds, UuidSessionIds};
use crate::protocol::{Command, Frame, Parser, Version, CONTENT_TYPE, DEFAULT_CONTENT_TYPE};
use crate::scheduler::Scheduler;
use crate::subscription::{AckMode, Subscription};

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server software name for the CONNECTED `server` header.
    pub name: Option<String>,
    /// Server software version, appended as `name/version`.
    pub version: Option<String>,
    /// Lower bound for the negotiated incoming heart-beat period (ms).
    pub min_send_interval: u64,
    /// Lower bound for the negotiated outgoing heart-beat period (ms).
    pub desired_receive_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            min_send_interval: 5000,
            desired_receive_interval: 60000,
        }
    }
}

fn take_id(counter: &mut u64) -> String {
    let id = counter.to_string();
    *counter += 1;
    id
}

/// Adapter handing the heart-beat timers their slice of the embedder.
struct ServerHeartbeatHost {
    host: Rc<dyn ServerHost>,
}

impl HeartbeatHost for ServerHeartbeatHost {
    fn send_bytes(&self, bytes: &[u8]) {
        self.host.send_bytes(bytes);
    }

    fn report_error(&self, message: &str) {
        self.host
            .on_error(None, &StompError::Internal(message.to_string()));
    }
}

/// Server-side state machine over one STOMP session.
pub struct ServerEngine {
    host: Rc<dyn ServerHost>,
    scheduler: Rc<dyn Scheduler>,
    config: ServerConfig,
    ids: Rc<dyn SessionIds>,
    parser: Parser,
    connected: bool,
    version: Version,
    session_id: Option<String>,
    heartbeat: Option<Heartbeat>,
    /// destination -> subscription record
    subscriptions: HashMap<String, Subscription>,
    /// message id -> ack id, for pre-1.2 ACK/NACK correlation
    ack_ids: HashMap<String, String>,
    /// transaction id -> buffered frames in arrival order
    transactions: HashMap<String, Vec<Frame>>,
    next_ack_id: u64,
    next_subscription_id: u64,
}

impl ServerEngine {
    /// Create an engine awaiting CONNECT, with UUID session ids.
    pub fn new(
        host: Rc<dyn ServerHost>,
        scheduler: Rc<dyn Scheduler>,
        config: ServerConfig,
    ) -> Self {
        Self {
            host,
            scheduler,
            config,
            ids: Rc::new(UuidSessionIds),
            parser: Parser::new(),
            connected: false,
            version: Version::default(),
            session_id: None,
            heartbeat: None,
            subscriptions: HashMap::new(),
            ack_ids: HashMap::new(),
            transactions: HashMap::new(),
            next_ack_id: 1,
            next_subscription_id: 1,
        }
    }

    /// Replace the session/message id provider (deterministic tests,
    /// embedder-issued ids).
    pub fn with_session_ids(mut self, ids: Rc<dyn SessionIds>) -> Self {
        self.ids = ids;
        self
    }

    /// True between a successful CONNECT and `disconnect`.
    #[inline]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Negotiated protocol version.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Session id announced in CONNECTED.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    // ---- inbound --------------------------------------------------------

    /// Drive inbound transport bytes through the engine.
    ///
    /// Never fails: violations are answered with ERROR frames and reported
    /// to [`ServerHost::on_error`]; processing continues with the next
    /// frame.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            if let Some(hb) = &self.heartbeat {
                hb.received_data();
            }
        }

        if let Err(e) = self.parser.feed(bytes) {
            self.error(None, &e);
        }
        while let Some(frame) = self.parser.next() {
            self.receive(&frame);
        }
    }

    /// Full receive path: dispatch plus the receipt step.
    fn receive(&mut self, frame: &Frame) {
        match self.dispatch(frame) {
            Ok(()) => {
                if let Some(receipt) = frame.header("receipt") {
                    let connect = Command::parse(frame.command())
                        .map_or(false, |c| c.is_connect());
                    if !connect {
                        let reply =
                            Frame::new(Command::Receipt).with_header("receipt-id", receipt);
                        self.send_frame(&reply);
                    }
                }
            }
            Err(e) => self.error(Some(frame), &e),
        }
    }

    /// Dispatch steps 1-4. Also the replay path for COMMIT.
    fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        let command = Command::parse(frame.command()).ok_or_else(|| {
            StompError::protocol_for(format!("Unknown command: {}", frame.command()), frame)
        })?;
        tracing::trace!(command = %command, "server dispatch");

        if !self.connected && !command.is_connect() {
            return Err(StompError::protocol_for("Not connected", frame));
        }

        if let Some(transaction) = frame.header("transaction") {
            if !command.allows_transaction() {
                return Err(StompError::protocol_for("Transaction not permitted", frame));
            }
            if !matches!(command, Command::Begin | Command::Commit | Command::Abort) {
                let buffer = self.transactions.get_mut(transaction).ok_or_else(|| {
                    StompError::protocol_for(
                        format!("Unknown transaction: {transaction}"),
                        frame,
                    )
                })?;
                buffer.push(frame.clone());
                return Ok(());
            }
        }

        match command {
            Command::Connect | Command::Stomp => self.handle_connect(frame),
            Command::Send => self.handle_send(frame),
            Command::Subscribe => self.handle_subscribe(frame),
            Command::Unsubscribe => self.handle_unsubscribe(frame),
            Command::Ack | Command::Nack => self.handle_acknowledge(frame, command),
            Command::Begin => self.handle_begin(frame),
            Command::Commit => self.handle_commit(frame),
            Command::Abort => self.handle_abort(frame),
            Command::Disconnect => self.handle_disconnect(frame),
            other => Err(StompError::protocol_for(
                format!("Unknown command: {other}"),
                frame,
            )),
        }
    }

    fn handle_connect(&mut self, frame: &Frame) -> Result<()> {
        if self.connected {
            return Err(StompError::protocol_for("Already connected", frame));
        }

        let version = match frame.header("accept-version") {
            None => Version::V1_0,
            Some(list) => Version::negotiate(list).ok_or_else(|| {
                StompError::protocol_with_headers(
                    "Incompatible version",
                    Some(frame),
                    vec![("version".to_string(), Version::supported_list().to_string())],
                )
            })?,
        };
        if frame.has_header("receipt") {
            return Err(StompError::protocol_for(
                "Receipt not permitted on CONNECT",
                frame,
            ));
        }
        let virtual_host = frame.require_if("host", version >= Version::V1_1)?;

        let session_id = self.ids.next_id();
        let heartbeat = match frame.header("heart-beat") {
            Some(header) => Some(Heartbeat::new(
                Rc::new(ServerHeartbeatHost {
                    host: Rc::clone(&self.host),
                }),
                Rc::clone(&self.scheduler),
                header,
                self.config.min_send_interval,
                self.config.desired_receive_interval,
            )?),
            None => None,
        };

        let reply = self.host.on_connect(
            frame,
            frame.header("login"),
            frame.header("passcode"),
            virtual_host,
            &session_id,
        );
        let session = match reply {
            Login::Reject => return Err(StompError::protocol_for("Invalid login", frame)),
            Login::Accept => session_id,
            Login::Session(session) => session,
        };

        self.version = version;
        self.session_id = Some(session.clone());

        let mut connected = Frame::new(Command::Connected)
            .with_header("version", version.as_str())
            .with_header("session", session);
        if let Some(hb) = &heartbeat {
            connected.set_header("heart-beat", hb.echo_header());
        }
        if let Some(name) = &self.config.name {
            let server = match &self.config.version {
                Some(v) => format!("{name}/{v}"),
                None => name.clone(),
            };
            connected.set_header("server", server);
        }

        self.connected = true;
        self.heartbeat = heartbeat;
        self.send_frame(&connected);
        if let Some(hb) = &self.heartbeat {
            hb.start();
        }
        tracing::debug!(version = %version, "session established");
        Ok(())
    }

    fn handle_send(&mut self, frame: &Frame) -> Result<()> {
        let destination = frame.require("destination")?;
        let content_type = frame.header(CONTENT_TYPE).unwrap_or(DEFAULT_CONTENT_TYPE);
        self.host
            .on_message(frame, destination, frame.body(), content_type);
        Ok(())
    }

    fn handle_subscribe(&mut self, frame: &Frame) -> Result<()> {
        let destination = frame.require("destination")?.to_string();
        let id = match frame.require_if("id", self.version >= Version::V1_1)? {
            Some(id) => id.to_string(),
            None => take_id(&mut self.next_subscription_id),
        };
        let ack = frame.header("ack").unwrap_or("auto").parse::<AckMode>()?;
        if !ack.valid_for(self.version) {
            return Err(StompError::protocol_for(
                format!("Invalid ack value: {ack}"),
                frame,
            ));
        }
        if self.subscriptions.contains_key(&destination) {
            return Err(StompError::application_for(
                format!("Already subscribed to {destination}"),
                frame,
            ));
        }

        self.subscriptions
            .insert(destination.clone(), Subscription::new(id.clone(), ack));
        self.host.on_subscribe(frame, &id, &destination, ack);
        Ok(())
    }

    fn handle_unsubscribe(&mut self, frame: &Frame) -> Result<()> {
        let destination = match frame.require_if("id", self.version >= Version::V1_1)? {
            Some(id) => self
                .subscriptions
                .iter()
                .find(|(_, sub)| sub.id == id)
                .map(|(destination, _)| destination.clone()),
            // 1.0 clients may address the subscription by destination.
            None => Some(frame.require("destination")?.to_string()),
        };
        let removed = destination
            .and_then(|destination| {
                self.subscriptions
                    .remove(&destination)
                    .map(|sub| (destination, sub))
            })
            .ok_or_else(|| StompError::protocol_for("Subscription not found", frame))?;

        self.host.on_unsubscribe(frame, &removed.1.id, &removed.0);
        Ok(())
    }

    fn handle_acknowledge(&mut self, frame: &Frame, command: Command) -> Result<()> {
        if command == Command::Nack && self.version == Version::V1_0 {
            return Err(StompError::protocol_for("Invalid command", frame));
        }

        let ack_id = match frame.require_if("id", self.version >= Version::V1_2)? {
            Some(id) => Some(id.to_string()),
            None => {
                let message_id = frame.require("message-id")?;
                self.ack_ids.remove(message_id)
            }
        };

        match command {
            Command::Nack => self.host.on_nack(frame, ack_id.as_deref()),
            _ => self.host.on_ack(frame, ack_id.as_deref()),
        }
        Ok(())
    }

    fn handle_begin(&mut self, frame: &Frame) -> Result<()> {
        let transaction = frame.require("transaction")?;
        if self.transactions.contains_key(transaction) {
            return Err(StompError::protocol_for(
                format!("Transaction already started: {transaction}"),
                frame,
            ));
        }
        self.transactions.insert(transaction.to_string(), Vec::new());
        Ok(())
    }

    fn handle_commit(&mut self, frame: &Frame) -> Result<()> {
        let transaction = frame.require("transaction")?;
        let buffered = self.transactions.remove(transaction).ok_or_else(|| {
            StompError::protocol_for(format!("Unknown transaction: {transaction}"), frame)
        })?;

        for mut replayed in buffered {
            replayed.remove_header("transaction");
            if let Err(e) = self.dispatch(&replayed) {
                self.error(Some(&replayed), &e);
            }
        }
        Ok(())
    }

    fn handle_abort(&mut self, frame: &Frame) -> Result<()> {
        let transaction = frame.require("transaction")?;
        self.transactions.remove(transaction).ok_or_else(|| {
            StompError::protocol_for(format!("Unknown transaction: {transaction}"), frame)
        })?;
        Ok(())
    }

    fn handle_disconnect(&mut self, frame: &Frame) -> Result<()> {
        self.transactions.clear();
        self.host.on_disconnect(Some(frame), "client request");
        Ok(())
    }

    // ---- server-originated operations ----------------------------------

    /// Deliver a MESSAGE to the client. `message-id` is minted when the
    /// given headers lack one; under a non-auto subscription an ack id is
    /// minted (or taken from an `ack` header) and returned for later
    /// correlation. Returns `(message_id, ack_id)`.
    ///
    /// # Errors
    ///
    /// `ProtocolError` when not connected or on missing required headers;
    /// `ApplicationError` for an unknown destination, a subscription id
    /// mismatch (1.1+), or a duplicate ack id.
    pub fn message(
        &mut self,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> Result<(String, Option<String>)> {
        if !self.connected {
            return Err(StompError::protocol("Not connected"));
        }

        let mut frame = Frame::new(Command::Message).with_body(body);
        for (name, value) in headers {
            frame.set_header(*name, *value);
        }
        let destination = frame.require("destination")?.to_string();
        let subscription = frame
            .require_if("subscription", self.version >= Version::V1_1)?
            .map(str::to_string);
        let message_id = match frame.header("message-id") {
            Some(id) => id.to_string(),
            None => {
                let id = self.ids.next_id();
                frame.set_header("message-id", &id);
                id
            }
        };

        let sub = self
            .subscriptions
            .get(&destination)
            .cloned()
            .ok_or_else(|| {
                StompError::application(format!("Subscription not found for {destination}"))
            })?;
        if self.version >= Version::V1_1 && subscription.as_deref() != Some(sub.id.as_str()) {
            return Err(StompError::application(format!(
                "Subscription mismatch for {destination}"
            )));
        }

        let ack_id = if sub.ack.needs_ack() {
            if self.version >= Version::V1_2 {
                // 1.2 carries the ack id on the frame itself.
                let id = match frame.header("ack") {
                    Some(id) => id.to_string(),
                    None => {
                        let id = take_id(&mut self.next_ack_id);
                        frame.set_header("ack", &id);
                        id
                    }
                };
                Some(id)
            } else {
                // 1.0/1.1 acknowledge by message id; keep the mapping local.
                let id = match frame.remove_header("ack") {
                    Some(id) => id,
                    None => take_id(&mut self.next_ack_id),
                };
                if self.ack_ids.values().any(|existing| existing == &id) {
                    return Err(StompError::application(format!("Duplicate ack id: {id}")));
                }
                self.ack_ids.insert(message_id.clone(), id.clone());
                Some(id)
            }
        } else {
            None
        };

        self.send_frame(&frame);
        Ok((message_id, ack_id))
    }

    /// Serialize an ERROR reply for `error` and notify the embedder.
    ///
    /// Protocol/application violations echo the offending frame in the
    /// body; anything else produces the generic internal-error frame.
    /// [`ServerHost::on_error`] always fires.
    pub fn error(&mut self, frame: Option<&Frame>, error: &StompError) {
        tracing::warn!(error = %error, "server engine error");
        let offending = error.frame().or(frame);

        match error.kind() {
            ErrorKind::Protocol | ErrorKind::Application => {
                let mut reply =
                    Frame::new(Command::Error).with_header("message", error.to_string());
                for (name, value) in error.extra_headers() {
                    reply.set_header(name.clone(), value.clone());
                }
                if let Some(failed) = offending {
                    let connect =
                        Command::parse(failed.command()).map_or(false, |c| c.is_connect());
                    if !connect {
                        if let Some(receipt) = failed.header("receipt") {
                            reply.set_header("receipt-id", receipt);
                        }
                    }
                    reply.set_body(failed_frame_body(failed));
                }
                self.send_frame(&reply);
            }
            ErrorKind::Internal => {
                let reply = Frame::new(Command::Error)
                    .with_header("message", "Internal STOMP server error");
                self.send_frame(&reply);
            }
        }

        self.host.on_error(offending, error);
    }

    /// Tear the session down: stop the heart-beat, drop all bookkeeping.
    /// Idempotent; emits nothing.
    pub fn disconnect(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.stop();
        }
        if !self.connected {
            return;
        }
        self.connected = false;
        self.session_id = None;
        self.subscriptions.clear();
        self.ack_ids.clear();
        self.transactions.clear();
        tracing::debug!("session closed");
    }

    fn send_frame(&mut self, frame: &Frame) {
        self.host.send_bytes(&frame.serialize());
        if let Some(hb) = &self.heartbeat {
            hb.sent_data();
        }
    }
}

/// Pretty-printed echo of a failed frame for ERROR bodies.
fn failed_frame_body(frame: &Frame) -> Bytes {
    let serialized = frame.serialize_without_terminator();
    let mut body = BytesMut::with_capacity(serialized.len() + 32);
    body.put_slice(b"Failed frame:\n-----\n");
    body.put_slice(&serialized);
    body.put_slice(b"\n-----");
    body.freeze()
}
