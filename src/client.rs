//! Client-side STOMP engine.
//!
//! [`ClientEngine`] is a pure frame machine: synchronous operations
//! (`connect`, `send`, `subscribe`, ...) serialize outbound frames into the
//! embedder's byte sink, and [`feed`](ClientEngine::feed) drives inbound
//! bytes through the parser into lifecycle callbacks. The engine never
//! opens sockets, never polls and never blocks; heart-beating runs on the
//! injected scheduler.
//!
//! Synchronous operations return protocol/application violations directly.
//! `feed` never fails: every internal error is converted into a synthesized
//! ERROR frame and delivered to [`ClientHost::on_error`].

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::codec::{JsonCodec, Payload, JSON_CONTENT_TYPE};
use crate::error::{Result, StompError};
use crate::heartbeat::{Heartbeat, HeartbeatHost};
use crate::host::ClientHost;
use crate::protocol::{Command, Frame, Parser, Version, CONTENT_TYPE};
use crate::scheduler::Scheduler;
use crate::subscription::{AckMode, Subscription};

/// Engine-level configuration, all optional.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Virtual host placed in the CONNECT `host` header.
    pub virtual_host: String,
    /// Attach a `receipt` header to every non-CONNECT outbound frame.
    pub receipt: bool,
    /// En/decode bodies whose `content-type` is `application/json`.
    pub auto_json: bool,
    /// Lower bound for the negotiated incoming heart-beat period (ms).
    pub min_send_interval: u64,
    /// Lower bound for the negotiated outgoing heart-beat period (ms).
    pub desired_receive_interval: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            virtual_host: "stomp".to_string(),
            receipt: false,
            auto_json: false,
            min_send_interval: 0,
            desired_receive_interval: 0,
        }
    }
}

/// Options for [`ClientEngine::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Requested `heart-beat` pair in milliseconds (`can send`, `want to
    /// receive`). Omitted from the frame when `None`.
    pub heartbeat: Option<(u64, u64)>,
    /// `login` header.
    pub login: Option<String>,
    /// `passcode` header.
    pub passcode: Option<String>,
    /// Additional headers.
    pub headers: Vec<(String, String)>,
}

/// Options for [`ClientEngine::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Explicit `content-type`; JSON payloads default to
    /// `application/json`, raw bodies to `text/plain` at serialization.
    pub content_type: Option<String>,
    /// Request a receipt for this frame.
    pub receipt: bool,
    /// Send inside an open transaction.
    pub transaction: Option<String>,
    /// Additional headers.
    pub headers: Vec<(String, String)>,
}

/// Options for [`ClientEngine::subscribe`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Acknowledgement mode recorded for the subscription.
    pub ack: AckMode,
    /// Request a receipt for this frame.
    pub receipt: bool,
    /// Additional headers.
    pub headers: Vec<(String, String)>,
}

/// Options for [`ClientEngine::ack`] / [`ClientEngine::nack`].
#[derive(Debug, Clone, Default)]
pub struct AckOptions {
    /// Request a receipt for this frame.
    pub receipt: bool,
    /// Acknowledge inside an open transaction.
    pub transaction: Option<String>,
    /// Additional headers.
    pub headers: Vec<(String, String)>,
}

/// Options for the remaining operations (`unsubscribe`, `begin`, `commit`,
/// `abort`, `disconnect`).
#[derive(Debug, Clone, Default)]
pub struct FrameOptions {
    /// Request a receipt for this frame.
    pub receipt: bool,
    /// Additional headers.
    pub headers: Vec<(String, String)>,
}

/// Monotonic per-session id counters, all starting at 1.
struct Counters {
    subscription: u64,
    ack: u64,
    transaction: u64,
    receipt: u64,
}

impl Counters {
    fn new() -> Self {
        Self {
            subscription: 1,
            ack: 1,
            transaction: 1,
            receipt: 1,
        }
    }
}

fn take_id(counter: &mut u64) -> String {
    let id = counter.to_string();
    *counter += 1;
    id
}

/// Adapter handing the heart-beat timers their slice of the embedder.
struct ClientHeartbeatHost {
    host: Rc<dyn ClientHost>,
}

impl HeartbeatHost for ClientHeartbeatHost {
    fn send_bytes(&self, bytes: &[u8]) {
        self.host.send_bytes(bytes);
    }

    fn report_error(&self, message: &str) {
        let frame = Frame::new(Command::Error).with_header("message", message);
        self.host.on_error(&frame);
    }
}

/// Client-side state machine over one STOMP session.
pub struct ClientEngine {
    host: Rc<dyn ClientHost>,
    scheduler: Rc<dyn Scheduler>,
    config: ClientConfig,
    parser: Parser,
    connected: bool,
    version: Version,
    session_id: Option<String>,
    server_name: Option<String>,
    heartbeat: Option<Heartbeat>,
    /// destination -> subscription record
    subscriptions: HashMap<String, Subscription>,
    /// ack id -> original message id
    ack_ids: HashMap<String, String>,
    /// receipt id -> frame awaiting that receipt
    receipts: HashMap<String, Frame>,
    transactions: HashSet<String>,
    counters: Counters,
}

impl ClientEngine {
    /// Create a disconnected engine.
    pub fn new(
        host: Rc<dyn ClientHost>,
        scheduler: Rc<dyn Scheduler>,
        config: ClientConfig,
    ) -> Self {
        Self {
            host,
            scheduler,
            config,
            parser: Parser::new(),
            connected: false,
            version: Version::default(),
            session_id: None,
            server_name: None,
            heartbeat: None,
            subscriptions: HashMap::new(),
            ack_ids: HashMap::new(),
            receipts: HashMap::new(),
            transactions: HashSet::new(),
            counters: Counters::new(),
        }
    }

    /// True once CONNECTED was processed and until `disconnect`.
    #[inline]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Negotiated protocol version (1.0 until CONNECTED says otherwise).
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Session id announced by the server.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// `server` header announced by the server.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    // ---- outbound operations -------------------------------------------

    /// Open the session: emit CONNECT with `accept-version:1.0,1.1,1.2`.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Already connected")` on a duplicate connect.
    pub fn connect(&mut self, opts: ConnectOptions) -> Result<()> {
        if self.connected {
            return Err(StompError::protocol("Already connected"));
        }

        let mut frame = Frame::new(Command::Connect);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        frame.set_header("accept-version", Version::supported_list());
        frame.set_header("host", &self.config.virtual_host);
        if let Some((cx, cy)) = opts.heartbeat {
            frame.set_header("heart-beat", format!("{cx},{cy}"));
        }
        if let Some(login) = opts.login {
            frame.set_header("login", login);
        }
        if let Some(passcode) = opts.passcode {
            frame.set_header("passcode", passcode);
        }

        self.send_frame(&frame);
        Ok(())
    }

    /// Publish to a destination (SEND). Returns the receipt id when one was
    /// attached.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`; JSON encoding failures for
    /// [`Payload::Json`] bodies.
    pub fn send(
        &mut self,
        destination: &str,
        payload: impl Into<Payload>,
        opts: SendOptions,
    ) -> Result<Option<String>> {
        self.ensure_connected()?;

        let mut frame = Frame::new(Command::Send);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        frame.set_header("destination", destination);

        match payload.into() {
            Payload::Bytes(body) => frame.set_body(body),
            Payload::Json(value) => {
                frame.set_body(JsonCodec::encode(&value)?);
                frame.set_header(CONTENT_TYPE, JSON_CONTENT_TYPE);
            }
        }
        if let Some(content_type) = opts.content_type {
            frame.set_header(CONTENT_TYPE, content_type);
        }
        if let Some(transaction) = opts.transaction {
            frame.set_header("transaction", transaction);
        }

        Ok(self.finish(frame, opts.receipt))
    }

    /// Register interest in a destination. Returns the minted subscription
    /// id and the receipt id when one was attached.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`; `ApplicationError` on a duplicate
    /// destination.
    pub fn subscribe(
        &mut self,
        destination: &str,
        opts: SubscribeOptions,
    ) -> Result<(String, Option<String>)> {
        self.ensure_connected()?;
        if self.subscriptions.contains_key(destination) {
            return Err(StompError::application(format!(
                "Already subscribed to {destination}"
            )));
        }

        let id = take_id(&mut self.counters.subscription);
        let mut frame = Frame::new(Command::Subscribe);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        frame.set_header("destination", destination);
        frame.set_header("id", &id);
        frame.set_header("ack", opts.ack.as_str());

        let receipt = self.finish(frame, opts.receipt);
        self.subscriptions
            .insert(destination.to_string(), Subscription::new(id.clone(), opts.ack));
        Ok((id, receipt))
    }

    /// Drop a subscription. The 1.0 frame carries both `destination` and
    /// `id`; later versions only `id`.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`; `ApplicationError` on an unknown
    /// destination.
    pub fn unsubscribe(
        &mut self,
        destination: &str,
        opts: FrameOptions,
    ) -> Result<Option<String>> {
        self.ensure_connected()?;
        let sub = self.subscriptions.remove(destination).ok_or_else(|| {
            StompError::application(format!("Not subscribed to {destination}"))
        })?;

        let mut frame = Frame::new(Command::Unsubscribe);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        if self.version == Version::V1_0 {
            frame.set_header("destination", destination);
        }
        frame.set_header("id", sub.id);

        Ok(self.finish(frame, opts.receipt))
    }

    /// Acknowledge a delivered message by its ack id.
    ///
    /// On 1.0 the ack id must be known and the frame carries
    /// `message-id:<original>`; on 1.1/1.2 the frame carries `id:<ack_id>`.
    /// The ack correspondence entry is consumed either way.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`; on 1.0, `ApplicationError` for an
    /// unknown ack id.
    pub fn ack(&mut self, ack_id: &str, opts: AckOptions) -> Result<Option<String>> {
        self.acknowledge(Command::Ack, ack_id, opts)
    }

    /// Negative-acknowledge a delivered message by its ack id.
    ///
    /// # Errors
    ///
    /// As [`ack`](Self::ack), plus `ProtocolError` on a 1.0 session (NACK
    /// does not exist there).
    pub fn nack(&mut self, ack_id: &str, opts: AckOptions) -> Result<Option<String>> {
        if self.version == Version::V1_0 {
            return Err(StompError::protocol("NACK is not supported in STOMP 1.0"));
        }
        self.acknowledge(Command::Nack, ack_id, opts)
    }

    fn acknowledge(
        &mut self,
        command: Command,
        ack_id: &str,
        opts: AckOptions,
    ) -> Result<Option<String>> {
        self.ensure_connected()?;

        let mut frame = Frame::new(command);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        if self.version == Version::V1_0 {
            let message_id = self.ack_ids.remove(ack_id).ok_or_else(|| {
                StompError::application(format!("Unknown ack id: {ack_id}"))
            })?;
            frame.set_header("message-id", message_id);
        } else {
            self.ack_ids.remove(ack_id);
            frame.set_header("id", ack_id);
        }
        if let Some(transaction) = opts.transaction {
            frame.set_header("transaction", transaction);
        }

        Ok(self.finish(frame, opts.receipt))
    }

    /// Open a transaction with a minted monotonic id. Returns the id and
    /// the receipt id when one was attached.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`.
    pub fn begin(&mut self, opts: FrameOptions) -> Result<(String, Option<String>)> {
        self.ensure_connected()?;

        let id = take_id(&mut self.counters.transaction);
        let mut frame = Frame::new(Command::Begin);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        frame.set_header("transaction", &id);

        let receipt = self.finish(frame, opts.receipt);
        self.transactions.insert(id.clone());
        Ok((id, receipt))
    }

    /// Commit an open transaction; the id is freed.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`; `ApplicationError` for an unknown
    /// id.
    pub fn commit(&mut self, transaction: &str, opts: FrameOptions) -> Result<Option<String>> {
        self.end_transaction(Command::Commit, transaction, opts)
    }

    /// Abort an open transaction; the id is freed.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`; `ApplicationError` for an unknown
    /// id.
    pub fn abort(&mut self, transaction: &str, opts: FrameOptions) -> Result<Option<String>> {
        self.end_transaction(Command::Abort, transaction, opts)
    }

    fn end_transaction(
        &mut self,
        command: Command,
        transaction: &str,
        opts: FrameOptions,
    ) -> Result<Option<String>> {
        self.ensure_connected()?;
        if !self.transactions.remove(transaction) {
            return Err(StompError::application(format!(
                "Unknown transaction: {transaction}"
            )));
        }

        let mut frame = Frame::new(command);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        frame.set_header("transaction", transaction);

        Ok(self.finish(frame, opts.receipt))
    }

    /// Close the session: emit DISCONNECT, stop the heart-beat, clear the
    /// connected flag.
    ///
    /// # Errors
    ///
    /// `ProtocolError("Not connected")`.
    pub fn disconnect(&mut self, opts: FrameOptions) -> Result<Option<String>> {
        self.ensure_connected()?;

        let mut frame = Frame::new(Command::Disconnect);
        for (name, value) in opts.headers {
            frame.set_header(name, value);
        }
        let receipt = self.finish(frame, opts.receipt);

        if let Some(hb) = self.heartbeat.take() {
            hb.stop();
        }
        self.connected = false;
        Ok(receipt)
    }

    // ---- inbound --------------------------------------------------------

    /// Drive inbound transport bytes through the engine.
    ///
    /// Never fails: parser and dispatch errors become synthesized ERROR
    /// frames delivered to [`ClientHost::on_error`], and processing
    /// continues with the next frame.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            if let Some(hb) = &self.heartbeat {
                hb.received_data();
            }
        }

        if let Err(e) = self.parser.feed(bytes) {
            self.report_error(e);
        }
        while let Some(frame) = self.parser.next() {
            if let Err(e) = self.dispatch(&frame) {
                self.report_error(e);
            }
        }
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        let command = Command::parse(frame.command()).ok_or_else(|| {
            StompError::protocol_for(format!("Unhandled frame: {}", frame.command()), frame)
        })?;
        tracing::trace!(command = %command, "client dispatch");

        match command {
            Command::Connected => self.handle_connected(frame),
            Command::Message => self.handle_message(frame),
            Command::Receipt => self.handle_receipt(frame),
            Command::Error => {
                self.host.on_error(frame);
                Ok(())
            }
            other => Err(StompError::protocol_for(
                format!("Unhandled frame: {other}"),
                frame,
            )),
        }
    }

    fn handle_connected(&mut self, frame: &Frame) -> Result<()> {
        self.version = match frame.header("version") {
            Some(v) => v.parse()?,
            None => Version::V1_0,
        };
        self.session_id = frame.header("session").map(str::to_string);
        self.server_name = frame.header("server").map(str::to_string);

        if let Some(header) = frame.header("heart-beat") {
            let hb = Heartbeat::new(
                Rc::new(ClientHeartbeatHost {
                    host: Rc::clone(&self.host),
                }),
                Rc::clone(&self.scheduler),
                header,
                self.config.min_send_interval,
                self.config.desired_receive_interval,
            )?;
            hb.start();
            self.heartbeat = Some(hb);
        }

        self.connected = true;
        self.host.on_connected(frame);
        Ok(())
    }

    fn handle_message(&mut self, frame: &Frame) -> Result<()> {
        let destination = frame.require("destination")?;
        let message_id = frame.require("message-id")?;
        let subscription = frame.require_if("subscription", self.version >= Version::V1_1)?;

        let sub = self
            .subscriptions
            .get(destination)
            .cloned()
            .ok_or_else(|| StompError::application_for("Subscription not found", frame))?;
        if self.version >= Version::V1_1 && subscription != Some(sub.id.as_str()) {
            return Err(StompError::application_for(
                format!("Subscription mismatch for {destination}"),
                frame,
            ));
        }

        let ack_id = if sub.ack.needs_ack() {
            let id = if self.version >= Version::V1_2 {
                frame.require("ack")?.to_string()
            } else {
                take_id(&mut self.counters.ack)
            };
            if self.ack_ids.contains_key(&id) {
                return Err(StompError::application_for(
                    format!("Duplicate ack id: {id}"),
                    frame,
                ));
            }
            self.ack_ids.insert(id.clone(), message_id.to_string());
            Some(id)
        } else {
            None
        };

        let payload = if self.config.auto_json
            && frame.header(CONTENT_TYPE) == Some(JSON_CONTENT_TYPE)
        {
            Payload::Json(JsonCodec::decode(frame.body())?)
        } else {
            Payload::Bytes(frame.body().clone())
        };

        self.host
            .on_message(frame, destination, ack_id.as_deref(), payload);
        Ok(())
    }

    fn handle_receipt(&mut self, frame: &Frame) -> Result<()> {
        let receipt_id = frame.require("receipt-id")?;
        let original = self.receipts.remove(receipt_id).ok_or_else(|| {
            StompError::application_for(format!("Unknown receipt: {receipt_id}"), frame)
        })?;
        self.host.on_receipt(receipt_id, &original);
        Ok(())
    }

    // ---- plumbing -------------------------------------------------------

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(StompError::protocol("Not connected"))
        }
    }

    /// Attach a receipt header when requested, send, and record the frame
    /// in the receipted-frame table.
    fn finish(&mut self, mut frame: Frame, receipt_requested: bool) -> Option<String> {
        let receipt = if receipt_requested || self.config.receipt {
            let id = take_id(&mut self.counters.receipt);
            frame.set_header("receipt", &id);
            Some(id)
        } else {
            None
        };

        self.send_frame(&frame);
        if let Some(id) = &receipt {
            self.receipts.insert(id.clone(), frame);
        }
        receipt
    }

    fn send_frame(&mut self, frame: &Frame) {
        self.host.send_bytes(&frame.serialize());
        if let Some(hb) = &self.heartbeat {
            hb.sent_data();
        }
    }

    /// Convert an internal failure into a synthesized ERROR frame for
    /// `on_error`, mirroring what a server-side failure would look like.
    fn report_error(&mut self, error: StompError) {
        tracing::warn!(error = %error, "client engine error");
        let frame = Frame::new(Command::Error)
            .with_header("message", error.to_string())
            .with_body(format!("{error:?}"));
        self.host.on_error(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::cell::RefCell;

    #[derive(Default)]
    struct TestHost {
        sent: RefCell<Vec<u8>>,
        connected: RefCell<u32>,
        messages: RefCell<Vec<(String, Option<String>, Payload)>>,
        receipts: RefCell<Vec<(String, String)>>,
        errors: RefCell<Vec<String>>,
    }

    impl TestHost {
        fn take_sent(&self) -> Vec<u8> {
            std::mem::take(&mut *self.sent.borrow_mut())
        }
    }

    impl ClientHost for TestHost {
        fn send_bytes(&self, bytes: &[u8]) {
            self.sent.borrow_mut().extend_from_slice(bytes);
        }
        fn on_connected(&self, _frame: &Frame) {
            *self.connected.borrow_mut() += 1;
        }
        fn on_message(
            &self,
            _frame: &Frame,
            destination: &str,
            ack_id: Option<&str>,
            payload: Payload,
        ) {
            self.messages.borrow_mut().push((
                destination.to_string(),
                ack_id.map(str::to_string),
                payload,
            ));
        }
        fn on_receipt(&self, receipt_id: &str, frame: &Frame) {
            self.receipts
                .borrow_mut()
                .push((receipt_id.to_string(), frame.command().to_string()));
        }
        fn on_error(&self, frame: &Frame) {
            self.errors
                .borrow_mut()
                .push(frame.header("message").unwrap_or("").to_string());
        }
    }

    fn engine(config: ClientConfig) -> (Rc<TestHost>, ManualScheduler, ClientEngine) {
        let host = Rc::new(TestHost::default());
        let scheduler = ManualScheduler::new();
        let engine = ClientEngine::new(host.clone(), Rc::new(scheduler.clone()), config);
        (host, scheduler, engine)
    }

    fn connected_engine(
        version: Version,
        config: ClientConfig,
    ) -> (Rc<TestHost>, ManualScheduler, ClientEngine) {
        let (host, scheduler, mut engine) = engine(config);
        engine.connect(ConnectOptions::default()).unwrap();
        host.take_sent();
        engine.feed(
            format!("CONNECTED\nsession:s-1\nversion:{version}\n\n\x00\n").as_bytes(),
        );
        assert!(engine.connected());
        (host, scheduler, engine)
    }

    #[test]
    fn test_connect_frame_shape() {
        let (host, _, mut engine) = engine(ClientConfig::default());
        engine.connect(ConnectOptions::default()).unwrap();
        assert_eq!(
            host.take_sent(),
            b"CONNECT\naccept-version:1.0,1.1,1.2\nhost:stomp\n\n\x00\n"
        );
    }

    #[test]
    fn test_connect_with_credentials_and_heartbeat() {
        let (host, _, mut engine) = engine(ClientConfig::default());
        engine
            .connect(ConnectOptions {
                heartbeat: Some((4000, 8000)),
                login: Some("user".to_string()),
                passcode: Some("secret".to_string()),
                headers: vec![],
            })
            .unwrap();
        let wire = host.take_sent();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("heart-beat:4000,8000\n"));
        assert!(text.contains("login:user\n"));
        assert!(text.contains("passcode:secret\n"));
    }

    #[test]
    fn test_double_connect_rejected() {
        let (_, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        let err = engine.connect(ConnectOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "Already connected");
    }

    #[test]
    fn test_operations_require_connection() {
        let (_, _, mut engine) = engine(ClientConfig::default());
        assert_eq!(
            engine
                .send("/q", "x", SendOptions::default())
                .unwrap_err()
                .to_string(),
            "Not connected"
        );
        assert!(engine.subscribe("/q", SubscribeOptions::default()).is_err());
        assert!(engine.begin(FrameOptions::default()).is_err());
        assert!(engine.disconnect(FrameOptions::default()).is_err());
    }

    #[test]
    fn test_connected_defaults_to_1_0() {
        let (_, _, mut engine) = engine(ClientConfig::default());
        engine.connect(ConnectOptions::default()).unwrap();
        engine.feed(b"CONNECTED\n\n\x00\n");
        assert!(engine.connected());
        assert_eq!(engine.version(), Version::V1_0);
        assert_eq!(engine.session_id(), None);
    }

    #[test]
    fn test_connected_records_session_and_server() {
        let (_, _, mut engine) = engine(ClientConfig::default());
        engine.connect(ConnectOptions::default()).unwrap();
        engine.feed(b"CONNECTED\nserver:stompd/1.4\nsession:abc\nversion:1.1\n\n\x00\n");
        assert_eq!(engine.version(), Version::V1_1);
        assert_eq!(engine.session_id(), Some("abc"));
        assert_eq!(engine.server_name(), Some("stompd/1.4"));
    }

    #[test]
    fn test_send_plain_body() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        let receipt = engine.send("/q", "hi", SendOptions::default()).unwrap();
        assert_eq!(receipt, None);
        assert_eq!(
            host.take_sent(),
            b"SEND\ncontent-length:2\ncontent-type:text/plain\ndestination:/q\n\nhi\x00\n"
        );
    }

    #[test]
    fn test_send_json_payload_sets_content_type() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine
            .send(
                "/q",
                Payload::Json(serde_json::json!({"n": 1})),
                SendOptions::default(),
            )
            .unwrap();
        let text = String::from_utf8(host.take_sent()).unwrap();
        assert!(text.contains("content-type:application/json\n"));
        assert!(text.contains(r#"{"n":1}"#));
    }

    #[test]
    fn test_subscribe_and_duplicate() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        let (id, receipt) = engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        assert_eq!(id, "1");
        assert_eq!(receipt, None);
        assert_eq!(
            host.take_sent(),
            b"SUBSCRIBE\nack:auto\ndestination:/q\nid:1\n\n\x00\n"
        );

        let err = engine
            .subscribe("/q", SubscribeOptions::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Already subscribed to /q");

        // Ids stay monotonic across destinations.
        let (id2, _) = engine.subscribe("/r", SubscribeOptions::default()).unwrap();
        assert_eq!(id2, "2");
    }

    #[test]
    fn test_unsubscribe_then_resubscribe() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        host.take_sent();

        engine.unsubscribe("/q", FrameOptions::default()).unwrap();
        assert_eq!(host.take_sent(), b"UNSUBSCRIBE\nid:1\n\n\x00\n");

        assert!(engine
            .unsubscribe("/q", FrameOptions::default())
            .is_err());
        // The destination is free again.
        let (id, _) = engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        assert_eq!(id, "2");
    }

    #[test]
    fn test_unsubscribe_1_0_carries_destination() {
        let (host, _, mut engine) = connected_engine(Version::V1_0, ClientConfig::default());
        engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        host.take_sent();
        engine.unsubscribe("/q", FrameOptions::default()).unwrap();
        assert_eq!(
            host.take_sent(),
            b"UNSUBSCRIBE\ndestination:/q\nid:1\n\n\x00\n"
        );
    }

    #[test]
    fn test_message_auto_ack_has_no_ack_id() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\nhi\x00\n");

        let messages = host.messages.borrow();
        assert_eq!(messages.len(), 1);
        let (dest, ack, payload) = &messages[0];
        assert_eq!(dest, "/q");
        assert!(ack.is_none());
        assert_eq!(&payload.as_bytes().unwrap()[..], b"hi");
    }

    #[test]
    fn test_message_client_ack_uses_frame_ack_header_on_1_2() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine
            .subscribe(
                "/q",
                SubscribeOptions {
                    ack: AckMode::Client,
                    ..Default::default()
                },
            )
            .unwrap();
        host.take_sent();
        engine.feed(
            b"MESSAGE\nack:1\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\nhi\x00\n",
        );
        assert_eq!(host.messages.borrow()[0].1.as_deref(), Some("1"));

        engine.ack("1", AckOptions::default()).unwrap();
        assert_eq!(host.take_sent(), b"ACK\nid:1\n\n\x00\n");
    }

    #[test]
    fn test_message_missing_ack_header_on_1_2_is_error() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine
            .subscribe(
                "/q",
                SubscribeOptions {
                    ack: AckMode::Client,
                    ..Default::default()
                },
            )
            .unwrap();
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\nhi\x00\n");
        assert_eq!(host.errors.borrow()[0], "Missing 'ack' header");
    }

    #[test]
    fn test_message_mints_ack_ids_on_1_1() {
        let (host, _, mut engine) = connected_engine(Version::V1_1, ClientConfig::default());
        engine
            .subscribe(
                "/q",
                SubscribeOptions {
                    ack: AckMode::ClientIndividual,
                    ..Default::default()
                },
            )
            .unwrap();
        host.take_sent();
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\na\x00\n");
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-2\nsubscription:1\n\nb\x00\n");

        let messages = host.messages.borrow();
        assert_eq!(messages[0].1.as_deref(), Some("1"));
        assert_eq!(messages[1].1.as_deref(), Some("2"));
        drop(messages);

        engine.ack("2", AckOptions::default()).unwrap();
        assert_eq!(host.take_sent(), b"ACK\nid:2\n\n\x00\n");
    }

    #[test]
    fn test_duplicate_ack_id_rejected() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine
            .subscribe(
                "/q",
                SubscribeOptions {
                    ack: AckMode::Client,
                    ..Default::default()
                },
            )
            .unwrap();
        engine.feed(
            b"MESSAGE\nack:9\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\na\x00\n",
        );
        engine.feed(
            b"MESSAGE\nack:9\ndestination:/q\nmessage-id:m-2\nsubscription:1\n\nb\x00\n",
        );
        assert_eq!(host.messages.borrow().len(), 1);
        assert_eq!(host.errors.borrow()[0], "Duplicate ack id: 9");
    }

    #[test]
    fn test_message_unknown_subscription() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\nhi\x00\n");
        assert_eq!(host.errors.borrow()[0], "Subscription not found");
    }

    #[test]
    fn test_message_subscription_mismatch() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-1\nsubscription:42\n\nhi\x00\n");
        assert_eq!(host.errors.borrow()[0], "Subscription mismatch for /q");
        assert!(host.messages.borrow().is_empty());
    }

    #[test]
    fn test_ack_1_0_translates_to_message_id() {
        let (host, _, mut engine) = connected_engine(Version::V1_0, ClientConfig::default());
        engine
            .subscribe(
                "/q",
                SubscribeOptions {
                    ack: AckMode::Client,
                    ..Default::default()
                },
            )
            .unwrap();
        host.take_sent();
        engine.feed(b"MESSAGE\ndestination:/q\nmessage-id:m-77\n\nhi\x00\n");
        assert_eq!(host.messages.borrow()[0].1.as_deref(), Some("1"));

        engine.ack("1", AckOptions::default()).unwrap();
        assert_eq!(host.take_sent(), b"ACK\nmessage-id:m-77\n\n\x00\n");

        // The correspondence was consumed.
        assert_eq!(
            engine.ack("1", AckOptions::default()).unwrap_err().to_string(),
            "Unknown ack id: 1"
        );
    }

    #[test]
    fn test_nack_rejected_on_1_0() {
        let (_, _, mut engine) = connected_engine(Version::V1_0, ClientConfig::default());
        let err = engine.nack("1", AckOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "NACK is not supported in STOMP 1.0");
    }

    #[test]
    fn test_transaction_lifecycle() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        let (tx, _) = engine.begin(FrameOptions::default()).unwrap();
        assert_eq!(tx, "1");
        assert_eq!(host.take_sent(), b"BEGIN\ntransaction:1\n\n\x00\n");

        engine
            .send(
                "/q",
                "a",
                SendOptions {
                    transaction: Some(tx.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(String::from_utf8(host.take_sent())
            .unwrap()
            .contains("transaction:1\n"));

        engine.commit(&tx, FrameOptions::default()).unwrap();
        assert_eq!(host.take_sent(), b"COMMIT\ntransaction:1\n\n\x00\n");

        // The id is freed after COMMIT.
        assert_eq!(
            engine
                .abort(&tx, FrameOptions::default())
                .unwrap_err()
                .to_string(),
            "Unknown transaction: 1"
        );

        let (tx2, _) = engine.begin(FrameOptions::default()).unwrap();
        assert_eq!(tx2, "2");
        engine.abort(&tx2, FrameOptions::default()).unwrap();
    }

    #[test]
    fn test_receipt_flow() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        let receipt = engine
            .send(
                "/q",
                "x",
                SendOptions {
                    receipt: true,
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(receipt, "1");
        assert!(String::from_utf8(host.take_sent())
            .unwrap()
            .contains("receipt:1\n"));

        engine.feed(b"RECEIPT\nreceipt-id:1\n\n\x00\n");
        let receipts = host.receipts.borrow();
        assert_eq!(receipts[0], ("1".to_string(), "SEND".to_string()));
    }

    #[test]
    fn test_global_receipt_option() {
        let config = ClientConfig {
            receipt: true,
            ..Default::default()
        };
        let (host, _, mut engine) = connected_engine(Version::V1_2, config);
        let receipt = engine.send("/q", "x", SendOptions::default()).unwrap();
        assert_eq!(receipt.as_deref(), Some("1"));
        let (_, receipt2) = engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        assert_eq!(receipt2.as_deref(), Some("2"));
        host.take_sent();
    }

    #[test]
    fn test_unknown_receipt_reports_error() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.feed(b"RECEIPT\nreceipt-id:99\n\n\x00\n");
        assert_eq!(host.errors.borrow()[0], "Unknown receipt: 99");
    }

    #[test]
    fn test_server_error_frame_passed_through() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.feed(b"ERROR\nmessage:broker on fire\nreceipt-id:7\n\ndetails\x00\n");
        assert_eq!(host.errors.borrow()[0], "broker on fire");
    }

    #[test]
    fn test_unhandled_inbound_command() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.feed(b"SEND\ndestination:/q\n\nx\x00\n");
        assert_eq!(host.errors.borrow()[0], "Unhandled frame: SEND");
    }

    #[test]
    fn test_feed_never_panics_on_garbage() {
        let (host, _, mut engine) = connected_engine(Version::V1_2, ClientConfig::default());
        engine.feed(b"garbage without colon\nmore\x00");
        assert_eq!(host.errors.borrow().len(), 1);
        // Later well-formed frames still dispatch.
        engine.feed(b"RECEIPT\nreceipt-id:1\n\n\x00\n");
        assert_eq!(host.errors.borrow().len(), 2);
    }

    #[test]
    fn test_auto_json_decodes_message_body() {
        let config = ClientConfig {
            auto_json: true,
            ..Default::default()
        };
        let (host, _, mut engine) = connected_engine(Version::V1_2, config);
        engine.subscribe("/q", SubscribeOptions::default()).unwrap();
        engine.feed(
            b"MESSAGE\ncontent-type:application/json\ndestination:/q\nmessage-id:m-1\nsubscription:1\n\n{\"a\":5}\x00\n",
        );
        let messages = host.messages.borrow();
        assert_eq!(messages[0].2.as_json().unwrap()["a"], 5);
    }

    #[test]
    fn test_heartbeat_started_from_connected() {
        let (host, scheduler, mut engine) = engine(ClientConfig::default());
        engine.connect(ConnectOptions::default()).unwrap();
        host.take_sent();
        engine.feed(b"CONNECTED\nheart-beat:1000,1000\nversion:1.2\n\n\x00\n");
        assert_eq!(scheduler.active_timers(), 2);

        // Idle for a full outgoing window: one heart-beat byte.
        scheduler.advance(std::time::Duration::from_millis(1000));
        assert_eq!(host.take_sent(), b"\n");
    }

    #[test]
    fn test_heartbeat_loss_reports_failure() {
        let (host, scheduler, mut engine) = engine(ClientConfig::default());
        engine.connect(ConnectOptions::default()).unwrap();
        engine.feed(b"CONNECTED\nheart-beat:5000,0\nversion:1.2\n\n\x00\n");

        scheduler.advance(std::time::Duration::from_millis(7500));
        assert_eq!(host.errors.borrow()[0], "heartbeat failure");
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn test_disconnect_stops_heartbeat_and_clears_state() {
        let (host, scheduler, mut engine) = engine(ClientConfig::default());
        engine.connect(ConnectOptions::default()).unwrap();
        engine.feed(b"CONNECTED\nheart-beat:1000,1000\nversion:1.2\n\n\x00\n");
        host.take_sent();

        engine.disconnect(FrameOptions::default()).unwrap();
        assert_eq!(host.take_sent(), b"DISCONNECT\n\n\x00\n");
        assert!(!engine.connected());
        assert_eq!(scheduler.active_timers(), 0);
    }
}
