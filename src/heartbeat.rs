//! Heart-beat negotiation and the periodic timer pair.
//!
//! STOMP heart-beating is symmetric: each side advertises
//! `heart-beat:<cx>,<cy>` where `cx` is the rate it can guarantee sending
//! at and `cy` the rate it wishes to receive at, both in milliseconds and
//! with `0` meaning "none". [`Heartbeat`] is built from the peer's
//! advertised pair plus the local floors, and arms up to two timers on the
//! injected scheduler:
//!
//! - an outgoing timer that emits a single `\n` whenever a full period
//!   passed without any frame being sent
//! - an incoming watchdog at 1.5x the negotiated period that stops both
//!   timers and reports `"heartbeat failure"` when a period passed without
//!   any bytes arriving

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Result, StompError};
use crate::scheduler::{Scheduler, Timer};

/// The byte a heart-beat consists of.
const HEARTBEAT_BYTE: &[u8] = b"\n";

/// What the [`Heartbeat`] needs from its embedder: somewhere to write the
/// idle `\n` and somewhere to report a dead peer.
pub trait HeartbeatHost {
    /// Write bytes to the transport. Synchronous and infallible.
    fn send_bytes(&self, bytes: &[u8]);
    /// Called once when the peer misses its window; both timers are already
    /// stopped.
    fn report_error(&self, message: &str);
}

/// Parse a `heart-beat` header value into its millisecond pair.
///
/// # Errors
///
/// `ProtocolError("Invalid heart-beat header")` unless the value is two
/// comma-separated non-negative integers.
pub fn parse_heartbeat(header: &str) -> Result<(u64, u64)> {
    let invalid = || StompError::protocol(format!("Invalid heart-beat header: {header}"));
    let (cx, cy) = header.split_once(',').ok_or_else(invalid)?;
    Ok((
        cx.trim().parse::<u64>().map_err(|_| invalid())?,
        cy.trim().parse::<u64>().map_err(|_| invalid())?,
    ))
}

struct HeartbeatState {
    sent: bool,
    received: bool,
    outgoing: Option<Box<dyn Timer>>,
    incoming: Option<Box<dyn Timer>>,
}

/// Pair of periodic liveness timers for one session.
pub struct Heartbeat {
    host: Rc<dyn HeartbeatHost>,
    scheduler: Rc<dyn Scheduler>,
    /// Period at which the peer promises bytes, floored; 0 = disabled.
    incoming_rate: u64,
    /// Period at which this side must produce bytes, floored; 0 = disabled.
    outgoing_rate: u64,
    state: Rc<RefCell<HeartbeatState>>,
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("incoming_rate", &self.incoming_rate)
            .field("outgoing_rate", &self.outgoing_rate)
            .finish()
    }
}

impl Heartbeat {
    /// Negotiate against the peer's advertised `heart-beat` pair.
    ///
    /// `incoming = max(cx, min_send_interval)` when the peer sends at all,
    /// `outgoing = max(cy, desired_receive_interval)` when the peer wants
    /// to receive at all.
    ///
    /// # Errors
    ///
    /// `ProtocolError` on a malformed header value.
    pub fn new(
        host: Rc<dyn HeartbeatHost>,
        scheduler: Rc<dyn Scheduler>,
        header: &str,
        min_send_interval: u64,
        desired_receive_interval: u64,
    ) -> Result<Self> {
        let (cx, cy) = parse_heartbeat(header)?;
        let incoming_rate = if cx > 0 { cx.max(min_send_interval) } else { 0 };
        let outgoing_rate = if cy > 0 {
            cy.max(desired_receive_interval)
        } else {
            0
        };

        Ok(Self {
            host,
            scheduler,
            incoming_rate,
            outgoing_rate,
            state: Rc::new(RefCell::new(HeartbeatState {
                sent: false,
                received: false,
                outgoing: None,
                incoming: None,
            })),
        })
    }

    /// Negotiated incoming period in milliseconds (0 = disabled).
    #[inline]
    pub fn incoming_rate(&self) -> u64 {
        self.incoming_rate
    }

    /// Negotiated outgoing period in milliseconds (0 = disabled).
    #[inline]
    pub fn outgoing_rate(&self) -> u64 {
        self.outgoing_rate
    }

    /// Header value echoing the negotiated pair, `"<outgoing>,<incoming>"`.
    pub fn echo_header(&self) -> String {
        format!("{},{}", self.outgoing_rate, self.incoming_rate)
    }

    /// Arm the timers. Idle detection starts from this instant.
    pub fn start(&self) {
        if self.outgoing_rate > 0 {
            let state = Rc::clone(&self.state);
            let host = Rc::clone(&self.host);
            let timer = self.scheduler.schedule_periodic(
                Duration::from_millis(self.outgoing_rate),
                Box::new(move || {
                    let mut s = state.borrow_mut();
                    if s.sent {
                        s.sent = false;
                    } else {
                        drop(s);
                        host.send_bytes(HEARTBEAT_BYTE);
                    }
                }),
            );
            self.state.borrow_mut().outgoing = Some(timer);
        }

        if self.incoming_rate > 0 {
            let state = Rc::clone(&self.state);
            let host = Rc::clone(&self.host);
            // The error margin: a peer is only declared dead after one and
            // a half silent windows.
            let period = Duration::from_millis(self.incoming_rate * 3 / 2);
            let timer = self.scheduler.schedule_periodic(
                period,
                Box::new(move || {
                    let mut s = state.borrow_mut();
                    if s.received {
                        s.received = false;
                        return;
                    }
                    if let Some(t) = s.outgoing.take() {
                        t.cancel();
                    }
                    if let Some(t) = s.incoming.take() {
                        t.cancel();
                    }
                    drop(s);
                    tracing::debug!("peer missed its heart-beat window");
                    host.report_error("heartbeat failure");
                }),
            );
            self.state.borrow_mut().incoming = Some(timer);
        }
    }

    /// Note that a frame (or heart-beat) was written since the last
    /// outgoing tick.
    pub fn sent_data(&self) {
        self.state.borrow_mut().sent = true;
    }

    /// Note that bytes (frames or heart-beats) arrived since the last
    /// incoming tick.
    pub fn received_data(&self) {
        self.state.borrow_mut().received = true;
    }

    /// Cancel both timers. Idempotent.
    pub fn stop(&self) {
        let mut s = self.state.borrow_mut();
        if let Some(t) = s.outgoing.take() {
            t.cancel();
        }
        if let Some(t) = s.incoming.take() {
            t.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    struct RecordingHost {
        sent: RefCell<Vec<u8>>,
        errors: RefCell<Vec<String>>,
    }

    impl RecordingHost {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                sent: RefCell::new(Vec::new()),
                errors: RefCell::new(Vec::new()),
            })
        }
    }

    impl HeartbeatHost for RecordingHost {
        fn send_bytes(&self, bytes: &[u8]) {
            self.sent.borrow_mut().extend_from_slice(bytes);
        }
        fn report_error(&self, message: &str) {
            self.errors.borrow_mut().push(message.to_string());
        }
    }

    fn heartbeat(
        header: &str,
        min_send: u64,
        desired_recv: u64,
    ) -> (Rc<RecordingHost>, ManualScheduler, Heartbeat) {
        let host = RecordingHost::new();
        let scheduler = ManualScheduler::new();
        let hb = Heartbeat::new(
            host.clone(),
            Rc::new(scheduler.clone()),
            header,
            min_send,
            desired_recv,
        )
        .unwrap();
        (host, scheduler, hb)
    }

    #[test]
    fn test_parse_heartbeat() {
        assert_eq!(parse_heartbeat("0,0").unwrap(), (0, 0));
        assert_eq!(parse_heartbeat("5000, 10000").unwrap(), (5000, 10000));
        assert!(parse_heartbeat("5000").is_err());
        assert!(parse_heartbeat("a,b").is_err());
        assert!(parse_heartbeat("-1,0").is_err());
    }

    #[test]
    fn test_negotiation_applies_floors() {
        let (_, _, hb) = heartbeat("100,200", 5000, 60000);
        assert_eq!(hb.incoming_rate(), 5000);
        assert_eq!(hb.outgoing_rate(), 60000);
        assert_eq!(hb.echo_header(), "60000,5000");
    }

    #[test]
    fn test_negotiation_zero_disables_direction() {
        let (_, _, hb) = heartbeat("0,8000", 5000, 1000);
        assert_eq!(hb.incoming_rate(), 0);
        assert_eq!(hb.outgoing_rate(), 8000);
    }

    #[test]
    fn test_outgoing_idle_sends_single_newline() {
        let (host, scheduler, hb) = heartbeat("0,1000", 0, 0);
        hb.start();

        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(*host.sent.borrow(), b"\n");
        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(*host.sent.borrow(), b"\n\n");
    }

    #[test]
    fn test_outgoing_suppressed_when_data_sent() {
        let (host, scheduler, hb) = heartbeat("0,1000", 0, 0);
        hb.start();

        hb.sent_data();
        scheduler.advance(Duration::from_millis(1000));
        assert!(host.sent.borrow().is_empty());

        // Flag cleared by the first tick: the next idle window beats.
        scheduler.advance(Duration::from_millis(1000));
        assert_eq!(*host.sent.borrow(), b"\n");
    }

    #[test]
    fn test_incoming_loss_reports_and_cancels() {
        let (host, scheduler, hb) = heartbeat("5000,0", 0, 0);
        hb.start();

        scheduler.advance(Duration::from_millis(7500));
        assert_eq!(*host.errors.borrow(), vec!["heartbeat failure"]);
        assert_eq!(scheduler.active_timers(), 0);

        // No repeat reports after cancellation.
        scheduler.advance(Duration::from_millis(60000));
        assert_eq!(host.errors.borrow().len(), 1);
    }

    #[test]
    fn test_incoming_survives_while_data_arrives() {
        let (host, scheduler, hb) = heartbeat("1000,0", 0, 0);
        hb.start();

        for _ in 0..5 {
            hb.received_data();
            scheduler.advance(Duration::from_millis(1500));
        }
        assert!(host.errors.borrow().is_empty());

        scheduler.advance(Duration::from_millis(1500));
        assert_eq!(host.errors.borrow().len(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (host, scheduler, hb) = heartbeat("1000,1000", 0, 0);
        hb.start();
        hb.stop();
        hb.stop();

        scheduler.advance(Duration::from_millis(10000));
        assert!(host.sent.borrow().is_empty());
        assert!(host.errors.borrow().is_empty());
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn test_malformed_header_rejected() {
        let host = RecordingHost::new();
        let scheduler: Rc<dyn Scheduler> = Rc::new(ManualScheduler::new());
        let err = Heartbeat::new(host, scheduler, "fast,loose", 0, 0).unwrap_err();
        assert!(err.to_string().starts_with("Invalid heart-beat header"));
    }
}
