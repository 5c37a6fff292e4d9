//! Link layer session.
//!
//! One tokio task owns the transport and all link state of a connection.
//! It waits on three sources at once: the next frame from the peer, the
//! earliest pending timer deadline, and requests from [`SessionHandle`]s.
//! Because a single task mutates the sequence numbers, the send window and
//! the timers, timer expiry can never race an acknowledgement.
//!
//! Timers:
//!
//! - **T1**: oldest unacknowledged I-frame, pending STARTDT/STOPDT act and
//!   pending TESTFR act. Expiry is fatal.
//! - **T2**: oldest unacknowledged received I-frame. Expiry sends an S-frame.
//! - **T3**: time since the last received frame. Expiry sends TESTFR act.
//!
//! Sends beyond the `k` window are queued and complete once the peer
//! acknowledges enough frames. A fatal error ends the task after emitting
//! exactly one [`SessionEvent::LinkLost`].

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::codec::{Apdu, Iec104Codec};
use crate::config::LinkConfig;
use crate::error::{Iec104Error, Result};
use crate::types::{seq_distance, seq_next, Apci, Asdu, AsduParams, UFunction, SEQ_MODULUS};

const REQUEST_QUEUE: usize = 64;

/// Which end of the link this session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Controlling station (master): initiates STARTDT and STOPDT.
    Controlling,
    /// Controlled station (slave): answers STARTDT and STOPDT.
    Controlled,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport gone
    Disconnected,
    /// Transport up, data transfer not started
    Stopped,
    /// Data transfer active
    Started,
}

/// Events produced by a session.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// A received ASDU.
    Asdu(Asdu),
    /// A received ASDU that could not be decoded. The link keeps running.
    Rejected { raw: Bytes, error: Iec104Error },
    /// The session ended on a fatal error. Emitted at most once.
    LinkLost(Iec104Error),
}

enum Request {
    Send {
        asdu: Bytes,
        done: oneshot::Sender<Result<()>>,
    },
    Control {
        function: UFunction,
        done: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    params: AsduParams,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send { asdu, .. } => write!(f, "Send({} octets)", asdu.len()),
            Self::Control { function, .. } => write!(f, "Control({function:?})"),
            Self::Close => f.write_str("Close"),
        }
    }
}

impl SessionHandle {
    /// Encode and transmit an ASDU.
    ///
    /// Resolves once the I-frame is written, which may wait for the send
    /// window to open. Fails with [`Iec104Error::NotStarted`] unless data
    /// transfer is started.
    pub async fn send_asdu(&self, asdu: &Asdu) -> Result<()> {
        let encoded = asdu.to_bytes(&self.params)?;
        self.send_encoded(encoded).await
    }

    pub(crate) async fn send_encoded(&self, asdu: Bytes) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.submit(Request::Send { asdu, done }, rx).await
    }

    /// Send STARTDT act and wait for the confirmation.
    pub async fn start_dt(&self) -> Result<()> {
        self.control(UFunction::StartDtAct).await
    }

    /// Send STOPDT act and wait for the confirmation.
    pub async fn stop_dt(&self) -> Result<()> {
        self.control(UFunction::StopDtAct).await
    }

    async fn control(&self, function: UFunction) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.submit(Request::Control { function, done }, rx).await
    }

    async fn submit(&self, request: Request, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| Iec104Error::LinkClosed)?;
        rx.await.map_err(|_| Iec104Error::LinkClosed)?
    }

    /// Close the transport. Queued sends fail with [`Iec104Error::LinkClosed`].
    pub async fn close(&self) {
        let _ = self.requests.send(Request::Close).await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver following every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn params(&self) -> AsduParams {
        self.params
    }

    /// Whether the session task has ended.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// Start a session over a connected transport.
///
/// The configuration is expected to be validated by the caller.
pub fn spawn<T>(
    transport: T,
    role: LinkRole,
    config: LinkConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE);
    let (events, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(ConnectionState::Stopped);

    let handle = SessionHandle {
        requests,
        state,
        params: config.asdu,
    };
    let session = Session {
        framed: Framed::new(transport, Iec104Codec::new()),
        role,
        seq: Sequence::new(config.k, config.w),
        config,
        state: ConnectionState::Stopped,
        outbound: VecDeque::new(),
        control: None,
        test_sent: None,
        last_rx: Instant::now(),
        events,
        state_tx,
    };
    tokio::spawn(session.run(request_rx));
    (handle, event_rx)
}

/// Send and receive sequence state with window accounting.
#[derive(Debug)]
struct Sequence {
    k: u16,
    w: u16,
    /// V(S)
    send_seq: u16,
    /// V(R)
    recv_seq: u16,
    /// Transmit times of unacknowledged I-frames, oldest first.
    unacked: VecDeque<Instant>,
    /// Received I-frames not yet acknowledged to the peer.
    recv_unacked: u16,
    recv_unacked_since: Option<Instant>,
}

impl Sequence {
    fn new(k: u16, w: u16) -> Self {
        Self {
            k,
            w,
            send_seq: 0,
            recv_seq: 0,
            unacked: VecDeque::with_capacity(k as usize),
            recv_unacked: 0,
            recv_unacked_since: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.k, self.w);
    }

    fn can_send(&self) -> bool {
        self.unacked.len() < self.k as usize
    }

    /// N(S) and N(R) for the next I-frame. Sending it acknowledges all
    /// received frames.
    fn next_send(&mut self, now: Instant) -> (u16, u16) {
        let send = self.send_seq;
        self.send_seq = seq_next(send);
        self.unacked.push_back(now);
        self.received_acked();
        (send, self.recv_seq)
    }

    fn oldest_unacked_seq(&self) -> u16 {
        (self.send_seq + SEQ_MODULUS - self.unacked.len() as u16) % SEQ_MODULUS
    }

    /// Apply an N(R) from the peer.
    fn acknowledge(&mut self, ack: u16) -> Result<()> {
        let oldest = self.oldest_unacked_seq();
        let confirmed = seq_distance(oldest, ack) as usize;
        if confirmed > self.unacked.len() {
            return Err(Iec104Error::AckOutOfWindow {
                ack,
                oldest,
                next: self.send_seq,
            });
        }
        self.unacked.drain(..confirmed);
        Ok(())
    }

    /// Accept an N(S); returns whether `w` frames now await acknowledgement.
    fn on_received(&mut self, send_seq: u16, now: Instant) -> Result<bool> {
        if send_seq != self.recv_seq {
            return Err(Iec104Error::SequenceMismatch {
                expected: self.recv_seq,
                actual: send_seq,
            });
        }
        self.recv_seq = seq_next(self.recv_seq);
        if self.recv_unacked == 0 {
            self.recv_unacked_since = Some(now);
        }
        self.recv_unacked += 1;
        Ok(self.recv_unacked >= self.w)
    }

    fn received_acked(&mut self) {
        self.recv_unacked = 0;
        self.recv_unacked_since = None;
    }
}

struct Outbound {
    asdu: Bytes,
    done: oneshot::Sender<Result<()>>,
}

struct PendingControl {
    function: UFunction,
    sent_at: Instant,
    done: oneshot::Sender<Result<()>>,
}

struct Session<T> {
    framed: Framed<T, Iec104Codec>,
    role: LinkRole,
    config: LinkConfig,
    seq: Sequence,
    state: ConnectionState,
    outbound: VecDeque<Outbound>,
    control: Option<PendingControl>,
    test_sent: Option<Instant>,
    last_rx: Instant,
    events: mpsc::UnboundedSender<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        info!(role = ?self.role, "IEC 104 session started");
        self.emit(SessionEvent::StateChanged(ConnectionState::Stopped));
        let outcome = self.drive(&mut requests).await;
        self.shutdown(outcome, &mut requests).await;
    }

    /// Main loop. `Ok` means a local close.
    async fn drive(&mut self, requests: &mut mpsc::Receiver<Request>) -> Result<()> {
        loop {
            self.flush_outbound().await?;
            let deadline = self.next_deadline();

            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(apdu)) => self.on_frame(apdu).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(Iec104Error::connection_static("connection closed by peer")),
                },
                () = sleep_until(deadline) => self.on_timer().await?,
                request = requests.recv() => match request {
                    Some(Request::Close) | None => return Ok(()),
                    Some(request) => self.on_request(request).await?,
                },
            }
        }
    }

    fn accepting_data(&self) -> bool {
        self.state == ConnectionState::Started
            && !matches!(&self.control, Some(p) if p.function == UFunction::StopDtAct)
    }

    fn next_deadline(&self) -> Instant {
        let t1 = self.config.t1;
        let mut deadlines = Vec::with_capacity(4);
        if let Some(sent) = self.seq.unacked.front() {
            deadlines.push(*sent + t1);
        }
        if let Some(pending) = &self.control {
            deadlines.push(pending.sent_at + t1);
        }
        if let Some(since) = self.seq.recv_unacked_since {
            deadlines.push(since + self.config.t2);
        }
        match self.test_sent {
            Some(sent) => deadlines.push(sent + t1),
            None => deadlines.push(self.last_rx + self.config.t3),
        }
        deadlines
            .into_iter()
            .min()
            .unwrap_or(self.last_rx + self.config.t3)
    }

    async fn on_timer(&mut self) -> Result<()> {
        let now = Instant::now();
        let t1 = self.config.t1;

        if matches!(self.seq.unacked.front(), Some(sent) if now >= *sent + t1) {
            warn!(unacked = self.seq.unacked.len(), "T1 expired waiting for acknowledgement");
            return Err(Iec104Error::T1Timeout);
        }
        if matches!(&self.control, Some(p) if now >= p.sent_at + t1) {
            warn!("T1 expired waiting for STARTDT/STOPDT confirmation");
            return Err(Iec104Error::T1Timeout);
        }
        if matches!(self.test_sent, Some(sent) if now >= sent + t1) {
            warn!("TESTFR act not confirmed within T1");
            return Err(Iec104Error::T3Timeout);
        }
        if matches!(self.seq.recv_unacked_since, Some(since) if now >= since + self.config.t2) {
            debug!(pending = self.seq.recv_unacked, "T2 expired");
            self.acknowledge_received().await?;
        }
        if self.test_sent.is_none() && now >= self.last_rx + self.config.t3 {
            debug!("T3 expired, testing link");
            self.send_frame(Apdu::u_frame(UFunction::TestFrAct)).await?;
            self.test_sent = Some(now);
        }
        Ok(())
    }

    async fn on_request(&mut self, request: Request) -> Result<()> {
        match request {
            Request::Send { asdu, done } => {
                if self.accepting_data() {
                    self.outbound.push_back(Outbound { asdu, done });
                } else {
                    let _ = done.send(Err(Iec104Error::NotStarted));
                }
            }
            Request::Control { function, done } => self.request_control(function, done).await?,
            Request::Close => {}
        }
        Ok(())
    }

    async fn request_control(
        &mut self,
        function: UFunction,
        done: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        if self.role == LinkRole::Controlled {
            let _ = done.send(Err(Iec104Error::protocol_static(
                "controlled station cannot initiate STARTDT/STOPDT",
            )));
            return Ok(());
        }
        if self.control.is_some() {
            let _ = done.send(Err(Iec104Error::protocol_static(
                "STARTDT/STOPDT already pending",
            )));
            return Ok(());
        }
        let target = if function == UFunction::StartDtAct {
            ConnectionState::Started
        } else {
            ConnectionState::Stopped
        };
        if self.state == target {
            let _ = done.send(Ok(()));
            return Ok(());
        }

        if function == UFunction::StopDtAct {
            self.acknowledge_received().await?;
        }
        self.send_frame(Apdu::u_frame(function)).await?;
        self.control = Some(PendingControl {
            function,
            sent_at: Instant::now(),
            done,
        });
        Ok(())
    }

    async fn on_frame(&mut self, apdu: Apdu) -> Result<()> {
        trace!(frame = %apdu, "rx");
        let now = Instant::now();
        self.last_rx = now;

        match apdu.apci {
            Apci::IFrame { send_seq, recv_seq } => {
                if self.state != ConnectionState::Started {
                    return Err(Iec104Error::protocol_static(
                        "I-frame received while data transfer is stopped",
                    ));
                }
                let window_full = self.seq.on_received(send_seq, now)?;
                self.seq.acknowledge(recv_seq)?;

                let event = match Asdu::decode(&apdu.asdu, &self.config.asdu) {
                    Ok(asdu) => {
                        debug!(%asdu, "received ASDU");
                        SessionEvent::Asdu(asdu)
                    }
                    Err(error) => {
                        warn!(%error, "undecodable ASDU");
                        SessionEvent::Rejected {
                            raw: apdu.asdu,
                            error,
                        }
                    }
                };
                self.emit(event);

                if window_full {
                    self.acknowledge_received().await?;
                }
            }
            Apci::SFrame { recv_seq } => self.seq.acknowledge(recv_seq)?,
            Apci::UFrame { function } => self.on_u_frame(function).await?,
        }
        Ok(())
    }

    async fn on_u_frame(&mut self, function: UFunction) -> Result<()> {
        match function {
            UFunction::TestFrAct => self.send_frame(Apdu::u_frame(UFunction::TestFrCon)).await?,
            UFunction::TestFrCon => {
                if self.test_sent.take().is_none() {
                    debug!("unsolicited TESTFR con");
                }
            }
            UFunction::StartDtAct | UFunction::StopDtAct => {
                if self.role == LinkRole::Controlling {
                    warn!(?function, "ignoring activation from controlled station");
                    return Ok(());
                }
                if function == UFunction::StartDtAct {
                    self.seq.reset();
                    self.send_frame(Apdu::u_frame(UFunction::StartDtCon)).await?;
                    self.set_state(ConnectionState::Started);
                } else {
                    self.acknowledge_received().await?;
                    self.send_frame(Apdu::u_frame(UFunction::StopDtCon)).await?;
                    self.set_state(ConnectionState::Stopped);
                }
            }
            UFunction::StartDtCon | UFunction::StopDtCon => match self.control.take() {
                Some(pending) if pending.function.confirmation() == Some(function) => {
                    if function == UFunction::StartDtCon {
                        self.seq.reset();
                        self.set_state(ConnectionState::Started);
                    } else {
                        self.set_state(ConnectionState::Stopped);
                    }
                    let _ = pending.done.send(Ok(()));
                }
                other => {
                    self.control = other;
                    warn!(?function, "unexpected confirmation");
                }
            },
        }
        Ok(())
    }

    async fn flush_outbound(&mut self) -> Result<()> {
        while self.accepting_data() && self.seq.can_send() {
            let Some(item) = self.outbound.pop_front() else {
                break;
            };
            if item.done.is_closed() {
                continue;
            }
            let (send_seq, recv_seq) = self.seq.next_send(Instant::now());
            self.send_frame(Apdu::i_frame(send_seq, recv_seq, item.asdu))
                .await?;
            let _ = item.done.send(Ok(()));
        }
        Ok(())
    }

    /// Send an S-frame if received I-frames are unacknowledged.
    async fn acknowledge_received(&mut self) -> Result<()> {
        if self.seq.recv_unacked > 0 {
            let recv_seq = self.seq.recv_seq;
            self.seq.received_acked();
            self.send_frame(Apdu::s_frame(recv_seq)).await?;
        }
        Ok(())
    }

    async fn send_frame(&mut self, apdu: Apdu) -> Result<()> {
        trace!(frame = %apdu, "tx");
        self.framed.send(apdu).await
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = ?self.state, to = ?state, "link state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(SessionEvent::StateChanged(state));

        if state != ConnectionState::Started {
            let error = || {
                if state == ConnectionState::Stopped {
                    Iec104Error::NotStarted
                } else {
                    Iec104Error::LinkClosed
                }
            };
            for item in self.outbound.drain(..) {
                let _ = item.done.send(Err(error()));
            }
        }
    }

    async fn shutdown(mut self, outcome: Result<()>, requests: &mut mpsc::Receiver<Request>) {
        requests.close();
        while let Ok(request) = requests.try_recv() {
            match request {
                Request::Send { done, .. } | Request::Control { done, .. } => {
                    let _ = done.send(Err(Iec104Error::LinkClosed));
                }
                Request::Close => {}
            }
        }
        if let Some(pending) = self.control.take() {
            let _ = pending.done.send(Err(Iec104Error::LinkClosed));
        }

        match outcome {
            Ok(()) => {
                info!("session closed locally");
                let _ = self.framed.close().await;
                self.set_state(ConnectionState::Disconnected);
            }
            Err(error) => {
                warn!(%error, "link lost");
                self.set_state(ConnectionState::Disconnected);
                self.emit(SessionEvent::LinkLost(error));
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
