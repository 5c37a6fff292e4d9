//! IEC 60870-5-104 controlling station (master).
//!
//! [`Iec104Master`] runs one session in the controlling role and a
//! dispatcher task that routes received ASDUs. Confirmations are matched to
//! the waiting request by type identification, common address and IOA; all
//! other traffic becomes an [`Iec104Event`].
//!
//! At most one command and one interrogation may be outstanding per common
//! address. A second request for the same station fails immediately with
//! [`Iec104Error::CommandInFlight`] or [`Iec104Error::InterrogationInFlight`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::error::{Iec104Error, Result};
use crate::parser::parse_asdu;
use crate::session::{self, ConnectionState, LinkRole, SessionEvent, SessionHandle};
use crate::types::{
    Asdu, CommandState, Cot, Cp56Time2a, DataPoint, DataValue, DoubleCommand, InformationObject, Ioa,
    ObjectValue, OutputQualifier, Qcc, Qoc, Qoi, Qos, Qrp, SingleCommand, TimeTag, TypeId,
};

/// Process command to send to a controlled station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// C_SC_NA_1
    Single {
        state: bool,
        qualifier: OutputQualifier,
    },
    /// C_DC_NA_1
    Double {
        state: CommandState,
        qualifier: OutputQualifier,
    },
    /// C_RC_NA_1; `Off` steps lower, `On` steps higher.
    RegulatingStep {
        state: CommandState,
        qualifier: OutputQualifier,
    },
    /// C_SE_NA_1, raw normalized value
    SetpointNormalized(i16),
    /// C_SE_NB_1
    SetpointScaled(i16),
    /// C_SE_NC_1
    SetpointFloat(f32),
    /// C_BO_NA_1
    Bitstring(u32),
}

impl Command {
    pub fn single(state: bool) -> Self {
        Self::Single {
            state,
            qualifier: OutputQualifier::Unspecified,
        }
    }

    pub fn double(on: bool) -> Self {
        Self::Double {
            state: if on { CommandState::On } else { CommandState::Off },
            qualifier: OutputQualifier::Unspecified,
        }
    }

    pub fn type_id(&self) -> TypeId {
        match self {
            Self::Single { .. } => TypeId::SingleCommand,
            Self::Double { .. } => TypeId::DoubleCommand,
            Self::RegulatingStep { .. } => TypeId::RegulatingStepCommand,
            Self::SetpointNormalized(_) => TypeId::SetpointNormalized,
            Self::SetpointScaled(_) => TypeId::SetpointScaled,
            Self::SetpointFloat(_) => TypeId::SetpointFloat,
            Self::Bitstring(_) => TypeId::Bitstring32Command,
        }
    }

    /// Information element with the S/E flag set to `select`.
    pub fn value(&self, select: bool) -> ObjectValue {
        let qos = Qos { ql: 0, select };
        match *self {
            Self::Single { state, qualifier } => {
                ObjectValue::SingleCommand(SingleCommand::new(state, Qoc { qualifier, select }))
            }
            Self::Double { state, qualifier } => {
                ObjectValue::DoubleCommand(DoubleCommand::new(state, Qoc { qualifier, select }))
            }
            Self::RegulatingStep { state, qualifier } => {
                ObjectValue::RegulatingStep(DoubleCommand::new(state, Qoc { qualifier, select }))
            }
            Self::SetpointNormalized(v) => ObjectValue::SetpointNormalized(v, qos),
            Self::SetpointScaled(v) => ObjectValue::SetpointScaled(v, qos),
            Self::SetpointFloat(v) => ObjectValue::SetpointFloat(v, qos),
            Self::Bitstring(v) => ObjectValue::BitstringCommand(v),
        }
    }

    /// Whether the command has a select phase.
    pub fn supports_select(&self) -> bool {
        !matches!(self, Self::Bitstring(_))
    }
}

/// Answer of a controlled station to an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Positive,
    /// Negative confirmation or an unknown-type/cause/address/IOA reply.
    Negative { cause: Cot },
}

impl Confirmation {
    fn from_reply(asdu: &Asdu) -> Self {
        let cot = asdu.cot();
        if asdu.is_negative() || cot.is_unknown_reply() {
            Self::Negative { cause: cot }
        } else {
            Self::Positive
        }
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive)
    }
}

/// Result of a general or counter interrogation.
#[derive(Debug, Clone, PartialEq)]
pub struct InterrogationOutcome {
    pub confirmation: Confirmation,
    /// Data ASDUs in arrival order, empty after a negative confirmation.
    pub data: Vec<Asdu>,
}

impl InterrogationOutcome {
    /// All data points of the interrogation, flattened in arrival order.
    pub fn points(&self) -> Vec<DataPoint> {
        self.data.iter().flat_map(parse_asdu).collect()
    }
}

/// Events emitted by the master.
#[derive(Debug)]
pub enum Iec104Event {
    StateChanged(ConnectionState),
    /// Monitored values (status, measurements).
    DataUpdate {
        common_address: u16,
        cot: Cot,
        points: Vec<DataPoint>,
    },
    /// Integrated totals.
    CounterReport {
        common_address: u16,
        cot: Cot,
        points: Vec<DataPoint>,
    },
    /// Confirmation of a command, whether or not this master is waiting for it.
    CommandConfirm {
        common_address: u16,
        type_id: TypeId,
        ioa: u32,
        confirmation: Confirmation,
    },
    /// Activation termination of an interrogation.
    InterrogationComplete {
        common_address: u16,
        type_id: TypeId,
    },
    /// Any other ASDU, e.g. end of initialisation or command termination.
    AsduReceived(Asdu),
    /// The link failed; pending requests were cancelled.
    LinkLost(Iec104Error),
}

/// A reserved command slot. It stays taken until the reservation is
/// dropped, so a select and its execute share one slot.
struct CommandWait {
    token: u64,
    awaiting: Option<AwaitedConfirmation>,
}

struct AwaitedConfirmation {
    type_id: TypeId,
    ioa: Ioa,
    reply: oneshot::Sender<Confirmation>,
}

struct InterrogationWait {
    token: u64,
    type_id: TypeId,
    confirmation: Option<Confirmation>,
    data: Vec<Asdu>,
    reply: oneshot::Sender<InterrogationOutcome>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Command,
    Interrogation,
}

/// Outstanding requests, keyed by common address.
#[derive(Default)]
struct Pending {
    next_token: u64,
    commands: HashMap<u16, CommandWait>,
    interrogations: HashMap<u16, InterrogationWait>,
}

impl Pending {
    fn token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    fn release(&mut self, slot: Slot, common_address: u16, token: u64) {
        match slot {
            Slot::Command => {
                if self.commands.get(&common_address).map(|w| w.token) == Some(token) {
                    self.commands.remove(&common_address);
                }
            }
            Slot::Interrogation => {
                if self.interrogations.get(&common_address).map(|w| w.token) == Some(token) {
                    self.interrogations.remove(&common_address);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.commands.clear();
        self.interrogations.clear();
    }

    fn command_confirmed(&mut self, asdu: &Asdu, confirmation: Confirmation) {
        let Some(wait) = self.commands.get_mut(&asdu.common_address()) else {
            return;
        };
        let matches = wait
            .awaiting
            .as_ref()
            .is_some_and(|a| a.type_id == asdu.type_id() && Some(a.ioa) == asdu.first_ioa());
        if let Some(awaited) = matches.then(|| wait.awaiting.take()).flatten() {
            let _ = awaited.reply.send(confirmation);
        }
    }

    fn interrogation_confirmed(&mut self, asdu: &Asdu, confirmation: Confirmation) {
        let ca = asdu.common_address();
        let Some(wait) = self.interrogations.get_mut(&ca) else {
            return;
        };
        if wait.type_id != asdu.type_id() {
            return;
        }
        if confirmation.is_positive() {
            wait.confirmation = Some(confirmation);
        } else if let Some(wait) = self.interrogations.remove(&ca) {
            let _ = wait.reply.send(InterrogationOutcome {
                confirmation,
                data: Vec::new(),
            });
        }
    }

    fn interrogation_terminated(&mut self, asdu: &Asdu) {
        let ca = asdu.common_address();
        if !self
            .interrogations
            .get(&ca)
            .is_some_and(|w| w.type_id == asdu.type_id())
        {
            return;
        }
        if let Some(wait) = self.interrogations.remove(&ca) {
            let _ = wait.reply.send(InterrogationOutcome {
                confirmation: wait.confirmation.unwrap_or(Confirmation::Positive),
                data: wait.data,
            });
        }
    }

    fn collect(&mut self, asdu: &Asdu) {
        let Some(wait) = self.interrogations.get_mut(&asdu.common_address()) else {
            return;
        };
        let cot = asdu.cot();
        let wanted = match wait.type_id {
            TypeId::InterrogationCommand => cot.is_interrogation_response(),
            _ => cot.is_counter_response(),
        };
        if wanted {
            wait.data.push(asdu.clone());
        }
    }
}

type SharedPending = Arc<Mutex<Pending>>;

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Frees a pending slot when the waiting call ends early (timeout, error
/// or the caller dropping the future).
struct Reservation<'a> {
    pending: &'a Mutex<Pending>,
    slot: Slot,
    common_address: u16,
    token: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.pending).release(self.slot, self.common_address, self.token);
    }
}

/// IEC 60870-5-104 controlling station.
///
/// ```rust,ignore
/// let mut master = Iec104Master::connect(MasterConfig::new("192.168.1.100:2404")).await?;
/// let mut events = master.subscribe().expect("first subscriber");
/// master.start_dt().await?;
///
/// let outcome = master.general_interrogation(1, Qoi::STATION).await?;
/// for point in outcome.points() {
///     println!("{} = {:?}", point.ioa, point.value);
/// }
///
/// let confirmation = master.select_and_execute(1, 6001, Command::double(true)).await?;
/// ```
pub struct Iec104Master {
    session: SessionHandle,
    pending: SharedPending,
    command_timeout: Duration,
    interrogation_timeout: Duration,
    event_rx: Option<mpsc::UnboundedReceiver<Iec104Event>>,
}

impl Iec104Master {
    /// Connect to a controlled station. Data transfer is not started.
    pub async fn connect(config: MasterConfig) -> Result<Self> {
        config.validate()?;
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| Iec104Error::ConnectionTimeout)??;
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        info!(address = %config.address, "connected");
        Self::from_transport(stream, &config)
    }

    /// Run the master over an already connected transport.
    pub fn from_transport<T>(transport: T, config: &MasterConfig) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let (session, session_events) =
            session::spawn(transport, LinkRole::Controlling, config.link.clone());
        let pending = SharedPending::default();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(session_events, pending.clone(), event_tx));

        Ok(Self {
            session,
            pending,
            command_timeout: config.command_timeout,
            interrogation_timeout: config.interrogation_timeout,
            event_rx: Some(event_rx),
        })
    }

    /// Subscribe to events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<Iec104Event>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_state()
    }

    /// Start data transfer (STARTDT act) and wait for the confirmation.
    pub async fn start_dt(&self) -> Result<()> {
        self.session.start_dt().await
    }

    /// Stop data transfer (STOPDT act) and wait for the confirmation.
    pub async fn stop_dt(&self) -> Result<()> {
        self.session.stop_dt().await
    }

    /// Close the connection. Pending requests fail with [`Iec104Error::LinkClosed`].
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Send an arbitrary ASDU without waiting for any reply.
    pub async fn send_asdu(&self, asdu: &Asdu) -> Result<()> {
        self.session.send_asdu(asdu).await
    }

    /// Execute a command directly and wait for its activation confirmation.
    pub async fn send_command(
        &self,
        common_address: u16,
        ioa: impl Into<Ioa>,
        command: Command,
    ) -> Result<Confirmation> {
        let object = InformationObject::new(ioa, command.value(false));
        self.confirmed(Asdu::single(command.type_id(), Cot::Activation, common_address, object))
            .await
    }

    /// Like [`send_command`](Self::send_command) with a CP56Time2a tag
    /// (C_SC_TA_1 and friends).
    pub async fn send_command_at(
        &self,
        common_address: u16,
        ioa: impl Into<Ioa>,
        command: Command,
        time: Cp56Time2a,
    ) -> Result<Confirmation> {
        let type_id = command
            .type_id()
            .with_time_tag()
            .ok_or_else(|| Iec104Error::invalid_asdu_static("command has no time-tagged form"))?;
        let object =
            InformationObject::new(ioa, command.value(false)).with_time(TimeTag::Cp56(time));
        self.confirmed(Asdu::single(type_id, Cot::Activation, common_address, object))
            .await
    }

    /// Select, then execute once the select is confirmed positively.
    ///
    /// Returns the negative confirmation of whichever phase failed.
    pub async fn select_and_execute(
        &self,
        common_address: u16,
        ioa: impl Into<Ioa>,
        command: Command,
    ) -> Result<Confirmation> {
        if !command.supports_select() {
            return Err(Iec104Error::invalid_asdu_static(
                "bitstring command has no select qualifier",
            ));
        }
        let ioa = ioa.into();
        let reservation = self.reserve_command(common_address)?;
        let select = InformationObject::new(ioa, command.value(true));
        let confirmation = self
            .confirmed_with(
                &reservation,
                Asdu::single(command.type_id(), Cot::Activation, common_address, select),
            )
            .await?;
        if !confirmation.is_positive() {
            debug!(common_address, %ioa, ?confirmation, "select refused");
            return Ok(confirmation);
        }
        let execute = InformationObject::new(ioa, command.value(false));
        self.confirmed_with(
            &reservation,
            Asdu::single(command.type_id(), Cot::Activation, common_address, execute),
        )
        .await
    }

    /// General (QOI 20) or group interrogation.
    pub async fn general_interrogation(
        &self,
        common_address: u16,
        qoi: Qoi,
    ) -> Result<InterrogationOutcome> {
        self.interrogate(Asdu::interrogation(common_address, qoi))
            .await
    }

    /// Counter interrogation; with a freeze-only qualifier the outcome carries
    /// no data.
    pub async fn counter_interrogation(
        &self,
        common_address: u16,
        qcc: Qcc,
    ) -> Result<InterrogationOutcome> {
        self.interrogate(Asdu::counter_interrogation(common_address, qcc))
            .await
    }

    /// Request one object (C_RD_NA_1). The value arrives as a
    /// [`Iec104Event::DataUpdate`] with cause "request".
    pub async fn read(&self, common_address: u16, ioa: impl Into<Ioa>) -> Result<()> {
        self.session
            .send_asdu(&Asdu::read(common_address, ioa.into()))
            .await
    }

    pub async fn clock_sync(&self, common_address: u16, time: Cp56Time2a) -> Result<Confirmation> {
        self.confirmed(Asdu::clock_sync(common_address, time)).await
    }

    pub async fn test_command(&self, common_address: u16) -> Result<Confirmation> {
        self.confirmed(Asdu::test_command(common_address)).await
    }

    pub async fn reset_process(&self, common_address: u16, qrp: Qrp) -> Result<Confirmation> {
        self.confirmed(Asdu::reset_process(common_address, qrp)).await
    }

    /// Send an activation and wait for the matching confirmation.
    async fn confirmed(&self, asdu: Asdu) -> Result<Confirmation> {
        let reservation = self.reserve_command(asdu.common_address())?;
        self.confirmed_with(&reservation, asdu).await
    }

    /// Take the command slot of `common_address`.
    fn reserve_command(&self, common_address: u16) -> Result<Reservation<'_>> {
        let mut pending = lock(&self.pending);
        if pending.commands.contains_key(&common_address) {
            return Err(Iec104Error::CommandInFlight(common_address));
        }
        let token = pending.token();
        pending.commands.insert(
            common_address,
            CommandWait {
                token,
                awaiting: None,
            },
        );
        Ok(Reservation {
            pending: &self.pending,
            slot: Slot::Command,
            common_address,
            token,
        })
    }

    /// Send an activation within a reserved slot and wait for its confirmation.
    async fn confirmed_with(
        &self,
        reservation: &Reservation<'_>,
        asdu: Asdu,
    ) -> Result<Confirmation> {
        let encoded = asdu.to_bytes(&self.session.params())?;
        let (reply, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            match pending.commands.get_mut(&reservation.common_address) {
                Some(wait) if wait.token == reservation.token => {
                    wait.awaiting = Some(AwaitedConfirmation {
                        type_id: asdu.type_id(),
                        ioa: asdu.first_ioa().unwrap_or_default(),
                        reply,
                    });
                }
                // cleared by a link loss
                _ => return Err(Iec104Error::LinkClosed),
            }
        }

        debug!(%asdu, "sending activation");
        self.await_reply(encoded, rx, self.command_timeout, Iec104Error::CommandTimeout)
            .await
    }

    async fn interrogate(&self, asdu: Asdu) -> Result<InterrogationOutcome> {
        let common_address = asdu.common_address();
        let encoded = asdu.to_bytes(&self.session.params())?;
        let (reply, rx) = oneshot::channel();

        let token = {
            let mut pending = lock(&self.pending);
            if pending.interrogations.contains_key(&common_address) {
                return Err(Iec104Error::InterrogationInFlight(common_address));
            }
            let token = pending.token();
            pending.interrogations.insert(
                common_address,
                InterrogationWait {
                    token,
                    type_id: asdu.type_id(),
                    confirmation: None,
                    data: Vec::new(),
                    reply,
                },
            );
            token
        };
        let _reservation = Reservation {
            pending: &self.pending,
            slot: Slot::Interrogation,
            common_address,
            token,
        };

        debug!(%asdu, "starting interrogation");
        self.await_reply(
            encoded,
            rx,
            self.interrogation_timeout,
            Iec104Error::InterrogationTimeout,
        )
        .await
    }

    async fn await_reply<R>(
        &self,
        encoded: Bytes,
        rx: oneshot::Receiver<R>,
        limit: Duration,
        on_timeout: Iec104Error,
    ) -> Result<R> {
        self.session.send_encoded(encoded).await?;
        match timeout(limit, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Iec104Error::LinkClosed),
            Err(_) => {
                warn!(error = %on_timeout, "no reply");
                Err(on_timeout)
            }
        }
    }
}

/// Route session events until the session ends.
async fn dispatch(
    mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    pending: SharedPending,
    events: mpsc::UnboundedSender<Iec104Event>,
) {
    while let Some(event) = session_events.recv().await {
        let event = match event {
            SessionEvent::StateChanged(state) => Some(Iec104Event::StateChanged(state)),
            SessionEvent::Asdu(asdu) => route(&pending, asdu),
            SessionEvent::Rejected { error, .. } => {
                warn!(%error, "ignoring undecodable ASDU");
                None
            }
            SessionEvent::LinkLost(error) => {
                lock(&pending).clear();
                Some(Iec104Event::LinkLost(error))
            }
        };
        if let Some(event) = event {
            let _ = events.send(event);
        }
    }
    // dropping the reply senders fails every waiting call with LinkClosed
    lock(&pending).clear();
}

fn route(pending: &Mutex<Pending>, asdu: Asdu) -> Option<Iec104Event> {
    let type_id = asdu.type_id();
    let cot = asdu.cot();
    let common_address = asdu.common_address();

    if type_id.is_monitoring() {
        if cot.is_interrogation_response() || cot.is_counter_response() {
            lock(pending).collect(&asdu);
        }
        let points = parse_asdu(&asdu);
        let counters = points
            .first()
            .is_some_and(|p| matches!(p.value, DataValue::Counter { .. }));
        return Some(if points.is_empty() {
            Iec104Event::AsduReceived(asdu)
        } else if counters {
            Iec104Event::CounterReport {
                common_address,
                cot,
                points,
            }
        } else {
            Iec104Event::DataUpdate {
                common_address,
                cot,
                points,
            }
        });
    }

    let interrogation = matches!(
        type_id,
        TypeId::InterrogationCommand | TypeId::CounterInterrogationCommand
    );
    if cot.is_confirmation() {
        let confirmation = Confirmation::from_reply(&asdu);
        if interrogation {
            lock(pending).interrogation_confirmed(&asdu, confirmation);
            return Some(Iec104Event::AsduReceived(asdu));
        }
        if type_id.is_process_command() || type_id.is_system_command() {
            lock(pending).command_confirmed(&asdu, confirmation);
            return Some(Iec104Event::CommandConfirm {
                common_address,
                type_id,
                ioa: asdu.first_ioa().map(|ioa| ioa.value()).unwrap_or_default(),
                confirmation,
            });
        }
    }
    if interrogation && cot == Cot::ActivationTermination {
        lock(pending).interrogation_terminated(&asdu);
        return Some(Iec104Event::InterrogationComplete {
            common_address,
            type_id,
        });
    }
    Some(Iec104Event::AsduReceived(asdu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::types::{SinglePoint, MAX_ASDU_LENGTH};
    use tokio_test::assert_ok;

    struct Station {
        handle: SessionHandle,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Station {
        /// Next ASDU received from the master.
        async fn request(&mut self) -> Asdu {
            loop {
                match self.events.recv().await {
                    Some(SessionEvent::Asdu(asdu)) => return asdu,
                    Some(_) => {}
                    None => panic!("station session ended"),
                }
            }
        }

        async fn reply(&self, asdu: &Asdu) {
            self.handle.send_asdu(asdu).await.unwrap();
        }
    }

    async fn pair(config: MasterConfig) -> (Arc<Iec104Master>, Station) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (handle, events) = session::spawn(remote, LinkRole::Controlled, LinkConfig::default());
        let master = Iec104Master::from_transport(local, &config).unwrap();
        master.start_dt().await.unwrap();
        (Arc::new(master), Station { handle, events })
    }

    fn spawn_command(
        master: &Arc<Iec104Master>,
        ca: u16,
        ioa: u32,
    ) -> tokio::task::JoinHandle<Result<Confirmation>> {
        let master = master.clone();
        tokio::spawn(async move { master.send_command(ca, ioa, Command::single(true)).await })
    }

    #[test]
    fn test_command_values() {
        let sel = Command::double(true).value(true);
        assert_eq!(sel.select_flag(), Some(true));
        assert!(sel.fits(TypeId::DoubleCommand));
        assert_eq!(
            Command::SetpointFloat(1.5).value(false),
            ObjectValue::SetpointFloat(1.5, Qos::default())
        );
        assert!(!Command::Bitstring(7).supports_select());
        assert_eq!(Command::Bitstring(7).type_id().with_time_tag(), Some(TypeId::Bitstring32CommandTime56));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_positive_confirmation() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = spawn_command(&master, 1, 5000);

        let request = station.request().await;
        assert_eq!(request.type_id(), TypeId::SingleCommand);
        assert_eq!(request.cot(), Cot::Activation);
        station.reply(&request.mirror(Cot::ActivationConfirm, false)).await;

        assert_eq!(call.await.unwrap().unwrap(), Confirmation::Positive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_negative_confirmation() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = spawn_command(&master, 1, 5000);

        let request = station.request().await;
        station.reply(&request.mirror(Cot::UnknownIoa, true)).await;
        assert_eq!(
            call.await.unwrap().unwrap(),
            Confirmation::Negative {
                cause: Cot::UnknownIoa
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_for_other_ioa_is_not_matched() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = spawn_command(&master, 1, 5000);

        let request = station.request().await;
        let mut wrong = request.mirror(Cot::ActivationConfirm, false);
        wrong.objects[0].ioa = Ioa::new(5001);
        station.reply(&wrong).await;
        station.reply(&request.mirror(Cot::ActivationConfirm, true)).await;

        assert_eq!(
            call.await.unwrap().unwrap(),
            Confirmation::Negative {
                cause: Cot::ActivationConfirm
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_command_in_flight_per_station() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let first = spawn_command(&master, 1, 5000);
        let request = station.request().await;

        assert!(matches!(
            master.send_command(1, 5001u32, Command::single(false)).await,
            Err(Iec104Error::CommandInFlight(1))
        ));
        // another station is independent
        let other = spawn_command(&master, 2, 5000);
        let other_request = station.request().await;
        assert_eq!(other_request.common_address(), 2);

        station.reply(&request.mirror(Cot::ActivationConfirm, false)).await;
        station.reply(&other_request.mirror(Cot::ActivationConfirm, false)).await;
        assert_ok!(first.await.unwrap());
        assert_ok!(other.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_and_execute_sends_both_phases() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = {
            let master = master.clone();
            tokio::spawn(async move { master.select_and_execute(1, 6001u32, Command::double(true)).await })
        };

        let select = station.request().await;
        assert_eq!(select.objects[0].value.select_flag(), Some(true));
        station.reply(&select.mirror(Cot::ActivationConfirm, false)).await;

        let execute = station.request().await;
        assert_eq!(execute.objects[0].value.select_flag(), Some(false));
        assert!(matches!(
            master.send_command(1, 5000u32, Command::single(true)).await,
            Err(Iec104Error::CommandInFlight(1))
        ));
        station.reply(&execute.mirror(Cot::ActivationConfirm, false)).await;

        assert_eq!(call.await.unwrap().unwrap(), Confirmation::Positive);
        assert!(lock(&master.pending).commands.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_station_stays_reserved_between_select_and_execute() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let reservation = master.reserve_command(1).unwrap();
        let select = Asdu::single(
            TypeId::DoubleCommand,
            Cot::Activation,
            1,
            InformationObject::new(6001u32, Command::double(true).value(true)),
        );

        let (confirmation, _) = tokio::join!(master.confirmed_with(&reservation, select), async {
            let request = station.request().await;
            station.reply(&request.mirror(Cot::ActivationConfirm, false)).await;
        });
        assert_eq!(confirmation.unwrap(), Confirmation::Positive);

        // the confirmation alone does not free the slot
        assert!(matches!(
            master.send_command(1, 5000u32, Command::single(true)).await,
            Err(Iec104Error::CommandInFlight(1))
        ));
        drop(reservation);
        assert!(lock(&master.pending).commands.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_releases_station() {
        let config = MasterConfig::default().command_timeout(Duration::from_secs(3));
        let (master, mut station) = pair(config).await;

        let call = spawn_command(&master, 1, 5000);
        let _ = station.request().await;
        assert!(matches!(
            call.await.unwrap(),
            Err(Iec104Error::CommandTimeout)
        ));
        assert_eq!(master.state(), ConnectionState::Started);

        let retry = spawn_command(&master, 1, 5000);
        let request = station.request().await;
        station.reply(&request.mirror(Cot::ActivationConfirm, false)).await;
        assert_eq!(retry.await.unwrap().unwrap(), Confirmation::Positive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrogation_collects_data_until_termination() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = {
            let master = master.clone();
            tokio::spawn(async move { master.general_interrogation(1, Qoi::STATION).await })
        };

        let request = station.request().await;
        assert_eq!(request, Asdu::interrogation(1, Qoi::STATION));
        station.reply(&request.mirror(Cot::ActivationConfirm, false)).await;
        for ioa in [10u32, 11] {
            let data = Asdu::single(
                TypeId::SinglePoint,
                Cot::InterrogatedByStation,
                1,
                InformationObject::new(ioa, ObjectValue::SinglePoint(SinglePoint::new(true))),
            );
            station.reply(&data).await;
        }
        station.reply(&request.mirror(Cot::ActivationTermination, false)).await;

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(outcome.confirmation, Confirmation::Positive);
        let ioas: Vec<u32> = outcome.points().iter().map(|p| p.ioa).collect();
        assert_eq!(ioas, vec![10, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_interrogation_completes_immediately() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = {
            let master = master.clone();
            tokio::spawn(async move { master.general_interrogation(9, Qoi::STATION).await })
        };
        let request = station.request().await;
        station.reply(&request.mirror(Cot::UnknownCommonAddress, true)).await;

        let outcome = call.await.unwrap().unwrap();
        assert!(!outcome.confirmation.is_positive());
        assert!(outcome.data.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_cancels_pending_requests() {
        let (master, mut station) = pair(MasterConfig::default()).await;
        let call = spawn_command(&master, 1, 5000);
        let _ = station.request().await;

        station.handle.close().await;
        assert!(matches!(call.await.unwrap(), Err(Iec104Error::LinkClosed)));
        assert_eq!(master.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_report_data_and_link_loss() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (handle, _station_events) =
            session::spawn(remote, LinkRole::Controlled, LinkConfig::default());
        let mut master = Iec104Master::from_transport(local, &MasterConfig::default()).unwrap();
        let mut events = master.subscribe().unwrap();
        assert!(master.subscribe().is_none());
        master.start_dt().await.unwrap();

        let data = Asdu::single(
            TypeId::SinglePoint,
            Cot::Spontaneous,
            3,
            InformationObject::new(42u32, ObjectValue::SinglePoint(SinglePoint::new(true))),
        );
        handle.send_asdu(&data).await.unwrap();
        handle.close().await;

        let mut updates = Vec::new();
        let mut lost = 0;
        while let Some(event) = events.recv().await {
            match event {
                Iec104Event::DataUpdate {
                    common_address,
                    cot,
                    points,
                } => {
                    assert_eq!((common_address, cot), (3, Cot::Spontaneous));
                    updates.extend(points);
                }
                Iec104Event::LinkLost(_) => lost += 1,
                _ => {}
            }
        }
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].ioa, 42);
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_oversize_request_rejected_before_sending() {
        let (local, _remote) = tokio::io::duplex(1024);
        let master = Iec104Master::from_transport(local, &MasterConfig::default()).unwrap();
        let mut asdu = Asdu::new(TypeId::SingleCommand, Cot::Activation, 1);
        for ioa in 0..(MAX_ASDU_LENGTH as u32) {
            asdu.push(InformationObject::new(ioa, Command::single(true).value(false)));
        }
        assert!(master.confirmed(asdu).await.is_err());
        assert!(lock(&master.pending).commands.is_empty());
    }
}
