//! IEC 60870-5-104 controlled station (slave).
//!
//! Every accepted connection runs a session in the controlled role plus a
//! task answering its requests against a [`StationHandler`]. Requests are
//! validated before the handler sees them; anything unacceptable is answered
//! with a negative mirror carrying the reason as cause of transmission.

use std::collections::HashMap;
use std::slice;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SlaveConfig;
use crate::error::{Iec104Error, Result};
use crate::session::{self, ConnectionState, LinkRole, SessionEvent, SessionHandle};
use crate::station::{ExecuteOutcome, PointGroup, StationHandler};
use crate::types::{
    mirror_raw, Asdu, AsduParams, Coi, Cot, InformationObject, Ioa, ObjectValue, TypeId,
    TEST_PATTERN,
};

/// Controlled station serving one [`StationHandler`] to any number of
/// controlling stations.
///
/// ```rust,ignore
/// let station = Arc::new(MemoryStation::new(1));
/// let slave = Iec104Slave::new(station.clone(), SlaveConfig::default())?;
/// let listener = TcpListener::bind(("0.0.0.0", DEFAULT_PORT)).await?;
/// tokio::spawn({
///     let slave = slave.clone();
///     async move { slave.serve(listener).await }
/// });
///
/// if let Some(report) = station.update(100u32, value).await {
///     slave.broadcast_spontaneous(1, &report).await;
/// }
/// ```
pub struct Iec104Slave<H> {
    handler: Arc<H>,
    config: SlaveConfig,
    connections: Arc<Mutex<Vec<SessionHandle>>>,
}

impl<H> Clone for Iec104Slave<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            config: self.config.clone(),
            connections: self.connections.clone(),
        }
    }
}

impl<H: StationHandler> Iec104Slave<H> {
    pub fn new(handler: Arc<H>, config: SlaveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            handler,
            config,
            connections: Arc::default(),
        })
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Accept connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(address = ?listener.local_addr().ok(), "serving");
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(error) = stream.set_nodelay(true) {
                warn!(%peer, %error, "failed to disable Nagle's algorithm");
            }
            info!(%peer, "accepted connection");
            self.accept(stream);
        }
    }

    /// Serve one connected transport.
    pub fn accept<T>(&self, transport: T) -> SessionHandle
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (session, events) =
            session::spawn(transport, LinkRole::Controlled, self.config.link.clone());
        let connection = Connection {
            session: session.clone(),
            handler: self.handler.clone(),
            params: self.config.link.asdu,
            selection_timeout: self.config.selection_timeout,
            selections: HashMap::new(),
        };
        tokio::spawn(connection.run(events));

        let mut connections = lock(&self.connections);
        connections.retain(|c| !c.is_closed());
        connections.push(session.clone());
        session
    }

    /// Number of connections whose session is still running.
    pub fn connection_count(&self) -> usize {
        lock(&self.connections)
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    /// Report a change with cause "spontaneous" on every started connection.
    /// Returns the number of connections reached.
    pub async fn broadcast_spontaneous(&self, common_address: u16, group: &PointGroup) -> usize {
        let asdus = pack(common_address, Cot::Spontaneous, group, &self.config.link.asdu);
        self.broadcast(&asdus).await
    }

    /// Announce end of initialisation (M_EI_NA_1) on every started connection.
    pub async fn broadcast_end_of_initialization(&self, common_address: u16, coi: Coi) -> usize {
        self.broadcast(&[Asdu::end_of_initialization(common_address, coi)])
            .await
    }

    async fn broadcast(&self, asdus: &[Asdu]) -> usize {
        let started: Vec<SessionHandle> = {
            let mut connections = lock(&self.connections);
            connections.retain(|c| !c.is_closed());
            connections
                .iter()
                .filter(|c| c.state() == ConnectionState::Started)
                .cloned()
                .collect()
        };

        let mut reached = 0;
        for session in started {
            let mut delivered = true;
            for asdu in asdus {
                if let Err(error) = session.send_asdu(asdu).await {
                    debug!(%error, "broadcast skipped a connection");
                    delivered = false;
                    break;
                }
            }
            reached += usize::from(delivered);
        }
        reached
    }
}

fn lock(connections: &Mutex<Vec<SessionHandle>>) -> std::sync::MutexGuard<'_, Vec<SessionHandle>> {
    connections
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Split a group into ASDUs no longer than the length limit. Objects that
/// do not encode as `group.type_id` are left out.
fn pack(common_address: u16, cot: Cot, group: &PointGroup, params: &AsduParams) -> Vec<Asdu> {
    let objects: Vec<InformationObject> = group
        .objects
        .iter()
        .filter(|object| match object.validate(group.type_id) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "skipping object");
                false
            }
        })
        .copied()
        .collect();
    let per_asdu = params.max_objects(group.type_id, false).max(1);
    objects
        .chunks(per_asdu)
        .map(|chunk| {
            let mut asdu = Asdu::new(group.type_id, cot, common_address);
            asdu.objects.extend_from_slice(chunk);
            asdu
        })
        .collect()
}

/// A confirmed select waiting for its execute.
#[derive(Debug, Clone, Copy)]
struct Selection {
    type_id: TypeId,
    ioa: Ioa,
    /// Command value with the S/E flag cleared.
    value: ObjectValue,
    deadline: Instant,
}

impl Selection {
    fn matches(&self, type_id: TypeId, object: &InformationObject) -> bool {
        self.type_id == type_id
            && self.ioa == object.ioa
            && self.value == object.value
            && Instant::now() <= self.deadline
    }
}

/// Double and regulating step commands only permit states 1 and 2.
fn command_permitted(value: &ObjectValue) -> bool {
    match value {
        ObjectValue::DoubleCommand(c) | ObjectValue::RegulatingStep(c) => c.state.is_permitted(),
        _ => true,
    }
}

/// The single object of a system command, which sits at IOA 0.
fn system_object(asdu: &Asdu) -> std::result::Result<InformationObject, Cot> {
    match asdu.objects.as_slice() {
        [object] if object.ioa.value() == 0 => Ok(*object),
        _ => Err(Cot::UnknownIoa),
    }
}

/// System command that only accepts cause "activation".
fn activation_object(asdu: &Asdu) -> std::result::Result<InformationObject, Cot> {
    if asdu.cot() != Cot::Activation {
        return Err(Cot::UnknownCot);
    }
    system_object(asdu)
}

struct Connection<H> {
    session: SessionHandle,
    handler: Arc<H>,
    params: AsduParams,
    selection_timeout: Duration,
    /// Pending select per common address.
    selections: HashMap<u16, Selection>,
}

impl<H: StationHandler> Connection<H> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            let result = match event {
                SessionEvent::Asdu(asdu) => self.on_request(asdu).await,
                SessionEvent::Rejected { raw, error } => self.on_undecodable(&raw, &error).await,
                SessionEvent::StateChanged(state) => {
                    debug!(?state, "connection state");
                    Ok(())
                }
                SessionEvent::LinkLost(error) => {
                    warn!(%error, "connection lost");
                    Ok(())
                }
            };
            if let Err(error) = result {
                debug!(%error, "reply not sent");
            }
        }
        debug!("connection finished");
    }

    async fn on_undecodable(&self, raw: &[u8], error: &Iec104Error) -> Result<()> {
        warn!(%error, len = raw.len(), "undecodable request");
        let Some(cause) = error.negative_cause() else {
            return Ok(());
        };
        match mirror_raw(raw, &self.params, cause) {
            Some(reply) => self.session.send_encoded(reply).await,
            None => Ok(()),
        }
    }

    async fn on_request(&mut self, asdu: Asdu) -> Result<()> {
        let type_id = asdu.type_id();
        debug!(%asdu, "request");
        if !(type_id.is_process_command() || type_id.is_system_command()) {
            return self.negative(&asdu, Cot::UnknownTypeId).await;
        }
        if !self.handler.serves(asdu.common_address()) {
            return self.negative(&asdu, Cot::UnknownCommonAddress).await;
        }

        match type_id {
            TypeId::InterrogationCommand => self.on_interrogation(&asdu).await,
            TypeId::CounterInterrogationCommand => self.on_counter_interrogation(&asdu).await,
            TypeId::ReadCommand => self.on_read(&asdu).await,
            TypeId::ClockSyncCommand => self.on_clock_sync(&asdu).await,
            TypeId::TestCommand | TypeId::TestCommandTime56 => self.on_test(&asdu).await,
            TypeId::ResetProcessCommand => self.on_reset(&asdu).await,
            TypeId::DelayAcquisitionCommand => self.on_delay_acquisition(&asdu).await,
            _ if type_id.is_process_command() => self.on_command(&asdu).await,
            _ => self.negative(&asdu, Cot::UnknownTypeId).await,
        }
    }

    async fn on_interrogation(&mut self, asdu: &Asdu) -> Result<()> {
        let cot = asdu.cot();
        let confirm = match cot {
            Cot::Activation => Cot::ActivationConfirm,
            Cot::Deactivation => Cot::DeactivationConfirm,
            _ => return self.negative(asdu, Cot::UnknownCot).await,
        };
        let object = match system_object(asdu) {
            Ok(object) => object,
            Err(cause) => return self.negative(asdu, cause).await,
        };
        let ObjectValue::Interrogation(qoi) = object.value else {
            return self.negative(asdu, confirm).await;
        };
        let Some(data_cot) = qoi.group_number().and_then(Cot::interrogated_by) else {
            warn!(qoi = qoi.0, "unsupported interrogation qualifier");
            return self.negative(asdu, confirm).await;
        };
        if cot == Cot::Deactivation {
            return self.reply(asdu, confirm, false).await;
        }

        self.reply(asdu, Cot::ActivationConfirm, false).await?;
        let common_address = asdu.common_address();
        let groups = self.handler.interrogate(common_address, qoi).await;
        self.send_groups(common_address, data_cot, &groups).await?;
        self.reply(asdu, Cot::ActivationTermination, false).await
    }

    async fn on_counter_interrogation(&mut self, asdu: &Asdu) -> Result<()> {
        let object = match activation_object(asdu) {
            Ok(object) => object,
            Err(cause) => return self.negative(asdu, cause).await,
        };
        let ObjectValue::CounterInterrogation(qcc) = object.value else {
            return self.negative(asdu, Cot::ActivationConfirm).await;
        };
        let Some(data_cot) = qcc.group_number().and_then(Cot::counter_requested_by) else {
            warn!(request = qcc.request, "unsupported counter interrogation qualifier");
            return self.negative(asdu, Cot::ActivationConfirm).await;
        };

        self.reply(asdu, Cot::ActivationConfirm, false).await?;
        let common_address = asdu.common_address();
        let groups = self.handler.counter_interrogate(common_address, qcc).await;
        self.send_groups(common_address, data_cot, &groups).await?;
        self.reply(asdu, Cot::ActivationTermination, false).await
    }

    async fn on_read(&mut self, asdu: &Asdu) -> Result<()> {
        if asdu.cot() != Cot::Request {
            return self.negative(asdu, Cot::UnknownCot).await;
        }
        let Some(ioa) = asdu.first_ioa() else {
            return self.negative(asdu, Cot::UnknownIoa).await;
        };
        let common_address = asdu.common_address();
        match self.handler.read(common_address, ioa).await {
            Some(group) => {
                self.send_groups(common_address, Cot::Request, slice::from_ref(&group))
                    .await
            }
            None => self.negative(asdu, Cot::UnknownIoa).await,
        }
    }

    async fn on_clock_sync(&mut self, asdu: &Asdu) -> Result<()> {
        let object = match activation_object(asdu) {
            Ok(object) => object,
            Err(cause) => return self.negative(asdu, cause).await,
        };
        let accepted = match object.value {
            ObjectValue::ClockSync(time) => {
                self.handler
                    .clock_sync(asdu.common_address(), time)
                    .await
            }
            _ => false,
        };
        debug!(accepted, "clock synchronisation");
        self.reply(asdu, Cot::ActivationConfirm, !accepted).await
    }

    async fn on_test(&mut self, asdu: &Asdu) -> Result<()> {
        let object = match activation_object(asdu) {
            Ok(object) => object,
            Err(cause) => return self.negative(asdu, cause).await,
        };
        // C_TS_TA_1 carries a counter instead of the fixed pattern
        let valid = match object.value {
            ObjectValue::Test(pattern) => {
                asdu.type_id() == TypeId::TestCommandTime56 || pattern == TEST_PATTERN
            }
            _ => false,
        };
        self.reply(asdu, Cot::ActivationConfirm, !valid).await
    }

    async fn on_reset(&mut self, asdu: &Asdu) -> Result<()> {
        let object = match activation_object(asdu) {
            Ok(object) => object,
            Err(cause) => return self.negative(asdu, cause).await,
        };
        let common_address = asdu.common_address();
        let accepted = match object.value {
            ObjectValue::ResetProcess(qrp) if qrp.is_defined() => {
                self.handler.reset_process(common_address, qrp).await
            }
            _ => false,
        };
        if accepted {
            info!(common_address, "process reset");
            self.selections.remove(&common_address);
        }
        self.reply(asdu, Cot::ActivationConfirm, !accepted).await
    }

    async fn on_delay_acquisition(&mut self, asdu: &Asdu) -> Result<()> {
        match asdu.cot() {
            // the spontaneous form only reports a measured delay
            Cot::Spontaneous => Ok(()),
            _ => match activation_object(asdu) {
                Ok(_) => self.reply(asdu, Cot::ActivationConfirm, false).await,
                Err(cause) => self.negative(asdu, cause).await,
            },
        }
    }

    /// Process command with select-before-operate.
    async fn on_command(&mut self, asdu: &Asdu) -> Result<()> {
        let cot = asdu.cot();
        if !matches!(cot, Cot::Activation | Cot::Deactivation) {
            return self.negative(asdu, Cot::UnknownCot).await;
        }
        let [object] = asdu.objects.as_slice() else {
            return self.negative(asdu, Cot::UnknownIoa).await;
        };
        let object = *object;
        let common_address = asdu.common_address();
        let type_id = asdu.type_id().without_time_tag();

        let Some(point) = self
            .handler
            .command_point(common_address, type_id, object.ioa)
            .await
        else {
            return self.negative(asdu, Cot::UnknownIoa).await;
        };

        if cot == Cot::Deactivation {
            let cancelled = self
                .selections
                .get(&common_address)
                .is_some_and(|s| s.type_id == type_id && s.ioa == object.ioa);
            if cancelled {
                self.selections.remove(&common_address);
            }
            return self.reply(asdu, Cot::DeactivationConfirm, !cancelled).await;
        }

        if !command_permitted(&object.value) {
            warn!(%type_id, ioa = %object.ioa, "command state not permitted");
            return self.negative(asdu, Cot::ActivationConfirm).await;
        }

        if object.value.select_flag() == Some(true) {
            self.selections.insert(
                common_address,
                Selection {
                    type_id,
                    ioa: object.ioa,
                    value: object.value.with_select(false),
                    deadline: Instant::now() + self.selection_timeout,
                },
            );
            debug!(%type_id, ioa = %object.ioa, "selected");
            return self.reply(asdu, Cot::ActivationConfirm, false).await;
        }

        // an execute always consumes the pending select
        let selection = self.selections.remove(&common_address);
        if point.select_required && !selection.is_some_and(|s| s.matches(type_id, &object)) {
            warn!(%type_id, ioa = %object.ioa, "execute without matching select");
            return self.negative(asdu, Cot::UnknownCot).await;
        }

        match self.handler.execute(common_address, type_id, &object).await {
            ExecuteOutcome::Rejected => self.negative(asdu, Cot::ActivationConfirm).await,
            ExecuteOutcome::Executed { feedback } => {
                self.reply(asdu, Cot::ActivationConfirm, false).await?;
                if let Some(feedback) = feedback {
                    self.send_groups(common_address, Cot::Spontaneous, slice::from_ref(&feedback))
                        .await?;
                }
                self.reply(asdu, Cot::ActivationTermination, false).await
            }
        }
    }

    async fn send_groups(&self, common_address: u16, cot: Cot, groups: &[PointGroup]) -> Result<()> {
        for group in groups {
            for asdu in pack(common_address, cot, group, &self.params) {
                self.send(&asdu).await?;
            }
        }
        Ok(())
    }

    async fn negative(&self, request: &Asdu, cause: Cot) -> Result<()> {
        debug!(type_id = %request.type_id(), %cause, "negative reply");
        self.reply(request, cause, true).await
    }

    async fn reply(&self, request: &Asdu, cot: Cot, negative: bool) -> Result<()> {
        self.send(&request.mirror(cot, negative)).await
    }

    /// Transmit, skipping ASDUs the handler filled with unencodable objects.
    async fn send(&self, asdu: &Asdu) -> Result<()> {
        match asdu.to_bytes(&self.params) {
            Ok(encoded) => self.session.send_encoded(encoded).await,
            Err(error) => {
                warn!(%error, %asdu, "dropping unencodable ASDU");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::station::{CommandBinding, MemoryStation};
    use crate::types::{
        BinaryCounterReading, CommandState, DoubleCommand, DoublePoint, DoublePointValue,
        FreezeAction, MeasuredQuality, OutputQualifier, Qcc, Qoc, Qoi, SinglePoint,
    };
    use bytes::Bytes;

    struct Peer {
        session: SessionHandle,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Peer {
        async fn next(&mut self) -> Asdu {
            loop {
                match self.events.recv().await {
                    Some(SessionEvent::Asdu(asdu)) => return asdu,
                    Some(_) => {}
                    None => panic!("session ended"),
                }
            }
        }

        async fn request(&mut self, asdu: &Asdu) -> Asdu {
            self.session.send_asdu(asdu).await.unwrap();
            self.next().await
        }
    }

    async fn station() -> Arc<MemoryStation> {
        let station = MemoryStation::new(1);
        for ioa in 1..=3u32 {
            station
                .insert_point(ioa, TypeId::SinglePoint, ObjectValue::SinglePoint(SinglePoint::new(false)))
                .await;
        }
        station
            .insert_point(
                100u32,
                TypeId::DoublePoint,
                ObjectValue::DoublePoint(DoublePoint::new(DoublePointValue::Off)),
            )
            .await;
        station
            .insert_point(
                200u32,
                TypeId::IntegratedTotals,
                ObjectValue::Counter(BinaryCounterReading::new(7, 1)),
            )
            .await;
        for ioa in [6001u32, 6002] {
            station
                .bind_command(
                    TypeId::DoubleCommand,
                    ioa,
                    CommandBinding {
                        select_required: true,
                        feedback: Some(Ioa::new(100)),
                    },
                )
                .await;
        }
        Arc::new(station)
    }

    async fn connect(slave: &Iec104Slave<MemoryStation>) -> Peer {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        slave.accept(remote);
        let (session, events) = session::spawn(local, LinkRole::Controlling, LinkConfig::default());
        session.start_dt().await.unwrap();
        Peer { session, events }
    }

    async fn setup() -> (Iec104Slave<MemoryStation>, Peer) {
        let slave = Iec104Slave::new(station().await, SlaveConfig::default()).unwrap();
        let peer = connect(&slave).await;
        (slave, peer)
    }

    fn double(ioa: u32, state: CommandState, select: bool) -> Asdu {
        let qoc = Qoc {
            qualifier: OutputQualifier::Unspecified,
            select,
        };
        Asdu::single(
            TypeId::DoubleCommand,
            Cot::Activation,
            1,
            InformationObject::new(ioa, ObjectValue::DoubleCommand(DoubleCommand::new(state, qoc))),
        )
    }

    #[tokio::test]
    async fn test_station_interrogation_sequence() {
        let (_slave, mut peer) = setup().await;
        let con = peer.request(&Asdu::interrogation(1, Qoi::STATION)).await;
        assert_eq!(con.cot(), Cot::ActivationConfirm);
        assert!(!con.is_negative());

        let singles = peer.next().await;
        assert_eq!(singles.type_id(), TypeId::SinglePoint);
        assert_eq!(singles.cot(), Cot::InterrogatedByStation);
        assert_eq!(singles.objects.len(), 3);
        let doubles = peer.next().await;
        assert_eq!(doubles.type_id(), TypeId::DoublePoint);

        let term = peer.next().await;
        assert_eq!(term.type_id(), TypeId::InterrogationCommand);
        assert_eq!(term.cot(), Cot::ActivationTermination);
    }

    #[tokio::test]
    async fn test_counter_interrogation_sequence() {
        let (_slave, mut peer) = setup().await;
        let request = Asdu::counter_interrogation(1, Qcc::general(FreezeAction::Read));
        assert_eq!(peer.request(&request).await.cot(), Cot::ActivationConfirm);
        let totals = peer.next().await;
        assert_eq!(totals.type_id(), TypeId::IntegratedTotals);
        assert_eq!(totals.cot(), Cot::RequestedByGeneralCounter);
        assert_eq!(peer.next().await.cot(), Cot::ActivationTermination);
    }

    #[tokio::test]
    async fn test_rejects_unknown_address_cause_and_ioa() {
        let (_slave, mut peer) = setup().await;

        let reply = peer.request(&Asdu::interrogation(9, Qoi::STATION)).await;
        assert_eq!(reply.cot(), Cot::UnknownCommonAddress);
        assert!(reply.is_negative());

        let mut spontaneous = Asdu::interrogation(1, Qoi::STATION);
        spontaneous.header.cot = Cot::Spontaneous;
        let reply = peer.request(&spontaneous).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::UnknownCot, true));

        let mut addressed = Asdu::interrogation(1, Qoi::STATION);
        addressed.objects[0].ioa = Ioa::new(5);
        let reply = peer.request(&addressed).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::UnknownIoa, true));

        let reply = peer.request(&double(7000, CommandState::On, false)).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::UnknownIoa, true));
    }

    #[tokio::test]
    async fn test_rejects_monitoring_type() {
        let (_slave, mut peer) = setup().await;
        let data = Asdu::single(
            TypeId::SinglePoint,
            Cot::Spontaneous,
            1,
            InformationObject::new(1u32, ObjectValue::SinglePoint(SinglePoint::new(true))),
        );
        let reply = peer.request(&data).await;
        assert_eq!(reply.type_id(), TypeId::SinglePoint);
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::UnknownTypeId, true));
    }

    #[tokio::test]
    async fn test_select_then_execute() {
        let (slave, mut peer) = setup().await;

        let selected = peer.request(&double(6001, CommandState::On, true)).await;
        assert_eq!((selected.cot(), selected.is_negative()), (Cot::ActivationConfirm, false));
        assert!(slave.handler().executed().await.is_empty());

        let confirmed = peer.request(&double(6001, CommandState::On, false)).await;
        assert_eq!((confirmed.cot(), confirmed.is_negative()), (Cot::ActivationConfirm, false));

        let feedback = peer.next().await;
        assert_eq!(feedback.type_id(), TypeId::DoublePoint);
        assert_eq!(feedback.cot(), Cot::Spontaneous);
        assert_eq!(
            feedback.objects[0].value,
            ObjectValue::DoublePoint(DoublePoint::new(DoublePointValue::On))
        );
        assert_eq!(peer.next().await.cot(), Cot::ActivationTermination);
        assert_eq!(slave.handler().executed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_without_select_is_refused() {
        let (slave, mut peer) = setup().await;
        let reply = peer.request(&double(6001, CommandState::On, false)).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::UnknownCot, true));
        assert!(slave.handler().executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_of_other_ioa_is_refused() {
        let (slave, mut peer) = setup().await;
        peer.request(&double(6001, CommandState::On, true)).await;
        let reply = peer.request(&double(6002, CommandState::On, false)).await;
        assert!(reply.is_negative());

        // the failed execute consumed the select
        let reply = peer.request(&double(6001, CommandState::On, false)).await;
        assert!(reply.is_negative());
        assert!(slave.handler().executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_not_permitted_double_command_state() {
        let (slave, mut peer) = setup().await;
        for state in [CommandState::NotPermitted0, CommandState::NotPermitted3] {
            peer.request(&double(6001, CommandState::On, true)).await;
            let reply = peer.request(&double(6001, state, false)).await;
            assert_eq!((reply.cot(), reply.is_negative()), (Cot::ActivationConfirm, true));
        }
        assert!(slave.handler().executed().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_expires() {
        let (slave, mut peer) = setup().await;
        peer.request(&double(6001, CommandState::Off, true)).await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        let reply = peer.request(&double(6001, CommandState::Off, false)).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::UnknownCot, true));
        assert!(slave.handler().executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_deactivation_cancels_selection() {
        let (_slave, mut peer) = setup().await;
        peer.request(&double(6001, CommandState::On, true)).await;

        let mut cancel = double(6001, CommandState::On, true);
        cancel.header.cot = Cot::Deactivation;
        let reply = peer.request(&cancel).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::DeactivationConfirm, false));

        let reply = peer.request(&double(6001, CommandState::On, false)).await;
        assert!(reply.is_negative());
    }

    #[tokio::test]
    async fn test_undecodable_request_is_mirrored() {
        let (_slave, mut peer) = setup().await;
        // type 200 is not defined
        let raw = Bytes::from_static(&[200, 0x01, 0x06, 0x00, 0x01, 0x00, 0, 0, 0, 1]);
        peer.session.send_encoded(raw).await.unwrap();

        loop {
            match peer.events.recv().await.unwrap() {
                SessionEvent::Rejected { raw, .. } => {
                    assert_eq!(raw[0], 200);
                    assert_eq!(raw[2], 0x40 | Cot::UnknownTypeId.as_u8());
                    break;
                }
                SessionEvent::Asdu(asdu) => panic!("unexpected {asdu}"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_system_commands() {
        let (slave, mut peer) = setup().await;

        let reply = peer.request(&Asdu::test_command(1)).await;
        assert_eq!((reply.cot(), reply.is_negative()), (Cot::ActivationConfirm, false));

        let time = crate::types::Cp56Time2a::now();
        let reply = peer.request(&Asdu::clock_sync(1, time)).await;
        assert!(!reply.is_negative());
        assert_eq!(slave.handler().last_sync().await, Some(time));

        let reply = peer.request(&Asdu::reset_process(1, crate::types::Qrp(0))).await;
        assert!(reply.is_negative());

        let read = peer.request(&Asdu::read(1, Ioa::new(100))).await;
        assert_eq!(read.type_id(), TypeId::DoublePoint);
        assert_eq!(read.cot(), Cot::Request);
        let missing = peer.request(&Asdu::read(1, Ioa::new(999))).await;
        assert_eq!((missing.cot(), missing.is_negative()), (Cot::UnknownIoa, true));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_started_connections() {
        let (slave, mut started) = setup().await;
        let (local, remote) = tokio::io::duplex(4096);
        slave.accept(remote);
        let _stopped = session::spawn(local, LinkRole::Controlling, LinkConfig::default());
        assert_eq!(slave.connection_count(), 2);

        let report = slave
            .handler()
            .update(1u32, ObjectValue::SinglePoint(SinglePoint::new(true)))
            .await
            .unwrap();
        assert_eq!(slave.broadcast_spontaneous(1, &report).await, 1);

        let asdu = started.next().await;
        assert_eq!(asdu.cot(), Cot::Spontaneous);
        assert_eq!(asdu.first_ioa(), Some(Ioa::new(1)));
    }

    #[tokio::test]
    async fn test_broadcast_forgets_closed_connections() {
        let (slave, _started) = setup().await;
        let (local, remote) = tokio::io::duplex(4096);
        let gone = slave.accept(remote);
        let (peer, _events) = session::spawn(local, LinkRole::Controlling, LinkConfig::default());
        peer.close().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !gone.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(lock(&slave.connections).len(), 2);

        slave
            .broadcast_end_of_initialization(1, Coi::default())
            .await;
        assert_eq!(lock(&slave.connections).len(), 1);
        assert_eq!(slave.connection_count(), 1);
    }

    #[test]
    fn test_pack_splits_at_length_limit() {
        let params = AsduParams::default();
        let per_asdu = params.max_objects(TypeId::MeasuredFloat, false);
        let objects = (0..per_asdu as u32 + 1)
            .map(|ioa| InformationObject::new(ioa, ObjectValue::Float(0.0, MeasuredQuality::default())))
            .collect();
        let group = PointGroup::new(TypeId::MeasuredFloat, objects);

        let asdus = pack(1, Cot::InterrogatedByStation, &group, &params);
        assert_eq!(asdus.len(), 2);
        assert_eq!(asdus[0].objects.len(), per_asdu);
        assert_eq!(asdus[1].objects.len(), 1);
        for asdu in &asdus {
            assert!(asdu.to_bytes(&params).is_ok());
        }
    }

    #[test]
    fn test_pack_leaves_out_mismatched_objects() {
        let params = AsduParams::default();
        let mut objects: Vec<InformationObject> = (1..=3u32)
            .map(|ioa| InformationObject::new(ioa, ObjectValue::SinglePoint(SinglePoint::new(true))))
            .collect();
        objects.push(InformationObject::new(4u32, ObjectValue::Float(1.0, MeasuredQuality::default())));
        let group = PointGroup::new(TypeId::SinglePoint, objects);

        let asdus = pack(1, Cot::InterrogatedByStation, &group, &params);
        assert_eq!(asdus.len(), 1);
        let ioas: Vec<u32> = asdus[0].objects.iter().map(|o| o.ioa.value()).collect();
        assert_eq!(ioas, vec![1, 2, 3]);
        assert!(asdus[0].to_bytes(&params).is_ok());

        let bad_only = PointGroup::new(
            TypeId::SinglePoint,
            vec![InformationObject::new(9u32, ObjectValue::Float(1.0, MeasuredQuality::default()))],
        );
        assert!(pack(1, Cot::Spontaneous, &bad_only, &params).is_empty());
    }

    #[tokio::test]
    async fn test_interrogation_keeps_points_beside_a_mismatched_one() {
        let station = station().await;
        assert!(
            !station
                .insert_point(4u32, TypeId::SinglePoint, ObjectValue::Float(1.0, MeasuredQuality::default()))
                .await
        );
        let slave = Iec104Slave::new(station, SlaveConfig::default()).unwrap();
        let mut peer = connect(&slave).await;

        let con = peer.request(&Asdu::interrogation(1, Qoi::STATION)).await;
        assert_eq!((con.cot(), con.is_negative()), (Cot::ActivationConfirm, false));
        let singles = peer.next().await;
        assert_eq!(singles.type_id(), TypeId::SinglePoint);
        let ioas: Vec<u32> = singles.objects.iter().map(|o| o.ioa.value()).collect();
        assert_eq!(ioas, vec![1, 2, 3]);
        assert_eq!(peer.next().await.type_id(), TypeId::DoublePoint);
        assert_eq!(peer.next().await.cot(), Cot::ActivationTermination);
    }
}
