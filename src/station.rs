//! Data model seam of a controlled station.
//!
//! [`Iec104Slave`](crate::slave::Iec104Slave) validates and sequences the
//! protocol; a [`StationHandler`] supplies the process image behind it.
//! [`MemoryStation`] is a ready-made in-memory image.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{
    CommandState, Cp56Time2a, DoublePoint, DoublePointValue, FreezeAction, InformationObject,
    Ioa, ObjectValue, Qcc, Qoi, Qrp, SinglePoint, StepPosition, TimeTag, TimeTagKind, TypeId,
};

/// Objects of one type, answered together.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGroup {
    pub type_id: TypeId,
    pub objects: Vec<InformationObject>,
}

impl PointGroup {
    pub fn new(type_id: TypeId, objects: Vec<InformationObject>) -> Self {
        Self { type_id, objects }
    }
}

/// A controllable object known to the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPoint {
    /// Execute is accepted only after a confirmed select.
    pub select_required: bool,
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    /// Executed; the feedback is reported spontaneously after the confirmation.
    Executed { feedback: Option<PointGroup> },
    /// Refused by the process; answered with a negative confirmation.
    Rejected,
}

/// Process image of a controlled station.
///
/// Command types reach the handler without their time tag variant, so one
/// entry serves both C_SC_NA_1 and C_SC_TA_1.
#[async_trait]
pub trait StationHandler: Send + Sync + 'static {
    /// Whether the station answers for `common_address`.
    fn serves(&self, common_address: u16) -> bool;

    /// Objects reported for a station or group interrogation.
    async fn interrogate(&self, common_address: u16, qoi: Qoi) -> Vec<PointGroup>;

    /// Counters reported for a counter interrogation. Freeze and reset
    /// requests act on the counters and return nothing.
    async fn counter_interrogate(&self, common_address: u16, qcc: Qcc) -> Vec<PointGroup>;

    /// Look up a command object, `None` if unknown.
    async fn command_point(
        &self,
        common_address: u16,
        type_id: TypeId,
        ioa: Ioa,
    ) -> Option<CommandPoint>;

    async fn execute(
        &self,
        common_address: u16,
        type_id: TypeId,
        object: &InformationObject,
    ) -> ExecuteOutcome;

    /// Current value of one object for C_RD_NA_1, `None` if unknown.
    async fn read(&self, common_address: u16, ioa: Ioa) -> Option<PointGroup>;

    /// Returns false to refuse the synchronisation.
    async fn clock_sync(&self, _common_address: u16, _time: Cp56Time2a) -> bool {
        true
    }

    /// Returns false to refuse the reset.
    async fn reset_process(&self, _common_address: u16, _qrp: Qrp) -> bool {
        true
    }
}

/// How a command object is wired in a [`MemoryStation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBinding {
    pub select_required: bool,
    /// Monitored object that follows the command.
    pub feedback: Option<Ioa>,
}

/// A command accepted by a [`MemoryStation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    pub type_id: TypeId,
    pub ioa: Ioa,
    pub value: ObjectValue,
}

#[derive(Debug, Clone)]
struct MonitoredPoint {
    type_id: TypeId,
    value: ObjectValue,
    /// Counter value captured by the last freeze.
    frozen: Option<ObjectValue>,
    /// Interrogation group 1..=16, or counter group 1..=4 for totals.
    group: Option<u8>,
}

impl MonitoredPoint {
    fn is_counter(&self) -> bool {
        matches!(self.value, ObjectValue::Counter(_))
    }

    fn in_group(&self, group: u8) -> bool {
        group == 0 || self.group == Some(group)
    }

    /// Apply a counter interrogation freeze or reset.
    fn freeze(&mut self, action: FreezeAction) {
        let ObjectValue::Counter(mut counter) = self.value else {
            return;
        };
        if matches!(action, FreezeAction::Freeze | FreezeAction::FreezeWithReset) {
            self.frozen = Some(self.value);
            counter.sequence = (counter.sequence + 1) % 32;
        }
        if matches!(action, FreezeAction::FreezeWithReset | FreezeAction::Reset) {
            counter.value = 0;
            counter.carry = false;
            counter.adjusted = false;
        }
        self.value = ObjectValue::Counter(counter);
    }

    fn object(&self, ioa: Ioa) -> InformationObject {
        self.object_with(ioa, self.value)
    }

    /// Frozen value if there is one, the current value otherwise.
    fn reported(&self, ioa: Ioa) -> InformationObject {
        self.object_with(ioa, self.frozen.unwrap_or(self.value))
    }

    fn object_with(&self, ioa: Ioa, value: ObjectValue) -> InformationObject {
        let object = InformationObject::new(ioa, value);
        match self.type_id.time_tag() {
            TimeTagKind::None => object,
            TimeTagKind::Cp24 => object.with_time(TimeTag::Cp24(Cp56Time2a::now().into())),
            TimeTagKind::Cp56 => object.with_time(TimeTag::Cp56(Cp56Time2a::now())),
        }
    }
}

#[derive(Debug, Default)]
struct Image {
    points: BTreeMap<Ioa, MonitoredPoint>,
    commands: HashMap<(TypeId, Ioa), CommandBinding>,
    executed: Vec<ExecutedCommand>,
    last_sync: Option<Cp56Time2a>,
}

/// In-memory process image for a single common address.
///
/// ```rust,ignore
/// let station = MemoryStation::new(1);
/// station.insert_point(100u32, TypeId::DoublePoint, ObjectValue::DoublePoint(off)).await;
/// station
///     .bind_command(TypeId::DoubleCommand, 6001u32, CommandBinding { select_required: true, feedback: Some(Ioa::new(100)) })
///     .await;
/// ```
#[derive(Debug)]
pub struct MemoryStation {
    common_address: u16,
    image: RwLock<Image>,
}

impl MemoryStation {
    pub fn new(common_address: u16) -> Self {
        Self {
            common_address,
            image: RwLock::new(Image::default()),
        }
    }

    pub fn common_address(&self) -> u16 {
        self.common_address
    }

    /// Add or replace a monitored object. Returns false, leaving the image
    /// untouched, if `value` is not an element of `type_id`.
    pub async fn insert_point(
        &self,
        ioa: impl Into<Ioa>,
        type_id: TypeId,
        value: ObjectValue,
    ) -> bool {
        let ioa = ioa.into();
        if !type_id.is_monitoring() || !value.fits(type_id) {
            warn!(%type_id, %ioa, "point value does not match its type");
            return false;
        }
        self.image.write().await.points.insert(
            ioa,
            MonitoredPoint {
                type_id,
                value,
                frozen: None,
                group: None,
            },
        );
        true
    }

    /// Put an object into an interrogation group (counter group for totals).
    pub async fn assign_group(&self, ioa: impl Into<Ioa>, group: u8) -> bool {
        match self.image.write().await.points.get_mut(&ioa.into()) {
            Some(point) => {
                point.group = Some(group);
                true
            }
            None => false,
        }
    }

    /// Change a monitored value. Returns the spontaneous report to send, or
    /// `None` if the object is unknown or the value kind does not match.
    pub async fn update(&self, ioa: impl Into<Ioa>, value: ObjectValue) -> Option<PointGroup> {
        let ioa = ioa.into();
        let mut image = self.image.write().await;
        let point = image.points.get_mut(&ioa)?;
        if !value.fits(point.type_id) {
            return None;
        }
        point.value = value;
        Some(PointGroup::new(point.type_id, vec![point.object(ioa)]))
    }

    pub async fn value(&self, ioa: impl Into<Ioa>) -> Option<ObjectValue> {
        self.image
            .read()
            .await
            .points
            .get(&ioa.into())
            .map(|p| p.value)
    }

    /// Register a command object. `type_id` is the type without time tag.
    pub async fn bind_command(&self, type_id: TypeId, ioa: impl Into<Ioa>, binding: CommandBinding) {
        self.image
            .write()
            .await
            .commands
            .insert((type_id.without_time_tag(), ioa.into()), binding);
    }

    /// Commands executed so far, oldest first.
    pub async fn executed(&self) -> Vec<ExecutedCommand> {
        self.image.read().await.executed.clone()
    }

    /// Time of the last accepted clock synchronisation.
    pub async fn last_sync(&self) -> Option<Cp56Time2a> {
        self.image.read().await.last_sync
    }
}

/// Bundle objects into groups of consecutive equal type.
fn group_by_type<'a>(points: impl Iterator<Item = (&'a Ioa, &'a MonitoredPoint)>) -> Vec<PointGroup> {
    let mut groups: Vec<PointGroup> = Vec::new();
    for (ioa, point) in points {
        match groups.last_mut() {
            Some(group) if group.type_id == point.type_id => group.objects.push(point.reported(*ioa)),
            _ => groups.push(PointGroup::new(point.type_id, vec![point.reported(*ioa)])),
        }
    }
    groups
}

/// Monitored value following an executed command.
fn feedback_value(command: &ObjectValue, current: &ObjectValue) -> Option<ObjectValue> {
    use ObjectValue as V;
    let value = match (command, current) {
        (V::SingleCommand(c), V::SinglePoint(p)) => V::SinglePoint(SinglePoint {
            value: c.state,
            quality: p.quality,
        }),
        (V::DoubleCommand(c), V::DoublePoint(p)) => {
            let value = match c.state {
                CommandState::On => DoublePointValue::On,
                CommandState::Off => DoublePointValue::Off,
                _ => return None,
            };
            V::DoublePoint(DoublePoint {
                value,
                quality: p.quality,
            })
        }
        (V::RegulatingStep(c), V::StepPosition(p, q)) => {
            let step = match c.state {
                CommandState::On => 1,
                CommandState::Off => -1,
                _ => return None,
            };
            V::StepPosition(StepPosition::new(p.value.saturating_add(step), false), *q)
        }
        (V::SetpointNormalized(v, _), V::Normalized(_, q)) => V::Normalized(*v, *q),
        (V::SetpointNormalized(v, _), V::NormalizedNoQuality(_)) => V::NormalizedNoQuality(*v),
        (V::SetpointScaled(v, _), V::Scaled(_, q)) => V::Scaled(*v, *q),
        (V::SetpointFloat(v, _), V::Float(_, q)) => V::Float(*v, *q),
        (V::BitstringCommand(v), V::Bitstring(_, q)) => V::Bitstring(*v, *q),
        _ => return None,
    };
    Some(value)
}

#[async_trait]
impl StationHandler for MemoryStation {
    fn serves(&self, common_address: u16) -> bool {
        common_address == self.common_address
    }

    async fn interrogate(&self, _common_address: u16, qoi: Qoi) -> Vec<PointGroup> {
        let Some(group) = qoi.group_number() else {
            return Vec::new();
        };
        let image = self.image.read().await;
        group_by_type(
            image
                .points
                .iter()
                .filter(|(_, p)| !p.is_counter() && p.in_group(group)),
        )
    }

    async fn counter_interrogate(&self, _common_address: u16, qcc: Qcc) -> Vec<PointGroup> {
        let Some(group) = qcc.group_number() else {
            return Vec::new();
        };
        if qcc.freeze == FreezeAction::Read {
            let image = self.image.read().await;
            return group_by_type(
                image
                    .points
                    .iter()
                    .filter(|(_, p)| p.is_counter() && p.in_group(group)),
            );
        }

        let mut image = self.image.write().await;
        let mut counters = 0;
        for point in image.points.values_mut() {
            if point.is_counter() && point.in_group(group) {
                point.freeze(qcc.freeze);
                counters += 1;
            }
        }
        debug!(action = ?qcc.freeze, group, counters, "counters frozen");
        Vec::new()
    }

    async fn command_point(
        &self,
        _common_address: u16,
        type_id: TypeId,
        ioa: Ioa,
    ) -> Option<CommandPoint> {
        self.image
            .read()
            .await
            .commands
            .get(&(type_id.without_time_tag(), ioa))
            .map(|binding| CommandPoint {
                select_required: binding.select_required,
            })
    }

    async fn execute(
        &self,
        _common_address: u16,
        type_id: TypeId,
        object: &InformationObject,
    ) -> ExecuteOutcome {
        let mut image = self.image.write().await;
        let Some(binding) = image
            .commands
            .get(&(type_id.without_time_tag(), object.ioa))
            .copied()
        else {
            return ExecuteOutcome::Rejected;
        };
        image.executed.push(ExecutedCommand {
            type_id,
            ioa: object.ioa,
            value: object.value,
        });
        debug!(%type_id, ioa = %object.ioa, "command executed");

        let feedback = binding.feedback.and_then(|ioa| {
            let point = image.points.get_mut(&ioa)?;
            point.value = feedback_value(&object.value, &point.value)?;
            Some(PointGroup::new(point.type_id, vec![point.object(ioa)]))
        });
        ExecuteOutcome::Executed { feedback }
    }

    async fn read(&self, _common_address: u16, ioa: Ioa) -> Option<PointGroup> {
        let image = self.image.read().await;
        let point = image.points.get(&ioa)?;
        Some(PointGroup::new(point.type_id, vec![point.object(ioa)]))
    }

    async fn clock_sync(&self, _common_address: u16, time: Cp56Time2a) -> bool {
        self.image.write().await.last_sync = Some(time);
        true
    }
}
