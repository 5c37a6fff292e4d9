//! Conversion of decoded ASDUs into application data points.

use crate::types::{
    normalized_to_f32, Asdu, DataPoint, DataValue, InformationObject, ObjectValue, Quality,
};

/// Extract the monitored values of an ASDU, in object order.
///
/// Commands and system objects carry no process data and are skipped.
///
/// ```rust,ignore
/// for point in parse_asdu(&asdu) {
///     println!("IOA {}: {:?} ({})", point.ioa, point.value, point.quality);
/// }
/// ```
pub fn parse_asdu(asdu: &Asdu) -> Vec<DataPoint> {
    asdu.objects.iter().filter_map(to_data_point).collect()
}

/// Convert one information object; `None` for non-monitoring values.
pub fn to_data_point(obj: &InformationObject) -> Option<DataPoint> {
    let (value, quality) = match obj.value {
        ObjectValue::SinglePoint(sp) => (DataValue::Single(sp.value), Quality::from_descriptor(sp.quality)),
        ObjectValue::DoublePoint(dp) => (DataValue::Double(dp.value), Quality::from_descriptor(dp.quality)),
        ObjectValue::StepPosition(vti, q) => (
            DataValue::StepPosition {
                value: vti.value,
                transient: vti.transient,
            },
            Quality::from_measured(q),
        ),
        ObjectValue::Bitstring(bits, q) => (DataValue::Bitstring(bits), Quality::from_measured(q)),
        ObjectValue::Normalized(raw, q) => (
            DataValue::Normalized(normalized_to_f32(raw)),
            Quality::from_measured(q),
        ),
        ObjectValue::NormalizedNoQuality(raw) => {
            (DataValue::Normalized(normalized_to_f32(raw)), Quality::GOOD)
        }
        ObjectValue::Scaled(v, q) => (DataValue::Scaled(v), Quality::from_measured(q)),
        ObjectValue::Float(v, q) => (DataValue::Float(v), Quality::from_measured(q)),
        ObjectValue::Counter(bcr) => (
            DataValue::Counter {
                value: bcr.value,
                sequence: bcr.sequence,
                carry: bcr.carry,
                adjusted: bcr.adjusted,
            },
            Quality::GOOD
                .set(Quality::INVALID, bcr.invalid)
                .set(Quality::CARRY, bcr.carry)
                .set(Quality::ADJUSTED, bcr.adjusted),
        ),
        ObjectValue::PackedSinglePoint(scd, q) => (
            DataValue::PackedSingle {
                status: scd.status,
                changed: scd.changed,
            },
            Quality::from_measured(q),
        ),
        _ => return None,
    };
    Some(
        DataPoint::new(obj.ioa.value(), value)
            .with_quality(quality)
            .with_timestamp(obj.time),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BinaryCounterReading, Cot, Cp56Time2a, DoublePoint, DoublePointValue, MeasuredQuality,
        QualityDescriptor, Qoi, SinglePoint, TimeTag, TypeId,
    };

    #[test]
    fn test_single_points_in_order() {
        let mut asdu = Asdu::new(TypeId::SinglePoint, Cot::InterrogatedByStation, 1);
        for ioa in [3u32, 1, 2] {
            asdu.push(InformationObject::new(
                ioa,
                ObjectValue::SinglePoint(SinglePoint::new(ioa == 1)),
            ));
        }
        let points = parse_asdu(&asdu);
        let ioas: Vec<u32> = points.iter().map(|p| p.ioa).collect();
        assert_eq!(ioas, vec![3, 1, 2]);
        assert_eq!(points[1].as_bool(), Some(true));
        assert!(points.iter().all(|p| p.is_good()));
    }

    #[test]
    fn test_quality_and_timestamp_carried() {
        let time = TimeTag::Cp56(Cp56Time2a {
            year: 24,
            month: 1,
            day: 1,
            ..Default::default()
        });
        let obj = InformationObject::new(
            5u32,
            ObjectValue::DoublePoint(DoublePoint {
                value: DoublePointValue::On,
                quality: QualityDescriptor::invalid(),
            }),
        )
        .with_time(time);
        let point = to_data_point(&obj).unwrap();
        assert_eq!(point.value, DataValue::Double(DoublePointValue::On));
        assert!(point.quality.invalid());
        assert_eq!(point.timestamp, Some(time));
    }

    #[test]
    fn test_measured_and_counters() {
        let normalized = InformationObject::new(
            1u32,
            ObjectValue::Normalized(-16384, MeasuredQuality::from_u8(0x01)),
        );
        let point = to_data_point(&normalized).unwrap();
        assert_eq!(point.value, DataValue::Normalized(-0.5));
        assert!(point.quality.contains(Quality::OVERFLOW));

        let mut bcr = BinaryCounterReading::new(1000, 7);
        bcr.carry = true;
        let counter = to_data_point(&InformationObject::new(2u32, ObjectValue::Counter(bcr))).unwrap();
        assert_eq!(counter.as_f64(), Some(1000.0));
        assert!(counter.quality.contains(Quality::CARRY));
        assert!(counter.is_good());
    }

    #[test]
    fn test_commands_are_skipped() {
        let asdu = Asdu::interrogation(1, Qoi::STATION);
        assert!(parse_asdu(&asdu).is_empty());
    }
}
