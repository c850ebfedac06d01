use crate::{
    error::{Result, ScaleError},
    types::{ChannelTag, MeasurementUpdate, RawFrame, Weight},
};

/// Minimum length of a stable-weight (`FFB2`) frame
pub const WEIGHT_FRAME_MIN_LEN: usize = 9;

/// Minimum length of a BIA (`FFB3`) frame
pub const BIA_FRAME_MIN_LEN: usize = 8;

/// Offset of the measurement phase byte in a stable-weight frame
pub const WEIGHT_PHASE_OFFSET: usize = 4;

/// Phase value signalling that the weight has settled
pub const WEIGHT_PHASE_SETTLED: u8 = 2;

/// Offset of the 3-byte weight field in a stable-weight frame
pub const WEIGHT_FIELD_OFFSET: usize = 6;

/// Offset of the frame type byte in a BIA frame
pub const BIA_FRAME_TYPE_OFFSET: usize = 3;

/// Frame type of the BIA result frame; every other `FFB3` frame is ignored
pub const BIA_RESULT_FRAME_TYPE: u8 = 0xA3;

/// Offset of the 3-byte weight field in a BIA result frame
pub const BIA_FIELD_OFFSET: usize = 5;

/// Only the low 18 bits of a weight field carry the mass.
///
/// The top two bits of the most significant byte are flags unrelated to the
/// magnitude.
pub const WEIGHT_MASK: u32 = 0x3_FFFF;

/// Decode a notification frame into a measurement update
///
/// Frame layouts observed on the Gofit S2 (all weights in grams):
///
/// - Stable weight (`FFB2`), at least 9 bytes:
///   - Byte 4: measurement phase, `2` once the weight has settled
///   - Bytes 6-8: weight, big-endian, low 18 bits
/// - BIA (`FFB3`), at least 8 bytes:
///   - Byte 3: frame type, `0xA3` for the BIA result frame
///   - Bytes 5-7: weight, big-endian, low 18 bits
/// - Service changed (`2A05`): never carries a measurement
///
/// Returns `Ok(None)` for frames that are well formed but carry no
/// measurement.
///
/// # Errors
///
/// Returns [`ScaleError::MalformedFrame`] if the frame is too short for its
/// channel.
pub fn decode(frame: &RawFrame) -> Result<Option<MeasurementUpdate>> {
    match frame.channel {
        ChannelTag::StableWeight => decode_weight(frame).map(Some),
        ChannelTag::Bia => decode_bia(frame),
        ChannelTag::ServiceChange => Ok(None),
    }
}

fn decode_weight(frame: &RawFrame) -> Result<MeasurementUpdate> {
    ensure_len(frame, WEIGHT_FRAME_MIN_LEN)?;

    Ok(MeasurementUpdate {
        channel: ChannelTag::StableWeight,
        raw_value: weight_field(&frame.data, WEIGHT_FIELD_OFFSET),
        is_final: frame.data[WEIGHT_PHASE_OFFSET] == WEIGHT_PHASE_SETTLED,
    })
}

fn decode_bia(frame: &RawFrame) -> Result<Option<MeasurementUpdate>> {
    ensure_len(frame, BIA_FRAME_MIN_LEN)?;

    if frame.data[BIA_FRAME_TYPE_OFFSET] != BIA_RESULT_FRAME_TYPE {
        return Ok(None);
    }

    Ok(Some(MeasurementUpdate {
        channel: ChannelTag::Bia,
        raw_value: weight_field(&frame.data, BIA_FIELD_OFFSET),
        is_final: true,
    }))
}

fn ensure_len(frame: &RawFrame, expected: usize) -> Result<()> {
    if frame.len() < expected {
        return Err(ScaleError::MalformedFrame {
            channel: frame.channel,
            len: frame.len(),
            expected,
        });
    }
    Ok(())
}

/// Read the masked 3-byte big-endian weight starting at `offset`
fn weight_field(data: &[u8], offset: usize) -> Weight {
    let mut field = [0u8; 4];
    field[1..].copy_from_slice(&data[offset..offset + 3]);
    Weight::from_grams(u32::from_be_bytes(field) & WEIGHT_MASK)
}
