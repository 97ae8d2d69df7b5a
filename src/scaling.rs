//! Raw register decoding and scaling.
//!
//! A [`RegisterDef`] describes how wide a value is, whether it is signed and
//! which integer gain/multiplier turns it into engineering units. Scaling is
//! plain integer arithmetic: `raw * multiply / gain`, truncating towards zero.

use crate::profile::RegisterDef;

/// Combine the raw register words of `reg` into a single value.
///
/// One register is taken as-is (sign-extended when signed), two registers are
/// combined big-endian: the first word is the high half.
pub fn decode_raw(reg: &RegisterDef, raw: &[u16]) -> i64 {
    match (reg.count, raw) {
        (2, [high, low, ..]) => {
            let combined = ((*high as u32) << 16) | *low as u32;
            if reg.signed {
                combined as i32 as i64
            } else {
                combined as i64
            }
        }
        (_, [word, ..]) => {
            if reg.signed {
                *word as i16 as i64
            } else {
                *word as i64
            }
        }
        (_, []) => 0,
    }
}

/// Apply the gain and multiplier of a register. A gain of `0` leaves the value untouched.
#[inline]
pub const fn scale(value: i64, gain: i32, multiply: i32) -> i64 {
    if gain == 0 {
        value
    } else {
        value * multiply as i64 / gain as i64
    }
}

/// Decode and scale in one go.
pub fn scaled_value(reg: &RegisterDef, raw: &[u16]) -> i64 {
    scale(decode_raw(reg, raw), reg.gain, reg.multiply)
}
