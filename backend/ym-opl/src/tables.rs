//! Precomputed read-only lookup tables shared by every chip instance.
//!
//! Built from the same floating-point formulas as the original hardware's
//! reverse-engineered emulator; everything downstream of these tables is
//! integer math. Tables here do not depend on the host sample rate -- the
//! sample-rate-dependent tables live in [`crate::rates`].

use std::array;
use std::sync::LazyLock;

/// Top bits of the 32-bit phase accumulator used as the waveform index.
pub const WAVE_BITS: u32 = 10;
/// Shift needed to pull the top `WAVE_BITS` bits out of a 32-bit phase accumulator.
pub const WAVE_SH: u32 = 32 - WAVE_BITS;
pub const WAVE_MASK: u32 = (1 << WAVE_SH) - 1;

/// LFO runs at the same fractional precision as the phase accumulators, minus the 10 bits
/// the tremolo table needs (it only has 256 distinct positions).
pub const LFO_SH: u32 = WAVE_SH - 10;
pub const LFO_MAX: u32 = 256 << LFO_SH;

/// Envelope level fits in 9 bits (0 = loudest, 511 = silent); the table-mul waveform
/// strategy needs no extra precision beyond that, so `ENV_EXTRA` is always zero here.
pub const ENV_BITS: i32 = 9;
pub const ENV_EXTRA: i32 = 0;
pub const ENV_MIN: i32 = 0;
pub const ENV_MAX: i32 = 511 << ENV_EXTRA;
pub const ENV_LIMIT: i32 = (12 * 256) >> (3 - ENV_EXTRA);

#[inline]
pub fn env_silent(level: i32) -> bool {
    level >= ENV_LIMIT
}

/// Attack/decay/release rate counters are 24-bit fixed-point phases; one overflow is one
/// envelope step.
pub const RATE_SH: u32 = 24;
pub const RATE_MASK: u32 = (1 << RATE_SH) - 1;
/// Multiplier-table fixed point shift (`MulTable` entries are `u16` values scaled by this).
pub const MUL_SH: u32 = 16;

pub const TREMOLO_TABLE_LEN: usize = 52;

/// Bit offsets within a channel's 32-bit cached `chan_data` word. The low 13 bits hold the
/// raw F-number/block pair (`freq | block << 10`); the upper bytes cache derived per-operator
/// values so operators never need to reach back into the owning channel.
pub const SHIFT_KSLBASE: u32 = 16;
pub const SHIFT_KEYCODE: u32 = 24;

/// Distance into waveform-table-units to subtract per KSL strength step, selected by a
/// channel's C0 KSL bits.
pub const KSL_SHIFT_TABLE: [u8; 4] = [31, 1, 2, 0];

/// Sign/shift-encoded vibrato delta per vibrato-index-high-3-bits, reproducing the classic
/// -7, -3, 0, +1, +3, +7, +1, 0 sequence via sign-extend-and-shift.
#[rustfmt::skip]
pub const VIBRATO_TABLE: [i8; 8] = [
    1_i8.wrapping_sub(0x00), 0_i8.wrapping_sub(0x00), 1_i8.wrapping_sub(0x00), 30_i8.wrapping_sub(0x00),
    1_i8.wrapping_sub(-0x80), 0_i8.wrapping_sub(-0x80), 1_i8.wrapping_sub(-0x80), 30_i8.wrapping_sub(-0x80),
];

const KSL_CREATE_TABLE: [u8; 16] =
    [64, 32, 24, 19, 16, 12, 11, 10, 8, 6, 5, 4, 3, 2, 1, 0];

fn m(x: f64) -> u8 {
    (x * 2.0) as u8
}

/// Frequency-multiplier table, doubled so the 0.5x entry is representable as an integer.
pub static FREQ_CREATE_TABLE: LazyLock<[u8; 16]> = LazyLock::new(|| {
    [
        m(0.5), m(1.0), m(2.0), m(3.0), m(4.0), m(5.0), m(6.0), m(7.0),
        m(8.0), m(9.0), m(10.0), m(10.0), m(12.0), m(12.0), m(15.0), m(15.0),
    ]
});

/// On real hardware these values take 8 samples to reach; they are the reference "samples to
/// reach maximum attack" targets the attack-rate fit in [`crate::rates`] searches for.
pub const ATTACK_SAMPLES_TABLE: [u8; 13] = [69, 55, 46, 40, 35, 29, 23, 20, 19, 15, 11, 10, 9];

/// Linear decay/release step sizes, pre-overflow-shift.
pub const ENVELOPE_INCREASE_TABLE: [u8; 13] = [4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 32];

/// Maps a 6-bit combined rate (`rate * 4 + key_scale_rate`) to a table index and pre-shift.
#[inline]
pub fn envelope_select(val: u8) -> (u8, u8) {
    if val < 13 * 4 {
        (val & 3, 12 - (val >> 2))
    } else if val < 15 * 4 {
        (val - 12 * 4, 0)
    } else {
        (12, 0)
    }
}

/// Key-scale-level base attenuation, 8 octaves x 16 F-number high-nibbles.
pub static KSL_TABLE: LazyLock<[u8; 8 * 16]> = LazyLock::new(|| {
    array::from_fn(|i| {
        let oct = i / 16;
        let entry = i % 16;
        let base = (oct * 8) as i32;
        let val = (base - i32::from(KSL_CREATE_TABLE[entry])).max(0);
        (val * 4) as u8
    })
});

/// Triangle wave ramping 0..25 and back, one entry per LFO tremolo-index step.
pub static TREMOLO_TABLE: LazyLock<[u8; TREMOLO_TABLE_LEN]> = LazyLock::new(|| {
    array::from_fn(|i| {
        let half = if i < TREMOLO_TABLE_LEN / 2 { i } else { TREMOLO_TABLE_LEN - 1 - i };
        half as u8
    })
});

/// Multiplication-based volume table: `wave_sample * mul_table[attenuation >> ENV_EXTRA] >> MUL_SH`.
pub static MUL_TABLE: LazyLock<[u16; 384]> = LazyLock::new(|| {
    array::from_fn(|i| {
        let s = (i * 8) as f64;
        (0.5 + 2.0_f64.powf(-1.0 + (255.0 - s) / 256.0) * f64::from(1u32 << MUL_SH)) as u16
    })
});

/// Distance into [`WAVE_TABLE`] each of the 8 waveforms starts.
pub const WAVE_BASE_TABLE: [u16; 8] = [0x000, 0x200, 0x200, 0x800, 0xa00, 0xc00, 0x100, 0x400];
/// Mask applied to the phase index for each of the 8 waveforms.
pub const WAVE_MASK_TABLE: [u16; 8] = [1023, 1023, 511, 511, 1023, 1023, 512, 1023];
/// Phase accumulator value each waveform resets to on key-on.
pub const WAVE_START_TABLE: [u16; 8] = [512, 0, 0, 0, 0, 512, 512, 256];

/// Overlapping layout of the 8 waveforms packed into one 8*512 entry table. Sine and
/// exponential quarter-waves are generated once and every other waveform reuses, reflects,
/// or doubles the frequency of those two bases instead of computing its own samples.
pub static WAVE_TABLE: LazyLock<[i16; 8 * 512]> = LazyLock::new(|| {
    let mut table = [0i16; 8 * 512];
    for i in 0..512usize {
        let sine = (((i as f64 + 0.5) * (std::f64::consts::PI / 512.0)).sin() * 4084.0) as i16;
        table[0x200 + i] = sine;
        table[i] = -sine;
    }
    for i in 0..256usize {
        let s = (i * 8) as f64;
        let exp = (0.5 + 2.0_f64.powf(-1.0 + (255.0 - s) / 256.0) * 4085.0) as i16;
        table[0x700 + i] = exp;
        table[0x6ff - i] = -exp;
    }
    for i in 0..256usize {
        table[0x400 + i] = table[0];
        table[0x500 + i] = table[0];
        table[0x900 + i] = table[0];
        table[0xc00 + i] = table[0];
        table[0xd00 + i] = table[0];
        table[0x800 + i] = table[0x200 + i];
        table[0xa00 + i] = table[0x200 + i * 2];
        table[0xb00 + i] = table[i * 2];
        table[0xe00 + i] = table[0x200 + i * 2];
        table[0xf00 + i] = table[0x200 + i * 2];
    }
    table
});
