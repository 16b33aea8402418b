//! Per-sample-rate derived increment tables.
//!
//! Everything in [`crate::tables`] is independent of the host's chosen output rate. These
//! tables are not: the frequency multiplier table, the linear envelope rate table, and the
//! attack rate table all scale with `reference_clock / sample_rate`, so they are rebuilt once
//! per [`crate::Chip::new`] call rather than shared globally.

use crate::tables::{
    envelope_select, ATTACK_SAMPLES_TABLE, ENVELOPE_INCREASE_TABLE, ENV_MAX, FREQ_CREATE_TABLE,
    LFO_SH, RATE_MASK, RATE_SH, WAVE_SH,
};

/// The OPL family's reference input clock divided by the 288-cycle sample divider.
const OPL_RATE_HZ: f64 = 14_318_180.0 / 288.0;

#[derive(Debug, Clone)]
pub struct RateTables {
    pub freq_mul: [u32; 16],
    pub linear_rates: [u32; 76],
    pub attack_rates: [u32; 76],
    pub lfo_add: u32,
    pub noise_add: u32,
}

impl RateTables {
    pub fn build(sample_rate_hz: u32) -> Self {
        let scale = OPL_RATE_HZ / f64::from(sample_rate_hz);

        let lfo_add = (0.5 + scale * f64::from(1u32 << LFO_SH)) as u32;

        let freq_scale = (0.5 + scale * f64::from(1u32 << (WAVE_SH - 1 - 10))) as u32;
        let mut freq_mul = [0u32; 16];
        for (i, mul) in freq_mul.iter_mut().enumerate() {
            *mul = freq_scale * u32::from(FREQ_CREATE_TABLE[i]);
        }

        let mut linear_rates = [0u32; 76];
        for (i, rate) in linear_rates.iter_mut().enumerate() {
            let (index, shift) = envelope_select(i as u8);
            let step = u32::from(ENVELOPE_INCREASE_TABLE[index as usize])
                << (RATE_SH - u32::from(shift) - 3);
            *rate = (scale * f64::from(step)) as u32;
        }

        let attack_rates = build_attack_rates(scale);

        Self { freq_mul, linear_rates, attack_rates, lfo_add, noise_add: lfo_add }
    }
}

/// Iteratively searches for the per-sample attack increment that reproduces the reference
/// chip's "samples to reach maximum volume" for each of the 62 real attack rates; the
/// remaining 14 table slots (rates 62..76, which never occur from real register values but
/// keep the table indexable by the full 6-bit rate range) drive the attack to completion in a
/// single sample.
fn build_attack_rates(scale: f64) -> [u32; 76] {
    let mut attack_rates = [0u32; 76];
    for (i, rate) in attack_rates.iter_mut().enumerate().take(62) {
        let (index, shift) = envelope_select(i as u8);
        let original =
            ((u32::from(ATTACK_SAMPLES_TABLE[index as usize]) << shift) as f64 / scale) as i64;

        let mut guess_add =
            (scale * f64::from(ENVELOPE_INCREASE_TABLE[index as usize] as u32 << (RATE_SH - u32::from(shift) - 3)))
                as i64;
        let mut best_add = guess_add;
        let mut best_diff = i64::MAX;

        for _pass in 0..16 {
            let mut volume = i64::from(ENV_MAX);
            let mut samples = 0i64;
            let mut count = 0i64;
            while volume > 0 && samples < original * 2 {
                count += guess_add;
                let change = count >> RATE_SH;
                count &= i64::from(RATE_MASK);
                if change != 0 {
                    volume += (-volume * change) >> 3;
                }
                samples += 1;
            }
            let diff = original - samples;
            let l_diff = diff.abs();
            if l_diff < best_diff {
                best_diff = l_diff;
                best_add = guess_add;
                if best_diff == 0 {
                    break;
                }
            }
            if diff != 0 && original != 0 {
                let mul = ((original - diff) << 12) / original;
                guess_add = (guess_add * mul) >> 12;
                guess_add += if diff < 0 { 1 } else { -1 };
            }
        }
        *rate = best_add.max(0) as u32;
    }
    for rate in attack_rates.iter_mut().skip(62) {
        *rate = 8 << RATE_SH;
    }
    attack_rates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn attack_rates_are_monotonically_faster_with_higher_rate_index() {
        let rates = RateTables::build(49716);
        // Rate 0 is the slowest real attack rate and rate 60 the fastest; the derived
        // per-sample increment should never decrease as the nominal rate increases within one
        // key-scale-rate group of 4.
        for group_start in (0..60).step_by(4) {
            let slow = rates.attack_rates[group_start];
            let fast = rates.attack_rates[group_start + 3];
            assert!(fast >= slow, "group starting at {group_start}: {fast} < {slow}");
        }
    }

    #[test_log::test]
    fn linear_rates_increase_with_rate_index() {
        let rates = RateTables::build(49716);
        assert!(rates.linear_rates[75] >= rates.linear_rates[0]);
    }

    #[test_log::test]
    fn higher_sample_rate_yields_smaller_increments() {
        let slow = RateTables::build(22050);
        let fast = RateTables::build(49716);
        assert!(fast.lfo_add <= slow.lfo_add);
    }
}
