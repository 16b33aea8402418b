//! A single FM operator: phase generator, envelope generator, and waveform evaluator.

use crate::lfo::Lfo;
use crate::rates::RateTables;
use crate::tables::{
    env_silent, ENV_BITS, ENV_EXTRA, ENV_MAX, ENV_MIN, KSL_SHIFT_TABLE, MUL_SH, MUL_TABLE,
    RATE_MASK, RATE_SH, SHIFT_KEYCODE, SHIFT_KSLBASE, WAVE_BASE_TABLE, WAVE_MASK_TABLE, WAVE_SH,
    WAVE_START_TABLE, WAVE_TABLE,
};

pub const KEY_NORMAL: u8 = 0x01;
pub const KEY_PERCUSSION: u8 = 0x02;

const MASK_KSR: u8 = 0x10;
const MASK_SUSTAIN: u8 = 0x20;
const MASK_VIBRATO: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Off = 0,
    Attack = 1,
    Decay = 2,
    Sustain = 3,
    Release = 4,
}

#[derive(Debug, Clone)]
pub struct Operator {
    wave_index: u32,
    wave_add: u32,
    wave_current: u32,
    wave_base: u16,
    wave_mask: u16,
    wave_start: u32,

    freq_mul: u32,
    chan_data: u32,

    key_on: u8,

    reg20: u8,
    reg40: u8,
    reg60: u8,
    reg80: u8,
    reg_e0: u8,

    ksr: u8,
    vib_strength: u8,
    vibrato: i32,
    tremolo_mask: i32,

    state: EnvelopeState,
    rate_zero: u8,
    rate_index: u32,

    attack_add: u32,
    decay_add: u32,
    release_add: u32,

    volume: i32,
    sustain_level: i32,
    total_level: i32,
    current_level: i32,
}

impl Default for Operator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator {
    pub fn new() -> Self {
        Self {
            wave_index: 0,
            wave_add: 0,
            wave_current: 0,
            wave_base: WAVE_BASE_TABLE[0],
            wave_mask: WAVE_MASK_TABLE[0],
            wave_start: u32::from(WAVE_START_TABLE[0]) << WAVE_SH,
            freq_mul: 0,
            chan_data: 0,
            key_on: 0,
            reg20: 0,
            reg40: 0,
            reg60: 0,
            reg80: 0,
            reg_e0: 0,
            ksr: 0,
            vib_strength: 0,
            vibrato: 0,
            tremolo_mask: 0,
            state: EnvelopeState::Off,
            rate_zero: 1 << (EnvelopeState::Off as u8),
            rate_index: 0,
            attack_add: 0,
            decay_add: 0,
            release_add: 0,
            volume: ENV_MAX,
            sustain_level: ENV_MAX,
            total_level: ENV_MAX,
            current_level: ENV_MAX,
        }
    }

    fn set_state(&mut self, state: EnvelopeState) {
        log::trace!("operator envelope state -> {state:?}");
        self.state = state;
    }

    pub fn is_silent(&self) -> bool {
        if !env_silent(self.total_level + self.volume) {
            return false;
        }
        self.rate_zero & (1 << (self.state as u8)) != 0
    }

    fn update_attack(&mut self, rates: &RateTables) {
        let rate = self.reg60 >> 4;
        if rate != 0 {
            let val = (rate << 2) + self.ksr;
            self.attack_add = rates.attack_rates[val as usize];
            self.rate_zero &= !(1 << (EnvelopeState::Attack as u8));
        } else {
            self.attack_add = 0;
            self.rate_zero |= 1 << (EnvelopeState::Attack as u8);
        }
    }

    fn update_decay(&mut self, rates: &RateTables) {
        let rate = self.reg60 & 0xf;
        if rate != 0 {
            let val = (rate << 2) + self.ksr;
            self.decay_add = rates.linear_rates[val as usize];
            self.rate_zero &= !(1 << (EnvelopeState::Decay as u8));
        } else {
            self.decay_add = 0;
            self.rate_zero |= 1 << (EnvelopeState::Decay as u8);
        }
    }

    fn update_release(&mut self, rates: &RateTables) {
        let rate = self.reg80 & 0xf;
        if rate != 0 {
            let val = (rate << 2) + self.ksr;
            self.release_add = rates.linear_rates[val as usize];
            self.rate_zero &= !(1 << (EnvelopeState::Release as u8));
            if self.reg20 & MASK_SUSTAIN == 0 {
                self.rate_zero &= !(1 << (EnvelopeState::Sustain as u8));
            }
        } else {
            self.release_add = 0;
            self.rate_zero |= 1 << (EnvelopeState::Release as u8);
            if self.reg20 & MASK_SUSTAIN == 0 {
                self.rate_zero |= 1 << (EnvelopeState::Sustain as u8);
            }
        }
    }

    fn update_attenuation(&mut self) {
        let ksl_base = i32::try_from((self.chan_data >> SHIFT_KSLBASE) & 0xff).unwrap();
        let tl = i32::from(self.reg40 & 0x3f);
        let ksl_shift = KSL_SHIFT_TABLE[(self.reg40 >> 6) as usize];
        self.total_level = tl << (ENV_BITS - 7);
        self.total_level += (ksl_base << ENV_EXTRA) >> ksl_shift;
    }

    fn update_frequency(&mut self) {
        let freq = self.chan_data & ((1 << 10) - 1);
        let block = (self.chan_data >> 10) & 0xff;
        self.wave_add = (freq << block) * self.freq_mul;
        if self.reg20 & MASK_VIBRATO != 0 {
            self.vib_strength = (freq >> 7) as u8;
            self.vibrato = (u32::from(self.vib_strength) << block).wrapping_mul(self.freq_mul) as i32;
        } else {
            self.vib_strength = 0;
            self.vibrato = 0;
        }
    }

    fn update_rates(&mut self, rates: &RateTables) {
        let mut new_ksr = u8::try_from((self.chan_data >> SHIFT_KEYCODE) & 0xff).unwrap();
        if self.reg20 & MASK_KSR == 0 {
            new_ksr >>= 2;
        }
        if self.ksr == new_ksr {
            return;
        }
        self.ksr = new_ksr;
        self.update_attack(rates);
        self.update_decay(rates);
        self.update_release(rates);
    }

    /// Pushes the owning channel's cached frequency/block/KSL/key-code word into this operator.
    /// `refresh_attenuation`/`refresh_rates` are invoked separately by the channel only when the
    /// relevant bits actually changed, matching the reference chip's write-time dataflow.
    pub(crate) fn set_chan_data(&mut self, data: u32) {
        self.chan_data = data;
        self.update_frequency();
    }

    pub(crate) fn refresh_attenuation(&mut self) {
        self.update_attenuation();
    }

    pub(crate) fn refresh_rates(&mut self, rates: &RateTables) {
        self.update_rates(rates);
    }

    fn rate_forward(&mut self, add: u32) -> i32 {
        self.rate_index += add;
        let ret = (self.rate_index >> RATE_SH) as i32;
        self.rate_index &= RATE_MASK;
        ret
    }

    fn step_envelope(&mut self) -> i32 {
        let mut vol = self.volume;
        match self.state {
            EnvelopeState::Off => return ENV_MAX,
            EnvelopeState::Attack => {
                let change = self.rate_forward(self.attack_add);
                if change == 0 {
                    return vol;
                }
                vol += (!vol * change) >> 3;
                if vol < ENV_MIN {
                    self.volume = ENV_MIN;
                    self.rate_index = 0;
                    self.set_state(EnvelopeState::Decay);
                    return ENV_MIN;
                }
            }
            EnvelopeState::Decay => {
                vol += self.rate_forward(self.decay_add);
                if vol >= self.sustain_level {
                    if vol >= ENV_MAX {
                        self.volume = ENV_MAX;
                        self.set_state(EnvelopeState::Off);
                        return ENV_MAX;
                    }
                    self.rate_index = 0;
                    self.set_state(EnvelopeState::Sustain);
                }
            }
            EnvelopeState::Sustain | EnvelopeState::Release => {
                if self.state == EnvelopeState::Sustain && self.reg20 & MASK_SUSTAIN != 0 {
                    return vol;
                }
                vol += self.rate_forward(self.release_add);
                if vol >= ENV_MAX {
                    self.volume = ENV_MAX;
                    self.set_state(EnvelopeState::Off);
                    return ENV_MAX;
                }
            }
        }
        self.volume = vol;
        vol
    }

    pub(crate) fn forward_volume(&mut self) -> i32 {
        self.current_level + self.step_envelope()
    }

    pub(crate) fn forward_wave(&mut self) -> u32 {
        self.wave_index = self.wave_index.wrapping_add(self.wave_current);
        self.wave_index >> WAVE_SH
    }

    pub(crate) fn get_wave(&self, index: u32, vol: i32) -> i32 {
        let wave = i32::from(WAVE_TABLE[(u32::from(self.wave_base) + (index & u32::from(self.wave_mask))) as usize]);
        let mul = i32::from(MUL_TABLE[(vol >> ENV_EXTRA) as usize]);
        (wave * mul) >> MUL_SH
    }

    /// Advances this operator by one sample, applying `modulation` (another operator's prior
    /// output, or 0) to the phase index before the waveform lookup.
    pub fn get_sample(&mut self, modulation: i32) -> i32 {
        let vol = self.forward_volume();
        if env_silent(vol) {
            self.wave_index = self.wave_index.wrapping_add(self.wave_current);
            return 0;
        }
        let index = self.forward_wave();
        let phase = index.wrapping_add(modulation as u32);
        self.get_wave(phase, vol)
    }

    pub fn write_reg20(&mut self, rates: &RateTables, val: u8) {
        let change = self.reg20 ^ val;
        if change == 0 {
            return;
        }
        self.reg20 = val;
        self.tremolo_mask = if val & 0x80 != 0 { -1 } else { 0 };
        if change & MASK_KSR != 0 {
            self.update_rates(rates);
        }
        if self.reg20 & MASK_SUSTAIN != 0 || self.release_add == 0 {
            self.rate_zero |= 1 << (EnvelopeState::Sustain as u8);
        } else {
            self.rate_zero &= !(1 << (EnvelopeState::Sustain as u8));
        }
        if change & (0xf | MASK_VIBRATO) != 0 {
            self.freq_mul = rates.freq_mul[(val & 0xf) as usize];
            self.update_frequency();
        }
    }

    pub fn write_reg40(&mut self, val: u8) {
        if self.reg40 == val {
            return;
        }
        self.reg40 = val;
        self.update_attenuation();
    }

    pub fn write_reg60(&mut self, rates: &RateTables, val: u8) {
        let change = self.reg60 ^ val;
        self.reg60 = val;
        if change & 0x0f != 0 {
            self.update_decay(rates);
        }
        if change & 0xf0 != 0 {
            self.update_attack(rates);
        }
    }

    pub fn write_reg80(&mut self, rates: &RateTables, val: u8) {
        let change = self.reg80 ^ val;
        if change == 0 {
            return;
        }
        self.reg80 = val;
        let mut sustain = val >> 4;
        sustain |= sustain.wrapping_add(1) & 0x10;
        self.sustain_level = i32::from(sustain) << (ENV_BITS - 5);
        if change & 0x0f != 0 {
            self.update_release(rates);
        }
    }

    pub fn write_reg_e0(&mut self, waveform_select_mask: u8, opl3_active: u8, val: u8) {
        if self.reg_e0 == val {
            return;
        }
        let wave_form = val & ((0x3 & waveform_select_mask) | (0x7 & opl3_active));
        self.reg_e0 = val;
        self.wave_base = WAVE_BASE_TABLE[wave_form as usize];
        self.wave_start = u32::from(WAVE_START_TABLE[wave_form as usize]) << WAVE_SH;
        self.wave_mask = WAVE_MASK_TABLE[wave_form as usize];
    }

    pub fn key_on(&mut self, mask: u8) {
        if self.key_on == 0 {
            self.wave_index = self.wave_start;
            self.rate_index = 0;
            self.set_state(EnvelopeState::Attack);
        }
        self.key_on |= mask;
    }

    pub fn key_off(&mut self, mask: u8) {
        self.key_on &= !mask;
        if self.key_on == 0 && self.state != EnvelopeState::Off {
            self.set_state(EnvelopeState::Release);
        }
    }

    /// Latches this sample's tremolo-masked attenuation and vibrato-shifted phase increment.
    /// Called once per channel per sample, before any operator in the channel is sampled.
    pub fn prepare(&mut self, lfo: &Lfo) {
        self.current_level = self.total_level + (lfo.tremolo_value & self.tremolo_mask);
        self.wave_current = self.wave_add;
        if u32::from(self.vib_strength) >> lfo.vibrato_shift != 0 {
            let mut add = self.vibrato >> lfo.vibrato_shift;
            let neg = lfo.vibrato_sign;
            add = (add ^ neg) - neg;
            self.wave_current = self.wave_current.wrapping_add(add as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_sine_op(op: &mut Operator, rates: &RateTables, multiplier: u8) {
        op.write_reg_e0(0x7, 0xff, 0x00);
        op.write_reg40(0x00);
        op.write_reg20(rates, multiplier);
        op.write_reg60(rates, 0xf0);
        op.write_reg80(rates, 0x0f);
    }

    #[test_log::test]
    fn key_on_resets_phase_only_on_zero_to_nonzero_transition() {
        let rates = RateTables::build(49716);
        let mut op = Operator::new();
        program_sine_op(&mut op, &rates, 0x01);
        op.set_chan_data((0x200) | (4 << 10));
        op.key_on(KEY_NORMAL);
        // Advance a bit so wave_index has moved away from the reset value.
        for _ in 0..50 {
            op.get_sample(0);
        }
        let index_before = op.wave_index;
        op.key_on(KEY_PERCUSSION);
        assert_eq!(op.wave_index, index_before, "second key-on bit must not reset phase");
        op.key_off(KEY_NORMAL);
        assert_ne!(op.state, EnvelopeState::Off, "still keyed on via the other bit");
        assert_eq!(op.key_on, KEY_PERCUSSION);
    }

    #[test_log::test]
    fn off_state_envelope_level_pinned_to_max_attenuation() {
        let op = Operator::new();
        assert_eq!(op.state, EnvelopeState::Off);
        assert_eq!(op.volume, ENV_MAX);
    }

    #[test_log::test]
    fn attack_decreases_envelope_level_monotonically() {
        let rates = RateTables::build(49716);
        let mut op = Operator::new();
        program_sine_op(&mut op, &rates, 0x01);
        op.set_chan_data(0x200 | (4 << 10));
        op.key_on(KEY_NORMAL);
        let mut last = op.volume;
        for _ in 0..200 {
            op.get_sample(0);
            if op.state != EnvelopeState::Attack {
                break;
            }
            assert!(op.volume <= last, "attack must not increase attenuation");
            last = op.volume;
        }
    }

    #[test_log::test]
    fn rate_zero_freezes_envelope_level() {
        let rates = RateTables::build(49716);
        let mut op = Operator::new();
        program_sine_op(&mut op, &rates, 0x01);
        // Decay rate 0 -> rate_zero bit set for Decay, envelope must freeze once attack ends.
        op.write_reg60(&rates, 0xf0);
        op.set_chan_data(0x200 | (4 << 10));
        op.key_on(KEY_NORMAL);
        for _ in 0..4096 {
            op.get_sample(0);
        }
        assert_eq!(op.state, EnvelopeState::Decay);
        let level = op.volume;
        for _ in 0..1000 {
            op.get_sample(0);
        }
        assert_eq!(op.volume, level, "decay rate 0 must freeze the envelope level");
    }

    #[test_log::test]
    fn waveform_gating_respects_opl2_select_bit_and_opl3_override() {
        let mut op = Operator::new();
        // OPL2, waveform select disabled: writing waveform index 3 selects waveform 0.
        op.write_reg_e0(0x0, 0x00, 0x03);
        assert_eq!(op.wave_base, WAVE_BASE_TABLE[0]);

        let mut op = Operator::new();
        // OPL2, waveform select enabled: waveform 3 is selected.
        op.write_reg_e0(0x7, 0x00, 0x03);
        assert_eq!(op.wave_base, WAVE_BASE_TABLE[3]);

        let mut op = Operator::new();
        // OPL3 active: waveform 3 selected regardless of the select-enable bit.
        op.write_reg_e0(0x0, 0xff, 0x03);
        assert_eq!(op.wave_base, WAVE_BASE_TABLE[3]);
    }

    #[test_log::test]
    fn half_sine_waveform_uses_the_silence_sentinel_in_its_negative_half() {
        // Waveform 1 (half-sine) is built from the sine base plus a "fill silence gaps" region
        // at table offset 0x400/0x500; every entry there must equal the table's own silence
        // sentinel (index 0), independent of volume, reproducing the negative half being
        // silenced regardless of how loud the operator is.
        let sentinel = WAVE_TABLE[0];
        for i in 0x400usize..0x600 {
            assert_eq!(WAVE_TABLE[i], sentinel, "waveform table offset {i:#x} must be the silence sentinel");
        }
    }
}
