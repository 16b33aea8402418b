//! A channel: two embedded operators plus the feedback/algorithm/pan state that routes their
//! outputs. Four-operator modes are realized by a leader channel borrowing its adjacent
//! follower channel's two operators for the duration of one render call.

use crate::lfo::Lfo;
use crate::operator::{Operator, KEY_NORMAL};
use crate::rates::RateTables;
use crate::tables::{KSL_TABLE, SHIFT_KEYCODE, SHIFT_KSLBASE};
use jgenesis_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthMode {
    Sm2Am,
    Sm2Fm,
    Sm3Am,
    Sm3Fm,
    Sm3FmFm,
    Sm3AmFm,
    Sm3FmAm,
    Sm3AmAm,
}

/// `four_mask` bit marking a channel as one of the three percussion channels (6, 7, 8).
pub const FOUR_MASK_PERCUSSION: u8 = 0x40;
/// `four_mask` bit marking a channel as the second half of a 4-op pair.
pub const FOUR_MASK_SECOND_HALF: u8 = 0x80;

#[derive(Debug, Clone)]
pub struct Channel {
    pub(crate) operators: [Operator; 2],
    pub(crate) old: [i32; 2],
    chan_data: u32,
    reg_b0: u8,
    reg_c0: u8,
    pub(crate) feedback: u32,
    pub(crate) four_mask: u8,
    pub(crate) mask_left: i32,
    pub(crate) mask_right: i32,
    pub(crate) synth_mode: SynthMode,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            operators: [Operator::new(), Operator::new()],
            old: [0, 0],
            chan_data: 0,
            reg_b0: 0,
            reg_c0: 0,
            feedback: 31,
            four_mask: 0,
            mask_left: -1,
            mask_right: -1,
            synth_mode: SynthMode::Sm2Fm,
        }
    }

    fn set_chan_data(&mut self, rates: &RateTables, data: u32) {
        let change = self.chan_data ^ data;
        self.chan_data = data;
        self.operators[0].set_chan_data(data);
        self.operators[1].set_chan_data(data);
        if change & (0xff << SHIFT_KSLBASE) != 0 {
            self.operators[0].refresh_attenuation();
            self.operators[1].refresh_attenuation();
        }
        if change & (0xff << SHIFT_KEYCODE) != 0 {
            self.operators[0].refresh_rates(rates);
            self.operators[1].refresh_rates(rates);
        }
    }

    fn update_frequency(&mut self, rates: &RateTables, note_select: bool, pair: Option<&mut Channel>) {
        let data_raw = self.chan_data & 0xffff;
        let ksl_base = u32::from(KSL_TABLE[(data_raw >> 6) as usize]);
        let mut key_code = (data_raw & 0x1c00) >> 9;
        key_code |= if note_select { (data_raw & 0x100) >> 8 } else { (data_raw & 0x200) >> 9 };
        let data = data_raw | (key_code << SHIFT_KEYCODE) | (ksl_base << SHIFT_KSLBASE);
        self.set_chan_data(rates, data);
        if let Some(pair) = pair {
            pair.set_chan_data(rates, data);
        }
    }

    /// `pair` is `Some` only when this channel leads an active 4-op pair; its presence also
    /// signals that the follower's own A0/B0 writes should be folded into this one.
    pub fn write_a0(
        &mut self,
        pair: Option<&mut Channel>,
        rates: &RateTables,
        four_op_mask_active: u8,
        note_select: bool,
        val: u8,
    ) {
        let four_op = four_op_mask_active & self.four_mask;
        if four_op > 0x80 {
            return;
        }
        let change = (self.chan_data ^ u32::from(val)) & 0xff;
        if change != 0 {
            self.chan_data ^= change;
            let pair = if four_op & 0x3f != 0 { pair } else { None };
            self.update_frequency(rates, note_select, pair);
        }
    }

    pub fn write_b0(
        &mut self,
        mut pair: Option<&mut Channel>,
        rates: &RateTables,
        four_op_mask_active: u8,
        note_select: bool,
        val: u8,
    ) {
        let four_op = four_op_mask_active & self.four_mask;
        if four_op > 0x80 {
            return;
        }
        let four_op_active = four_op & 0x3f != 0;
        let change = (self.chan_data ^ (u32::from(val) << 8)) & 0x1f00;
        if change != 0 {
            self.chan_data ^= change;
            let freq_pair = if four_op_active { pair.as_mut().map(|p| &mut **p) } else { None };
            self.update_frequency(rates, note_select, freq_pair);
        }

        if val.bit(5) == self.reg_b0.bit(5) {
            return;
        }
        self.reg_b0 = val;
        log::trace!("channel key-{} (4-op pair: {four_op_active})", if val.bit(5) { "on" } else { "off" });
        let key_fn: fn(&mut Operator, u8) = if val.bit(5) { Operator::key_on } else { Operator::key_off };
        key_fn(&mut self.operators[0], KEY_NORMAL);
        key_fn(&mut self.operators[1], KEY_NORMAL);
        if four_op_active {
            if let Some(pair) = pair {
                key_fn(&mut pair.operators[0], KEY_NORMAL);
                key_fn(&mut pair.operators[1], KEY_NORMAL);
            }
        }
    }

    /// `adjacent` is this channel's 4-op partner when one exists (the next channel if `self`
    /// leads the pair, the previous channel if `self` is the second half).
    pub fn write_c0(
        &mut self,
        adjacent: Option<&mut Channel>,
        opl3_active: bool,
        reg104: u8,
        rhythm_enabled: bool,
        val: u8,
    ) {
        let change = val ^ self.reg_c0;
        if change == 0 {
            return;
        }
        self.reg_c0 = val;
        let fb = (val >> 1) & 7;
        self.feedback = if fb != 0 { 9 - u32::from(fb) } else { 31 };

        let four_op_pair_active = opl3_active && (reg104 & self.four_mask) & 0x3f != 0;
        let is_percussion_channel = self.four_mask & FOUR_MASK_PERCUSSION != 0;

        if opl3_active {
            if four_op_pair_active {
                if let Some(adjacent) = adjacent {
                    let is_second_half = self.four_mask & FOUR_MASK_SECOND_HALF != 0;
                    let (c0_bit, c1_bit) = if is_second_half {
                        (adjacent.reg_c0.bit(0), self.reg_c0.bit(0))
                    } else {
                        (self.reg_c0.bit(0), adjacent.reg_c0.bit(0))
                    };
                    let mode = match (u8::from(c0_bit)) | (u8::from(c1_bit) << 1) {
                        0 => SynthMode::Sm3FmFm,
                        1 => SynthMode::Sm3AmFm,
                        2 => SynthMode::Sm3FmAm,
                        _ => SynthMode::Sm3AmAm,
                    };
                    if is_second_half {
                        adjacent.synth_mode = mode;
                    } else {
                        self.synth_mode = mode;
                    }
                }
            } else if !(is_percussion_channel && rhythm_enabled) {
                self.synth_mode = if val.bit(0) { SynthMode::Sm3Am } else { SynthMode::Sm3Fm };
            }
            self.mask_left = if val.bit(4) { -1 } else { 0 };
            self.mask_right = if val.bit(5) { -1 } else { 0 };
        } else if !(is_percussion_channel && rhythm_enabled) {
            self.synth_mode = if val.bit(0) { SynthMode::Sm2Am } else { SynthMode::Sm2Fm };
        }
    }

    pub fn reset_c0(&mut self, adjacent: Option<&mut Channel>, opl3_active: bool, reg104: u8, rhythm_enabled: bool) {
        let val = self.reg_c0;
        self.reg_c0 ^= 0xff;
        self.write_c0(adjacent, opl3_active, reg104, rhythm_enabled, val);
    }

    pub fn is_percussion_channel(&self) -> bool {
        self.four_mask & FOUR_MASK_PERCUSSION != 0
    }

    /// Additive-synthesis bit of `reg_c0`. Used directly by the rhythm circuit for the bass
    /// drum voice, which keeps its own AM/FM routing even while `synth_mode` goes unused.
    pub(crate) fn is_am_mode(&self) -> bool {
        self.reg_c0.bit(0)
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

fn feedback_modulation(chan: &Channel) -> i32 {
    let sum = (chan.old[0] as u32).wrapping_add(chan.old[1] as u32);
    (sum >> chan.feedback) as i32
}

/// Renders one 2-operator channel (modes `Sm2Am`, `Sm2Fm`, `Sm3Am`, `Sm3Fm`). `stereo`
/// determines whether output is mixed through the pan masks into interleaved L/R slots or
/// added once per sample into a mono buffer.
pub fn render_2op(chan: &mut Channel, samples: usize, lfo: &Lfo, stereo: bool, output: &mut [i32]) {
    let am = matches!(chan.synth_mode, SynthMode::Sm2Am | SynthMode::Sm3Am);
    let silent =
        if am { chan.operators[0].is_silent() && chan.operators[1].is_silent() } else { chan.operators[1].is_silent() };
    if silent {
        chan.old = [0, 0];
        return;
    }
    chan.operators[0].prepare(lfo);
    chan.operators[1].prepare(lfo);
    for i in 0..samples {
        let modulation = feedback_modulation(chan);
        chan.old[0] = chan.old[1];
        chan.old[1] = chan.operators[0].get_sample(modulation);
        let out0 = chan.old[0];
        let sample =
            if am { out0 + chan.operators[1].get_sample(0) } else { chan.operators[1].get_sample(out0) };
        if stereo {
            output[i * 2] += sample & chan.mask_left;
            output[i * 2 + 1] += sample & chan.mask_right;
        } else {
            output[i] += sample;
        }
    }
}

/// Renders an active 4-op pair: `chan0` is the leader (operators 0, 1), `chan1` the follower
/// (operators 2, 3). The combined algorithm is cached on `chan0.synth_mode` by [`Channel::write_c0`].
pub fn render_4op(chan0: &mut Channel, chan1: &mut Channel, samples: usize, lfo: &Lfo, output: &mut [i32]) {
    let mode = chan0.synth_mode;
    let silent = match mode {
        SynthMode::Sm3FmFm => chan1.operators[1].is_silent(),
        SynthMode::Sm3AmFm => chan0.operators[0].is_silent() && chan1.operators[1].is_silent(),
        SynthMode::Sm3FmAm => chan0.operators[1].is_silent() && chan1.operators[1].is_silent(),
        SynthMode::Sm3AmAm => {
            chan0.operators[0].is_silent() && chan1.operators[0].is_silent() && chan1.operators[1].is_silent()
        }
        _ => unreachable!("render_4op invoked with a non-4-op synth mode"),
    };
    if silent {
        chan0.old = [0, 0];
        return;
    }
    chan0.operators[0].prepare(lfo);
    chan0.operators[1].prepare(lfo);
    chan1.operators[0].prepare(lfo);
    chan1.operators[1].prepare(lfo);
    for i in 0..samples {
        let modulation = feedback_modulation(chan0);
        chan0.old[0] = chan0.old[1];
        chan0.old[1] = chan0.operators[0].get_sample(modulation);
        let out0 = chan0.old[0];
        let sample = match mode {
            SynthMode::Sm3FmFm => {
                let next = chan0.operators[1].get_sample(out0);
                let next = chan1.operators[0].get_sample(next);
                chan1.operators[1].get_sample(next)
            }
            SynthMode::Sm3AmFm => {
                let next = chan0.operators[1].get_sample(0);
                let next = chan1.operators[0].get_sample(next);
                out0 + chan1.operators[1].get_sample(next)
            }
            SynthMode::Sm3FmAm => {
                let carrier1 = chan0.operators[1].get_sample(out0);
                let next = chan1.operators[0].get_sample(0);
                carrier1 + chan1.operators[1].get_sample(next)
            }
            SynthMode::Sm3AmAm => {
                let next = chan0.operators[1].get_sample(0);
                let carrier2 = chan1.operators[0].get_sample(next);
                out0 + carrier2 + chan1.operators[1].get_sample(0)
            }
            _ => unreachable!(),
        };
        output[i * 2] += sample & chan0.mask_left;
        output[i * 2 + 1] += sample & chan0.mask_right;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn silent_channel_resets_feedback_history() {
        let mut chan = Channel::new();
        chan.old = [123, 456];
        let lfo = Lfo::new(1 << 20, 1 << 20);
        // Fresh operators are all OFF and max-attenuated, so both 2-op modes must report silent.
        render_2op(&mut chan, 4, &lfo, false, &mut [0; 4]);
        assert_eq!(chan.old, [0, 0]);
    }

    #[test_log::test]
    fn feedback_disabled_shifts_out_entirely() {
        let mut chan = Channel::new();
        chan.feedback = 31;
        chan.old = [2000, -2000];
        assert_eq!(feedback_modulation(&chan), 0);
    }
}
