//! Rhythm (percussion) mode: channels 6, 7 and 8 stop acting as independent 2-op voices and
//! instead feed a fixed five-drum-kit circuit (bass drum, hi-hat, snare, tom-tom, top cymbal)
//! driven by a shared noise source.
//!
//! Bass drum is a full 2-operator voice (feedback into op0, AM or FM combine with op1) using
//! channel 6's own `reg_c0` additive bit, since `Channel::write_c0` leaves `synth_mode` untouched
//! while rhythm mode owns the channel. Hi-hat, snare and top cymbal share one phase generator
//! between the hi-hat/snare channel and the tom-tom/cymbal channel: only hi-hat's and cymbal's
//! own phase accumulators advance each sample, and snare borrows hi-hat's phase byte instead of
//! advancing its own. Tom-tom is the only rhythm voice that runs as a plain, unmodulated operator.

use crate::channel::Channel;
use crate::lfo::Lfo;
use crate::tables::env_silent;

/// Renders `samples` samples of the bass/hi-hat/snare/tom/cymbal kit into `output`, advancing
/// the noise LFSR once per sample. `chan6`, `chan7` and `chan8` must be the chip's channels 6,
/// 7 and 8 in that order. Percussion always writes both stereo slots, ignoring each channel's
/// own pan mask, matching the reference chip's rhythm circuit being wired directly to both
/// output buses.
pub fn render_percussion(
    chan6: &mut Channel,
    chan7: &mut Channel,
    chan8: &mut Channel,
    lfo: &mut Lfo,
    stereo: bool,
    samples: usize,
    output: &mut [i32],
) {
    for i in 0..samples {
        let sum = (chan6.old[0] as u32).wrapping_add(chan6.old[1] as u32);
        let modulation = (sum >> chan6.feedback) as i32;
        chan6.old[0] = chan6.old[1];
        chan6.old[1] = chan6.operators[0].get_sample(modulation);
        let mut sample = if chan6.is_am_mode() {
            chan6.old[1] + chan6.operators[1].get_sample(0)
        } else {
            chan6.operators[1].get_sample(chan6.old[1])
        };

        let noise_bit = lfo.forward_noise() & 1;
        let hihat_phase = chan7.operators[0].forward_wave();
        let cymbal_phase = chan8.operators[1].forward_wave();
        let phase_bit = if (hihat_phase & 0x88) ^ ((hihat_phase << 5) & 0x80)
            | ((cymbal_phase ^ (cymbal_phase << 2)) & 0x20)
            != 0
        {
            0x02
        } else {
            0x00
        };

        let hh_vol = chan7.operators[0].forward_volume();
        if !env_silent(hh_vol) {
            let hh_index = (phase_bit << 8) | (0x34 << (phase_bit ^ (noise_bit << 1)));
            sample += chan7.operators[0].get_wave(hh_index, hh_vol);
        }

        let sd_vol = chan7.operators[1].forward_volume();
        if !env_silent(sd_vol) {
            let sd_index = (0x100 + (hihat_phase & 0x100)) ^ (noise_bit << 8);
            sample += chan7.operators[1].get_wave(sd_index, sd_vol);
        }

        sample += chan8.operators[0].get_sample(0);

        let cy_vol = chan8.operators[1].forward_volume();
        if !env_silent(cy_vol) {
            let cy_index = (1 + phase_bit) << 8;
            sample += chan8.operators[1].get_wave(cy_index, cy_vol);
        }

        sample <<= 1;
        if stereo {
            output[i * 2] += sample;
            output[i * 2 + 1] += sample;
        } else {
            output[i] += sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn silent_kit_advances_noise_without_panicking() {
        let mut chan6 = Channel::new();
        let mut chan7 = Channel::new();
        let mut chan8 = Channel::new();
        let mut lfo = Lfo::new(1 << 20, 1 << 20);
        let mut out = [0i32; 8];
        render_percussion(&mut chan6, &mut chan7, &mut chan8, &mut lfo, true, 4, &mut out);
        // Every operator is fresh (OFF, max-attenuated), so the kit must stay silent.
        assert_eq!(out, [0; 8]);
    }
}
