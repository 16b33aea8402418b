//! The top-level chip: 18 channels, the shared LFO/noise source, global registers, and the
//! register address decode tables that route a register write to the right channel/operator.

use crate::channel::{render_2op, render_4op, Channel, FOUR_MASK_PERCUSSION, FOUR_MASK_SECOND_HALF};
use crate::error::OplError;
use crate::lfo::Lfo;
use crate::operator::KEY_PERCUSSION;
use crate::percussion::render_percussion;
use crate::rates::RateTables;
use jgenesis_common::num::GetBit;

/// The leader channel of each 4-op pair within a 9-channel bank. Register 0x104 dedicates one
/// bit to each of the 6 pairs across both banks: bits 0-2 for these three leaders in bank 0,
/// bits 3-5 for the same three leaders in bank 1.
const FOUR_OP_LEADERS_IN_BANK: [usize; 3] = [0, 2, 4];

const MAX_SAMPLE_RATE_HZ: u32 = 192_000;

/// An emulated OPL2/OPL3 FM synthesis chip: 18 channels (9 usable until OPL3 mode and the
/// upper register bank are switched on), driven entirely by register writes.
#[derive(Debug, Clone)]
pub struct Chip {
    channels: [Channel; 18],
    rates: RateTables,
    lfo: Lfo,

    reg08: u8,
    reg_bd: u8,
    reg104: u8,
    opl3_active: u8,
    waveform_select_enable: u8,

    /// Indexed by `bank * 32 + (register & 0x1f)` for the 0x20/0x40/0x60/0x80/0xE0 groups;
    /// gives the (channel, operator) pair that register addresses.
    op_map: [Option<(usize, usize)>; 64],
}

impl Chip {
    pub fn new(sample_rate_hz: u32) -> Result<Self, OplError> {
        if sample_rate_hz == 0 || sample_rate_hz > MAX_SAMPLE_RATE_HZ {
            return Err(OplError::InvalidSampleRate { actual: sample_rate_hz, max: MAX_SAMPLE_RATE_HZ });
        }

        let rates = RateTables::build(sample_rate_hz);
        let mut channels: [Channel; 18] = std::array::from_fn(|_| Channel::new());

        for bank in 0..2usize {
            for (pair_in_bank, leader) in FOUR_OP_LEADERS_IN_BANK.into_iter().enumerate() {
                let chan_idx = bank * 9 + leader;
                let bit = 1u8 << (bank * 3 + pair_in_bank);
                channels[chan_idx].four_mask = bit;
                channels[chan_idx + 1].four_mask = bit | FOUR_MASK_SECOND_HALF;
            }
        }
        // Rhythm mode exists only on the primary (OPL2-compatible) bank; the upper OPL3 bank
        // has no percussion channels, matching the reference chip's single shared rhythm unit.
        for percussion_chan in 6..=8usize {
            channels[percussion_chan].four_mask = FOUR_MASK_PERCUSSION;
        }

        let op_map = build_op_map();
        let lfo = Lfo::new(rates.lfo_add, rates.noise_add);

        log::trace!("creating OPL chip at {sample_rate_hz} Hz");

        Ok(Self {
            channels,
            rates,
            lfo,
            reg08: 0,
            reg_bd: 0,
            reg104: 0,
            opl3_active: 0,
            waveform_select_enable: 0,
            op_map,
        })
    }

    /// Mirrors the host bus convention used by DOS-era sound cards: writing a register number
    /// to the address port latches it, and the following data-port write lands on that
    /// register. Only ports 0 and 2 are real address ports (1 and 3 never latch anything); port
    /// 2 only reaches the secondary OPL3 bank once OPL3 mode is active, or for register 0x05
    /// itself, so that writing 0x05 to the secondary port is always how OPL3 detection works
    /// even before OPL3 mode is otherwise switched on. The return value is the full 9-bit
    /// register address to pass to [`Chip::write_register`].
    pub fn write_address(&self, port: u8, value: u8) -> u16 {
        match port & 3 {
            0 => u16::from(value),
            2 if self.opl3_active != 0 || value == 0x05 => 0x100 | u16::from(value),
            2 => u16::from(value),
            _ => 0,
        }
    }

    pub fn write_register(&mut self, address: u16, value: u8) {
        let bank = usize::from(address >= 0x100);
        let reg = (address & 0xff) as u8;
        log::trace!("register write: bank={bank} reg={reg:#04x} val={value:#04x}");

        match reg {
            0x01 if bank == 0 => self.waveform_select_enable = if value.bit(5) { 0x07 } else { 0x00 },
            0x04 if bank == 1 => self.write_reg104(value),
            0x05 if bank == 1 => self.write_reg105(value),
            0x08 if bank == 0 => self.reg08 = value,
            0xbd if bank == 0 => self.write_bd(value),
            0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xe0..=0xf5 => {
                self.write_operator_reg(bank, reg, value);
            }
            0xa0..=0xa8 => self.dispatch_write_a0(bank, usize::from(reg - 0xa0), value),
            0xb0..=0xb8 => self.dispatch_write_b0(bank, usize::from(reg - 0xb0), value),
            0xc0..=0xc8 => self.dispatch_write_c0(bank, usize::from(reg - 0xc0), value),
            _ => {}
        }
    }

    fn write_operator_reg(&mut self, bank: usize, reg: u8, value: u8) {
        let group = reg & 0xe0;
        let suboffset = usize::from(reg & 0x1f);
        let Some((chan_idx, op_idx)) = self.op_map[bank * 32 + suboffset] else { return };
        let op = &mut self.channels[chan_idx].operators[op_idx];
        match group {
            0x20 => op.write_reg20(&self.rates, value),
            0x40 => op.write_reg40(value),
            0x60 => op.write_reg60(&self.rates, value),
            0x80 => op.write_reg80(&self.rates, value),
            0xe0 => op.write_reg_e0(self.waveform_select_enable, self.opl3_active, value),
            _ => unreachable!("register group {group:#04x} is not an operator register"),
        }
    }

    fn write_reg104(&mut self, value: u8) {
        self.reg104 = value & 0x3f;
        for leader in FOUR_OP_LEADERS_IN_BANK {
            self.dispatch_reset_c0(leader);
            self.dispatch_reset_c0(leader + 1);
            self.dispatch_reset_c0(9 + leader);
            self.dispatch_reset_c0(9 + leader + 1);
        }
    }

    fn write_reg105(&mut self, value: u8) {
        self.opl3_active = if value.bit(0) { 0xff } else { 0x00 };
        for idx in 0..self.channels.len() {
            self.dispatch_reset_c0(idx);
        }
    }

    fn write_bd(&mut self, value: u8) {
        let change = self.reg_bd ^ value;
        self.reg_bd = value;

        self.lfo.set_depths(if value.bit(6) { 0 } else { 1 }, if value.bit(7) { 0 } else { 2 });

        if change.bit(5) {
            self.dispatch_reset_c0(6);
            self.dispatch_reset_c0(7);
            self.dispatch_reset_c0(8);
        }

        if value.bit(5) {
            key_percussion_op(&mut self.channels[6].operators[0], value.bit(4));
            key_percussion_op(&mut self.channels[6].operators[1], value.bit(4));
            key_percussion_op(&mut self.channels[7].operators[0], value.bit(0));
            key_percussion_op(&mut self.channels[7].operators[1], value.bit(3));
            key_percussion_op(&mut self.channels[8].operators[0], value.bit(2));
            key_percussion_op(&mut self.channels[8].operators[1], value.bit(1));
        } else if change.bit(5) {
            for idx in 6..=8 {
                self.channels[idx].operators[0].key_off(KEY_PERCUSSION);
                self.channels[idx].operators[1].key_off(KEY_PERCUSSION);
            }
        }
    }

    fn dispatch_write_a0(&mut self, bank: usize, slot: usize, value: u8) {
        let chan_idx = bank * 9 + slot;
        let four_op_mask_active = self.reg104 & self.opl3_active;
        let note_select = self.reg08.bit(6);
        let four_mask = self.channels[chan_idx].four_mask;
        if four_mask & FOUR_MASK_SECOND_HALF == 0 && chan_idx + 1 < self.channels.len() {
            let (front, back) = self.channels.split_at_mut(chan_idx + 1);
            front[chan_idx].write_a0(Some(&mut back[0]), &self.rates, four_op_mask_active, note_select, value);
        } else {
            self.channels[chan_idx].write_a0(None, &self.rates, four_op_mask_active, note_select, value);
        }
    }

    fn dispatch_write_b0(&mut self, bank: usize, slot: usize, value: u8) {
        let chan_idx = bank * 9 + slot;
        let four_op_mask_active = self.reg104 & self.opl3_active;
        let note_select = self.reg08.bit(6);
        let four_mask = self.channels[chan_idx].four_mask;
        if four_mask & FOUR_MASK_SECOND_HALF == 0 && chan_idx + 1 < self.channels.len() {
            let (front, back) = self.channels.split_at_mut(chan_idx + 1);
            front[chan_idx].write_b0(Some(&mut back[0]), &self.rates, four_op_mask_active, note_select, value);
        } else {
            self.channels[chan_idx].write_b0(None, &self.rates, four_op_mask_active, note_select, value);
        }
    }

    fn dispatch_write_c0(&mut self, bank: usize, slot: usize, value: u8) {
        let chan_idx = bank * 9 + slot;
        let opl3_active = self.opl3_active != 0;
        let reg104 = self.reg104;
        let rhythm_enabled = self.reg_bd.bit(5);
        let four_mask = self.channels[chan_idx].four_mask;
        if four_mask & FOUR_MASK_SECOND_HALF != 0 && chan_idx > 0 {
            let (front, back) = self.channels.split_at_mut(chan_idx);
            back[0].write_c0(front.last_mut(), opl3_active, reg104, rhythm_enabled, value);
        } else if chan_idx + 1 < self.channels.len() {
            let (front, back) = self.channels.split_at_mut(chan_idx + 1);
            front[chan_idx].write_c0(Some(&mut back[0]), opl3_active, reg104, rhythm_enabled, value);
        } else {
            self.channels[chan_idx].write_c0(None, opl3_active, reg104, rhythm_enabled, value);
        }
    }

    fn dispatch_reset_c0(&mut self, chan_idx: usize) {
        let opl3_active = self.opl3_active != 0;
        let reg104 = self.reg104;
        let rhythm_enabled = self.reg_bd.bit(5);
        let four_mask = self.channels[chan_idx].four_mask;
        if four_mask & FOUR_MASK_SECOND_HALF != 0 && chan_idx > 0 {
            let (front, back) = self.channels.split_at_mut(chan_idx);
            back[0].reset_c0(front.last_mut(), opl3_active, reg104, rhythm_enabled);
        } else if chan_idx + 1 < self.channels.len() {
            let (front, back) = self.channels.split_at_mut(chan_idx + 1);
            front[chan_idx].reset_c0(Some(&mut back[0]), opl3_active, reg104, rhythm_enabled);
        } else {
            self.channels[chan_idx].reset_c0(None, opl3_active, reg104, rhythm_enabled);
        }
    }

    pub fn generate_block_mono(&mut self, n_samples: usize, out: &mut [i32]) {
        let mut offset = 0;
        let mut remaining = n_samples;
        while remaining > 0 {
            let span = self.lfo.forward(remaining as u32) as usize;
            self.render_span(span, false, &mut out[offset..offset + span]);
            offset += span;
            remaining -= span;
        }
    }

    pub fn generate_block_stereo(&mut self, n_samples: usize, out: &mut [i32]) {
        let mut offset = 0;
        let mut remaining = n_samples;
        while remaining > 0 {
            let span = self.lfo.forward(remaining as u32) as usize;
            self.render_span(span, true, &mut out[offset * 2..(offset + span) * 2]);
            offset += span;
            remaining -= span;
        }
    }

    fn render_span(&mut self, samples: usize, stereo: bool, output: &mut [i32]) {
        // Mono output is always the primary OPL2-compatible bank: 9 channels, no 4-op pairing
        // (4-op voices only exist once OPL3 mode and its stereo pan masks are in play). Stereo
        // output additionally covers the secondary bank and 4-op pairs once OPL3 mode is active.
        let opl3 = stereo && self.opl3_active != 0;
        let rhythm = self.reg_bd.bit(5);
        let chan_count = if opl3 { 18 } else { 9 };

        let mut idx = 0;
        while idx < chan_count {
            if rhythm && idx == 6 {
                let (front, rest) = self.channels.split_at_mut(idx + 1);
                let chan6 = &mut front[idx];
                let (chan7, chan8) = rest.split_at_mut(1);
                render_percussion(chan6, &mut chan7[0], &mut chan8[0], &mut self.lfo, stereo, samples, output);
                idx += 3;
                continue;
            }

            let four_mask = self.channels[idx].four_mask;
            let four_op_active = opl3 && (self.reg104 & self.opl3_active & four_mask) & 0x3f != 0;
            if four_op_active && four_mask & FOUR_MASK_SECOND_HALF == 0 {
                let (front, back) = self.channels.split_at_mut(idx + 1);
                render_4op(&mut front[idx], &mut back[0], samples, &self.lfo, output);
                idx += 2;
                continue;
            }

            render_2op(&mut self.channels[idx], samples, &self.lfo, stereo, output);
            idx += 1;
        }
    }
}

fn key_percussion_op(op: &mut crate::operator::Operator, on: bool) {
    if on {
        op.key_on(KEY_PERCUSSION);
    } else {
        op.key_off(KEY_PERCUSSION);
    }
}

/// Builds the register-suboffset to (channel, operator) lookup. Each operator-register group
/// (0x20, 0x40, 0x60, 0x80, 0xE0) is laid out as three rows of six cells: the first three cells
/// of a row are operator 0 of three consecutive channels, the next three are operator 1 of the
/// same three channels, and each row covers the next three channels up (0-2, 3-5, 6-8).
fn build_op_map() -> [Option<(usize, usize)>; 64] {
    let mut map = [None; 64];
    for bank in 0..2usize {
        for row in 0..3usize {
            for cell in 0..6usize {
                let suboffset = row * 8 + cell;
                let chan_in_bank = row * 3 + (cell % 3);
                let op_idx = cell / 3;
                let chan_idx = bank * 9 + chan_in_bank;
                map[bank * 32 + suboffset] = Some((chan_idx, op_idx));
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_channel0_sine(chip: &mut Chip) {
        chip.write_register(0x20, 0x01);
        chip.write_register(0x40, 0x00);
        chip.write_register(0x60, 0xf0);
        chip.write_register(0x80, 0x0f);
        chip.write_register(0xe0, 0x00);
        chip.write_register(0x23, 0x01);
        chip.write_register(0x43, 0x00);
        chip.write_register(0x63, 0xf0);
        chip.write_register(0x83, 0x0f);
        chip.write_register(0xe3, 0x00);
        chip.write_register(0xc0, 0x01);
        chip.write_register(0xa0, 0x44);
        chip.write_register(0xb0, 0x20 | 0x02);
    }

    #[test_log::test]
    fn construction_rejects_absurd_sample_rates() {
        assert!(Chip::new(0).is_err());
        assert!(Chip::new(1_000_000).is_err());
        assert!(Chip::new(49_716).is_ok());
    }

    #[test_log::test]
    fn write_address_decodes_ports_and_gates_the_secondary_bank() {
        let chip = Chip::new(49_716).unwrap();
        assert_eq!(chip.write_address(0, 0x20), 0x020, "port 0 always lands on the primary bank");
        assert_eq!(chip.write_address(1, 0x20), 0, "port 1 never latches an address");
        assert_eq!(chip.write_address(3, 0x20), 0, "port 3 never latches an address");
        // Before OPL3 mode is on, port 2 only reaches the secondary bank for register 0x05
        // (OPL3 detection); any other register stays on the primary bank.
        assert_eq!(chip.write_address(2, 0x05), 0x105, "register 0x05 always detects OPL3 on port 2");
        assert_eq!(chip.write_address(2, 0x20), 0x020, "non-0x05 registers stay on the primary bank pre-OPL3");
    }

    #[test_log::test]
    fn write_address_reaches_secondary_bank_once_opl3_is_active() {
        let mut chip = Chip::new(49_716).unwrap();
        chip.write_register(0x105, 0x01);
        assert_eq!(chip.write_address(2, 0x20), 0x120, "port 2 reaches the secondary bank once OPL3 is active");
    }

    #[test_log::test]
    fn fresh_chip_is_silent() {
        let mut chip = Chip::new(49_716).unwrap();
        let mut out = vec![0i32; 64];
        chip.generate_block_mono(64, &mut out);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test_log::test]
    fn key_on_produces_nonzero_output_on_a_plain_2op_channel() {
        let mut chip = Chip::new(49_716).unwrap();
        program_channel0_sine(&mut chip);
        let mut out = vec![0i32; 256];
        chip.generate_block_mono(256, &mut out);
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test_log::test]
    fn register_address_decoding_reaches_channel_zero_operator_zero() {
        let map = build_op_map();
        assert_eq!(map[0], Some((0, 0)));
        assert_eq!(map[1], Some((1, 0)));
        assert_eq!(map[3], Some((0, 1)));
        assert_eq!(map[32], Some((9, 0)));
    }

    #[test_log::test]
    fn opl3_enable_unlocks_the_upper_bank_of_channels() {
        let mut chip = Chip::new(49_716).unwrap();
        chip.write_register(0x105, 0x01);
        chip.write_register(0x120, 0x01);
        chip.write_register(0x140, 0x00);
        chip.write_register(0x160, 0xf0);
        chip.write_register(0x180, 0x0f);
        chip.write_register(0x1e0, 0x00);
        chip.write_register(0x123, 0x01);
        chip.write_register(0x143, 0x00);
        chip.write_register(0x163, 0xf0);
        chip.write_register(0x183, 0x0f);
        chip.write_register(0x1e3, 0x00);
        chip.write_register(0x1c0, 0x01);
        chip.write_register(0x1a0, 0x44);
        chip.write_register(0x1b0, 0x20 | 0x02);
        let mut out = vec![0i32; 512];
        chip.generate_block_stereo(256, &mut out);
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test_log::test]
    fn mono_rendering_ignores_opl3_mode_and_four_op_pairing() {
        // Regression test: enabling OPL3 mode and a 4-op pair must not make generate_block_mono
        // take the (stereo-only) 4-op render path, which writes two interleaved output slots per
        // sample and would run past the end of a mono-sized buffer.
        let mut chip = Chip::new(49_716).unwrap();
        chip.write_register(0x105, 0x01);
        chip.write_register(0x104, 0x01);
        program_channel0_sine(&mut chip);
        let mut out = vec![0i32; 256];
        chip.generate_block_mono(256, &mut out);
    }
}
