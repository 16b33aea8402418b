//! Yamaha OPL2/OPL3 FM synthesis sound chips (YM3812 and YMF262).
//!
//! OPL2 voices are 2-operator: each of 9 channels combines two operators either in series
//! (frequency modulation, one carrier) or in parallel (two independent carriers summed). OPL3
//! doubles the channel count to 18, adds a stereo pan mask per channel, and lets adjacent
//! channel pairs merge into a single 4-operator voice with one of four operator topologies.
//! Both chips share a rhythm mode that repurposes channels 6-8 as a fixed five-piece drum kit.
//!
//! This implementation is derived from the reverse-engineered register-level behavior
//! documented by the DOSBox project's OPL emulator, translated into the integer-table
//! synthesis strategy it calls `WAVE_TABLEMUL`: a single interleaved sine/exponential waveform
//! table plus a logarithmic volume multiplier table, avoiding any floating-point math outside
//! of one-time table construction.

mod channel;
mod chip;
mod error;
mod lfo;
mod operator;
mod percussion;
mod rates;
mod tables;

pub use chip::Chip;
pub use error::OplError;

/// Creates a new chip instance clocked for the given host output sample rate. The chip starts
/// fully reset: every channel silent, rhythm mode disabled, OPL3 mode disabled.
pub fn create_chip(sample_rate_hz: u32) -> Result<Chip, OplError> {
    Chip::new(sample_rate_hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn create_chip_propagates_sample_rate_errors() {
        assert!(create_chip(0).is_err());
        assert!(create_chip(49_716).is_ok());
    }
}
