//! Error types surfaced at chip construction. Register writes and sample generation never fail.

/// The only way this crate's public API can fail: an unusable sample rate was requested at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OplError {
    #[error("sample rate must be positive and no higher than {max} Hz, got {actual}")]
    InvalidSampleRate { actual: u32, max: u32 },
}
