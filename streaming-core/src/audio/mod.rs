pub mod buffer;
pub mod codec;

pub use buffer::AudioBuffer;
pub use codec::{normalize_pcm, validate_sample_rate, OpusSessionDecoder};
