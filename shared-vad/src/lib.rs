mod probability;
mod processor;

pub use probability::Vad;
pub use processor::{VadConfig, VadProcessor, VadResult, VadState};
