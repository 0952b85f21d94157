pub mod audio;
pub mod backend;
pub mod error;
pub mod hypothesis;
pub mod registry;
pub mod session;
pub mod strategy;
pub(crate) mod text;
pub mod wake_word;

pub use error::{BackendError, CodecError, RegistryError, SessionError};
pub use hypothesis::{HypothesisBuffer, TimestampedWord};
pub use registry::SessionRegistry;
pub use session::{Session, SessionState};
pub use strategy::{StabilizationConfig, StreamingResult, StreamingStrategy};
