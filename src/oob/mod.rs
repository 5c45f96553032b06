pub mod backend;
pub mod correlator;
#[cfg(feature = "listener")]
pub mod listener;
pub mod token;

pub use backend::{spawn_poller, start_backend, HttpPollBackend, OobBackend};
pub use correlator::{OobCorrelator, OobInteraction};
pub use token::OobToken;
