pub mod command;
pub mod constants;
pub mod device;
pub mod entities;
pub mod error;
pub mod frame;
pub mod fs;
pub mod message;
pub mod reassembly;
pub mod records;
pub mod session;
pub mod sim;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export the device handle for easy access
pub use device::Horizon;
pub use error::{FrameError, LinkError};
pub use session::{Session, SessionConfig, SessionState};
pub use transport::{LinkEvent, Transport};
