pub mod ccb;
pub mod config;
pub mod entity;
pub mod error;
pub mod pdu;
pub mod socket;
pub mod state;

pub use config::Config;
pub use entity::{Descriptor, SimpTcp};
pub use error::{PduError, SimpTcpError};
