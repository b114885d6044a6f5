//! Wire-level types shared by the gateway and the routing hub: the
//! fixed-layout DMRD packet codec, the repeater-configuration blob
//! codec, the Homebrew/MMDVM command grammar, and the error taxonomy
//! both sides drop packets into.

pub mod command;
pub mod config_blob;
pub mod error;
pub mod packet;

pub use command::Command;
pub use config_blob::RepeaterConfigBlob;
pub use error::HubError;
pub use packet::{DataType, FrameType, Packet};
