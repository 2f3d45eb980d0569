//! Gearman wire protocol: the command registry and the frame codec.
//!
//! Both are pure; nothing in here touches a socket.

pub mod codec;
pub mod command;

pub use codec::{decode, encode, encode_command, Command, HEADER_LEN, MAGIC_REQ, MAGIC_RES};
pub use command::CommandType;
