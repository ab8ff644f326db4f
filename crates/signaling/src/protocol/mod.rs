//! Signaling wire protocol
//!
//! - [`types`]: data model shared by requests and responses
//! - [`message`]: the closed request/response variant sets
//! - [`codec`]: mapping between wire bytes and messages

pub mod codec;
pub mod message;
pub mod types;

pub use codec::{decode_request, decode_response, encode_request, encode_response};
pub use message::*;
pub use types::*;
