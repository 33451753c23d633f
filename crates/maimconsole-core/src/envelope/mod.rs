//! Message envelope exchanged with the MaimCore service.
//!
//! Converts console text into the `MessageBase` JSON frames MaimCore
//! understands and turns inbound frames back into printable text.

mod codec;
mod parser;
mod types;

pub use codec::{MESSAGE_ID_PREFIX, display_label, encode, render_for_display, to_wire};
pub use parser::{decode, decode_value};
pub use types::*;
