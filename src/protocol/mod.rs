//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Message Format (OP_MSG)
//!
//! ```text
//! ┌────────────┬────────────┬────────────┬────────────┬───────────┬──────────────┐
//! │ Length (4) │ ReqID (4)  │ RespTo (4) │ OpCode (4) │ Flags (4) │  Sections... │
//! └────────────┴────────────┴────────────┴────────────┴───────────┴──────────────┘
//! ```
//!
//! All integers are little-endian. `OpCode` is always 2013.
//!
//! ### Sections
//! - kind 0: a single BSON body document (the command or the reply)
//! - kind 1: `size (4) + identifier (cstring) + BSON documents...`
//!
//! ### Commands
//! Commands are BSON documents whose first key names the command
//! (`find`, `getMore`, `aggregate`, `insert`, ...) and which carry the
//! target database in `$db`. Replies carry `ok: 1` on success or
//! `ok: 0` with `code`/`errmsg` on failure.

mod codec;
mod command;
mod reply;
mod size;

pub use codec::{
    decode_message, encode_message, read_message, write_message, Message, HEADER_SIZE,
    MAX_MESSAGE_SIZE, OP_MSG,
};
pub use command::{Command, WriteKind};
pub use reply::{
    bson_as_f64, bson_as_i64, check_reply, saturating_i64, CursorReply, UpsertedId, WriteErrorDetail,
    WriteReply,
};
pub use size::size_of;
