//! The client<->gateway wire protocol: a fixed 28-byte big-endian header
//! followed by a payload, framed with a single magic/length/type/hint
//! header. The codec itself is range-agnostic over `msg_type` — it hands
//! back `{msg_type, payload}` and leaves payload decoding to the router.

pub mod codec;
pub mod frame;
pub mod msg_type;

pub use codec::FrameCodec;
pub use frame::{DecodeError, Frame};
pub use msg_type::MsgRange;
