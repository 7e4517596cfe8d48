pub mod framing;
pub mod irc;
pub mod outbound;
pub mod traits;

pub use framing::{FramingError, LineFramer};
pub use irc::{
    ChatMessage, InboundEvent, IrcSession, ProtocolError, SessionError, SessionOptions,
    SessionState,
};
pub use outbound::{ChunkKind, FormatMode, OutboundChunk, OutboundFormatter};
pub use traits::{Channel, SendMessage};
