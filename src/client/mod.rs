//! Consumer side of the chat stream: frame decoding, the state machine the
//! frames are folded into, and the session that owns the connection.

pub mod error;
pub mod parser;
pub mod session;
pub mod state;

pub use error::ChatError;
pub use session::{ChatSession, ClientConfig};
pub use state::{reduce, ChatState, ConnectionState, SessionInput};
