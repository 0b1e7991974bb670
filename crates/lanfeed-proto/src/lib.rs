pub mod codec;
pub mod message;
pub mod peer;

pub use codec::Fields;
pub use message::{DecodeError, GameOutcome, LikeAction, Message, Symbol};
pub use peer::PeerId;
