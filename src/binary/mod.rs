pub mod attrs;
mod decoder;
mod encoder;
pub mod error;
pub mod jid;
pub mod marshal;
pub mod node;
pub mod token;

pub use attrs::AttrParser;
pub use error::{BinaryError, Result};
pub use marshal::{marshal, unmarshal, unpack};
pub use node::{Node, NodeContent};
