pub mod events;

pub mod jid {
    pub use crate::binary::jid::*;
}
