#![cfg_attr(not(feature = "std"), no_std)]

mod error;
mod lacrosse;
mod packet;
pub mod protocol;
mod shared;
mod table;

pub use error::ParseError;
pub use lacrosse::LaCrosse;
pub use packet::{DataPacket, PRINTABLE_TEMP_MAX};
pub use postcard;
pub use shared::{Shared, Stamped};
pub use table::NodeTable;
