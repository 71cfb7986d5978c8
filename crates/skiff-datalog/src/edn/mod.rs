//! EDN, the query service's wire format.
//!
//! [`Value`] is the explicit value model; [`encode`] writes it and [`parse`]
//! reads service responses back into it.

mod read;
mod value;
mod write;

pub use read::parse;
pub use value::{Keyword, Record, Value};
pub use write::{encode, quote, write_value};
