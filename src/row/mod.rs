//! Row data model
//!
//! Rows are addressed by `(table, primary key)` and carry a column mapping.
//! Both the primary key and the columns are `ColumnMap`s of tagged scalar
//! values. The canonical encoding in [`codec`] is the single serialization
//! used for log payloads and for in-memory key identity.

pub mod codec;
mod value;

pub use codec::{decode_key, decode_map, encode_key, encode_map, CodecError, KEY_SEPARATOR};
pub use value::{columns, display_map, ColumnMap, Value};
