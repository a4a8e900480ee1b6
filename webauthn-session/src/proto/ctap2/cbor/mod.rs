mod request;
mod response;
mod serde;

pub use request::CborRequest;
pub use response::CborResponse;
pub use serde::CborError;
pub(crate) use serde::{from_cursor, from_slice, to_vec, Value};
