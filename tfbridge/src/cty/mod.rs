//! The structural value model: a closed set of typed value variants with
//! explicit null and unknown markers.

pub mod convert;
pub mod msgpack;
mod ty;
mod value;

pub use convert::convert;
pub use ty::Type;
pub use value::{Mark, Marks, Value};
