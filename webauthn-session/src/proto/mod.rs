mod error;

pub mod ctap2;

pub use error::CtapError;
