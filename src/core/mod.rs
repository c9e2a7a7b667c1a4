pub mod error;
pub mod key;
pub mod payload;

pub use error::{
    Error, ErrorClass, FieldError, LoadError, Result, SaveError, StoreError, StoreResult,
};
pub use key::{Key, PathElement};
pub use payload::{Document, Entity, Payload};
