//! Everything application code usually needs, in one import.
//!
//! ```
//! use docloader::prelude::*;
//! ```

pub use crate::context::{Context, Principal};
pub use crate::core::{Document, Error, ErrorClass, Key, LoadError, Result, SaveError, StoreError};
pub use crate::index::IndexSpec;
pub use crate::loader::LoaderConfig;
pub use crate::repository::{
    DocumentSchema, FieldType, Model, PersistHook, Repository, RepositoryOptions,
};
pub use crate::store::{Datastore, FilterOp, Query, QueryMeta};
pub use crate::transaction::transactional;
pub use crate::Client;
