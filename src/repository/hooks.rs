use crate::context::Context;
use crate::core::Result;
use async_trait::async_trait;

/// Transformation applied to entities before they are validated and written.
///
/// Runs once per write call with the whole batch, inside whatever transaction
/// the caller's context is bound to. Returning an error aborts the write
/// before anything reaches the store.
#[async_trait]
pub trait PersistHook<T: Send + 'static>: Send + Sync {
    async fn before_persist(&self, _ctx: &Context, entities: Vec<T>) -> Result<Vec<T>> {
        Ok(entities)
    }
}

/// Hook that leaves entities unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl<T: Send + 'static> PersistHook<T> for NoopHook {}
