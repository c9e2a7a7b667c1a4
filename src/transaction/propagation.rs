use super::manager::execute;
use crate::context::Context;
use crate::core::{ErrorClass, StoreError};
use std::fmt::Display;
use std::future::Future;

/// Runs `op` inside a transaction.
///
/// When `ctx` is already transaction-bound, `op` receives the same context and
/// the enclosing call keeps sole responsibility for commit and rollback.
/// Otherwise a transaction is opened, `op` receives a context bound to it, and
/// the outcome of `op` decides between commit and rollback. On commit the
/// caller's cache is invalidated as a whole.
///
/// ```ignore
/// async fn transfer(ctx: &Context, from: &str, to: &str) -> Result<()> {
///     transactional(ctx, |tx| async move {
///         let mut a = accounts.get_required(&tx, from).await?;
///         let mut b = accounts.get_required(&tx, to).await?;
///         a.balance -= 10;
///         b.balance += 10;
///         accounts.update_many(&tx, vec![a, b]).await?;
///         Ok(())
///     })
///     .await
/// }
/// ```
pub async fn transactional<F, Fut, T, E>(ctx: &Context, op: F) -> Result<T, E>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError> + ErrorClass + Display,
{
    if ctx.is_transactional() {
        return op(ctx.clone()).await;
    }
    execute(ctx.loader(), |loader| op(ctx.with_loader(loader))).await
}
