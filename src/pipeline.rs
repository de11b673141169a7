//! Middleware dispatch engine
//!
//! Composes the registered stage list into a single asynchronous run per
//! [`MessageContext`], with onion semantics: stage *i* runs, and control
//! reaches stage *i + 1* only when stage *i* awaits its [`Next`]
//! continuation. After the downstream chain settles, control returns to
//! stage *i* for its post-processing.
//!
//! - A stage that never calls `next` short-circuits the rest of the chain.
//! - A stage error rejects the whole run with that error, unchanged; it
//!   surfaces at every upstream await point so wrapping stages can clean up.
//! - The continuation carries a completion flag: a second invocation fails
//!   with [`Error::ContinuationReused`] instead of corrupting the cursor.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::message::MessageContext;

/// One unit in the ordered processing chain.
///
/// Stages are invoked strictly in registration order. A stage may inspect
/// and mutate the context, await `next` to yield to the rest of the chain,
/// skip `next` to short-circuit, or return an error to abort the run.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()>;
}

/// Explicit continuation handed to a stage.
///
/// Closes over the stage list snapshot and the single index it is allowed
/// to advance from; the engine records the invocation so the single-call
/// contract is enforced rather than assumed.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    /// Registration index of the stage that owns this continuation.
    owner: usize,
    invoked: bool,
}

impl Next<'_> {
    /// Yield to the remainder of the chain and await its completion.
    pub async fn run(&mut self, ctx: &mut MessageContext) -> Result<()> {
        if self.invoked {
            return Err(Error::ContinuationReused { stage: self.owner });
        }
        self.invoked = true;
        dispatch(self.stages, self.owner + 1, ctx).await
    }
}

/// Run the given stage list over one message context.
pub async fn run(stages: &[Arc<dyn Stage>], ctx: &mut MessageContext) -> Result<()> {
    dispatch(stages, 0, ctx).await
}

/// Resume the chain at `cursor`. Boxed because the recursion depth follows
/// the stage list.
fn dispatch<'a>(
    stages: &'a [Arc<dyn Stage>],
    cursor: usize,
    ctx: &'a mut MessageContext,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let Some(stage) = stages.get(cursor) else {
            // Chain exhausted: the run resolves.
            return Ok(());
        };
        let next = Next {
            stages,
            owner: cursor,
            invoked: false,
        };
        stage.handle(ctx, next).await
    })
}

/// Adapter turning a boxed-future function into a [`Stage`].
pub struct FnStage<F>(F);

/// Register a function as a stage without declaring a named type.
pub fn from_fn<F>(f: F) -> FnStage<F>
where
    F: for<'a> Fn(&'a mut MessageContext, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    FnStage(f)
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: for<'a> Fn(&'a mut MessageContext, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()> {
        (self.0)(ctx, next).await
    }
}
