//! Dispatch-scoped tracing context
//!
//! The context id of the message currently being dispatched is held in a
//! task-local slot, entered for exactly the duration of one handler call.
//! Scoping the slot to the handler future means it is cleared no matter how
//! the handler exits, and nested scopes stack instead of colliding.

use std::future::Future;

tokio::task_local! {
    static CURRENT_CONTEXT: String;
}

/// Run `fut` with `context_id` visible through [`current_context`].
pub async fn with_context<F>(context_id: String, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_CONTEXT.scope(context_id, fut).await
}

/// Context id of the message currently being dispatched, if the caller is
/// running inside a handler invocation with context propagation enabled.
pub fn current_context() -> Option<String> {
    CURRENT_CONTEXT.try_with(|context| context.clone()).ok()
}
