use std::sync::Arc;

use skelmap_core::MapperResult;

use crate::event::EventArgs;

/// Handles lifecycle events dispatched through an [`EventManager`](crate::EventManager).
///
/// Listeners run synchronously inside the unit of work's call. Returning an
/// error aborts the operation that dispatched the event; the error reaches the
/// caller unchanged.
pub trait EventListener: Send + Sync {
    fn on_event(&self, args: &mut EventArgs<'_>) -> MapperResult<()>;
}

impl<F> EventListener for F
where
    F: Fn(&mut EventArgs<'_>) -> MapperResult<()> + Send + Sync,
{
    fn on_event(&self, args: &mut EventArgs<'_>) -> MapperResult<()> {
        self(args)
    }
}

/// Wrap a closure as a shareable listener.
pub fn from_fn<F>(f: F) -> Arc<dyn EventListener>
where
    F: Fn(&mut EventArgs<'_>) -> MapperResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}
