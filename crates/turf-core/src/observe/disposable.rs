//! Subscription handles.

use parking_lot::Mutex;

/// Detaches a subscription when disposed.
///
/// Disposal is idempotent: the second and later calls are no-ops. Disposing
/// prevents future callbacks; a callback already in progress completes.
/// Dropping a `Disposable` without calling [`Disposable::dispose`] leaves
/// the subscription attached.
pub struct Disposable {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposable {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Detach the subscription. Safe to call any number of times.
    pub fn dispose(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispose_runs_action_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let disposable = Disposable::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!disposable.is_disposed());
        disposable.dispose();
        disposable.dispose();
        assert!(disposable.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
