//! Owned subscription handles.

use std::fmt;

type Release = Box<dyn FnOnce() + Send>;

/// Handle to a live subscription.
///
/// Owning the handle keeps the subscription alive. The release closure runs
/// exactly once: on [`Subscription::unsubscribe`], or when the handle is
/// dropped while still held.
#[must_use = "dropping a Subscription releases it immediately"]
pub struct Subscription {
    label: &'static str,
    release: Option<Release>,
}

impl Subscription {
    /// Create a handle that runs `release` when the subscription ends.
    pub fn new<F>(label: &'static str, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            label,
            release: Some(Box::new(release)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Release the subscription now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::trace!(subscription = self.label, "Releasing subscription");
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("live", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting() -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_unsubscribe_releases_once() {
        let (count, sub) = counting();
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_once() {
        let (count, sub) = counting();
        let mut slot = Some(sub);
        slot.take();
        drop(slot);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
