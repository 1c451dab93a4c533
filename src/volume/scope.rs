/*!
 * Scoped acquisition of an execution context
 */

use tracing::warn;

use crate::error::Result;

type Release<H> = Box<dyn FnOnce(&H) -> Result<()> + Send>;

/// A handle paired with the action that releases it.
///
/// The release runs exactly once: through [`Scoped::release`], or on drop if
/// it was never called. Failures on drop are logged and swallowed.
pub struct Scoped<H> {
    handle: H,
    release: Option<Release<H>>,
}

impl<H> Scoped<H> {
    /// Run `acquire` and attach `release` to the handle it produces
    pub fn acquire<A, F>(acquire: A, release: F) -> Result<Self>
    where
        A: FnOnce() -> Result<H>,
        F: FnOnce(&H) -> Result<()> + Send + 'static,
    {
        let handle = acquire()?;
        Ok(Self {
            handle,
            release: Some(Box::new(release)),
        })
    }

    /// A handle with nothing to release
    pub fn unmanaged(handle: H) -> Self {
        Self {
            handle,
            release: None,
        }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn release(mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release(&self.handle),
            None => Ok(()),
        }
    }
}

impl<H> Drop for Scoped<H> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Err(e) = release(&self.handle) {
                warn!("Failed to release scoped context: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(count: &Arc<AtomicUsize>) -> impl FnOnce(&String) -> Result<()> + Send + 'static {
        let count = Arc::clone(count);
        move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_explicit_release_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let scoped = Scoped::acquire(|| Ok("ctx".to_string()), counting(&count)).unwrap();
        assert_eq!(scoped.handle(), "ctx");
        scoped.release().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _scoped = Scoped::acquire(|| Ok("ctx".to_string()), counting(&count)).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_acquire_releases_nothing() {
        let count = Arc::new(AtomicUsize::new(0));
        let result = Scoped::acquire(
            || Err(BackupError::Config("no context".into())),
            counting(&count),
        );
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_error_is_returned_explicitly() {
        let scoped = Scoped::acquire(
            || Ok(7u32),
            |_| Err(BackupError::Cleanup("rm failed".into())),
        )
        .unwrap();
        assert!(matches!(scoped.release(), Err(BackupError::Cleanup(_))));
    }

    #[test]
    fn test_release_error_on_drop_is_swallowed() {
        let _scoped = Scoped::acquire(
            || Ok(7u32),
            |_| Err(BackupError::Cleanup("rm failed".into())),
        )
        .unwrap();
    }

    #[test]
    fn test_unmanaged_release_is_noop() {
        assert!(Scoped::unmanaged(1u8).release().is_ok());
    }
}
