//! Module-wide notification hooks invoked immediately before and after
//! every blocking wait or kill syscall. An embedding scheduler installs
//! them once at startup to coordinate blocking calls; they are read-only
//! thereafter.

use std::sync::OnceLock;

/// The installed pair.
struct Hooks {
    /// Runs just before a blocking syscall.
    pre: Box<dyn Fn() + Send + Sync>,
    /// Runs just after it returns.
    post: Box<dyn Fn() + Send + Sync>,
}

/// Install-once storage.
static HOOKS: OnceLock<Hooks> = OnceLock::new();

/// Install the pre/post hooks. Only the first installation takes effect;
/// returns false when a pair was already installed.
pub fn install<Pre, Post>(pre: Pre, post: Post) -> bool
where
    Pre: Fn() + Send + Sync + 'static,
    Post: Fn() + Send + Sync + 'static,
{
    HOOKS
        .set(Hooks {
            pre: Box::new(pre),
            post: Box::new(post),
        })
        .is_ok()
}

/// Run a blocking syscall between the installed hooks, if any.
pub(crate) fn blocking<T>(f: impl FnOnce() -> T) -> T {
    let hooks = HOOKS.get();
    if let Some(h) = hooks {
        (h.pre)();
    }
    let res = f();
    if let Some(h) = hooks {
        (h.post)();
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Spawner;
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static PRE: AtomicUsize = AtomicUsize::new(0);
    static POST: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn hooks_bracket_blocking_waits() -> Result<()> {
        let installed = install(
            || {
                let _ = PRE.fetch_add(1, Ordering::SeqCst);
            },
            || {
                let _ = POST.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut handle = Spawner::new("true").spawn()?;
        let _ = handle.wait(true)?;

        if installed {
            // Concurrent tests may be mid-call; our own completed wait
            // guarantees at least one full bracket.
            assert!(POST.load(Ordering::SeqCst) >= 1);
            assert!(PRE.load(Ordering::SeqCst) >= POST.load(Ordering::SeqCst));
            // Only the first installation takes effect.
            assert!(!install(|| (), || ()));
        }
        Ok(())
    }
}
