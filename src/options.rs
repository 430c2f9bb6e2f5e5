//! Per-stream wiring configuration for the launcher. Each standard stream
//! of the child is wired independently; invalid combinations are rejected
//! at spawn time before any OS resource is allocated.

use std::os::fd::OwnedFd;

/// How one standard stream of the child is wired.
#[derive(Debug, Default)]
pub enum Stdio {
    /// Inherit the parent's own stream unchanged (the default).
    #[default]
    Inherit,

    /// Connect the stream to the null device. Should the device fail to
    /// open, the launcher falls back to [`Stdio::Inherit`].
    Null,

    /// Create a fresh pipe; the end opposite the child is retained on the
    /// returned handle for the caller.
    Piped,

    /// Hand an already-open descriptor to the child verbatim.
    Fd(OwnedFd),
}

impl Stdio {
    /// Whether this wiring is an explicit per-stream setting, which a
    /// detached launch does not permit.
    pub(crate) fn is_explicit(&self) -> bool {
        !matches!(self, Self::Inherit)
    }
}
