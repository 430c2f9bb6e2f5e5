//! The inheritable-pipe factory.
//!
//! Both ends of a new pipe start close-on-exec; the inheritance mask
//! clears the flag on the ends a child is meant to receive. Explicit
//! non-inheritance on the unused end is mandatory, not optional: no end
//! ever crosses an exec without being named in the mask.

use crate::stream::{self, Direction};
use log::error;
use nix::{
    errno::Errno,
    fcntl::{FcntlArg, FdFlag, OFlag, fcntl},
    unistd::pipe2,
};
use std::{fs::File, os::fd::OwnedFd};
use thiserror::Error;

/// Which ends of a new pipe a child may inherit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inherit {
    /// Neither end survives an exec.
    Neither,
    /// The read end is inheritable.
    Read,
    /// The write end is inheritable.
    Write,
    /// Both ends are inheritable.
    Both,
}

impl Inherit {
    /// Whether the mask covers the read end.
    fn read(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    /// Whether the mask covers the write end.
    fn write(self) -> bool {
        matches!(self, Self::Write | Self::Both)
    }
}

/// Errors creating a pipe or wrapping one of its ends.
#[derive(Debug, Error)]
pub enum Error {
    /// The pipe itself could not be created.
    #[error("Failed to create pipe: {0}")]
    Create(Errno),

    /// The inheritance flag of one end could not be adjusted.
    #[error("Failed to adjust pipe inheritance: {0}")]
    Flags(Errno),

    /// The kept end could not be wrapped into a stream.
    #[error("Error creating a stream for a pipe: {0}")]
    Stream(std::io::Error),
}

/// A connected unidirectional pipe. Ownership of each end transfers
/// exactly once: to a child via inheritance, to the caller via a wrapped
/// stream, or back to the kernel when the unused end drops.
#[derive(Debug)]
pub struct Pipe {
    /// The reading end.
    pub read: OwnedFd,
    /// The writing end.
    pub write: OwnedFd,
}

/// Create a pipe with the requested ends marked inheritable. A failure
/// adjusting flags closes both freshly created ends before returning.
pub fn create(inherit: Inherit) -> Result<Pipe, Error> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(Error::Create)?;
    if inherit.read() {
        let _ = fcntl(&read, FcntlArg::F_SETFD(FdFlag::empty())).map_err(Error::Flags)?;
    }
    if inherit.write() {
        let _ = fcntl(&write, FcntlArg::F_SETFD(FdFlag::empty())).map_err(Error::Flags)?;
    }
    Ok(Pipe { read, write })
}

/// A pipe whose write end a child inherits; the read end is wrapped into
/// a stream the caller drains. Stream-wrapping failure closes both raw
/// ends before the error returns.
pub fn inbound(nonblock: bool) -> Result<(OwnedFd, File), Error> {
    let pipe = create(Inherit::Write)?;
    let fp = stream::wrap(pipe.read, Direction::Read, nonblock).map_err(|e| {
        error!("error creating a stream for a pipe: {e}");
        Error::Stream(e)
    })?;
    Ok((pipe.write, fp))
}

/// Mirror of [`inbound`]: the read end is inheritable and the caller
/// keeps a writable stream feeding the child's input.
pub fn outbound(nonblock: bool) -> Result<(OwnedFd, File), Error> {
    let pipe = create(Inherit::Read)?;
    let fp = stream::wrap(pipe.write, Direction::Write, nonblock).map_err(|e| {
        error!("error creating a stream for a pipe: {e}");
        Error::Stream(e)
    })?;
    Ok((pipe.read, fp))
}
