//! Narrow boundary to the buffered-I/O layer: a raw pipe end becomes a
//! `File` with a declared direction and optional non-blocking mode.
//! Callers layer `BufReader`/`BufWriter` on top as they see fit.

use log::trace;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use std::{fs::File, io, os::fd::OwnedFd};

/// Transfer direction of a wrapped end. A pipe end is unidirectional
/// already; the direction states which side of the contract the caller
/// holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The caller drains the child's output from this end.
    Read,
    /// The caller feeds the child's input through this end.
    Write,
}

/// Wrap a raw end into a stream, applying `O_NONBLOCK` when requested.
/// On failure the descriptor is closed before the error returns.
pub fn wrap(fd: OwnedFd, dir: Direction, nonblock: bool) -> io::Result<File> {
    trace!("wrapping fd as a {dir:?} stream (nonblock: {nonblock})");
    if nonblock {
        let _ = fcntl(&fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(io::Error::from)?;
    }
    Ok(File::from(fd))
}
