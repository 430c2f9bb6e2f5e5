//! The discard device, used to silently absorb or starve a standard
//! stream when no pipe was requested.

use crate::stream::Direction;
use log::debug;
use std::{fs::File, os::fd::OwnedFd};

/// Open `/dev/null` for the given direction. Failure is non-fatal: the
/// launcher falls back to inheriting the parent's own stream.
pub fn open(dir: Direction) -> Option<OwnedFd> {
    let file = match dir {
        Direction::Read => File::options().read(true).open("/dev/null"),
        Direction::Write => File::options().write(true).open("/dev/null"),
    };
    match file {
        Ok(file) => Some(OwnedFd::from(file)),
        Err(e) => {
            debug!("can't open /dev/null: {e}");
            None
        }
    }
}
