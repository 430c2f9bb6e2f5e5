//! Descriptor-table helpers, mainly for test harnesses observing that no
//! descriptor outlives a failed launch.

use nix::{
    fcntl::{FcntlArg, fcntl},
    unistd::{SysconfVar, sysconf},
};
use std::os::fd::{BorrowedFd, RawFd};

/// The maximum number of currently allowed open descriptors, with an
/// arbitrary fallback when the limit cannot be determined.
pub fn max_fds() -> usize {
    match sysconf(SysconfVar::OPEN_MAX) {
        Ok(Some(n)) if n > 0 => n as usize,
        _ => 256,
    }
}

/// All currently open descriptors, in ascending order. The descriptor
/// used to read the table itself may appear in the listing; two snapshots
/// taken the same way see the same artifact.
pub fn open_fds() -> Vec<RawFd> {
    if let Ok(dir) = std::fs::read_dir("/proc/self/fd") {
        let mut fds: Vec<RawFd> = dir
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        fds.sort_unstable();
        return fds;
    }

    // No /proc: probe the whole table instead.
    (0..max_fds() as RawFd)
        .filter(|fd| {
            let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
            fcntl(borrowed, FcntlArg::F_GETFD).is_ok()
        })
        .collect()
}
