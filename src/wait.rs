//! The multi-process wait engine.
//!
//! [`wait_all`] drives a whole set of handles to termination (or polls
//! them once) and reports either every individual exit status or a
//! single diagnostic naming the first failing program.

use crate::handle::{Error, Handle};
use log::error;

/// Wait until every process in `handles` has terminated, or with `hang`
/// false poll each once and report [`Error::StillRunning`] as soon as one
/// has not finished.
///
/// With `statuses` supplied, the vector is resized to match `handles` and
/// filled with per-process exit statuses; entries not yet observed when
/// an error cuts the pass short hold -1. A non-zero status makes the
/// aggregate result [`Error::Failed`] naming the first failing program,
/// whether or not the vector was supplied; without it the same
/// diagnostic is also logged.
///
/// Any handle whose native reference was already transferred or released
/// while unterminated invalidates the whole call before anything is
/// waited on.
pub fn wait_all(
    handles: &mut [&mut Handle],
    hang: bool,
    mut statuses: Option<&mut Vec<i32>>,
) -> Result<(), Error> {
    for handle in handles.iter() {
        if !handle.is_terminated() && handle.pid().is_none() {
            return Err(Error::Invalid);
        }
    }

    if let Some(out) = statuses.as_deref_mut() {
        out.clear();
        out.resize(handles.len(), -1);
    }

    let mut failure: Option<Error> = None;
    for (i, handle) in handles.iter_mut().enumerate() {
        let code = if handle.is_terminated() {
            handle.exit_code()?
        } else {
            handle.wait(hang)?
        };
        if let Some(out) = statuses.as_deref_mut() {
            out[i] = code;
        }
        if code != 0 && failure.is_none() {
            failure = Some(Error::Failed {
                program: handle.name().into(),
                status: code,
            });
        }
    }

    match failure {
        Some(e) => {
            if statuses.is_none() {
                error!("{e}");
            }
            Err(e)
        }
        None => Ok(()),
    }
}
