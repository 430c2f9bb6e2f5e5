//! Process supervision: launching programs with precise stream wiring,
//! waiting on one or many of them, and tearing them down without leaking
//! a descriptor or an orphan.
//!
//! A [`Spawner`] configures and launches one process; the resulting
//! [`Handle`] owns the native reference, the retained pipe ends, and the
//! terminated/exit-status record. [`wait_all`] drives a set of handles to
//! completion at once. [`hooks::install`] lets an embedding scheduler
//! bracket every blocking wait or kill.

pub mod cmdline;
pub mod fdtab;
pub mod hooks;
pub mod pipe;

mod handle;
mod null;
mod options;
mod spawn;
mod stream;
mod wait;

pub use handle::Error as HandleError;
pub use handle::Handle;
pub use options::Stdio;
pub use spawn::Error as SpawnError;
pub use spawn::{Inspect, Spawner};
pub use stream::Direction;
pub use wait::wait_all;
