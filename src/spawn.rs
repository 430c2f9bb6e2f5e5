//! The process launcher.
//!
//! A [`Spawner`] is a consuming builder: configure the program, its
//! arguments and stream wiring, then call [`Spawner::spawn`] to launch.
//! The child is created suspended behind a close-on-exec gate pipe and
//! resumed only after the parent has finished wiring it, so a launch
//! failure never leaks a half-started process. Any error after resource
//! allocation unwinds every descriptor created so far.

use crate::{
    Handle, cmdline, hooks, null,
    options::Stdio,
    pipe::{self, Inherit},
    stream::Direction,
};
use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    fcntl::{FcntlArg, FdFlag, OFlag, fcntl},
    sys::wait::waitpid,
    unistd::{
        ForkResult, Pid, dup2_stderr, dup2_stdin, dup2_stdout, fork, pipe2, setpgid, setsid,
        tcsetpgrp,
    },
};
use std::{
    ffi::{CString, NulError},
    fs::File,
    io::{self, Read},
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    process::exit,
};
use thiserror::Error;

/// Errors constructing or launching a process.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested option combination is invalid.
    #[error("Invalid spawn options: {0}")]
    Options(&'static str),

    /// A program or argument contained an interior NUL.
    #[error("Invalid string in command line: {0}")]
    Null(#[from] NulError),

    /// The program could not be resolved to an executable.
    #[error("Failed to resolve executable: {0}")]
    Path(String),

    /// A stream pipe could not be set up.
    #[error("{0}")]
    Pipe(#[from] pipe::Error),

    /// The process could not be created.
    #[error("Failed to fork: {0}")]
    Fork(Errno),

    /// A system call during launch failed.
    #[error("Failed to {0}: {1}")]
    Sys(&'static str, Errno),

    /// Wiring a retained end into a stream failed.
    #[error("Stream error: {0}")]
    Stream(#[from] io::Error),
}

/// A last look at the launch before the child starts, handed to the
/// inspection callback with the wiring already decided.
pub struct Inspect<'a> {
    /// The descriptors about to become the child's standard streams, in
    /// stdin, stdout, stderr order; `None` means the parent's own stream
    /// is inherited unchanged.
    pub stdio: [Option<BorrowedFd<'a>>; 3],

    /// Additional descriptors to pass to the child beyond the standard
    /// three. The launcher marks them inheritable when the child starts.
    pub extra: Vec<OwnedFd>,

    /// Request inheritance of the extra descriptors. Adding any
    /// descriptor to `extra` sets this automatically; a callback may also
    /// set it by hand.
    pub ask_inherit: bool,

    /// Move the child into its own process group and hand it the
    /// controlling terminal's foreground. Failure to do either is
    /// non-fatal.
    pub foreground: bool,
}

/// How one wired stream of the child is realized.
enum Wired {
    /// Inherit the parent's stream.
    Keep,
    /// The null device, held open until the child has it.
    Null(OwnedFd),
    /// A pipe: the child's end and the end retained on the handle.
    Pipe { child: OwnedFd, parent: OwnedFd },
    /// A caller-provided descriptor.
    Given(OwnedFd),
}

impl Wired {
    /// The descriptor the child will receive, if any.
    fn child_end(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Self::Keep => None,
            Self::Null(fd) | Self::Given(fd) => Some(fd.as_fd()),
            Self::Pipe { child, .. } => Some(child.as_fd()),
        }
    }

    /// Transfer the retained parent end out, if this wiring has one.
    fn parent_end(self) -> Option<OwnedFd> {
        match self {
            Self::Pipe { parent, .. } => Some(parent),
            _ => None,
        }
    }
}

/// Builder for launching a single process.
///
/// ```no_run
/// use subproc::{Spawner, Stdio};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut handle = Spawner::new("tar")
///     .args(["-tzf", "archive.tar.gz"])
///     .stdout(Stdio::Piped)
///     .spawn()?;
/// let listing = handle.stdout_stream(false)?;
/// # Ok(())
/// # }
/// ```
pub struct Spawner {
    /// The program to run, resolved against PATH at spawn time.
    program: String,

    /// Its arguments, excluding the program name.
    args: Vec<String>,

    /// Wiring for the child's standard input.
    stdin: Stdio,

    /// Wiring for the child's standard output.
    stdout: Stdio,

    /// Wiring for the child's standard error.
    stderr: Stdio,

    /// Launch fully detached: no handle retains the process and its
    /// standard streams go to the null device.
    detached: bool,

    /// Retained pipe ends are put into non-blocking mode when wrapped.
    nonblock: bool,

    /// Give the child the terminal foreground.
    foreground: bool,

    /// One-shot inspection callback run just before the child starts.
    #[allow(clippy::type_complexity)]
    inspect: Option<Box<dyn FnOnce(&mut Inspect)>>,
}

impl Spawner {
    /// Start building a launch of `program`.
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: Stdio::Inherit,
            stdout: Stdio::Inherit,
            stderr: Stdio::Inherit,
            detached: false,
            nonblock: false,
            foreground: false,
            inspect: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Wire the child's standard input.
    #[must_use]
    pub fn stdin(mut self, wiring: Stdio) -> Self {
        self.stdin = wiring;
        self
    }

    /// Wire the child's standard output.
    #[must_use]
    pub fn stdout(mut self, wiring: Stdio) -> Self {
        self.stdout = wiring;
        self
    }

    /// Wire the child's standard error.
    #[must_use]
    pub fn stderr(mut self, wiring: Stdio) -> Self {
        self.stderr = wiring;
        self
    }

    /// Launch the process detached: it survives this program, no native
    /// reference is retained, and its standard streams are redirected to
    /// the null device. Incompatible with per-stream wiring.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Put retained pipe ends into non-blocking mode.
    #[must_use]
    pub fn nonblock(mut self) -> Self {
        self.nonblock = true;
        self
    }

    /// Hand the child the terminal foreground. Failure to do so at launch
    /// is logged, not fatal.
    #[must_use]
    pub fn foreground(mut self) -> Self {
        self.foreground = true;
        self
    }

    /// Register a callback that sees the finished wiring just before the
    /// child starts. It may attach extra descriptors and adjust the
    /// inheritance and foreground requests.
    #[must_use]
    pub fn inspect<F: FnOnce(&mut Inspect) + 'static>(mut self, f: F) -> Self {
        self.inspect = Some(Box::new(f));
        self
    }

    /// Launch the process and return its [`Handle`].
    pub fn spawn(self) -> Result<Handle, Error> {
        if self.detached {
            if self.stdin.is_explicit() || self.stdout.is_explicit() || self.stderr.is_explicit() {
                return Err(Error::Options(
                    "detached processes cannot take stream redirections",
                ));
            }
            return self.spawn_detached();
        }
        self.spawn_attached()
    }

    /// Launch, wait for termination, and release the handle, returning
    /// only the exit status.
    pub fn status(self) -> Result<i32, Error> {
        let mut handle = self.spawn()?;
        match handle.wait(true) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!("failed to wait for '{}': {e}", handle.name());
                Ok(-1)
            }
        }
    }

    /// Wire one standard stream according to its setting.
    fn wire(wiring: Stdio, dir: Direction) -> Result<Wired, Error> {
        Ok(match wiring {
            Stdio::Inherit => Wired::Keep,
            Stdio::Null => match null::open(dir) {
                Some(fd) => Wired::Null(fd),
                None => Wired::Keep,
            },
            Stdio::Piped => {
                let pipe = match dir {
                    Direction::Read => pipe::create(Inherit::Read)?,
                    Direction::Write => pipe::create(Inherit::Write)?,
                };
                match dir {
                    Direction::Read => Wired::Pipe {
                        child: pipe.read,
                        parent: pipe.write,
                    },
                    Direction::Write => Wired::Pipe {
                        child: pipe.write,
                        parent: pipe.read,
                    },
                }
            }
            Stdio::Fd(fd) => Wired::Given(fd),
        })
    }

    /// The attached launch protocol. All allocated descriptors live in
    /// owned wrappers, so an error at any step unwinds them on return.
    fn spawn_attached(self) -> Result<Handle, Error> {
        let stdin = Self::wire(self.stdin, Direction::Read)?;
        let stdout = Self::wire(self.stdout, Direction::Write)?;
        let stderr = Self::wire(self.stderr, Direction::Write)?;

        if self.nonblock {
            for wired in [&stdin, &stdout, &stderr] {
                if let Wired::Pipe { parent, .. } = wired {
                    let _ = fcntl(parent, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
                        .map_err(|e| Error::Sys("set non-blocking mode", e))?;
                }
            }
        }

        trace!("spawning: {}", cmdline::build(&self.program, &self.args));

        // Resolution must follow wiring.
        let path = which::which(&self.program)
            .map_err(|e| Error::Path(format!("{}: {e}", self.program)))?;

        let c_path = CString::new(path.as_os_str().as_encoded_bytes())?;
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(CString::new(self.program.as_str())?);
        for arg in &self.args {
            argv.push(CString::new(arg.as_str())?);
        }

        // The child starts suspended on this gate and resumes when the
        // parent closes the write end.
        let (gate_read, gate_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::Sys("create resume gate", e))?;

        let mut inspect = Inspect {
            stdio: [stdin.child_end(), stdout.child_end(), stderr.child_end()],
            extra: Vec::new(),
            ask_inherit: false,
            foreground: self.foreground,
        };
        if let Some(f) = self.inspect {
            f(&mut inspect);
        }
        if !inspect.extra.is_empty() {
            inspect.ask_inherit = true;
        }
        let Inspect {
            extra,
            ask_inherit,
            foreground,
            ..
        } = inspect;

        match unsafe { fork() }.map_err(Error::Fork)? {
            ForkResult::Child => {
                drop(gate_write);
                if let Err(e) = Self::child_setup(
                    &stdin, &stdout, &stderr, &extra, ask_inherit, foreground, gate_read,
                ) {
                    // No returning to the caller from here.
                    eprintln!("launch failed: {e}");
                    exit(127);
                }
                let _ = nix::unistd::execv(&c_path, &argv);
                eprintln!("failed to execute {}", self.program);
                exit(127);
            }
            ForkResult::Parent { child } => {
                drop(gate_read);
                drop(extra);

                if foreground {
                    // Both sides race to set the group; losing is fine.
                    let _ = setpgid(child, child);
                    if let Err(e) = tcsetpgrp(io::stdin().as_fd(), child) {
                        debug!("could not put '{}' in the foreground: {e}", self.program);
                    }
                }

                let handle = Handle::new(
                    self.program,
                    child,
                    stdin.parent_end(),
                    stdout.parent_end(),
                    stderr.parent_end(),
                );

                // Dropping the write end resumes the suspended child.
                drop(gate_write);
                Ok(handle)
            }
        }
    }

    /// Everything the child does between fork and exec. Runs in the
    /// forked child; only async-signal-safe operations belong here.
    fn child_setup(
        stdin: &Wired,
        stdout: &Wired,
        stderr: &Wired,
        extra: &[OwnedFd],
        ask_inherit: bool,
        foreground: bool,
        gate: OwnedFd,
    ) -> Result<(), Error> {
        if let Some(fd) = stdin.child_end() {
            dup2_stdin(fd).map_err(|e| Error::Sys("redirect stdin", e))?;
            Self::seal(fd, 0)?;
        }
        if let Some(fd) = stdout.child_end() {
            dup2_stdout(fd).map_err(|e| Error::Sys("redirect stdout", e))?;
            Self::seal(fd, 1)?;
        }
        if let Some(fd) = stderr.child_end() {
            dup2_stderr(fd).map_err(|e| Error::Sys("redirect stderr", e))?;
            Self::seal(fd, 2)?;
        }
        if ask_inherit {
            for fd in extra {
                let _ = fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))
                    .map_err(|e| Error::Sys("mark descriptor inheritable", e))?;
            }
        }
        if foreground {
            // The focus request is best-effort.
            if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
                debug!("could not create a process group: {e}");
            }
        }

        // Remain suspended until the parent closes its end of the gate.
        let mut buf = [0u8; 1];
        let _ = File::from(gate).read(&mut buf);
        Ok(())
    }

    /// Re-mark an original stream end close-on-exec once its copy sits at
    /// the standard descriptor, so only the standard bundle crosses exec.
    fn seal(fd: BorrowedFd<'_>, target: i32) -> Result<(), Error> {
        use std::os::fd::AsRawFd;
        if fd.as_raw_fd() != target {
            let _ = fcntl(&fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                .map_err(|e| Error::Sys("restore close-on-exec", e))?;
        }
        Ok(())
    }

    /// Fire-and-forget launch. The intermediate child breaks out into its
    /// own session, starts the target with its streams on the null
    /// device, and exits; the returned handle is already terminal and
    /// retains nothing.
    fn spawn_detached(self) -> Result<Handle, Error> {
        let path = which::which(&self.program)
            .map_err(|e| Error::Path(format!("{}: {e}", self.program)))?;

        trace!(
            "spawning detached: {}",
            cmdline::build(&self.program, &self.args)
        );

        let c_path = CString::new(path.as_os_str().as_encoded_bytes())?;
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(CString::new(self.program.as_str())?);
        for arg in &self.args {
            argv.push(CString::new(arg.as_str())?);
        }

        match unsafe { fork() }.map_err(Error::Fork)? {
            ForkResult::Child => {
                // Session breakout may be refused when we already lead
                // one; the launch proceeds regardless.
                if let Err(e) = setsid() {
                    debug!("could not create a new session: {e}");
                }
                Self::quiet_stdio();
                match unsafe { fork() } {
                    Ok(ForkResult::Child) => {
                        let _ = nix::unistd::execv(&c_path, &argv);
                        exit(127);
                    }
                    Ok(ForkResult::Parent { .. }) => exit(0),
                    Err(_) => exit(127),
                }
            }
            ForkResult::Parent { child } => {
                // Reap the intermediate immediately; the grandchild is
                // the init system's problem now.
                hooks::blocking(|| waitpid(child, None))
                    .map_err(|e| Error::Sys("reap intermediate child", e))?;
                Ok(Handle::detached(self.program))
            }
        }
    }

    /// Point all three standard streams at the null device, keeping the
    /// current streams when the device is unavailable.
    fn quiet_stdio() {
        if let Some(fd) = null::open(Direction::Read) {
            let _ = dup2_stdin(&fd);
        }
        if let Some(fd) = null::open(Direction::Write) {
            let _ = dup2_stdout(&fd);
            let _ = dup2_stderr(&fd);
        }
    }
}
