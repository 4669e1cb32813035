//! Interactive terminal (PTY) multiplexer for tidecode.
//!
//! A long-lived broker that owns spawned pseudo-terminal processes,
//! buffers their output with bounded memory, and fans each stream out to
//! any number of live subscribers with late-join replay:
//!
//! - output reaches every programmatic listener on every chunk;
//! - a chunk is buffered only when *no* subscriber received it, and the
//!   buffer is clamped to its trailing 2 MiB;
//! - a late joiner replays the backlog (in ≤ 64 KiB chunks) before any
//!   live data;
//! - the first connect may pin the session's working directory, writing
//!   a shell-appropriate `cd` into the child.
//!
//! ANSI interpretation is the subscriber's job; the multiplexer moves
//! bytes.

mod error;
mod multiplexer;
mod session;
mod shell;

pub use error::{PtyError, PtyResult};
pub use multiplexer::{ConnectOptions, CreateInput, PtyMultiplexer};
pub use session::{BUFFER_LIMIT, REPLAY_CHUNK};
pub use shell::{default_shell, ShellKind};
