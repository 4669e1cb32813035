//! The PTY multiplexer: spawn, route, resize, reap.

use crate::error::{PtyError, PtyResult};
use crate::session::{Listener, SessionState};
use crate::shell::{default_shell, ShellKind};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tidecode_core::bus::{
    Bus, PtyCreated, PtyDeleted, PtyExited, PtySessionInfo, PtyStatus, PtyUpdated,
};
use tidecode_util::Identifier;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Default terminal size at spawn.
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// Parameters for creating a session.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CreateInput {
    /// Command to run; the preferred shell when absent.
    pub command: Option<String>,
    /// Arguments (ignored when `command` is absent).
    pub args: Vec<String>,
    /// Initial working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment for the child.
    pub env: HashMap<String, String>,
    /// Display title.
    pub title: Option<String>,
}

/// Options for attaching a subscriber.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Pin the session's working directory (first connect only).
    pub directory: Option<PathBuf>,
}

/// A live session: delivery state plus the child's control handles.
struct Session {
    state: Arc<Mutex<SessionState>>,
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    shell: ShellKind,
}

/// Owns every spawned PTY session.
pub struct PtyMultiplexer {
    bus: Bus,
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl PtyMultiplexer {
    /// Create a multiplexer publishing lifecycle events on `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a PTY child and register the session.
    pub fn create(&self, input: CreateInput) -> PtyResult<PtySessionInfo> {
        let id = Identifier::pty();

        let (command, args) = match input.command {
            Some(command) => (command, input.args),
            None => {
                let shell = default_shell();
                let args = if ShellKind::detect(&shell).is_posix() {
                    vec!["-l".to_string()]
                } else {
                    Vec::new()
                };
                (shell, args)
            }
        };
        let shell = ShellKind::detect(&command);

        let cwd = input
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));

        info!(id = %id, command = %command, cwd = %cwd.display(), "Creating PTY session");

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&command);
        cmd.args(&args);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &input.env {
            cmd.env(key, value);
        }
        cmd.cwd(&cwd);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let killer = child.clone_killer();

        let info = PtySessionInfo {
            id: id.clone(),
            title: input.title.unwrap_or_else(|| command.clone()),
            command,
            args,
            cwd: cwd.to_string_lossy().to_string(),
            status: PtyStatus::Running,
            pid: child.process_id(),
        };

        let session = Arc::new(Session {
            state: Arc::new(Mutex::new(SessionState::new(info.clone()))),
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            shell,
        });

        self.sessions.lock().insert(id.clone(), session.clone());
        self.bus.publish(PtyCreated { info: info.clone() });

        // Reader thread: per-session output ordering is this loop.
        let bus = self.bus.clone();
        let sessions = self.sessions.clone();
        let state = session.state.clone();
        let reader_id = id.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => state.lock().deliver(&buf[..n]),
                    Err(e) => {
                        warn!(id = %reader_id, error = %e, "PTY read error");
                        break;
                    }
                }
            }

            // Reap the child and retire the session.
            let exit_code = child
                .wait()
                .ok()
                .map(|status| status.exit_code() as i32);
            debug!(id = %reader_id, exit_code = ?exit_code, "PTY child exited");

            {
                let mut state = state.lock();
                state.info.status = PtyStatus::Exited;
                state.clear();
            }
            sessions.lock().remove(&reader_id);
            bus.publish(PtyExited {
                id: reader_id.clone(),
                exit_code,
            });
        });

        Ok(info)
    }

    /// Attach a subscriber sink, replaying buffered output first.
    ///
    /// With `options.directory` set and the cwd not yet pinned, the
    /// session's cwd is pinned (monotonic) and a shell-appropriate `cd`
    /// goes into the child's stdin.
    pub fn connect(
        &self,
        id: &str,
        sink: UnboundedSender<Vec<u8>>,
        options: ConnectOptions,
    ) -> PtyResult<()> {
        let session = self
            .sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| PtyError::NotFound(id.to_string()))?;

        if let Some(directory) = options.directory {
            let updated_info = {
                let mut state = session.state.lock();
                if state.cwd_pinned {
                    None
                } else {
                    state.cwd_pinned = true;
                    state.info.cwd = directory.to_string_lossy().to_string();
                    Some(state.info.clone())
                }
            };

            if let Some(info) = updated_info {
                let cd = session.shell.cd_command(&info.cwd);
                {
                    let mut writer = session.writer.lock();
                    writer.write_all(cd.as_bytes())?;
                    writer.flush()?;
                }
                self.bus.publish(PtyUpdated { info });
            }
        }

        let result = session.state.lock().attach(sink);
        result
    }

    /// Register a programmatic output listener.
    pub fn add_listener(
        &self,
        id: &str,
        listener: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> PtyResult<()> {
        let session = self
            .sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| PtyError::NotFound(id.to_string()))?;
        session
            .state
            .lock()
            .add_listener(Box::new(listener) as Listener);
        Ok(())
    }

    /// Write bytes to the child's stdin. Unknown id: silent no-op.
    pub fn write(&self, id: &str, data: &[u8]) {
        let Some(session) = self.sessions.lock().get(id).cloned() else {
            return;
        };
        let mut writer = session.writer.lock();
        if let Err(e) = writer.write_all(data).and_then(|_| writer.flush()) {
            warn!(id = %id, error = %e, "PTY write failed");
        }
    }

    /// Resize the terminal. Unknown id: silent no-op.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) {
        let Some(session) = self.sessions.lock().get(id).cloned() else {
            return;
        };
        let master = session.master.lock();
        if let Err(e) = master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            warn!(id = %id, error = %e, "PTY resize failed");
        } else {
            debug!(id = %id, cols, rows, "PTY resized");
        }
    }

    /// Update the session title.
    pub fn set_title(&self, id: &str, title: impl Into<String>) {
        let Some(session) = self.sessions.lock().get(id).cloned() else {
            return;
        };
        let info = {
            let mut state = session.state.lock();
            state.info.title = title.into();
            state.info.clone()
        };
        self.bus.publish(PtyUpdated { info });
    }

    /// Kill the child, drop all subscribers and delete the session.
    /// Idempotent: a second call is a no-op.
    pub fn remove(&self, id: &str) {
        let Some(session) = self.sessions.lock().remove(id) else {
            return;
        };

        if let Err(e) = session.killer.lock().kill() {
            debug!(id = %id, error = %e, "PTY kill failed (already exited?)");
        }
        session.state.lock().clear();

        info!(id = %id, "PTY session removed");
        self.bus.publish(PtyDeleted { id: id.to_string() });
    }

    /// Info for all live sessions.
    pub fn list(&self) -> Vec<PtySessionInfo> {
        let sessions = self.sessions.lock();
        let mut infos: Vec<PtySessionInfo> = sessions
            .values()
            .map(|session| session.state.lock().info.clone())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Info for one session.
    pub fn get(&self, id: &str) -> Option<PtySessionInfo> {
        let sessions = self.sessions.lock();
        sessions.get(id).map(|session| session.state.lock().info.clone())
    }
}
