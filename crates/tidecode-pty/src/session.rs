//! Per-session delivery state: buffering, fan-out, late-join replay.
//!
//! Kept free of any child-process handle so the delivery invariants are
//! directly testable.

use crate::error::{PtyError, PtyResult};
use tidecode_core::bus::PtySessionInfo;
use tokio::sync::mpsc::UnboundedSender;

/// Backlog cap per session.
pub const BUFFER_LIMIT: usize = 2 * 1024 * 1024;

/// Maximum chunk size used when replaying the backlog to a late joiner.
pub const REPLAY_CHUNK: usize = 64 * 1024;

/// A programmatic output callback.
pub(crate) type Listener = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Delivery state for one session.
pub(crate) struct SessionState {
    pub(crate) info: PtySessionInfo,
    pub(crate) buffer: Vec<u8>,
    pub(crate) subscribers: Vec<UnboundedSender<Vec<u8>>>,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) cwd_pinned: bool,
}

impl SessionState {
    pub(crate) fn new(info: PtySessionInfo) -> Self {
        Self {
            info,
            buffer: Vec::new(),
            subscribers: Vec::new(),
            listeners: Vec::new(),
            cwd_pinned: false,
        }
    }

    /// Handle one chunk of child output.
    ///
    /// Every listener sees the chunk. Closed subscriber sinks are
    /// dropped. The chunk is buffered only if no subscriber received it,
    /// and the buffer is clamped to its trailing [`BUFFER_LIMIT`] bytes.
    pub(crate) fn deliver(&mut self, chunk: &[u8]) {
        for listener in &self.listeners {
            listener(chunk);
        }

        self.subscribers.retain(|tx| !tx.is_closed());

        let mut delivered = false;
        for tx in &self.subscribers {
            if tx.send(chunk.to_vec()).is_ok() {
                delivered = true;
            }
        }

        if !delivered {
            self.buffer.extend_from_slice(chunk);
            if self.buffer.len() > BUFFER_LIMIT {
                let excess = self.buffer.len() - BUFFER_LIMIT;
                self.buffer.drain(..excess);
            }
        }
    }

    /// Attach a late-joining subscriber, replaying the backlog first.
    ///
    /// The backlog goes out in ≤ [`REPLAY_CHUNK`] pieces. If the sink
    /// dies mid-replay the buffer is restored intact so a later
    /// subscriber can still replay it.
    pub(crate) fn attach(&mut self, tx: UnboundedSender<Vec<u8>>) -> PtyResult<()> {
        let backlog = std::mem::take(&mut self.buffer);
        for chunk in backlog.chunks(REPLAY_CHUNK) {
            if tx.send(chunk.to_vec()).is_err() {
                self.buffer = backlog;
                return Err(PtyError::SubscriberClosed);
            }
        }
        self.subscribers.push(tx);
        Ok(())
    }

    /// Register a programmatic listener.
    pub(crate) fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Terminal cleanup: an exited session has no subscribers or
    /// listeners left.
    pub(crate) fn clear(&mut self) {
        self.subscribers.clear();
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tidecode_core::bus::PtyStatus;
    use tokio::sync::mpsc;

    fn state() -> SessionState {
        SessionState::new(PtySessionInfo {
            id: "pty_test".to_string(),
            title: "test".to_string(),
            command: "/bin/sh".to_string(),
            args: vec![],
            cwd: "/tmp".to_string(),
            status: PtyStatus::Running,
            pid: Some(1),
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.extend(chunk);
        }
        out
    }

    #[test]
    fn test_unobserved_output_buffers() {
        let mut state = state();
        state.deliver(b"ABC");
        assert_eq!(state.buffer, b"ABC");
    }

    #[test]
    fn test_observed_output_not_buffered() {
        let mut state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.attach(tx).unwrap();

        state.deliver(b"DE");
        assert!(state.buffer.is_empty());
        assert_eq!(drain(&mut rx), b"DE");
    }

    #[test]
    fn test_late_join_replay_then_live() {
        let mut state = state();

        // Child writes with no subscriber: buffered.
        state.deliver(b"ABC");

        // s1 attaches: receives the backlog.
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        state.attach(tx1).unwrap();
        assert_eq!(drain(&mut rx1), b"ABC");

        // Live output reaches s1 and is not buffered.
        state.deliver(b"DE");
        assert_eq!(drain(&mut rx1), b"DE");

        // s2 attaches: backlog was already drained, nothing to replay.
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        state.attach(tx2).unwrap();
        assert_eq!(drain(&mut rx2), b"");

        // Subsequent output reaches both.
        state.deliver(b"F");
        assert_eq!(drain(&mut rx1), b"F");
        assert_eq!(drain(&mut rx2), b"F");
    }

    #[test]
    fn test_buffer_clamped_to_trailing_two_mib() {
        let mut state = state();

        // Write 2 MiB + 3 bytes with no subscriber.
        let filler = vec![b'x'; BUFFER_LIMIT];
        state.deliver(&filler);
        state.deliver(b"END");

        assert_eq!(state.buffer.len(), BUFFER_LIMIT);
        // The trailing bytes survive; the head was truncated.
        assert_eq!(&state.buffer[BUFFER_LIMIT - 3..], b"END");

        // The first subscriber to attach gets exactly the trailing 2 MiB.
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.attach(tx).unwrap();
        let replayed = drain(&mut rx);
        assert_eq!(replayed.len(), BUFFER_LIMIT);
        assert_eq!(&replayed[BUFFER_LIMIT - 3..], b"END");
    }

    #[test]
    fn test_replay_chunked() {
        let mut state = state();
        state.deliver(&vec![b'y'; REPLAY_CHUNK + 100]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.attach(tx).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.len(), REPLAY_CHUNK);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.len(), 100);
    }

    #[test]
    fn test_failed_replay_restores_buffer() {
        let mut state = state();
        state.deliver(b"backlog");

        // Sink already closed: replay fails, buffer intact.
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(state.attach(tx).is_err());
        assert_eq!(state.buffer, b"backlog");
        assert!(state.subscribers.is_empty());

        // A later subscriber still replays.
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.attach(tx).unwrap();
        assert_eq!(drain(&mut rx), b"backlog");
    }

    #[test]
    fn test_closed_subscribers_dropped() {
        let mut state = state();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        state.attach(tx1).unwrap();
        state.attach(tx2).unwrap();

        drop(rx1);
        state.deliver(b"data");

        assert_eq!(state.subscribers.len(), 1);
        assert_eq!(drain(&mut rx2), b"data");
        // A live subscriber received it, so nothing was buffered.
        assert!(state.buffer.is_empty());
    }

    #[test]
    fn test_listeners_always_receive() {
        let mut state = state();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        state.add_listener(Box::new(move |chunk| {
            seen.fetch_add(chunk.len(), Ordering::SeqCst);
        }));

        // No subscriber: listener still sees the chunk.
        state.deliver(b"abc");
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // With a subscriber: listener sees it too.
        let (tx, _rx) = mpsc::unbounded_channel();
        state.attach(tx).unwrap();
        state.deliver(b"de");
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_clear_empties_both_sets() {
        let mut state = state();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.attach(tx).unwrap();
        state.add_listener(Box::new(|_| {}));

        state.clear();
        assert!(state.subscribers.is_empty());
        assert!(state.listeners.is_empty());
    }
}
