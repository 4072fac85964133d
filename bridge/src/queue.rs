//! The command queue between the caller and the engine worker.
//!
//! Unbounded on purpose: this is a low-volume control channel and producers
//! must never block on a slow engine.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct QueueState {
    commands: VecDeque<String>,
    running: bool,
}

/// FIFO of pending protocol lines plus the session's running flag.
///
/// The flag lives under the same lock as the commands so a consumer can never
/// miss the wakeup that closes the queue.
#[derive(Debug)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Create an open (running) queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                commands: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command and wake the consumer.
    ///
    /// Returns `false`, dropping the command, once the queue is closed.
    pub fn enqueue(&self, command: impl Into<String>) -> bool {
        {
            let mut state = self.lock();
            if !state.running {
                return false;
            }
            state.commands.push_back(command.into());
        }
        self.available.notify_one();
        true
    }

    /// Block until there is work or the queue is closed.
    ///
    /// Returns every queued command in FIFO order. Commands accepted before
    /// the queue was closed are still handed out; `None` means the queue is
    /// closed and empty and the consumer should exit.
    pub fn drain_blocking(&self) -> Option<Vec<String>> {
        let state = self.lock();
        let mut state = self
            .available
            .wait_while(state, |s| s.commands.is_empty() && s.running)
            .unwrap_or_else(PoisonError::into_inner);

        if state.commands.is_empty() {
            return None;
        }
        Some(state.commands.drain(..).collect())
    }

    /// Stop accepting commands and wake the consumer.
    ///
    /// Returns whether the queue was running before the call.
    pub fn close(&self) -> bool {
        let was_running = {
            let mut state = self.lock();
            std::mem::replace(&mut state.running, false)
        };
        self.available.notify_all();
        was_running
    }

    /// Drop every pending command, returning how many were discarded.
    pub fn discard(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.commands.len();
        state.commands.clear();
        discarded
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn len(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_drain_preserves_fifo_order() {
        let queue = CommandQueue::new();
        for cmd in ["uci", "isready", "position startpos", "go depth 1"] {
            assert!(queue.enqueue(cmd));
        }
        assert_eq!(
            queue.drain_blocking(),
            Some(vec![
                "uci".to_string(),
                "isready".to_string(),
                "position startpos".to_string(),
                "go depth 1".to_string(),
            ])
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_rejects_commands() {
        let queue = CommandQueue::new();
        assert!(queue.close());
        assert!(!queue.close());
        assert!(!queue.enqueue("uci"));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.drain_blocking(), None);
    }

    #[test]
    fn test_close_still_hands_out_accepted_commands() {
        let queue = CommandQueue::new();
        queue.enqueue("isready");
        queue.close();
        assert_eq!(queue.drain_blocking(), Some(vec!["isready".to_string()]));
        assert_eq!(queue.drain_blocking(), None);
    }

    #[test]
    fn test_blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.drain_blocking())
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue("uci");
        assert_eq!(consumer.join().unwrap(), Some(vec!["uci".to_string()]));
    }

    #[test]
    fn test_blocked_consumer_wakes_on_close() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.drain_blocking())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(CommandQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(format!("{} {}", p, i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let drained = queue.drain_blocking().unwrap();
        assert_eq!(drained.len(), 400);
        for p in 0..4 {
            let seen: Vec<usize> = drained
                .iter()
                .filter_map(|c| c.strip_prefix(&format!("{} ", p)))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_discard() {
        let queue = CommandQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        assert_eq!(queue.discard(), 2);
        assert!(queue.is_empty());
    }
}
