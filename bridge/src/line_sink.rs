//! Reassembles the engine's byte output into lines.

use std::io;
use std::sync::Arc;

use crate::delivery::{CallbackSlot, Delivery};

/// The engine's output writer.
///
/// Bytes are buffered until a `\n` arrives; the completed line, minus its
/// terminator, is handed to the current callback. Blank lines are skipped.
/// Lives on the worker thread only.
pub struct LineSink {
    buffer: Vec<u8>,
    slot: Arc<CallbackSlot>,
    delivery: Delivery,
}

impl LineSink {
    pub fn new(slot: Arc<CallbackSlot>, delivery: Delivery) -> Self {
        Self {
            buffer: Vec::new(),
            slot,
            delivery,
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buffer.push(byte);
        if byte == b'\n' {
            self.flush_line();
        }
    }

    /// Deliver whatever is buffered as one line.
    ///
    /// The buffer is emptied before delivery, so a failing callback can never
    /// leave it stuck.
    pub fn flush_line(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut bytes = std::mem::take(&mut self.buffer);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            // CRLF counts as one terminator
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        if bytes.is_empty() {
            return;
        }

        let line = String::from_utf8_lossy(&bytes).into_owned();
        tracing::trace!("UCI << {}", line);
        self.slot.deliver(line, &self.delivery);
    }

    /// Bytes of the current, unfinished line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl io::Write for LineSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.write_byte(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_line();
        Ok(())
    }
}

impl Drop for LineSink {
    fn drop(&mut self) {
        // An unterminated last line still goes out
        self.flush_line();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Callback;
    use std::io::Write;
    use std::sync::Mutex;

    fn sink() -> (LineSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let slot = Arc::new(CallbackSlot::default());
        let callback: Callback = Arc::new(move |line: &str| {
            record.lock().unwrap().push(line.to_string());
        });
        slot.replace(callback);
        (LineSink::new(slot, Delivery::Direct), seen)
    }

    #[test]
    fn test_single_line_is_trimmed() {
        let (mut sink, seen) = sink();
        sink.write_all(b"info depth 5\n").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["info depth 5"]);
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_blank_lines_are_suppressed() {
        let (mut sink, seen) = sink();
        sink.write_all(b"\n\nreadyok\n\n").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["readyok"]);
    }

    #[test]
    fn test_line_split_across_writes() {
        let (mut sink, seen) = sink();
        write!(sink, "best").unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(sink.pending(), 4);
        writeln!(sink, "move e2e4").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["bestmove e2e4"]);
    }

    #[test]
    fn test_multiple_lines_in_one_write_keep_order() {
        let (mut sink, seen) = sink();
        sink.write_all(b"id name X\nid author Y\nuciok\n").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["id name X", "id author Y", "uciok"]);
    }

    #[test]
    fn test_crlf_terminator() {
        let (mut sink, seen) = sink();
        sink.write_all(b"readyok\r\n").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["readyok"]);
    }

    #[test]
    fn test_flush_delivers_partial_line() {
        let (mut sink, seen) = sink();
        sink.write_all(b"uciok").unwrap();
        sink.flush().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["uciok"]);
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_drop_delivers_unterminated_line() {
        let (mut sink, seen) = sink();
        sink.write_all(b"bestmove a2a3").unwrap();
        drop(sink);
        assert_eq!(*seen.lock().unwrap(), vec!["bestmove a2a3"]);
    }

    #[test]
    fn test_buffer_cleared_when_callback_panics() {
        let slot = Arc::new(CallbackSlot::default());
        slot.replace(Arc::new(|_: &str| panic!("callback failure")));
        let mut sink = LineSink::new(slot, Delivery::Direct);

        sink.write_all(b"info depth 1\n").unwrap();
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_no_callback_drops_lines() {
        let slot = Arc::new(CallbackSlot::default());
        let mut sink = LineSink::new(slot.clone(), Delivery::Direct);
        sink.write_all(b"id name Early\n").unwrap();

        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let record = seen.clone();
        slot.replace(Arc::new(move |line: &str| {
            record.lock().unwrap().push(line.to_string());
        }));
        sink.write_all(b"uciok\n").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["uciok"]);
    }
}
