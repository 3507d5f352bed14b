//! In-memory `Link` for tests. Writes land in a log shared by every mock so
//! ordering across the management and CAN ports can be checked.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::port::Link;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub port: &'static str,
    pub data: String,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Debug, Default)]
pub struct MockState {
    pub rx: VecDeque<u8>,
    /// Once `rx` is empty, reads fail instead of returning 0.
    pub fail_when_drained: bool,
    /// Writes starting with this byte time out while `timeouts_left > 0`.
    pub timeout_prefix: Option<u8>,
    pub timeouts_left: usize,
    pub purged: usize,
    pub closed: bool,
}

pub type MockHandle = Arc<Mutex<MockState>>;

pub struct MockLink {
    name: &'static str,
    log: EventLog,
    state: MockHandle,
}

impl MockLink {
    pub fn new(name: &'static str, log: &EventLog) -> (Self, MockHandle) {
        let state = MockHandle::default();
        let link = Self {
            name,
            log: log.clone(),
            state: state.clone(),
        };
        (link, state)
    }
}

pub fn push_rx(handle: &MockHandle, text: &str) {
    handle.lock().unwrap().rx.extend(text.as_bytes());
}

/// Everything written to `port`, in order.
pub fn writes(log: &EventLog, port: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.port == port)
        .map(|e| e.data.clone())
        .collect()
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut st = self.state.lock().unwrap();
        if st.rx.is_empty() && st.fail_when_drained {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        st.rx.read(buf)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut st = self.state.lock().unwrap();
        let matches = st.timeout_prefix.is_some_and(|p| buf.first() == Some(&p));
        if matches && st.timeouts_left > 0 {
            st.timeouts_left -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
        }
        self.log.lock().unwrap().push(Event {
            port: self.name,
            data: String::from_utf8_lossy(buf).into_owned(),
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MockLink {
    fn purge(&mut self) -> io::Result<()> {
        let mut st = self.state.lock().unwrap();
        st.rx.clear();
        st.purged += 1;
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.lock() {
            st.closed = true;
        }
    }
}

#[test]
fn write_is_logged() {
    let log = EventLog::default();
    let (mut link, _h) = MockLink::new("a", &log);
    link.write_all(b"hello\r\n").unwrap();
    assert_eq!(writes(&log, "a"), vec!["hello\r\n".to_string()]);
    assert!(writes(&log, "b").is_empty());
}

#[test]
fn drop_marks_closed() {
    let log = EventLog::default();
    let (link, h) = MockLink::new("a", &log);
    assert!(!h.lock().unwrap().closed);
    drop(link);
    assert!(h.lock().unwrap().closed);
}

#[test]
fn read_fails_once_drained_when_asked() {
    let log = EventLog::default();
    let (mut link, h) = MockLink::new("a", &log);
    push_rx(&h, "ok");
    h.lock().unwrap().fail_when_drained = true;
    let mut buf = [0u8; 8];
    assert_eq!(link.read(&mut buf).unwrap(), 2);
    assert!(link.read(&mut buf).is_err());
}
