use std::collections::VecDeque;
use std::io::{self, ErrorKind};

use thiserror::Error;
use tracing::debug;

use crate::cli::Bitrate;
use crate::frame::{CanFrame, MAX_DLC, decode_slcan, encode_slcan};
use crate::port::Link;

const BELL: u8 = 0x07;
/// Longest slcan line: extended frame, 8 bytes, timestamp.
const SLCAN_MTU: usize = "T1111222281122334455667788EA5F".len();

#[derive(Debug, Error)]
pub enum BusError {
    #[error("transmit timed out")]
    Timeout,
    #[error("payload too long: {0} bytes (max {MAX_DLC})")]
    PayloadTooLong(usize),
    #[error("bus is shut down")]
    Closed,
    #[error("bus i/o: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub bitrate: Bitrate,
    /// slcan adapters never echo our own frames; when set, sent frames are
    /// looped back locally instead.
    pub receive_own_messages: bool,
}

/// CAN channel tunnelled over a serial line with the slcan ASCII protocol.
pub struct SlcanBus<P: Link> {
    port: Option<P>,
    receive_own: bool,
    line: Vec<u8>,
    /// Set once a line outgrows the MTU; bytes are dropped until its end.
    discarding: bool,
    pending: VecDeque<CanFrame>,
}

impl<P: Link> SlcanBus<P> {
    /// Close any stale channel, set the bit-rate and open the channel.
    pub fn open(mut port: P, cfg: BusConfig) -> Result<Self, BusError> {
        let setup = [
            "C\r".to_string(),
            format!("S{}\r", cfg.bitrate.slcan_code()),
            "O\r".to_string(),
        ];
        for cmd in setup {
            port.write_all(cmd.as_bytes())?;
            port.flush()?;
        }
        debug!(
            "[slcan] channel open at {} kbps (receive_own={})",
            cfg.bitrate, cfg.receive_own_messages
        );
        Ok(Self {
            port: Some(port),
            receive_own: cfg.receive_own_messages,
            line: Vec::with_capacity(SLCAN_MTU),
            discarding: false,
            pending: VecDeque::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Transmit one frame. The port's write timeout bounds the call; running
    /// into it yields `BusError::Timeout` after a bare `\r` is sent so the
    /// adapter drops any half-written line.
    pub fn send(&mut self, frame: &CanFrame) -> Result<(), BusError> {
        use embedded_can::Frame as _;

        if frame.data().len() > MAX_DLC {
            return Err(BusError::PayloadTooLong(frame.data().len()));
        }
        let port = self.port.as_mut().ok_or(BusError::Closed)?;
        let line = encode_slcan(frame);
        if let Err(e) = port.write_all(line.as_bytes()).and_then(|_| port.flush()) {
            if e.kind() != ErrorKind::TimedOut {
                return Err(BusError::Io(e));
            }
            let _ = port.write_all(b"\r").and_then(|_| port.flush());
            return Err(BusError::Timeout);
        }
        if self.receive_own {
            self.pending.push_back(frame.clone());
        }
        Ok(())
    }

    /// Wait up to one port timeout for a frame. `Ok(None)` means nothing
    /// arrived yet; callers loop for an unbounded receive.
    pub fn recv(&mut self) -> Result<Option<CanFrame>, BusError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        let port = self.port.as_mut().ok_or(BusError::Closed)?;

        let mut buf = [0u8; 256];
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => 0,
            Err(e) => return Err(e.into()),
        };

        for &byte in &buf[..n] {
            match byte {
                b'\r' | b'\n' => {
                    if self.discarding {
                        debug!("[slcan] dropped overlong line");
                        self.discarding = false;
                        self.line.clear();
                        continue;
                    }
                    if self.line.is_empty() {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    match decode_slcan(&text) {
                        Ok(frame) => self.pending.push_back(frame),
                        // command acks ('z', 'Z') and anything else that is not a frame
                        Err(e) => debug!("[slcan] skipped '{}': {}", text, e),
                    }
                }
                BELL => {
                    debug!("[slcan] adapter signalled an error");
                    self.discarding = false;
                    self.line.clear();
                }
                b if b.is_ascii_graphic() && !self.discarding => {
                    self.line.push(b);
                    if self.line.len() > SLCAN_MTU {
                        self.line.clear();
                        self.discarding = true;
                    }
                }
                _ => {}
            }
        }
        Ok(self.pending.pop_front())
    }

    /// Close the channel and release the port. The port is released even
    /// when the close command cannot be written.
    pub fn shutdown(&mut self) -> Result<(), BusError> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        let res = port.write_all(b"C\r").and_then(|_| port.flush());
        drop(port);
        debug!("[slcan] shut down");
        res.map_err(BusError::from)
    }
}
