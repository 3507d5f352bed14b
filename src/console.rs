use std::io::{self, ErrorKind};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::port::Link;
use crate::proto::command::{LED_COUNT, MgmtCommand, format_command};

/// Line-oriented command channel to the MCU management console.
///
/// Every command is written, then followed by a settle delay so the MCU has
/// processed the line before the next one arrives. Responses are never parsed;
/// whatever the console echoed is handed back as raw text.
pub struct DeviceConsole<P: Link> {
    port: Option<P>,
    settle: Duration,
    leds: bool,
}

impl<P: Link> DeviceConsole<P> {
    pub fn new(port: P, settle: Duration, leds: bool) -> Self {
        Self {
            port: Some(port),
            settle,
            leds,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port(&mut self) -> io::Result<&mut P> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "management port closed"))
    }

    pub fn send(&mut self, cmd: &MgmtCommand) -> io::Result<()> {
        let line = format_command(cmd);
        debug!("[mgmt] > {}", line.trim_end());
        let port = self.port()?;
        port.write_all(line.as_bytes())?;
        port.flush()?;
        thread::sleep(self.settle);
        Ok(())
    }

    /// Read whatever the console has buffered right now.
    pub fn drain(&mut self) -> io::Result<String> {
        let port = self.port()?;
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Nudge the console with an empty line and throw away the prompt banner.
    pub fn wake(&mut self) -> io::Result<()> {
        self.send(&MgmtCommand::Wake)?;
        let banner = self.drain()?;
        debug!("[mgmt] discarded {} banner bytes", banner.len());
        Ok(())
    }

    /// Set CAN mode, then baud rate, and echo the console's reply.
    pub fn configure_can(&mut self, interface: &str, mode: &str, baud_kbps: u32) -> io::Result<String> {
        self.send(&MgmtCommand::SetCanMode {
            interface: interface.to_string(),
            mode: mode.to_string(),
        })?;
        self.send(&MgmtCommand::SetCanBaudrate {
            interface: interface.to_string(),
            baud: baud_kbps,
        })?;
        let reply = self.drain()?;
        println!("{}", reply);
        Ok(reply)
    }

    /// Drive all LEDs to `on`. No-op when the LED check is off or the port is
    /// closed. Every LED is attempted even if an earlier write failed; the
    /// first failure is returned.
    pub fn set_led_status(&mut self, on: bool) -> io::Result<()> {
        if !self.leds || !self.is_open() {
            return Ok(());
        }
        let mut first_err = None;
        for index in 0..LED_COUNT {
            if let Err(e) = self.send(&MgmtCommand::SetLed { index, on }) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn purge(&mut self) -> io::Result<()> {
        self.port()?.purge()
    }

    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("[mgmt] closed");
        }
    }
}
