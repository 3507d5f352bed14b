use clap::{Parser, ValueEnum};
use std::fmt;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(name = "k800-can", about = "CAN bus send/receive utility for the K800 MCU")]
pub struct Cli {
    /// send (s) generated frames or continually receive (r)
    #[arg(short, long, value_enum, env = "K800_MODE", default_value = "r")]
    pub mode: Mode,
    /// CAN bus bit-rate in kbps: 10, 20, 50, 100, 125, 250, 500, 750 or 1000
    #[arg(short, long, env = "K800_BITRATE", default_value_t = 1000)]
    pub bitrate: u32,
    /// Pulse the four on-board LEDs around the session
    #[arg(short, long, value_enum, env = "K800_LEDS", default_value = "off")]
    pub leds: LedCheck,
    /// Stop after this many frames sent or received
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
    /// USB vendor:product signature of the MCU
    #[arg(long, env = "K800_VID_PID", default_value = "353F:A101")]
    pub vid_pid: String,
    /// Location suffix of the management interface
    #[arg(long, default_value = ".0")]
    pub mgmt_location: String,
    /// Location suffix of the virtual CAN interface
    #[arg(long, default_value = ".2")]
    pub vcan_location: String,
    /// CAN interface name used in MCU commands
    #[arg(long, default_value = "VCAN0")]
    pub interface: String,
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[value(name = "s", alias = "send")]
    Send,
    #[value(name = "r", alias = "receive")]
    Receive,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCheck {
    On,
    Off,
}

impl LedCheck {
    pub fn enabled(self) -> bool {
        self == LedCheck::On
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bit-rate {0} kbps, expected one of {rates}", rates = Bitrate::list())]
    InvalidBitrate(u32),
    #[error("K800 MCU not found ({signature} at location {location}); check configuration and connections")]
    DeviceNotFound { signature: String, location: String },
}

/// CAN bit-rates the MCU and the slcan `S` command both support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitrate {
    K10,
    K20,
    K50,
    K100,
    K125,
    K250,
    K500,
    K750,
    K1000,
}

impl Bitrate {
    pub const ALL: [Bitrate; 9] = [
        Bitrate::K10,
        Bitrate::K20,
        Bitrate::K50,
        Bitrate::K100,
        Bitrate::K125,
        Bitrate::K250,
        Bitrate::K500,
        Bitrate::K750,
        Bitrate::K1000,
    ];

    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::K10 => 10,
            Bitrate::K20 => 20,
            Bitrate::K50 => 50,
            Bitrate::K100 => 100,
            Bitrate::K125 => 125,
            Bitrate::K250 => 250,
            Bitrate::K500 => 500,
            Bitrate::K750 => 750,
            Bitrate::K1000 => 1000,
        }
    }

    /// Digit of the slcan `S<n>` setup command.
    pub fn slcan_code(self) -> char {
        match self {
            Bitrate::K10 => '0',
            Bitrate::K20 => '1',
            Bitrate::K50 => '2',
            Bitrate::K100 => '3',
            Bitrate::K125 => '4',
            Bitrate::K250 => '5',
            Bitrate::K500 => '6',
            Bitrate::K750 => '7',
            Bitrate::K1000 => '8',
        }
    }

    fn list() -> String {
        Self::ALL
            .iter()
            .map(|b| b.kbps().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl TryFrom<u32> for Bitrate {
    type Error = ConfigError;

    fn try_from(kbps: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|b| b.kbps() == kbps)
            .ok_or(ConfigError::InvalidBitrate(kbps))
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kbps())
    }
}

/// Everything the session needs, fixed before any device I/O.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: Mode,
    pub bitrate: Bitrate,
    pub leds: bool,
    pub count: Option<u64>,
    pub signature: String,
    pub mgmt_location: String,
    pub vcan_location: String,
    pub interface: String,
}

impl SessionConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: cli.mode,
            bitrate: Bitrate::try_from(cli.bitrate)?,
            leds: cli.leds.enabled(),
            count: cli.count,
            signature: cli.vid_pid.clone(),
            mgmt_location: cli.mgmt_location.clone(),
            vcan_location: cli.vcan_location.clone(),
            interface: cli.interface.clone(),
        })
    }
}
