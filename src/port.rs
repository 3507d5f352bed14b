use anyhow::Result;
use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits,
};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Management console speed. USB CDC ignores it, but the builder needs one.
pub const MGMT_BAUD: u32 = 9_600;

/// Line speed used for the virtual CAN port.
pub const VCAN_BAUD: u32 = 115_200;

/// Duplex byte stream to the device. Implemented by real serial ports and by
/// the in-memory mock used in tests.
pub trait Link: Read + Write {
    /// Discard everything pending in both directions.
    fn purge(&mut self) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn purge(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}

pub fn open_port(dev: &str, baud: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(dev, baud)
        .timeout(timeout)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None);

    builder
        .open()
        .map_err(|e| anyhow::anyhow!("open {}: {}", dev, e))
}

/// One enumerated serial interface, flattened into the strings the locator
/// matches against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePort {
    pub device: String,
    /// e.g. `USB VID:PID=353F:A101 SER=0001`
    pub hwid: String,
    /// `<configuration>.<interface>`, only known for USB ports
    pub location: Option<String>,
}

impl DevicePort {
    fn from_info(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(ser) = &usb.serial_number {
                    hwid.push_str(" SER=");
                    hwid.push_str(ser);
                }
                Self {
                    device: info.port_name,
                    hwid,
                    location: usb.interface.map(|i| format!("1.{}", i)),
                }
            }
            SerialPortType::PciPort => Self {
                device: info.port_name,
                hwid: "PCI".into(),
                location: None,
            },
            SerialPortType::BluetoothPort => Self {
                device: info.port_name,
                hwid: "BLUETOOTH".into(),
                location: None,
            },
            SerialPortType::Unknown => Self {
                device: info.port_name,
                hwid: "n/a".into(),
                location: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NamePart {
    Text(String),
    Num(u128),
}

/// Split a device path into text and number runs so `ttyACM2` sorts before
/// `ttyACM10` and `COM9` before `COM10`.
fn natural_key(name: &str) -> Vec<NamePart> {
    let mut parts = Vec::new();
    let mut rest = name;
    while !rest.is_empty() {
        let digits = rest.starts_with(|c: char| c.is_ascii_digit());
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        parts.push(if digits {
            NamePart::Num(run.parse().unwrap_or(u128::MAX))
        } else {
            NamePart::Text(run.to_string())
        });
        rest = tail;
    }
    parts
}

/// Pick the first port (natural order of device path) whose hardware id contains
/// `signature` and, when `location` is given, whose location contains it.
pub fn select_port(
    mut ports: Vec<DevicePort>,
    signature: &str,
    location: Option<&str>,
) -> Option<DevicePort> {
    ports.sort_by_cached_key(|p| natural_key(&p.device));
    ports.into_iter().find(|p| {
        p.hwid.contains(signature)
            && match location {
                Some(loc) => p.location.as_deref().is_some_and(|l| l.contains(loc)),
                None => true,
            }
    })
}

/// Enumerate attached serial ports and resolve one device path.
/// Returns `Ok(None)` when nothing matches; only enumeration failures are errors.
pub fn find_device_port(signature: &str, location: Option<&str>) -> Result<Option<String>> {
    let ports: Vec<DevicePort> = serialport::available_ports()
        .map_err(|e| anyhow::anyhow!("enumerate serial ports: {}", e))?
        .into_iter()
        .map(DevicePort::from_info)
        .collect();
    debug!("enumerated {} serial ports", ports.len());

    let found = select_port(ports, signature, location);
    if let (Some(port), Some(_)) = (&found, location) {
        println!(
            "Port: {}\nPort Location: {}\nHardware ID: {}\nDevice: {}",
            port.device,
            port.location.as_deref().unwrap_or("n/a"),
            port.hwid,
            port.device
        );
        println!("{}", "*".repeat(15));
    }
    Ok(found.map(|p| p.device))
}
