/// Lines understood by the MCU management console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MgmtCommand {
    /// Bare line ending, wakes the console prompt.
    Wake,

    // ---- CAN interface ----
    SetCanMode {
        interface: String,
        mode: String,
    },
    SetCanBaudrate {
        interface: String,
        /// kbps, rendered as a plain integer
        baud: u32,
    },

    // ---- Digital IO ----
    SetLed {
        index: u8,
        on: bool,
    },
}

/// Number of on-board LEDs reachable through `dio set LED0`.
pub const LED_COUNT: u8 = 4;

/// Serialize a command to a CRLF-terminated line.
pub fn format_command(cmd: &MgmtCommand) -> String {
    use MgmtCommand::*;
    let mut out = match cmd {
        Wake => String::new(),
        SetCanMode { interface, mode } => format!("set can-mode {} {}", interface, mode),
        SetCanBaudrate { interface, baud } => {
            format!("set can-baudrate {} {}", interface, baud)
        }
        SetLed { index, on } => format!("dio set LED0 {} {}", index, on),
    };
    out.push_str("\r\n");
    out
}
