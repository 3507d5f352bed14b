use chrono::{DateTime, Local};
use embedded_can::{ExtendedId, Id, StandardId};
use std::fmt;
use thiserror::Error;

/// Classic CAN payload limit.
pub const MAX_DLC: usize = 8;

/// Arbitration id of the generated demo frames (29-bit).
pub const DEMO_ID: u32 = 0x123;
pub const DEMO_PREFIX: &str = "K800_";

#[derive(Debug, Clone, PartialEq)]
pub struct CanFrame {
    id: Id,
    remote: bool,
    dlc: u8,
    data: [u8; MAX_DLC],
    /// Wall-clock time of transmit or decode.
    pub timestamp: Option<DateTime<Local>>,
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }
        let mut buf = [0; MAX_DLC];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            remote: false,
            dlc: data.len() as u8,
            data: buf,
            timestamp: None,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }
        Some(Self {
            id: id.into(),
            remote: true,
            dlc: dlc as u8,
            data: [0; MAX_DLC],
            timestamp: None,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }
}

impl CanFrame {
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }

    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Local::now());
        self
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use embedded_can::Frame as _;

        match &self.timestamp {
            Some(ts) => write!(f, "Timestamp: {}", ts.format("%H:%M:%S%.6f"))?,
            None => write!(f, "Timestamp: -")?,
        }
        match self.id {
            Id::Standard(id) => write!(f, "    ID: {:03X}     ", id.as_raw())?,
            Id::Extended(id) => write!(f, "    ID: {:08X}", id.as_raw())?,
        }
        let kind = match (self.is_extended(), self.remote) {
            (true, true) => "X R",
            (true, false) => "X  ",
            (false, true) => "S R",
            (false, false) => "S  ",
        };
        write!(f, "    {}    DL: {}", kind, self.dlc)?;
        if !self.remote {
            write!(f, "   ")?;
            for b in self.data() {
                write!(f, " {:02X}", b)?;
            }
            if !self.data().is_empty() && self.data().iter().all(|b| b.is_ascii_graphic()) {
                write!(f, "    '{}'", String::from_utf8_lossy(self.data()))?;
            }
        }
        Ok(())
    }
}

/// Payload text of a demo frame for counter value `n`.
pub fn demo_payload(n: u8) -> String {
    format!("{}{}", DEMO_PREFIX, n)
}

/// Extended-id frame carrying `text` as UTF-8, stamped now. `None` when the
/// id exceeds 29 bits or the text exceeds the payload limit.
pub fn build_text_frame(id: u32, text: &str) -> Option<CanFrame> {
    use embedded_can::Frame as _;

    let id = ExtendedId::new(id).map(Id::Extended)?;
    CanFrame::new(id, text.as_bytes()).map(CanFrame::stamped)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("not a frame: '{0}'")]
    NotAFrame(char),
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid id: {0}")]
    BadId(String),
    #[error("invalid DLC: {0}")]
    BadDlc(char),
    #[error("invalid data byte: {0}")]
    BadData(String),
}

/// Render a frame as an slcan transmit command, trailing `\r` included.
pub fn encode_slcan(frame: &CanFrame) -> String {
    use embedded_can::Frame as _;

    let cmd = match (frame.is_extended(), frame.remote) {
        (false, false) => 't',
        (true, false) => 'T',
        (false, true) => 'r',
        (true, true) => 'R',
    };
    let mut out = String::with_capacity(32);
    out.push(cmd);
    match frame.id {
        Id::Standard(id) => out.push_str(&format!("{:03X}", id.as_raw())),
        Id::Extended(id) => out.push_str(&format!("{:08X}", id.as_raw())),
    }
    out.push_str(&format!("{:X}", frame.dlc));
    for b in frame.data() {
        out.push_str(&format!("{:02X}", b));
    }
    out.push('\r');
    out
}

/// Parse one slcan frame line (without the trailing `\r`) and stamp it.
pub fn decode_slcan(line: &str) -> Result<CanFrame, DecodeError> {
    use embedded_can::Frame as _;

    let bytes = line.as_bytes();
    let first = *bytes.first().ok_or(DecodeError::Empty)?;
    let (extended, remote) = match first {
        b't' => (false, false),
        b'T' => (true, false),
        b'r' => (false, true),
        b'R' => (true, true),
        c => return Err(DecodeError::NotAFrame(c as char)),
    };

    let id_len = if extended { 8 } else { 3 };
    if bytes.len() < 1 + id_len + 1 {
        return Err(DecodeError::TooShort(bytes.len()));
    }

    let id_str = line
        .get(1..1 + id_len)
        .ok_or_else(|| DecodeError::BadId(line.into()))?;
    let raw = parse_hex(id_str).ok_or_else(|| DecodeError::BadId(id_str.into()))?;
    let id = if extended {
        ExtendedId::new(raw).map(Id::Extended)
    } else {
        u16::try_from(raw).ok().and_then(StandardId::new).map(Id::Standard)
    }
    .ok_or_else(|| DecodeError::BadId(id_str.into()))?;

    let dlc_char = bytes[1 + id_len] as char;
    let dlc = dlc_char
        .to_digit(16)
        .map(|d| d as usize)
        .filter(|d| *d <= MAX_DLC)
        .ok_or(DecodeError::BadDlc(dlc_char))?;

    let frame = if remote {
        CanFrame::new_remote(id, dlc)
    } else {
        let start = 1 + id_len + 1;
        if bytes.len() < start + 2 * dlc {
            return Err(DecodeError::TooShort(bytes.len()));
        }
        let mut data = Vec::with_capacity(dlc);
        for i in 0..dlc {
            let pair = line
                .get(start + 2 * i..start + 2 * i + 2)
                .ok_or_else(|| DecodeError::BadData(line.into()))?;
            let b = parse_hex(pair).ok_or_else(|| DecodeError::BadData(pair.into()))?;
            data.push(b as u8);
        }
        CanFrame::new(id, &data)
    };
    // dlc was bounded above, so construction cannot fail
    frame.map(CanFrame::stamped).ok_or(DecodeError::BadDlc(dlc_char))
}

/// Hex digits only; `from_str_radix` alone would also take a leading `+`.
fn parse_hex(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}
