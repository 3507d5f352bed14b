use std::fmt;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::cli::{Mode, SessionConfig};
use crate::console::DeviceConsole;
use crate::frame::CanFrame;
use crate::port::Link;
use crate::slcan::{BusConfig, SlcanBus};
use crate::stats::Stats;
use crate::{rx, tx};

/// Mode string for `set can-mode`: tunnel the CAN interface as slcan.
pub const CAN_MODE: &str = "slcan";

#[derive(Debug, Clone)]
pub struct Timing {
    /// After every management command.
    pub settle: Duration,
    /// Between generated frames.
    pub send_gap: Duration,
    /// Write timeout of a transmit, also the receive poll interval.
    pub bus_timeout: Duration,
    /// Before teardown starts.
    pub teardown_settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            send_gap: Duration::from_millis(100),
            bus_timeout: Duration::from_millis(200),
            teardown_settle: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, "Sent"),
            Direction::Received => write!(f, "Received"),
        }
    }
}

/// How a send or receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    /// Operator interrupt.
    Cancelled,
    /// `--count` frames done.
    Completed,
    Failed(String),
}

impl LoopEnd {
    /// Failures are logged by `run` already; callers only need the verdict.
    pub fn is_failure(&self) -> bool {
        matches!(self, LoopEnd::Failed(_))
    }
}

pub struct LoopCtx<'a> {
    pub stop: &'a AtomicBool,
    pub count: Option<u64>,
    pub timing: &'a Timing,
    pub stats: &'a mut Stats,
    pub sink: &'a mut dyn FnMut(Direction, &CanFrame),
}

#[derive(Debug)]
pub struct Report {
    pub end: LoopEnd,
    pub stats: Stats,
}

/// Console output for each frame.
pub fn print_frame(dir: Direction, frame: &CanFrame) {
    println!("{}: {}", dir, frame);
}

/// Drive one session: configure the MCU, open the CAN channel, run the loop
/// for the configured mode and tear everything down.
///
/// `connect_can` is only called once both configuration commands have been
/// issued and settled. Teardown runs on every path, including failed setup.
pub fn run<M, C, F>(
    cfg: &SessionConfig,
    timing: &Timing,
    mgmt: M,
    connect_can: F,
    stop: &AtomicBool,
    sink: &mut dyn FnMut(Direction, &CanFrame),
) -> Report
where
    M: Link,
    C: Link,
    F: FnOnce() -> Result<C>,
{
    let mut console = DeviceConsole::new(mgmt, timing.settle, cfg.leds);
    let mut stats = Stats::new();

    let (end, bus) = match bring_up(cfg, &mut console, connect_can) {
        Ok(mut bus) => {
            println!(
                "Starting CAN bus {}...\nCtrl+C to exit",
                match cfg.mode {
                    Mode::Send => "transmission",
                    Mode::Receive => "reception",
                }
            );
            let mut ctx = LoopCtx {
                stop,
                count: cfg.count,
                timing,
                stats: &mut stats,
                sink,
            };
            let end = match cfg.mode {
                Mode::Send => tx::run(&mut bus, &mut ctx),
                Mode::Receive => rx::run(&mut bus, &mut ctx),
            };
            (end, Some(bus))
        }
        Err(e) => (LoopEnd::Failed(format!("{:#}", e)), None),
    };

    match &end {
        LoopEnd::Cancelled => println!("\nOperation terminated by user."),
        LoopEnd::Completed => info!("[session] frame budget reached"),
        LoopEnd::Failed(msg) => error!("An error occurred: {}", msg),
    }

    teardown(timing, &mut console, bus);
    stats.log_summary();
    Report { end, stats }
}

fn bring_up<M, C, F>(
    cfg: &SessionConfig,
    console: &mut DeviceConsole<M>,
    connect_can: F,
) -> Result<SlcanBus<C>>
where
    M: Link,
    C: Link,
    F: FnOnce() -> Result<C>,
{
    console.wake().context("waking management console")?;

    println!("Configuring CAN port...");
    console
        .configure_can(&cfg.interface, CAN_MODE, cfg.bitrate.kbps())
        .context("configuring CAN interface")?;
    console.set_led_status(true).context("LED check")?;

    let port = connect_can()?;
    let bus = SlcanBus::open(
        port,
        BusConfig {
            bitrate: cfg.bitrate,
            receive_own_messages: false,
        },
    )
    .context("opening CAN channel")?;
    Ok(bus)
}

/// Each step is attempted regardless of earlier failures so neither handle
/// leaks.
fn teardown<M: Link, C: Link>(
    timing: &Timing,
    console: &mut DeviceConsole<M>,
    bus: Option<SlcanBus<C>>,
) {
    thread::sleep(timing.teardown_settle);

    if let Err(e) = console.purge() {
        warn!("[teardown] flush management port: {}", e);
    }
    if let Err(e) = console.set_led_status(false) {
        warn!("[teardown] LEDs off: {}", e);
    }
    if let Some(mut bus) = bus
        && let Err(e) = bus.shutdown()
    {
        warn!("[teardown] CAN shutdown: {}", e);
    }
    console.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Bitrate;
    use crate::mock::{Event, EventLog, MockHandle, MockLink, push_rx, writes};
    use embedded_can::Frame as _;
    use std::sync::atomic::Ordering;

    fn zero() -> Timing {
        Timing {
            settle: Duration::ZERO,
            send_gap: Duration::ZERO,
            bus_timeout: Duration::ZERO,
            teardown_settle: Duration::ZERO,
        }
    }

    fn config(mode: Mode, bitrate: Bitrate, leds: bool, count: Option<u64>) -> SessionConfig {
        SessionConfig {
            mode,
            bitrate,
            leds,
            count,
            signature: "353F:A101".into(),
            mgmt_location: ".0".into(),
            vcan_location: ".2".into(),
            interface: "VCAN0".into(),
        }
    }

    struct Rig {
        log: EventLog,
        mgmt: Option<MockLink>,
        mgmt_h: MockHandle,
        can: Option<MockLink>,
        can_h: MockHandle,
    }

    fn rig() -> Rig {
        let log = EventLog::default();
        let (mgmt, mgmt_h) = MockLink::new("mgmt", &log);
        let (can, can_h) = MockLink::new("can", &log);
        Rig {
            log,
            mgmt: Some(mgmt),
            mgmt_h,
            can: Some(can),
            can_h,
        }
    }

    fn run_rig(rig: &mut Rig, cfg: &SessionConfig, stop: &AtomicBool) -> (Report, Vec<CanFrame>) {
        let mut seen = Vec::new();
        let mgmt = rig.mgmt.take().unwrap();
        let can = rig.can.take().unwrap();
        let mut sink = |_: Direction, f: &CanFrame| seen.push(f.clone());
        let report = run(cfg, &zero(), mgmt, move || Ok(can), stop, &mut sink);
        (report, seen)
    }

    fn is_frame(e: &Event) -> bool {
        e.port == "can" && (e.data.starts_with('T') || e.data.starts_with('t'))
    }

    #[test]
    fn send_with_leds_brackets_frames() {
        let mut r = rig();
        let cfg = config(Mode::Send, Bitrate::K500, true, Some(3));
        let (report, seen) = run_rig(&mut r, &cfg, &AtomicBool::new(false));

        assert_eq!(report.end, LoopEnd::Completed);
        assert_eq!(report.stats.sent, 3);
        let payloads: Vec<String> = seen
            .iter()
            .map(|f| String::from_utf8_lossy(f.data()).into_owned())
            .collect();
        assert_eq!(payloads, vec!["K800_1", "K800_2", "K800_3"]);

        let events = r.log.lock().unwrap().clone();
        let first_tx = events.iter().position(is_frame).unwrap();
        let last_tx = events.iter().rposition(is_frame).unwrap();
        let led = |on: bool| -> Vec<usize> {
            let tail = format!("{}\r\n", on);
            events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.port == "mgmt" && e.data.starts_with("dio set LED0"))
                .filter(|(_, e)| e.data.ends_with(&tail))
                .map(|(i, _)| i)
                .collect()
        };
        let on = led(true);
        let off = led(false);
        assert_eq!(on.len(), 4);
        assert_eq!(off.len(), 4);
        assert!(on.iter().all(|&i| i < first_tx));
        assert!(off.iter().all(|&i| i > last_tx));

        assert_eq!(
            &writes(&r.log, "mgmt")[..3],
            &["\r\n", "set can-mode VCAN0 slcan\r\n", "set can-baudrate VCAN0 500\r\n"]
        );
        let can = writes(&r.log, "can");
        assert_eq!(&can[..3], &["C\r", "S6\r", "O\r"]);
        assert_eq!(can.last().unwrap(), "C\r");

        assert_eq!(r.mgmt_h.lock().unwrap().purged, 1);
        assert!(r.mgmt_h.lock().unwrap().closed);
        assert!(r.can_h.lock().unwrap().closed);
    }

    #[test]
    fn receive_logs_everything_in_order_and_never_transmits() {
        let mut r = rig();
        push_rx(&r.can_h, "t1001AA\rT1FFFFFFF0\rt7FF2BEEF\r");
        let cfg = config(Mode::Receive, Bitrate::K1000, false, Some(3));
        let (report, seen) = run_rig(&mut r, &cfg, &AtomicBool::new(false));

        assert_eq!(report.end, LoopEnd::Completed);
        assert_eq!(report.stats.received, 3);
        let ids: Vec<u32> = seen.iter().map(|f| f.raw_id()).collect();
        assert_eq!(ids, vec![0x100, 0x1FFF_FFFF, 0x7FF]);

        let events = r.log.lock().unwrap().clone();
        assert!(!events.iter().any(is_frame));
        assert_eq!(writes(&r.log, "can"), vec!["C\r", "S8\r", "O\r", "C\r"]);
        // LED check off: no dio commands at all
        assert!(!writes(&r.log, "mgmt").iter().any(|l| l.starts_with("dio")));
    }

    #[test]
    fn receive_error_still_closes_both_channels() {
        let mut r = rig();
        push_rx(&r.can_h, "T000001231AA\r");
        r.can_h.lock().unwrap().fail_when_drained = true;
        let cfg = config(Mode::Receive, Bitrate::K250, true, None);
        let (report, seen) = run_rig(&mut r, &cfg, &AtomicBool::new(false));

        assert!(report.end.is_failure());
        assert_eq!(seen.len(), 1);
        assert!(r.can_h.lock().unwrap().closed);
        assert!(r.mgmt_h.lock().unwrap().closed);
        assert_eq!(writes(&r.log, "can").last().unwrap(), "C\r");
        let off = writes(&r.log, "mgmt")
            .iter()
            .filter(|l| l.ends_with("false\r\n"))
            .count();
        assert_eq!(off, 4);
    }

    #[test]
    fn cancellation_goes_straight_to_teardown() {
        let mut r = rig();
        let stop = AtomicBool::new(false);
        stop.store(true, Ordering::SeqCst);
        let cfg = config(Mode::Send, Bitrate::K125, false, None);
        let (report, seen) = run_rig(&mut r, &cfg, &stop);

        assert_eq!(report.end, LoopEnd::Cancelled);
        assert!(!report.end.is_failure());
        assert!(seen.is_empty());
        assert!(!r.log.lock().unwrap().iter().any(is_frame));
        assert!(r.can_h.lock().unwrap().closed);
        assert!(r.mgmt_h.lock().unwrap().closed);
    }

    #[test]
    fn transmit_timeouts_are_skipped() {
        let mut r = rig();
        {
            let mut st = r.can_h.lock().unwrap();
            st.timeout_prefix = Some(b'T');
            st.timeouts_left = 2;
        }
        let cfg = config(Mode::Send, Bitrate::K1000, false, Some(2));
        let (report, seen) = run_rig(&mut r, &cfg, &AtomicBool::new(false));

        assert_eq!(report.end, LoopEnd::Completed);
        assert_eq!(report.stats.timeouts, 2);
        assert_eq!(report.stats.sent, 2);
        // the counter kept advancing through the skipped frames
        assert_eq!(seen[0].data(), b"K800_3");
        assert_eq!(seen[1].data(), b"K800_4");
    }

    #[test]
    fn can_port_not_opened_when_configuration_fails() {
        let log = EventLog::default();
        let (mgmt, mgmt_h) = MockLink::new("mgmt", &log);
        {
            let mut st = mgmt_h.lock().unwrap();
            st.timeout_prefix = Some(b'd');
            st.timeouts_left = usize::MAX;
        }
        let cfg = config(Mode::Send, Bitrate::K500, true, None);
        let mut connected = false;
        let report = run::<_, MockLink, _>(
            &cfg,
            &zero(),
            mgmt,
            || {
                connected = true;
                anyhow::bail!("unreachable")
            },
            &AtomicBool::new(false),
            &mut |_, _| {},
        );

        assert!(matches!(report.end, LoopEnd::Failed(ref m) if m.contains("LED check")));
        assert!(!connected);
        assert!(mgmt_h.lock().unwrap().closed);
        // mode and baud were still issued before giving up
        assert_eq!(writes(&log, "mgmt").len(), 3);
    }

    #[test]
    fn failed_can_open_still_turns_leds_off() {
        let log = EventLog::default();
        let (mgmt, mgmt_h) = MockLink::new("mgmt", &log);
        let cfg = config(Mode::Receive, Bitrate::K20, true, None);
        let report = run::<_, MockLink, _>(
            &cfg,
            &zero(),
            mgmt,
            || anyhow::bail!("open /dev/ttyACM2: no such device"),
            &AtomicBool::new(false),
            &mut |_, _| {},
        );

        assert!(matches!(report.end, LoopEnd::Failed(ref m) if m.contains("ttyACM2")));
        let off = writes(&log, "mgmt")
            .iter()
            .filter(|l| l.ends_with("false\r\n"))
            .count();
        assert_eq!(off, 4);
        assert!(mgmt_h.lock().unwrap().closed);
    }
}
