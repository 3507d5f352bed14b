use std::sync::atomic::Ordering;
use std::thread;

use tracing::warn;

use crate::frame::{DEMO_ID, build_text_frame, demo_payload};
use crate::port::Link;
use crate::session::{Direction, LoopCtx, LoopEnd};
use crate::slcan::{BusError, SlcanBus};

/// Triangle-wave counter over `[low, high]`: climbs to `high`, falls back to
/// `low`, and repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Oscillator {
    value: u8,
    rising: bool,
    low: u8,
    high: u8,
}

impl Oscillator {
    pub fn new(low: u8, high: u8) -> Self {
        Self {
            value: low,
            rising: true,
            low,
            high: high.max(low),
        }
    }

    pub fn next_value(&mut self) -> u8 {
        if self.low == self.high {
            return self.value;
        }
        if self.value == self.low {
            self.rising = true;
        } else if self.value == self.high {
            self.rising = false;
        }
        if self.rising {
            self.value += 1;
        } else {
            self.value -= 1;
        }
        self.value
    }
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new(0, 9)
    }
}

/// Transmit generated `K800_<n>` frames until cancelled, the frame budget is
/// spent, or the bus fails. Timed-out transmits are counted and skipped.
pub fn run<P: Link>(bus: &mut SlcanBus<P>, ctx: &mut LoopCtx<'_>) -> LoopEnd {
    let mut osc = Oscillator::default();

    loop {
        if ctx.stop.load(Ordering::SeqCst) {
            return LoopEnd::Cancelled;
        }
        if let Some(limit) = ctx.count
            && ctx.stats.sent >= limit
        {
            return LoopEnd::Completed;
        }

        let n = osc.next_value();
        let Some(frame) = build_text_frame(DEMO_ID, &demo_payload(n)) else {
            return LoopEnd::Failed(BusError::PayloadTooLong(demo_payload(n).len()).to_string());
        };

        match bus.send(&frame) {
            Ok(()) => {
                ctx.stats.inc_sent();
                (ctx.sink)(Direction::Sent, &frame);
            }
            Err(BusError::Timeout) => {
                ctx.stats.inc_timeout();
                warn!("[tx] transmit of {} timed out, frame skipped", demo_payload(n));
            }
            Err(e) => return LoopEnd::Failed(e.to_string()),
        }

        thread::sleep(ctx.timing.send_gap);
    }
}
