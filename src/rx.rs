use std::sync::atomic::Ordering;

use crate::port::Link;
use crate::session::{Direction, LoopCtx, LoopEnd};
use crate::slcan::SlcanBus;

/// Log every frame on the bus, in arrival order, until cancelled, the frame
/// budget is spent, or the bus fails. No id filtering.
pub fn run<P: Link>(bus: &mut SlcanBus<P>, ctx: &mut LoopCtx<'_>) -> LoopEnd {
    loop {
        if ctx.stop.load(Ordering::SeqCst) {
            return LoopEnd::Cancelled;
        }
        if let Some(limit) = ctx.count
            && ctx.stats.received >= limit
        {
            return LoopEnd::Completed;
        }

        // recv returns None after one port timeout; the stop flag is checked
        // between polls
        match bus.recv() {
            Ok(Some(frame)) => {
                ctx.stats.inc_received();
                (ctx.sink)(Direction::Received, &frame);
            }
            Ok(None) => continue,
            Err(e) => return LoopEnd::Failed(e.to_string()),
        }
    }
}
