use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::slot::Cursors;

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Periodically reports elapsed time and a completion estimate on stderr.
///
/// Observes the pipeline through relaxed cursor reads only; takes no locks
/// and never touches the data path. Stops when the token fires.
pub fn spawn_progress_reporter(
    cursors: Arc<Cursors>,
    total_minutes: u64,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut tick = interval(REPORT_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let elapsed = started.elapsed();
                    let emitted = cursors.read_pos() as u64;
                    if total_minutes == 0 || emitted == 0 {
                        eprint!("\rElapsed: {:.1?}", elapsed);
                        continue;
                    }
                    let fraction = emitted as f64 / total_minutes as f64;
                    let estimate = elapsed.div_f64(fraction).saturating_sub(elapsed);
                    eprint!("\rElapsed: {:.1?} Estimate: {:.1?}", elapsed, estimate);
                }
                _ = stop.cancelled() => break,
            }
        }
        eprintln!();
    })
}
