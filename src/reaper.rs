use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::Engine;

/// What one reaper pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub challenges: usize,
    pub tokens: usize,
    pub waitlist: usize,
    pub locks: usize,
    pub channels: usize,
}

/// One cleanup pass: expired challenges and tokens, waitlist entries whose
/// slot has started, idle date locks and notification channels nobody
/// listens on.
pub async fn reap_once(engine: &Engine) -> ReapStats {
    let swept = engine.challenges.sweep(engine.now());
    let waitlist = match engine.expire_waitlists().await {
        Ok(n) => n,
        Err(e) => {
            warn!("waitlist expiry failed: {e}");
            0
        }
    };
    let stats = ReapStats {
        challenges: swept.challenges,
        tokens: swept.tokens,
        waitlist,
        locks: engine.prune_date_locks(),
        channels: engine.notify.prune(),
    };

    for (kind, n) in [
        ("challenge", stats.challenges),
        ("token", stats.tokens),
        ("waitlist", stats.waitlist),
    ] {
        if n > 0 {
            metrics::counter!(crate::observability::REAPED_TOTAL, "kind" => kind).increment(n as u64);
        }
    }
    metrics::gauge!(crate::observability::DATE_LOCKS_ACTIVE).set(engine.date_lock_count() as f64);

    if stats != ReapStats::default() {
        debug!(
            challenges = stats.challenges,
            tokens = stats.tokens,
            waitlist = stats.waitlist,
            locks = stats.locks,
            channels = stats.channels,
            "reaper sweep"
        );
    }
    stats
}

/// Background task that runs `reap_once` every `every` until `stop` fires.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration, stop: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                reap_once(&engine).await;
            }
        }
    }
}
