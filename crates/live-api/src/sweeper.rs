use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info};

use crate::services::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepSummary {
    pub expired_sessions: usize,
    pub orphaned_audio: usize,
}

/// Runs [`sweep_once`] every `interval` until `shutdown` flips to true.
pub async fn run_sweeper(
    services: Arc<Services>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("session sweeper stopping");
                    break;
                }
            }
            _ = ticker.tick() => {
                sweep_once(&services).await;
            }
        }
    }
}

pub async fn sweep_once(services: &Services) -> SweepSummary {
    let expired_sessions = services.sessions.sweep_expired().await;
    let orphaned_audio = match services.audio.as_ref() {
        Some(audio) => audio.sweep_orphans().await,
        None => 0,
    };
    let summary = SweepSummary {
        expired_sessions,
        orphaned_audio,
    };

    if expired_sessions > 0 || orphaned_audio > 0 {
        info!(
            expired_sessions,
            orphaned_audio,
            remaining_sessions = services.sessions.len(),
            "session sweep tick"
        );
    } else {
        debug!(
            remaining_sessions = services.sessions.len(),
            "session sweep tick found nothing to remove"
        );
    }

    summary
}
