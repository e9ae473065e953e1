//! Idle client detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Why [`watch_liveness`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Nothing was heard from the client for the whole deadline.
    Unresponsive,
    /// The watch was stopped.
    Stopped,
}

/// Check the client every `period` and report it once it has been silent
/// for at least `deadline`.
///
/// Any inbound frame counts as a sign of life (see
/// [`ClientConnection::touch`]); the session's pings make a healthy client
/// answer at least once per period.
pub async fn watch_liveness(
    client: Arc<ClientConnection>,
    period: Duration,
    deadline: Duration,
    stop: CancellationToken,
) -> Liveness {
    let mut checks = time::interval_at(time::Instant::now() + period, period);
    checks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => return Liveness::Stopped,
            _ = checks.tick() => {
                if client.idle_for() >= deadline {
                    return Liveness::Unresponsive;
                }
            }
        }
    }
}
