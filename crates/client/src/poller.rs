use std::time::Duration;

use {
    tokio::{
        task::JoinHandle,
        time::{Instant, MissedTickBehavior},
    },
    tracing::debug,
};

use crate::{client::BridgeClient, state::ClientState};

/// Ask for server status every `period` while authenticated. The task ends
/// once the client reaches [`ClientState::Stopped`]. A zero period disables
/// polling and the task returns at once.
pub fn spawn_status_poller(client: BridgeClient, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if period.is_zero() {
            debug!("status polling disabled");
            return;
        }
        let mut states = client.subscribe();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if client.is_authenticated()
                        && let Err(e) = client.request_status()
                    {
                        debug!(error = %e, "status request not sent");
                    }
                },
                changed = states.changed() => {
                    if changed.is_err() || *states.borrow() == ClientState::Stopped {
                        break;
                    }
                },
            }
        }
        debug!("status poller stopped");
    })
}
