//! Cooperative poll loop around [`Connector::tick`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{info, trace};

use crate::clock::{Clock, SystemClock};
use crate::connector::Connector;
use crate::engine::TickOutcome;
use crate::transport::Transport;

/// Drives a connector until shutdown.
///
/// The connector sits behind an async mutex so the host can queue writes
/// and read values between ticks. Every tick holds the lock for one
/// transaction at most.
pub struct PollScheduler<T, C = SystemClock> {
    connector: Arc<Mutex<Connector<T, C>>>,
    idle_delay: Duration,
}

impl<T: Transport, C: Clock> PollScheduler<T, C> {
    pub fn new(connector: Connector<T, C>, idle_delay: Duration) -> Self {
        Self {
            connector: Arc::new(Mutex::new(connector)),
            idle_delay,
        }
    }

    /// Shared handle to the connector.
    pub fn connector(&self) -> Arc<Mutex<Connector<T, C>>> {
        Arc::clone(&self.connector)
    }

    /// Run one unit of work.
    pub async fn tick(&self) -> TickOutcome {
        self.connector.lock().await.tick().await
    }

    /// Start the connector and tick until `shutdown` turns true, then stop
    /// it. A transaction in flight is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.connector.lock().await.start();
        info!(idle_delay_ms = self.idle_delay.as_millis() as u64, "Poll loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick().await;
            trace!(?outcome, "Tick");

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.idle_delay) => {}
            }
        }

        self.connector.lock().await.stop();
        info!("Poll loop stopped");
    }
}
