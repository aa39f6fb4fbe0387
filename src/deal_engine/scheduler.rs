//! Recurring run trigger

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::deal_engine::{DealEngine, Trigger};

/// Run the pipeline every `every`, starting one period from now.
///
/// The startup run is issued separately, so the immediate first tick is skipped.
pub fn spawn(engine: Arc<DealEngine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("📅 Running scheduled deal fetch");
            engine.run_once(Trigger::Schedule).await;
        }
    })
}
