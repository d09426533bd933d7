//! Periodic server-status events.
//!
//! The binary's built-in event source.  Every `period` it emits one
//! `server-status` event carrying the process uptime, so authenticated peers
//! see a steady heartbeat even when nothing else is published.

use std::time::Duration;

use serde_json::json;
use sysadm_core::Event;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// Kind of every event produced here.
pub const STATUS_EVENT_KIND: &str = "server-status";

/// Starts the status feed.  The task ends once the receiver is dropped.
pub fn spawn_status_feed(period: Duration) -> (mpsc::Receiver<Event>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(8);
    let started = Instant::now();
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires at once; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let event = Event::new(
                STATUS_EVENT_KIND,
                json!({ "uptime_secs": started.elapsed().as_secs() }),
            );
            if tx.send(event).await.is_err() {
                debug!("status feed receiver gone; stopping");
                break;
            }
        }
    });
    (rx, task)
}
