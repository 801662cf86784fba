use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::iface::IfaceRxReceiver;

use super::handler::TransportHandler;

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Transport event loop: drains interface rx frames one at a time and runs
/// the deadline sweep between them.
pub(super) async fn run(
    handler: Arc<Mutex<TransportHandler>>,
    mut rx_recv: IfaceRxReceiver,
    cancel: CancellationToken,
) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_message = rx_recv.recv() => {
                match maybe_message {
                    Some(message) => {
                        handler.lock().await.handle_inbound(
                            message.iface,
                            &message.raw,
                            Instant::now(),
                        );
                    }
                    None => break,
                }
            }
            _ = sweep.tick() => {
                handler.lock().await.sweep(Instant::now());
            }
        }
    }

    handler.lock().await.iface_manager.detach_all();
    log::debug!("tp: event loop stopped");
}
