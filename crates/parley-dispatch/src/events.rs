use crate::router::SessionRouter;
use parley_channels::TransportEvent;
use parley_core::{ParleyError, ParleyResult};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Consumes transport events until the stream is closed and empty.
///
/// Returns an error on authentication failure, which is fatal for the relay.
pub async fn run_event_loop(
    events: &mut mpsc::Receiver<TransportEvent>,
    router: &SessionRouter,
) -> ParleyResult<()> {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::QrReady(code) => {
                info!(qr = %code, "Pairing code received; scan it with your phone");
            }
            TransportEvent::Authenticated => info!("Transport authenticated"),
            TransportEvent::AuthFailed(reason) => {
                error!(%reason, "Transport authentication failed");
                return Err(ParleyError::Auth(reason));
            }
            TransportEvent::Ready => info!("Transport ready, waiting for messages"),
            TransportEvent::MessageReceived(msg) => {
                info!(sender = %msg.sender_id, "Message received: {}", msg.log_summary());
                router.route(msg);
            }
        }
    }

    info!("Transport event stream closed");
    Ok(())
}
