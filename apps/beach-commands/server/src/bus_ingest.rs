use std::sync::Arc;

use beach_commands_core::{decode_request, encode_response, CommandResponse};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use transport_bus::{Bus, BusResult, Envelope};

use crate::dispatcher::{reject_undecodable, Dispatcher, ResponseSink, SinkError};

/// Answers a request envelope on the bus it came from.
struct BusReplySink {
    bus: Arc<dyn Bus>,
    request: Envelope,
}

impl ResponseSink for BusReplySink {
    fn send(&self, response: CommandResponse) -> Result<(), SinkError> {
        let payload = encode_response(&response)?;
        self.bus.send(self.request.reply(payload))?;
        Ok(())
    }
}

pub async fn ingest_envelope(bus: Arc<dyn Bus>, dispatcher: Dispatcher, envelope: Envelope) {
    let correlation_id = envelope.correlation_id;
    let mut request = match decode_request(&envelope.payload) {
        Ok(request) => request,
        Err(err) => {
            warn!(
                correlation_id,
                from = %envelope.from,
                error = %err,
                "rejecting undecodable command frame"
            );
            let response = reject_undecodable(
                correlation_id.to_string(),
                envelope.from.clone(),
                envelope.to.clone(),
                err.to_string(),
            );
            let sink = BusReplySink {
                bus,
                request: envelope,
            };
            if let Err(err) = sink.send(response) {
                warn!(correlation_id, error = %err, "failed to deliver command response");
            }
            return;
        }
    };
    // The bus knows who sent the frame; the payload only claims it.
    request.from = envelope.from.clone();
    request.to = envelope.to.clone();
    if request.id.is_empty() {
        request.id = envelope.correlation_id.to_string();
    }

    let sink = BusReplySink {
        bus,
        request: envelope,
    };
    if let Err(err) = dispatcher.handle_inbound_request(request, &sink).await {
        warn!(correlation_id, error = %err, "failed to deliver command response");
    }
}

/// Binds `address` on the bus and dispatches every inbound request on its
/// own task, so requests for different sessions never wait on each other.
pub fn start_bus_ingest(
    bus: Arc<dyn Bus>,
    address: &str,
    dispatcher: Dispatcher,
) -> BusResult<JoinHandle<()>> {
    let mut inbound = bus.bind(address)?;
    let address = address.to_string();
    Ok(tokio::spawn(async move {
        while let Some(envelope) = inbound.recv().await {
            tokio::spawn(ingest_envelope(bus.clone(), dispatcher.clone(), envelope));
        }
        debug!(address = %address, "command bus ingest stopped");
    }))
}
