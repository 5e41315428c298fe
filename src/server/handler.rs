//! Request handlers invoked once per received message.

use crate::protocol::{Request, Response};
use crate::transport::MessageWriter;
use std::future::Future;
use tracing::{trace, warn};

/// Caller-supplied message handler.
///
/// Receives the raw message and the connection it arrived on; any reply is
/// written by the handler itself.
pub trait Handler: Send + Sync + 'static {
    fn handle<W: MessageWriter>(
        &self,
        conn: &mut W,
        message: String,
    ) -> impl Future<Output = ()> + Send;
}

/// Answers each request with its sum and product
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticHandler;

impl Handler for ArithmeticHandler {
    async fn handle<W: MessageWriter>(&self, conn: &mut W, message: String) {
        let request = match Request::decode(&message) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Ignoring invalid request");
                return;
            }
        };

        let response = Response::compute(&request);
        trace!(?request, ?response, "Processing request");

        let reply = match response.encode() {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Failed to encode response");
                return;
            }
        };

        if let Err(e) = conn.write(reply).await {
            warn!(error = %e, "Failed to send response");
        }
    }
}
