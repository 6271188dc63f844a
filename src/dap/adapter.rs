//! Inline debug adapter
//!
//! The host drives the session with DAP requests. Only `initialize` and
//! `disconnect` mean anything here; the adapter never answers, so every
//! other request is dropped after logging.

use std::sync::Arc;

use tokio::io::{AsyncRead, BufReader};

use super::codec;
use super::types::{InitializeArguments, RequestMessage};
use crate::common::Result;
use crate::controller::DebugSessionController;

/// Feed requests from `input` to `controller` until the host goes away
///
/// The controller is torn down and disposed when the stream ends.
pub async fn serve<R>(controller: Arc<DebugSessionController>, input: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(input);
    let result = pump(&controller, &mut reader).await;

    tracing::debug!("Adapter input closed");
    controller.teardown().await;
    controller.dispose();
    result
}

async fn pump<R>(controller: &DebugSessionController, reader: &mut BufReader<R>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(body) = codec::read_message(reader).await? {
        let request: RequestMessage = match serde_json::from_str(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed DAP message");
                continue;
            }
        };
        if !request.is_request() {
            continue;
        }

        tracing::debug!(seq = request.seq, command = %request.command, "DAP request");
        if request.command == "initialize" {
            let args: InitializeArguments = request
                .arguments
                .clone()
                .and_then(|args| serde_json::from_value(args).ok())
                .unwrap_or_default();
            let client = args.client_name.or(args.client_id);
            tracing::info!(
                client = client.as_deref().unwrap_or("unknown"),
                adapter = args.adapter_id.as_deref().unwrap_or("pcf"),
                "Host initialized the debug session"
            );
        }

        controller.handle_command(&request.command).await;
        if request.command == "disconnect" {
            break;
        }
    }
    Ok(())
}
