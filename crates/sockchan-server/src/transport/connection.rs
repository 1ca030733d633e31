//! Per-client request loop.
//!
//! Requests on one connection are handled in arrival order, one at a time,
//! so responses leave in the same order the requests came in.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use sockchan_core::error::ErrorCode;
use sockchan_core::protocol::{FrameReader, FrameWriter, Request};

use crate::app_state::AppState;
use crate::dispatch::RequestKind;

/// Serve one client until it disconnects, sends a bad frame, or `shutdown`
/// changes.
pub async fn serve_connection<S>(
    state: AppState,
    stream: S,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_frame_bytes = state.cfg().server.max_frame_bytes;
    let delay = state.cfg().server.processing_delay();
    let dispatcher = state.dispatcher();
    let metrics = state.metrics();

    let (read, write) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read, max_frame_bytes);
    let mut writer = FrameWriter::new(write, max_frame_bytes);

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::debug!(%peer, "closing connection for shutdown");
                break;
            }
            res = reader.read_frame::<Request>() => res,
        };

        let req = match next {
            Ok(Some(req)) => req,
            Ok(None) => {
                tracing::debug!(%peer, "peer closed the connection");
                break;
            }
            Err(e) => {
                if e.code() == ErrorCode::Protocol {
                    metrics.decode_errors.inc(&[]);
                }
                tracing::warn!(%peer, error = %e, "read failed, closing connection");
                break;
            }
        };

        tracing::debug!(
            %peer,
            id = %req.id,
            seq = req.sequence,
            retry = req.retry_count,
            kind = %req.msg_type,
            "request received"
        );

        // Delay, dispatch and write all yield to shutdown.
        let handled = async {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let resp = dispatcher.dispatch(&req).await;
            let kind = RequestKind::parse(&req.msg_type)
                .map(RequestKind::as_str)
                .unwrap_or("unknown");
            let outcome = if resp.success { "ok" } else { "error" };
            metrics.requests.inc(&[("kind", kind), ("outcome", outcome)]);
            metrics
                .dispatch_duration
                .observe(&[("kind", kind)], started.elapsed());

            writer.write_frame(&resp).await
        };

        let written = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::debug!(%peer, id = %req.id, "closing connection for shutdown, request dropped");
                break;
            }
            res = handled => res,
        };
        if let Err(e) = written {
            tracing::warn!(%peer, id = %req.id, error = %e, "write failed, closing connection");
            break;
        }
    }
}
