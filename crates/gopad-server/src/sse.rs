//! Server-Sent Events bridging of session output records.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use futures_util::Stream;
use gopad_core::{ProgramOutput, Session};
use tokio::sync::mpsc;

/// Turn a session's output queue into an SSE event stream.
///
/// Records are forwarded in receive order; the stream ends after the first
/// terminal record (`done` or a non-empty `error`), when the queue closes,
/// or when the session's `done` signal fires with nothing left to drain.
pub fn record_stream(
    session: Arc<Session>,
    mut output_rx: mpsc::Receiver<ProgramOutput>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            let record = tokio::select! {
                biased;
                record = output_rx.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
                _ = session.done().cancelled() => break,
            };

            let terminal = record.is_terminal();
            match Event::default().json_data(&record) {
                Ok(event) => yield Ok(event),
                Err(err) => {
                    log::error!("failed to serialize output record: {}", err);
                    break;
                }
            }
            if terminal {
                break;
            }
        }
    }
}
