use super::handler::{DispatchEvent, Master};
use crate::server::telemetry::increment_requests;
use tokio::sync::mpsc;
use tranche_core::{Command, Frame, JobState, QueryRequest, Reply, Result};

/// Routes one decoded request frame to the coordinator.
///
/// Returns the reply to write back immediately, if any:
///
/// - `get` replies with a `start` frame holding the reserved pointer and the
///   job, or an error line.
/// - `start` has no immediate reply; per-worker outcomes arrive later on
///   `events`. Only a malformed body is answered right away.
/// - `cancel` blocks until the broadcast finishes and replies with a
///   [`tranche_core::CancelReport`] frame.
///
/// Unknown verbs and malformed bodies produce error lines and never end the
/// session.
pub async fn route(
    master: &Master,
    frame: Frame,
    events: &mpsc::Sender<DispatchEvent>,
) -> Option<Reply> {
    let command = match frame.command() {
        Ok(command) => command,
        Err(e) => return Some(e.into()),
    };
    increment_requests(command.as_str());

    let reply = match command {
        Command::Get => get(master, &frame.body),
        Command::Start => match JobState::from_body(&frame.body) {
            Ok(job) => {
                master.dispatch(job, events.clone());
                return None;
            }
            Err(e) => Err(e),
        },
        Command::Cancel => master.cancel().await.to_frame(),
    };

    Some(match reply {
        Ok(frame) => frame.into(),
        Err(e) => e.into(),
    })
}

fn get(master: &Master, body: &str) -> Result<Frame> {
    let request = QueryRequest::from_body(body)?;
    master.query(request.worker, request.state)?.to_frame()
}

/// Turns a dispatch outcome into what the caller should see. Successful
/// deliveries are silent. Errors that do not name their worker get a
/// `worker {n}:` prefix.
pub fn event_reply(event: &DispatchEvent) -> Option<Reply> {
    event.error().map(|e| match e.worker() {
        Some(_) => Reply::Error(e.to_string()),
        None => Reply::Error(format!("worker {}: {e}", event.worker)),
    })
}
