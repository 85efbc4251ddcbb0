//! Test doubles shared by the monitor unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::container::{ContainerInspector, InspectError, InspectFuture};
use super::dispatch::ServerMessage;
use super::probe::{ProbeFailure, Transport, TransportFuture};
use super::registry::ClientSink;
use super::types::ServiceEndpoint;

/// One scripted transport reply.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status { code: u16, delay: Duration },
    Hang,
    Refuse,
}

impl Reply {
    pub(crate) fn status_after(code: u16, delay_ms: u64) -> Self {
        Reply::Status { code, delay: Duration::from_millis(delay_ms) }
    }
}

/// Transport that replays scripted replies per URL.
///
/// Replies are consumed front to back; the last one sticks and is repeated
/// for every later call.  Unscripted URLs are refused.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, url: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Instants at which `url` was requested.
    pub(crate) fn calls_to(&self, url: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, at)| *at)
            .collect()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Refuse),
            None => Reply::Refuse,
        }
    }
}

impl Transport for ScriptedTransport {
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        self.calls.lock().unwrap().push((url.to_string(), Instant::now()));
        let reply = self.next_reply(url);
        Box::pin(async move {
            match reply {
                Reply::Status { code, delay } => {
                    tokio::time::sleep(delay).await;
                    Ok(code)
                }
                Reply::Hang => std::future::pending().await,
                Reply::Refuse => Err(ProbeFailure::Connection("connection refused".into())),
            }
        })
    }
}

/// Scripted answer for one container.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Inspect {
    Running,
    Stopped,
    Fail,
    Hang,
}

/// Inspector with a fixed answer per container name; unknown names fail.
#[derive(Default)]
pub(crate) struct ScriptedInspector {
    answers: Mutex<HashMap<String, Inspect>>,
    inspected: Mutex<Vec<String>>,
}

impl ScriptedInspector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, container: &str, answer: Inspect) {
        self.answers.lock().unwrap().insert(container.to_string(), answer);
    }

    pub(crate) fn inspected(&self) -> Vec<String> {
        self.inspected.lock().unwrap().clone()
    }
}

impl ContainerInspector for ScriptedInspector {
    fn is_running<'a>(&'a self, container: &'a str) -> InspectFuture<'a> {
        self.inspected.lock().unwrap().push(container.to_string());
        let answer = self.answers.lock().unwrap().get(container).copied().unwrap_or(Inspect::Fail);
        Box::pin(async move {
            match answer {
                Inspect::Running => Ok(true),
                Inspect::Stopped => Ok(false),
                Inspect::Fail => Err(InspectError::Failed {
                    container: container.to_string(),
                    stderr: "No such object".into(),
                }),
                Inspect::Hang => std::future::pending().await,
            }
        })
    }
}

pub(crate) fn endpoint(name: &str, timeout_ms: u64) -> ServiceEndpoint {
    ServiceEndpoint::new(
        name,
        format!("http://{name}/health"),
        Duration::from_millis(timeout_ms),
        Duration::from_secs(1),
    )
}

/// A bounded channel sink plus its receiving end.
pub(crate) fn channel_sink(
    buffer: usize,
) -> (Arc<dyn ClientSink>, mpsc::Receiver<Arc<ServerMessage>>) {
    let (tx, rx) = mpsc::channel(buffer);
    (Arc::new(tx), rx)
}
