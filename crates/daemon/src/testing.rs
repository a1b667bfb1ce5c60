//! Test doubles shared by the daemon's unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use gridshim_common::{Error, Result, ScriptInvoker, ScriptOutput};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Canned answer of [`FakeInvoker`]
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, &'static str),
    Unreachable,
}

impl Reply {
    pub fn ok(body: &'static str) -> Self {
        Reply::Status(200, body)
    }
}

/// Script invoker that records calls and replays queued answers per script.
/// Once a script's queue is drained its fallback is used, or `Unreachable`.
#[derive(Default)]
pub struct FakeInvoker {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeInvoker {
    pub fn push(&self, script: &str, reply: Reply) -> &Self {
        self.queued
            .lock()
            .entry(script.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn always(&self, script: &str, reply: Reply) -> &Self {
        self.fallback.lock().insert(script.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }

    pub fn count(&self, script: &str) -> usize {
        self.calls.lock().iter().filter(|(name, _)| name == script).count()
    }
}

#[async_trait]
impl ScriptInvoker for FakeInvoker {
    async fn invoke(&self, name: &str, args: &[String], _timeout: Duration) -> Result<ScriptOutput> {
        self.calls.lock().push((name.to_string(), args.to_vec()));

        let queued = self.queued.lock().get_mut(name).and_then(|q| q.pop_front());
        let reply = queued
            .or_else(|| self.fallback.lock().get(name).cloned())
            .unwrap_or(Reply::Unreachable);

        match reply {
            Reply::Status(status, body) => Ok(ScriptOutput {
                status,
                body: Bytes::from_static(body.as_bytes()),
            }),
            Reply::Unreachable => Err(Error::Transport(format!("{}: connection refused", name))),
        }
    }
}
