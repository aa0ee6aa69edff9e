#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use quarry::api::{
    CallOptions, ClientConfig, Datastore, Error, ErrorKind, Method, RpcClient,
};
use serde_json::{Value as JsonValue, json};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

enum Step {
    Reply(Method, JsonValue),
    Fail(Method, ErrorKind, String),
    Hang(Method, Arc<AtomicBool>),
}

/// Sets its flag when the owning future is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Fake transport that replays scripted responses in order and records every call.
#[derive(Default)]
pub struct ScriptedRpc {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Method, JsonValue)>>,
}

impl ScriptedRpc {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn reply(&self, method: Method, response: JsonValue) {
        self.push(Step::Reply(method, response));
    }

    pub fn fail(&self, method: Method, kind: ErrorKind, message: &str) {
        self.push(Step::Fail(method, kind, message.to_string()));
    }

    /// Never answers; the returned flag flips once the pending call is dropped.
    pub fn hang(&self, method: Method) -> Arc<AtomicBool> {
        let dropped = Arc::new(AtomicBool::new(false));
        self.push(Step::Hang(method, Arc::clone(&dropped)));
        dropped
    }

    fn push(&self, step: Step) {
        self.steps.lock().expect("steps lock").push_back(step);
    }

    pub fn calls(&self) -> Vec<(Method, JsonValue)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn methods(&self) -> Vec<Method> {
        self.calls().into_iter().map(|(method, _)| method).collect()
    }

    pub fn request(&self, index: usize) -> JsonValue {
        self.calls()
            .get(index)
            .map(|(_, request)| request.clone())
            .expect("recorded request")
    }
}

#[async_trait]
impl RpcClient for ScriptedRpc {
    async fn invoke(
        &self,
        method: Method,
        request: JsonValue,
        _options: &CallOptions,
    ) -> Result<JsonValue, Error> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((method, request));
        let step = self.steps.lock().expect("steps lock").pop_front();
        match step {
            Some(Step::Reply(expected, response)) if expected == method => Ok(response),
            Some(Step::Fail(expected, kind, message)) if expected == method => {
                Err(Error::new(kind).with_message(message).with_method(method.as_str()))
            }
            Some(Step::Hang(expected, dropped)) if expected == method => {
                let _flag = DropFlag(dropped);
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            Some(_) => Err(Error::new(ErrorKind::Internal)
                .with_message(format!("unexpected {} call", method.as_str()))),
            None => Err(Error::new(ErrorKind::Internal)
                .with_message(format!("no scripted response for {}", method.as_str()))),
        }
    }
}

pub fn datastore(rpc: &Arc<ScriptedRpc>) -> Datastore {
    let transport: Arc<dyn RpcClient> = rpc.clone();
    Datastore::new(ClientConfig::new("demo"), transport).expect("datastore")
}

pub fn key_json(kind: &str, id: i64) -> JsonValue {
    json!({"path": [{"kind": kind, "id": id.to_string()}]})
}

pub fn entity_json(kind: &str, id: i64, title: &str) -> JsonValue {
    json!({
        "entity": {
            "key": key_json(kind, id),
            "properties": {"title": {"stringValue": title}}
        }
    })
}
