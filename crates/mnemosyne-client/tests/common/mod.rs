//! Shared test utilities for mnemosyne client integration tests.
//!
//! [`FakeTransport`] is a scripted [`SessionTransport`]: replies are queued per
//! RPC method and every call is recorded for later assertions.

#![allow(dead_code)]

pub mod server;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mnemosyne_client::context::{ACCESS_TOKEN_METADATA_KEY, REQUEST_ID_METADATA_KEY};
use mnemosyne_client::proto;
use mnemosyne_client::{
    ClientConfig, SessionClient, SessionToken, SessionTransport, TransportError,
    TransportErrorKind,
};
use tokio::time::Instant;
use tonic::Request;

/// Scripted outcome of one remote call.
#[derive(Debug, Clone)]
pub enum Reply {
    Session(proto::Session),
    Sessions(Vec<proto::Session>),
    Bool(bool),
    Count(i64),
    Bag(HashMap<String, String>),
    Fail(TransportErrorKind),
}

/// One recorded remote call.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    /// Token sent in the `authorization` metadata.
    pub metadata_token: Option<String>,
    /// Raw `grpc-timeout` header.
    pub timeout: Option<String>,
    pub request_id: Option<String>,
    /// Token carried in the request message, if the message has one.
    pub access_token: String,
    pub at: Instant,
    pub request: RecordedRequest,
}

#[derive(Debug, Clone)]
pub enum RecordedRequest {
    Get(proto::GetRequest),
    Context,
    List(proto::ListRequest),
    Start(proto::StartRequest),
    Touch(proto::TouchRequest),
    Abandon(proto::AbandonRequest),
    SetValue(proto::SetValueRequest),
    Delete(proto::DeleteRequest),
}

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<&'static str, VecDeque<Reply>>,
    sticky: HashMap<&'static str, Reply>,
    calls: Vec<Call>,
}

/// Cloneable handle; clones share the script and the call log.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits `delay` before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply for the next unanswered call of `method`.
    pub fn push(&self, method: &'static str, reply: Reply) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.queued.entry(method).or_default().push_back(reply);
        self
    }

    /// Reply used for `method` once its queue is empty.
    pub fn always(&self, method: &'static str, reply: Reply) -> &Self {
        self.script.lock().unwrap().sticky.insert(method, reply);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }

    async fn answer<M>(
        &self,
        method: &'static str,
        request: &Request<M>,
        access_token: String,
        recorded: RecordedRequest,
    ) -> Reply {
        let header = |key: &str| {
            request.metadata().get(key).and_then(|v| v.to_str().ok()).map(ToString::to_string)
        };
        let call = Call {
            method,
            metadata_token: header(ACCESS_TOKEN_METADATA_KEY),
            timeout: header("grpc-timeout"),
            request_id: header(REQUEST_ID_METADATA_KEY),
            access_token,
            at: Instant::now(),
            request: recorded,
        };
        let reply = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call);
            script
                .queued
                .get_mut(method)
                .and_then(VecDeque::pop_front)
                .or_else(|| script.sticky.get(method).cloned())
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply.unwrap_or(Reply::Fail(TransportErrorKind::Unknown))
    }
}

fn failed(kind: TransportErrorKind) -> TransportError {
    TransportError::new(kind, format!("scripted {kind} failure"))
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> Result<proto::GetResponse, TransportError> {
        let message = request.get_ref().clone();
        let access_token = message.access_token.clone();
        match self.answer("get", &request, access_token, RecordedRequest::Get(message)).await {
            Reply::Session(session) => Ok(proto::GetResponse { session: Some(session) }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for get: {other:?}"),
        }
    }

    async fn context(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<proto::ContextResponse, TransportError> {
        match self.answer("context", &request, String::new(), RecordedRequest::Context).await {
            Reply::Session(session) => Ok(proto::ContextResponse { session: Some(session) }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for context: {other:?}"),
        }
    }

    async fn list(
        &self,
        request: Request<proto::ListRequest>,
    ) -> Result<proto::ListResponse, TransportError> {
        let message = request.get_ref().clone();
        match self.answer("list", &request, String::new(), RecordedRequest::List(message)).await {
            Reply::Sessions(sessions) => Ok(proto::ListResponse { sessions }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for list: {other:?}"),
        }
    }

    async fn start(
        &self,
        request: Request<proto::StartRequest>,
    ) -> Result<proto::StartResponse, TransportError> {
        let message = request.get_ref().clone();
        match self.answer("start", &request, String::new(), RecordedRequest::Start(message)).await
        {
            Reply::Session(session) => Ok(proto::StartResponse { session: Some(session) }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for start: {other:?}"),
        }
    }

    async fn touch(
        &self,
        request: Request<proto::TouchRequest>,
    ) -> Result<proto::TouchResponse, TransportError> {
        let message = request.get_ref().clone();
        let access_token = message.access_token.clone();
        match self.answer("touch", &request, access_token, RecordedRequest::Touch(message)).await {
            Reply::Session(session) => Ok(proto::TouchResponse { session: Some(session) }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for touch: {other:?}"),
        }
    }

    async fn abandon(
        &self,
        request: Request<proto::AbandonRequest>,
    ) -> Result<proto::BoolValue, TransportError> {
        let message = request.get_ref().clone();
        let access_token = message.access_token.clone();
        match self.answer("abandon", &request, access_token, RecordedRequest::Abandon(message)).await
        {
            Reply::Bool(value) => Ok(proto::BoolValue { value }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for abandon: {other:?}"),
        }
    }

    async fn set_value(
        &self,
        request: Request<proto::SetValueRequest>,
    ) -> Result<proto::SetValueResponse, TransportError> {
        let message = request.get_ref().clone();
        let access_token = message.access_token.clone();
        match self
            .answer("set_value", &request, access_token, RecordedRequest::SetValue(message))
            .await
        {
            Reply::Bag(bag) => Ok(proto::SetValueResponse { bag }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for set_value: {other:?}"),
        }
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<proto::Int64Value, TransportError> {
        let message = request.get_ref().clone();
        let access_token = message.access_token.clone();
        match self.answer("delete", &request, access_token, RecordedRequest::Delete(message)).await {
            Reply::Count(value) => Ok(proto::Int64Value { value }),
            Reply::Fail(kind) => Err(failed(kind)),
            other => panic!("unexpected reply for delete: {other:?}"),
        }
    }
}

/// A token shaped like the ones the service mints.
pub fn token(suffix: &str) -> SessionToken {
    SessionToken::new(format!("0000000001{suffix}")).unwrap()
}

/// Service reply for a session identified by `token`.
pub fn session(token: &SessionToken) -> proto::Session {
    proto::Session {
        access_token: token.as_str().to_string(),
        subject_id: "42".to_string(),
        subject_client: "test".to_string(),
        bag: HashMap::from([("lang".to_string(), "en".to_string())]),
        expire_at: Some(proto::Timestamp { seconds: 1_900_000_000, nanos: 0 }),
        refresh_token: String::new(),
    }
}

/// Client over `transport` with the default configuration.
pub fn client(transport: &FakeTransport) -> SessionClient<FakeTransport> {
    client_with_config(transport, &ClientConfig::default())
}

pub fn client_with_config(
    transport: &FakeTransport,
    config: &ClientConfig,
) -> SessionClient<FakeTransport> {
    init_tracing();
    SessionClient::new(transport.clone(), config)
}

/// Route client logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
