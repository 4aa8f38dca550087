//! In-process `mnemosynerpc.SessionManager` server for wire-level tests.
//!
//! [`TestService`] keeps sessions in memory and can be told to fail the next
//! calls of a method with a given [`Status`]. Every call records what the
//! server saw after [`SessionInterceptor`] ran.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mnemosyne_client::context::{ACCESS_TOKEN_METADATA_KEY, context_from_request};
use mnemosyne_client::proto;
use mnemosyne_client::proto::session_manager_server::{SessionManager, SessionManagerServer};
use mnemosyne_client::{ClientConfig, SessionInterceptor, SessionToken};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// What the server observed for one call.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: &'static str,
    /// Token of the context rebuilt by the interceptor.
    pub token: Option<SessionToken>,
    /// Time left on the propagated deadline when the call arrived.
    pub remaining: Option<Duration>,
    pub raw_token: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<String, proto::Session>,
    failures: HashMap<&'static str, VecDeque<Status>>,
    seen: Vec<Seen>,
    minted: u64,
}

/// Cloneable handle; clones share sessions, scripted failures and the log.
#[derive(Debug, Clone, Default)]
pub struct TestService {
    state: Arc<Mutex<State>>,
}

impl TestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` as if it had been started earlier.
    pub fn insert(&self, session: proto::Session) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(session.access_token.clone(), session);
        self
    }

    /// Fail the next `times` calls of `method` with `status`.
    pub fn fail_next(&self, method: &'static str, status: &Status, times: usize) -> &Self {
        let mut state = self.state.lock().unwrap();
        let queue = state.failures.entry(method).or_default();
        for _ in 0..times {
            queue.push_back(Status::new(status.code(), status.message()));
        }
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.state.lock().unwrap().seen.clone()
    }

    pub fn seen_count(&self, method: &str) -> usize {
        self.seen().iter().filter(|seen| seen.method == method).count()
    }

    pub fn contains(&self, access_token: &str) -> bool {
        self.state.lock().unwrap().sessions.contains_key(access_token)
    }

    /// Record the call and pop a scripted failure, if any.
    fn enter<T>(
        &self,
        method: &'static str,
        request: &Request<T>,
    ) -> Result<Option<SessionToken>, Status> {
        let ctx = context_from_request(request).map_err(|e| Status::internal(e.to_string()))?;
        let raw_token = request
            .metadata()
            .get(ACCESS_TOKEN_METADATA_KEY)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let mut state = self.state.lock().unwrap();
        state.seen.push(Seen {
            method,
            token: ctx.token().cloned(),
            remaining: ctx.remaining(),
            raw_token,
        });
        match state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(status) => Err(status),
            None => Ok(ctx.token().cloned()),
        }
    }

    fn lookup(&self, access_token: &str) -> Result<proto::Session, Status> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(access_token)
            .cloned()
            .ok_or_else(|| Status::not_found("session does not exist"))
    }
}

#[tonic::async_trait]
impl SessionManager for TestService {
    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> Result<Response<proto::GetResponse>, Status> {
        self.enter("get", &request)?;
        let session = self.lookup(&request.get_ref().access_token)?;
        Ok(Response::new(proto::GetResponse { session: Some(session) }))
    }

    async fn context(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<Response<proto::ContextResponse>, Status> {
        let token = self
            .enter("context", &request)?
            .ok_or_else(|| Status::unauthenticated("missing session token"))?;
        let session = self.lookup(token.as_str())?;
        Ok(Response::new(proto::ContextResponse { session: Some(session) }))
    }

    async fn list(
        &self,
        request: Request<proto::ListRequest>,
    ) -> Result<Response<proto::ListResponse>, Status> {
        self.enter("list", &request)?;
        let message = request.into_inner();
        let mut sessions: Vec<proto::Session> =
            self.state.lock().unwrap().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.access_token.cmp(&b.access_token));
        let sessions = sessions
            .into_iter()
            .skip(usize::try_from(message.offset).unwrap_or(0))
            .take(usize::try_from(message.limit).unwrap_or(0))
            .collect();
        Ok(Response::new(proto::ListResponse { sessions }))
    }

    async fn start(
        &self,
        request: Request<proto::StartRequest>,
    ) -> Result<Response<proto::StartResponse>, Status> {
        self.enter("start", &request)?;
        let mut session = request
            .into_inner()
            .session
            .ok_or_else(|| Status::invalid_argument("missing session"))?;
        let mut state = self.state.lock().unwrap();
        state.minted += 1;
        session.access_token = format!("0000000001{:08x}", state.minted);
        state.sessions.insert(session.access_token.clone(), session.clone());
        Ok(Response::new(proto::StartResponse { session: Some(session) }))
    }

    async fn touch(
        &self,
        request: Request<proto::TouchRequest>,
    ) -> Result<Response<proto::TouchResponse>, Status> {
        self.enter("touch", &request)?;
        let message = request.into_inner();
        let mut state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get_mut(&message.access_token)
            .ok_or_else(|| Status::not_found("session does not exist"))?;
        session.expire_at = message.expire_at;
        Ok(Response::new(proto::TouchResponse { session: Some(session.clone()) }))
    }

    async fn abandon(
        &self,
        request: Request<proto::AbandonRequest>,
    ) -> Result<Response<proto::BoolValue>, Status> {
        self.enter("abandon", &request)?;
        let removed = self.state.lock().unwrap().sessions.remove(&request.get_ref().access_token);
        Ok(Response::new(proto::BoolValue { value: removed.is_some() }))
    }

    async fn set_value(
        &self,
        request: Request<proto::SetValueRequest>,
    ) -> Result<Response<proto::SetValueResponse>, Status> {
        self.enter("set_value", &request)?;
        let message = request.into_inner();
        let mut state = self.state.lock().unwrap();
        let session = state
            .sessions
            .get_mut(&message.access_token)
            .ok_or_else(|| Status::not_found("session does not exist"))?;
        session.bag.insert(message.key, message.value);
        Ok(Response::new(proto::SetValueResponse { bag: session.bag.clone() }))
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::Int64Value>, Status> {
        self.enter("delete", &request)?;
        let message = request.into_inner();
        let mut state = self.state.lock().unwrap();
        let before = state.sessions.len();
        state.sessions.retain(|access_token, session| {
            let by_token =
                !message.access_token.is_empty() && *access_token == message.access_token;
            let by_subject =
                !message.subject_id.is_empty() && session.subject_id == message.subject_id;
            !(by_token || by_subject)
        });
        let removed = i64::try_from(before - state.sessions.len()).unwrap();
        Ok(Response::new(proto::Int64Value { value: removed }))
    }
}

/// Serve `service` on an ephemeral local port behind [`SessionInterceptor`].
pub async fn start_test_server(service: TestService) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        Server::builder()
            .add_service(SessionManagerServer::with_interceptor(service, SessionInterceptor))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("Test server failed");
    });

    addr
}

/// Client configuration pointing at a test server, with short backoff.
pub fn test_config(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig {
        address: format!("http://{addr}"),
        connect_timeout_ms: 1_000,
        ..ClientConfig::default()
    };
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    config
}
