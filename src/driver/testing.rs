//! 테스트용 가짜 연결/풀/북마크 매니저와 로그 캡처

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use super::auth::{AuthToken, ServerAddress, ServerInfo};
use super::bookmarks::{BookmarkManager, Bookmarks};
use super::connection::{
    BeginRequest, BeginResponse, Connection, PullResponse, RunRequest, RunResponse,
};
use super::error::{DriverError, DriverResult};
use super::pool::{AcquireRequest, ConnectionPool, DatabaseCallback, RoutingTableRequest};
use super::telemetry::TelemetryApi;
use super::types::{Params, Value};

// ============================================================================
// CallLog
// ============================================================================

/// 기록된 호출
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    UpdateRoutingTable(RoutingTableRequest),
    Acquire(AcquireRequest),
    Release,
    ReAuth(Option<AuthToken>),
    Telemetry(TelemetryApi),
    Run(RunRequest),
    Pull(i64),
    Discard,
    Begin(BeginRequest),
    Commit,
    Rollback,
    Reset,
    GetBookmarks,
    UpdateBookmarks { previous: Bookmarks, new: Bookmarks },
}

impl Call {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Call::UpdateRoutingTable(_) => "update_routing_table",
            Call::Acquire(_) => "acquire",
            Call::Release => "release",
            Call::ReAuth(_) => "re_auth",
            Call::Telemetry(_) => "telemetry",
            Call::Run(_) => "run",
            Call::Pull(_) => "pull",
            Call::Discard => "discard",
            Call::Begin(_) => "begin",
            Call::Commit => "commit",
            Call::Rollback => "rollback",
            Call::Reset => "reset",
            Call::GetBookmarks => "get_bookmarks",
            Call::UpdateBookmarks { .. } => "update_bookmarks",
        }
    }
}

/// 풀/연결/매니저가 공유하는 호출 기록
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub(crate) fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.0.lock().iter().map(Call::name).collect()
    }

    /// 풀 수준 호출 이름만
    pub(crate) fn pool_names(&self) -> Vec<&'static str> {
        self.names()
            .into_iter()
            .filter(|n| matches!(*n, "update_routing_table" | "acquire" | "release"))
            .collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn runs(&self) -> Vec<RunRequest> {
        self.filter_map(|c| match c {
            Call::Run(request) => Some(request.clone()),
            _ => None,
        })
    }

    pub(crate) fn begins(&self) -> Vec<BeginRequest> {
        self.filter_map(|c| match c {
            Call::Begin(request) => Some(request.clone()),
            _ => None,
        })
    }

    pub(crate) fn acquires(&self) -> Vec<AcquireRequest> {
        self.filter_map(|c| match c {
            Call::Acquire(request) => Some(request.clone()),
            _ => None,
        })
    }

    pub(crate) fn routing_requests(&self) -> Vec<RoutingTableRequest> {
        self.filter_map(|c| match c {
            Call::UpdateRoutingTable(request) => Some(request.clone()),
            _ => None,
        })
    }

    pub(crate) fn telemetry(&self) -> Vec<TelemetryApi> {
        self.filter_map(|c| match c {
            Call::Telemetry(api) => Some(*api),
            _ => None,
        })
    }

    pub(crate) fn bookmark_updates(&self) -> Vec<(Bookmarks, Bookmarks)> {
        self.filter_map(|c| match c {
            Call::UpdateBookmarks { previous, new } => Some((previous.clone(), new.clone())),
            _ => None,
        })
    }

    pub(crate) fn clear(&self) {
        self.0.lock().clear();
    }

    fn filter_map<T>(&self, f: impl Fn(&Call) -> Option<T>) -> Vec<T> {
        self.0.lock().iter().filter_map(f).collect()
    }
}

// ============================================================================
// Behavior - 가짜 서버 응답
// ============================================================================

/// 실패를 주입할 연산
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Acquire,
    Telemetry,
    Run,
    Pull,
    Discard,
    Begin,
    Commit,
    Rollback,
}

/// 가짜 서버 동작
#[derive(Debug)]
pub(crate) struct Behavior {
    pub(crate) keys: Vec<String>,
    pub(crate) records: Vec<Vec<Value>>,
    /// 자동 커밋 완료/커밋 시 돌려줄 북마크
    pub(crate) bookmark: Option<String>,
    /// RUN/BEGIN/완료 메타데이터의 db
    pub(crate) database: Option<String>,
    pub(crate) failures: Mutex<VecDeque<(Op, DriverError)>>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            keys: vec!["n".to_string()],
            records: vec![vec![Value::Integer(1)]],
            bookmark: Some("res:bm1".to_string()),
            database: None,
            failures: Mutex::new(VecDeque::new()),
        }
    }
}

impl Behavior {
    /// 해당 연산의 다음 호출을 실패시킴
    pub(crate) fn fail_next(&self, op: Op, err: DriverError) {
        self.failures.lock().push_back((op, err));
    }

    fn check(&self, op: Op) -> DriverResult<()> {
        let mut failures = self.failures.lock();
        match failures.iter().position(|(o, _)| *o == op) {
            Some(i) => match failures.remove(i) {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

// ============================================================================
// FakeConnection
// ============================================================================

#[derive(Debug)]
pub(crate) struct FakeConnection {
    log: CallLog,
    behavior: Arc<Behavior>,
    cursor: Option<usize>,
    in_tx: bool,
}

impl FakeConnection {
    pub(crate) fn new(log: CallLog, behavior: Arc<Behavior>) -> Self {
        Self {
            log,
            behavior,
            cursor: None,
            in_tx: false,
        }
    }

    fn completion(&self) -> Params {
        let mut metadata = Params::new();
        metadata.insert("type".into(), Value::from("r"));
        metadata.insert("t_last".into(), Value::Integer(2));
        if let Some(db) = &self.behavior.database {
            metadata.insert("db".into(), Value::from(db.as_str()));
        }
        if !self.in_tx {
            if let Some(bookmark) = &self.behavior.bookmark {
                metadata.insert("bookmark".into(), Value::from(bookmark.as_str()));
            }
        }
        metadata
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            address: ServerAddress::new("localhost", 7687),
            agent: "Neo4j/5.13.0".to_string(),
            protocol_version: "5.4".to_string(),
        }
    }

    async fn re_auth(&mut self, auth: Option<&AuthToken>) -> DriverResult<()> {
        self.log.push(Call::ReAuth(auth.cloned()));
        Ok(())
    }

    async fn telemetry(&mut self, api: TelemetryApi) -> DriverResult<()> {
        self.log.push(Call::Telemetry(api));
        self.behavior.check(Op::Telemetry)
    }

    async fn run(&mut self, request: RunRequest) -> DriverResult<RunResponse> {
        self.log.push(Call::Run(request));
        self.behavior.check(Op::Run)?;
        self.cursor = Some(0);

        let mut metadata = Params::new();
        metadata.insert("t_first".into(), Value::Integer(1));
        Ok(RunResponse {
            keys: self.behavior.keys.clone(),
            database: self.behavior.database.clone(),
            metadata,
        })
    }

    async fn pull(&mut self, n: i64) -> DriverResult<PullResponse> {
        self.log.push(Call::Pull(n));
        self.behavior.check(Op::Pull)?;
        let cursor = self
            .cursor
            .ok_or_else(|| DriverError::protocol("PULL without an open stream"))?;

        let total = self.behavior.records.len();
        let remaining = total - cursor;
        let take = if n < 0 {
            remaining
        } else {
            remaining.min(n as usize)
        };
        let records = self.behavior.records[cursor..cursor + take].to_vec();
        let next = cursor + take;

        if next < total {
            self.cursor = Some(next);
            Ok(PullResponse {
                records,
                has_more: true,
                metadata: Params::new(),
            })
        } else {
            self.cursor = None;
            Ok(PullResponse {
                records,
                has_more: false,
                metadata: self.completion(),
            })
        }
    }

    async fn discard(&mut self) -> DriverResult<PullResponse> {
        self.log.push(Call::Discard);
        self.behavior.check(Op::Discard)?;
        self.cursor = None;
        Ok(PullResponse {
            records: Vec::new(),
            has_more: false,
            metadata: self.completion(),
        })
    }

    async fn begin(&mut self, request: BeginRequest) -> DriverResult<BeginResponse> {
        self.log.push(Call::Begin(request));
        self.behavior.check(Op::Begin)?;
        self.in_tx = true;
        Ok(BeginResponse {
            database: self.behavior.database.clone(),
        })
    }

    async fn commit(&mut self) -> DriverResult<Option<String>> {
        self.log.push(Call::Commit);
        self.behavior.check(Op::Commit)?;
        self.in_tx = false;
        Ok(self.behavior.bookmark.clone())
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        self.log.push(Call::Rollback);
        self.behavior.check(Op::Rollback)?;
        self.in_tx = false;
        Ok(())
    }

    async fn reset(&mut self) -> DriverResult<()> {
        self.log.push(Call::Reset);
        self.cursor = None;
        self.in_tx = false;
        Ok(())
    }
}

// ============================================================================
// FakePool
// ============================================================================

#[derive(Debug)]
pub(crate) struct FakePool {
    log: CallLog,
    behavior: Arc<Behavior>,
    routing: bool,
    home_database: Option<String>,
}

impl FakePool {
    pub(crate) fn direct(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            log: CallLog::default(),
            behavior: Arc::new(behavior),
            routing: false,
            home_database: None,
        })
    }

    pub(crate) fn routing(behavior: Behavior, home_database: &str) -> Arc<Self> {
        Arc::new(Self {
            log: CallLog::default(),
            behavior: Arc::new(behavior),
            routing: true,
            home_database: Some(home_database.to_string()),
        })
    }

    pub(crate) fn log(&self) -> &CallLog {
        &self.log
    }

    pub(crate) fn behavior(&self) -> &Behavior {
        &self.behavior
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    async fn acquire(&self, request: AcquireRequest) -> DriverResult<Box<dyn Connection>> {
        self.log.push(Call::Acquire(request));
        self.behavior.check(Op::Acquire)?;
        Ok(Box::new(FakeConnection::new(
            self.log.clone(),
            Arc::clone(&self.behavior),
        )))
    }

    async fn release(&self, _connection: Box<dyn Connection>) {
        self.log.push(Call::Release);
    }

    fn is_routing(&self) -> bool {
        self.routing
    }

    async fn update_routing_table(
        &self,
        request: RoutingTableRequest,
        database_callback: Option<DatabaseCallback<'_>>,
    ) -> DriverResult<()> {
        self.log.push(Call::UpdateRoutingTable(request));
        if let (Some(callback), Some(db)) = (database_callback, &self.home_database) {
            callback(db.clone());
        }
        Ok(())
    }
}

// ============================================================================
// RecordingBookmarkManager
// ============================================================================

/// 호출을 기록하는 북마크 매니저
///
/// 고정값이 없으면 n번째 호출에 `{"mgr:n"}`을 돌려줍니다.
#[derive(Debug)]
pub(crate) struct RecordingBookmarkManager {
    log: CallLog,
    fixed: Option<Bookmarks>,
    calls: AtomicUsize,
}

impl RecordingBookmarkManager {
    pub(crate) fn numbered(log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fixed: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn fixed(log: &CallLog, bookmarks: Bookmarks) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fixed: Some(bookmarks),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BookmarkManager for RecordingBookmarkManager {
    async fn get_bookmarks(&self) -> DriverResult<Bookmarks> {
        self.log.push(Call::GetBookmarks);
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match &self.fixed {
            Some(bookmarks) => bookmarks.clone(),
            None => Bookmarks::from_raw([format!("mgr:{}", n)]),
        })
    }

    async fn update_bookmarks(&self, previous: &Bookmarks, new: &Bookmarks) -> DriverResult<()> {
        self.log.push(Call::UpdateBookmarks {
            previous: previous.clone(),
            new: new.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// LogCapture - tracing 이벤트 캡처
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct CapturedEvent {
    pub(crate) level: Level,
    pub(crate) target: String,
    pub(crate) message: String,
}

/// 현재 스레드의 tracing 이벤트를 모으는 Layer
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<CapturedEvent>>>);

impl LogCapture {
    /// 스레드 기본 subscriber로 설치 (guard가 살아 있는 동안)
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub(crate) fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().clone()
    }

    pub(crate) fn warnings(&self, target: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level == Level::WARN && e.target == target)
            .map(|e| e.message)
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.0,
        });
    }
}
