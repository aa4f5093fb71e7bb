//! Query Result - 지연 레코드 스트림
//!
//! RUN 이후 PULL을 fetch_size 단위로 나누어 보내며 레코드를 흘려보냅니다.
//! 자동 커밋 결과는 스트림이 끝나는 순간 세션에 작업 단위 완료를 알립니다.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::{self, Stream};
use parking_lot::Mutex;

use super::auth::ServerInfo;
use super::bookmarks::Bookmarks;
use super::connection::{PullResponse, RunRequest};
use super::error::{DriverError, DriverResult};
use super::record::Record;
use super::session::{connected, Query, SessionCore};
use super::transaction::TxCore;
use super::types::Value;

// ============================================================================
// ResultSummary - 결과 요약
// ============================================================================

/// 결과 요약
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSummary {
    /// 실행한 쿼리
    pub query: Query,
    /// 쿼리 타입
    pub query_type: Option<QueryType>,
    /// 카운터
    pub counters: Counters,
    /// 첫 레코드까지 걸린 서버 시간
    pub result_available_after: Option<Duration>,
    /// 스트림 소비까지 걸린 서버 시간
    pub result_consumed_after: Option<Duration>,
    /// 실행 데이터베이스
    pub database: Option<String>,
    /// 서버 정보
    pub server: Option<ServerInfo>,
    /// 알림
    pub notifications: Vec<Notification>,
    /// 작업 단위가 만든 북마크
    pub bookmark: Option<String>,
}

impl ResultSummary {
    /// RUN/PULL 메타데이터로부터 생성
    pub(crate) fn from_metadata(
        query: Query,
        server: Option<ServerInfo>,
        run: &HashMap<String, Value>,
        done: &HashMap<String, Value>,
    ) -> Self {
        let millis = |map: &HashMap<String, Value>, key: &str| {
            map.get(key)
                .and_then(Value::as_int)
                .and_then(|ms| u64::try_from(ms).ok())
                .map(Duration::from_millis)
        };
        let text = |key: &str| {
            done.get(key)
                .or_else(|| run.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Self {
            query,
            query_type: done
                .get("type")
                .and_then(Value::as_str)
                .and_then(QueryType::from_code),
            counters: done
                .get("stats")
                .and_then(Value::as_map)
                .map(Counters::from_stats)
                .unwrap_or_default(),
            result_available_after: millis(run, "t_first"),
            result_consumed_after: millis(done, "t_last"),
            database: text("db"),
            server,
            notifications: done
                .get("notifications")
                .and_then(Value::as_list)
                .map(|items| items.iter().filter_map(Notification::from_value).collect())
                .unwrap_or_default(),
            bookmark: done
                .get("bookmark")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// 쿼리 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// 읽기 전용 ("r")
    ReadOnly,
    /// 읽기/쓰기 ("rw")
    ReadWrite,
    /// 쓰기 전용 ("w")
    WriteOnly,
    /// 스키마 변경 ("s")
    SchemaWrite,
}

impl QueryType {
    /// 서버 표기에서 변환
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            "w" => Some(Self::WriteOnly),
            "s" => Some(Self::SchemaWrite),
            _ => None,
        }
    }
}

/// 카운터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// 생성된 노드 수
    pub nodes_created: i64,
    /// 삭제된 노드 수
    pub nodes_deleted: i64,
    /// 생성된 관계 수
    pub relationships_created: i64,
    /// 삭제된 관계 수
    pub relationships_deleted: i64,
    /// 설정된 속성 수
    pub properties_set: i64,
    /// 추가된 레이블 수
    pub labels_added: i64,
    /// 제거된 레이블 수
    pub labels_removed: i64,
    /// 생성된 인덱스 수
    pub indexes_added: i64,
    /// 제거된 인덱스 수
    pub indexes_removed: i64,
    /// 추가된 제약조건 수
    pub constraints_added: i64,
    /// 제거된 제약조건 수
    pub constraints_removed: i64,
    /// 시스템 업데이트 수
    pub system_updates: i64,
}

impl Counters {
    fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let get = |key: &str| stats.get(key).and_then(Value::as_int).unwrap_or(0);
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
            system_updates: get("system-updates"),
        }
    }

    /// 변경 사항 존재 여부
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
            || self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }

    /// 시스템 변경 존재 여부
    pub fn contains_system_updates(&self) -> bool {
        self.system_updates > 0
    }
}

/// 서버 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// 코드
    pub code: String,
    /// 제목
    pub title: String,
    /// 설명
    pub description: String,
    /// 심각도
    pub severity: String,
    /// 분류
    pub category: String,
    /// 위치
    pub position: Option<InputPosition>,
}

impl Notification {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let position = map.get("position").and_then(Value::as_map).map(|p| {
            let get = |key: &str| p.get(key).and_then(Value::as_int).unwrap_or(0);
            InputPosition {
                offset: get("offset"),
                line: get("line"),
                column: get("column"),
            }
        });
        Some(Self {
            code: text("code"),
            title: text("title"),
            description: text("description"),
            severity: text("severity"),
            category: text("category"),
            position,
        })
    }
}

/// 입력 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPosition {
    /// 오프셋
    pub offset: i64,
    /// 라인
    pub line: i64,
    /// 컬럼
    pub column: i64,
}

// ============================================================================
// ResultCore - 결과 상태 (세션/트랜잭션과 공유)
// ============================================================================

/// 결과가 속한 작업 단위
pub(crate) enum ResultOrigin {
    /// 자동 커밋: 전송한 북마크를 기억했다가 완료 시 갱신에 사용
    ///
    /// `pin_database`가 false면 (실행별 db 지정) 서버가 알려준 db를 세션에 고정하지 않음
    AutoCommit {
        bookmarks: Bookmarks,
        pin_database: bool,
    },
    /// 명시적/관리 트랜잭션
    Transaction(Weak<TxCore>),
}

struct ResultState {
    buffer: VecDeque<Record>,
    streaming: bool,
    summary: Option<ResultSummary>,
    consumed: bool,
    failure: Option<String>,
    out_of_scope: Option<&'static str>,
}

impl ResultState {
    fn check_usable(&self) -> DriverResult<()> {
        if let Some(reason) = self.out_of_scope {
            return Err(DriverError::result_consumed(reason));
        }
        if self.consumed {
            return Err(DriverError::result_consumed(
                "The result has been consumed. Fetch all needed records before calling consume()",
            ));
        }
        if let Some(failure) = &self.failure {
            return Err(DriverError::result_consumed(format!(
                "The result failed earlier: {}",
                failure
            )));
        }
        Ok(())
    }
}

pub(crate) struct ResultCore {
    session: Arc<SessionCore>,
    query: Query,
    keys: Arc<[String]>,
    server: Option<ServerInfo>,
    run_metadata: HashMap<String, Value>,
    origin: ResultOrigin,
    state: Mutex<ResultState>,
}

impl ResultCore {
    /// RUN 전송 후 첫 PULL까지 수행
    pub(crate) async fn start(
        session: &Arc<SessionCore>,
        request: RunRequest,
        origin: ResultOrigin,
    ) -> DriverResult<Arc<ResultCore>> {
        let query = Query {
            text: request.query.clone(),
            parameters: request.parameters.clone(),
            metadata: request.tx_metadata.clone(),
            timeout: request.tx_timeout,
        };

        let started = {
            let mut slot = session.connection().await;
            match connected(&mut slot) {
                Ok(conn) => {
                    let server = conn.server_info();
                    conn.run(request).await.map(|response| (server, response))
                }
                Err(err) => Err(err),
            }
        };
        let (server, response) = match started {
            Ok(started) => started,
            Err(err) => {
                origin.abort(session).await;
                return Err(err);
            }
        };

        if origin.pins_database() {
            session.pin_database(response.database.as_deref());
        }

        let core = Arc::new(ResultCore {
            session: Arc::clone(session),
            query,
            keys: response.keys.into(),
            server: Some(server),
            run_metadata: response.metadata,
            origin,
            state: Mutex::new(ResultState {
                buffer: VecDeque::new(),
                streaming: true,
                summary: None,
                consumed: false,
                failure: None,
                out_of_scope: None,
            }),
        });
        core.fetch_more().await?;
        Ok(core)
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    fn is_open(&self) -> bool {
        self.state.lock().check_usable().is_ok()
    }

    /// 다음 배치 PULL
    async fn fetch_more(&self) -> DriverResult<()> {
        let pulled = {
            let mut slot = self.session.connection().await;
            match connected(&mut slot) {
                Ok(conn) => conn.pull(self.session.fetch_size()).await,
                Err(err) => Err(err),
            }
        };
        match pulled {
            Ok(response) => self.absorb(response).await,
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    async fn absorb(&self, response: PullResponse) -> DriverResult<()> {
        let PullResponse {
            records,
            has_more,
            metadata,
        } = response;
        {
            let mut state = self.state.lock();
            let keys = &self.keys;
            state
                .buffer
                .extend(records.into_iter().map(|values| Record::new(Arc::clone(keys), values)));
        }
        if has_more {
            Ok(())
        } else {
            self.finish(metadata).await
        }
    }

    /// 스트림 종료 처리 (한 번만)
    async fn finish(&self, metadata: HashMap<String, Value>) -> DriverResult<()> {
        let summary = ResultSummary::from_metadata(
            self.query.clone(),
            self.server.clone(),
            &self.run_metadata,
            &metadata,
        );
        {
            let mut state = self.state.lock();
            if !state.streaming {
                return Ok(());
            }
            state.streaming = false;
            state.summary = Some(summary.clone());
        }

        match &self.origin {
            ResultOrigin::AutoCommit { bookmarks, .. } => {
                if self.origin.pins_database() {
                    self.session.pin_database(summary.database.as_deref());
                }
                let updated = match summary.bookmark.as_deref() {
                    Some(bookmark) => self.session.update_bookmarks(bookmarks, bookmark).await,
                    None => Ok(()),
                };
                self.session.end_unit().await;
                updated
            }
            ResultOrigin::Transaction(_) => Ok(()),
        }
    }

    /// 스트림 실패 처리
    async fn fail(&self, err: &DriverError) {
        {
            let mut state = self.state.lock();
            if !state.streaming {
                return;
            }
            state.streaming = false;
            state.failure = Some(err.to_string());
        }
        self.origin.abort(&self.session).await;
    }

    pub(crate) async fn next(&self) -> DriverResult<Option<Record>> {
        loop {
            {
                let mut state = self.state.lock();
                state.check_usable()?;
                if let Some(record) = state.buffer.pop_front() {
                    return Ok(Some(record));
                }
                if !state.streaming {
                    return Ok(None);
                }
            }
            self.fetch_more().await?;
        }
    }

    async fn peek(&self) -> DriverResult<Option<Record>> {
        loop {
            {
                let state = self.state.lock();
                state.check_usable()?;
                if let Some(record) = state.buffer.front() {
                    return Ok(Some(record.clone()));
                }
                if !state.streaming {
                    return Ok(None);
                }
            }
            self.fetch_more().await?;
        }
    }

    /// 남은 레코드를 모두 버퍼에 적재
    pub(crate) async fn buffer_all(&self) -> DriverResult<()> {
        while self.is_streaming() {
            self.fetch_more().await?;
        }
        Ok(())
    }

    /// 남은 레코드를 서버에서 버림
    async fn discard_rest(&self) -> DriverResult<()> {
        if !self.is_streaming() {
            return Ok(());
        }
        let discarded = {
            let mut slot = self.session.connection().await;
            match connected(&mut slot) {
                Ok(conn) => conn.discard().await,
                Err(err) => Err(err),
            }
        };
        match discarded {
            Ok(response) => self.finish(response.metadata).await,
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    pub(crate) async fn consume(&self) -> DriverResult<ResultSummary> {
        {
            let state = self.state.lock();
            if let Some(reason) = state.out_of_scope {
                return Err(DriverError::result_consumed(reason));
            }
            if state.consumed {
                if let Some(summary) = &state.summary {
                    return Ok(summary.clone());
                }
            }
        }

        self.discard_rest().await?;

        let mut state = self.state.lock();
        state.buffer.clear();
        state.consumed = true;
        match (&state.summary, &state.failure) {
            (Some(summary), _) => Ok(summary.clone()),
            (None, Some(failure)) => Err(DriverError::result_consumed(format!(
                "The result failed earlier: {}",
                failure
            ))),
            (None, None) => Err(DriverError::result_consumed("The result has no summary")),
        }
    }

    /// 트랜잭션 종료로 결과를 무효화
    pub(crate) async fn end_of_transaction(&self, committing: bool) -> DriverResult<()> {
        let discarded = if committing {
            self.discard_rest().await
        } else {
            self.state.lock().streaming = false;
            Ok(())
        };
        let mut state = self.state.lock();
        state.buffer.clear();
        state.out_of_scope = Some(if committing {
            "The result is out of scope. The associated transaction has been committed"
        } else {
            "The result is out of scope. The associated transaction has been closed"
        });
        discarded
    }
}

impl ResultOrigin {
    fn pins_database(&self) -> bool {
        matches!(
            self,
            ResultOrigin::AutoCommit {
                pin_database: true,
                ..
            }
        )
    }

    /// 실패한 작업 단위 정리
    async fn abort(&self, session: &SessionCore) {
        match self {
            ResultOrigin::AutoCommit { .. } => session.abort_unit().await,
            ResultOrigin::Transaction(tx) => {
                if let Some(tx) = tx.upgrade() {
                    tx.mark_failed();
                }
            }
        }
    }
}

// ============================================================================
// QueryResult - 쿼리 결과
// ============================================================================

/// 쿼리 결과
///
/// 레코드를 지연해서 가져옵니다. 자동 커밋 결과는 모두 소비되는 순간
/// 세션이 연결을 풀에 반환합니다.
pub struct QueryResult {
    core: Arc<ResultCore>,
}

impl QueryResult {
    pub(crate) fn new(core: Arc<ResultCore>) -> Self {
        Self { core }
    }

    /// 컬럼 키
    pub fn keys(&self) -> &[String] {
        self.core.keys()
    }

    /// 다음 레코드 (끝이면 None)
    pub async fn next(&mut self) -> DriverResult<Option<Record>> {
        self.core.next().await
    }

    /// 다음 레코드를 소비하지 않고 확인
    pub async fn peek(&mut self) -> DriverResult<Option<Record>> {
        self.core.peek().await
    }

    /// 정확히 하나의 레코드
    ///
    /// 나머지 레코드는 버려집니다.
    pub async fn single(&mut self) -> DriverResult<Record> {
        let first = self.core.next().await?;
        let second = match first {
            Some(_) => self.core.next().await?,
            None => None,
        };
        self.core.discard_rest().await?;

        match (first, second) {
            (Some(record), None) => Ok(record),
            (None, _) => Err(DriverError::result_not_single(
                "No records found. Make sure your query returns exactly one record",
            )),
            (Some(_), Some(_)) => Err(DriverError::result_not_single(
                "Expected a result with a single record, but found multiple",
            )),
        }
    }

    /// 남은 레코드 전부
    pub async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.core.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// 남은 레코드를 버리고 요약 반환
    pub async fn consume(&mut self) -> DriverResult<ResultSummary> {
        self.core.consume().await
    }

    /// 아직 읽을 수 있는지 여부
    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// 비동기 스트림으로 변환
    pub fn into_stream(self) -> impl Stream<Item = DriverResult<Record>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut result = state?;
            match result.next().await {
                Ok(Some(record)) => Some((Ok(record), Some(result))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("query", &self.core.query.text)
            .field("keys", &self.core.keys())
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// EagerResult - 한 번에 읽은 결과
// ============================================================================

/// 레코드와 요약을 모두 읽어 둔 결과
#[derive(Debug, Clone)]
pub struct EagerResult {
    /// 컬럼 키
    pub keys: Vec<String>,
    /// 레코드
    pub records: Vec<Record>,
    /// 요약
    pub summary: ResultSummary,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::session::{Session, SessionConfig};
    use crate::driver::testing::{Behavior, Call, FakePool, Op};
    use crate::params;
    use futures::StreamExt;

    fn behavior_with_records(n: i64) -> Behavior {
        Behavior {
            records: (1..=n).map(|i| vec![Value::Integer(i)]).collect(),
            ..Behavior::default()
        }
    }

    #[test]
    fn test_summary_from_metadata() {
        let run = params! { "t_first" => 3 };
        let notification = params! {
            "code" => "Neo.ClientNotification.Statement.UnknownLabelWarning",
            "title" => "Unknown label",
            "description" => "Label 'Foo' does not exist",
            "severity" => "WARNING",
            "category" => "UNRECOGNIZED",
            "position" => Value::Map(params! { "offset" => 10, "line" => 1, "column" => 11 }),
        };
        let done = params! {
            "type" => "rw",
            "t_last" => 7,
            "db" => "neo4j",
            "bookmark" => "bm:42",
            "stats" => Value::Map(params! { "nodes-created" => 2, "system-updates" => 1 }),
            "notifications" => Value::List(vec![Value::Map(notification)]),
        };

        let summary = ResultSummary::from_metadata(Query::new("CREATE (n)"), None, &run, &done);
        assert_eq!(summary.query.text, "CREATE (n)");
        assert_eq!(summary.query_type, Some(QueryType::ReadWrite));
        assert_eq!(summary.counters.nodes_created, 2);
        assert!(summary.counters.contains_updates());
        assert!(summary.counters.contains_system_updates());
        assert_eq!(summary.result_available_after, Some(Duration::from_millis(3)));
        assert_eq!(summary.result_consumed_after, Some(Duration::from_millis(7)));
        assert_eq!(summary.database.as_deref(), Some("neo4j"));
        assert_eq!(summary.bookmark.as_deref(), Some("bm:42"));

        let n = &summary.notifications[0];
        assert_eq!(n.severity, "WARNING");
        assert_eq!(n.category, "UNRECOGNIZED");
        assert_eq!(
            n.position,
            Some(InputPosition {
                offset: 10,
                line: 1,
                column: 11
            })
        );
    }

    #[test]
    fn test_query_type_codes() {
        assert_eq!(QueryType::from_code("r"), Some(QueryType::ReadOnly));
        assert_eq!(QueryType::from_code("w"), Some(QueryType::WriteOnly));
        assert_eq!(QueryType::from_code("s"), Some(QueryType::SchemaWrite));
        assert_eq!(QueryType::from_code("x"), None);
    }

    #[tokio::test]
    async fn test_records_pulled_in_batches() {
        let pool = FakePool::direct(behavior_with_records(5));
        let mut session = Session::new(pool.clone(), SessionConfig::new().with_fetch_size(2));

        let mut result = session.run("UNWIND range(1, 5) AS n RETURN n", None).await.unwrap();
        assert_eq!(result.keys(), ["n".to_string()]);

        let records = result.collect().await.unwrap();
        let values: Vec<i64> = records.iter().map(|r| r.get_int("n").unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);

        let pulls: Vec<i64> = pool
            .log()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Pull(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(pulls, vec![2, 2, 2]);
        assert!(!session.has_connection());
        session.close().await;
    }

    #[tokio::test]
    async fn test_consume_discards_remaining() {
        let pool = FakePool::direct(behavior_with_records(10));
        let mut session = Session::new(pool.clone(), SessionConfig::new().with_fetch_size(3));

        let mut result = session.run("RETURN 1", None).await.unwrap();
        assert_eq!(result.next().await.unwrap().unwrap().get_int("n").unwrap(), 1);

        let summary = result.consume().await.unwrap();
        assert_eq!(summary.bookmark.as_deref(), Some("res:bm1"));
        assert_eq!(pool.log().count(|c| matches!(c, Call::Discard)), 1);
        assert!(!result.is_open());
        assert!(matches!(result.next().await, Err(DriverError::ResultConsumed(_))));

        // 두 번째 consume은 같은 요약을 돌려줌
        assert_eq!(result.consume().await.unwrap(), summary);
        assert!(!session.has_connection());
        session.close().await;
    }

    #[tokio::test]
    async fn test_peek_and_single() {
        let pool = FakePool::direct(behavior_with_records(1));
        let mut session = Session::new(pool.clone(), SessionConfig::default());

        let mut result = session.run("RETURN 1 AS n", None).await.unwrap();
        let peeked = result.peek().await.unwrap().unwrap();
        let single = result.single().await.unwrap();
        assert_eq!(peeked.values(), single.values());

        let pool = FakePool::direct(behavior_with_records(3));
        let mut session = Session::new(pool.clone(), SessionConfig::default());
        let mut result = session.run("UNWIND [1,2,3] AS n RETURN n", None).await.unwrap();
        assert!(matches!(result.single().await, Err(DriverError::ResultNotSingle(_))));

        let pool = FakePool::direct(behavior_with_records(0));
        let mut session = Session::new(pool.clone(), SessionConfig::default());
        let mut result = session.run("RETURN 1 LIMIT 0", None).await.unwrap();
        assert!(matches!(result.single().await, Err(DriverError::ResultNotSingle(_))));
        assert!(!session.has_connection());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let pool = FakePool::direct(behavior_with_records(4));
        let mut session = Session::new(pool.clone(), SessionConfig::new().with_fetch_size(3));

        let result = session.run("RETURN n", None).await.unwrap();
        let values: Vec<i64> = result
            .into_stream()
            .map(|r| r.unwrap().get_int("n").unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert!(!session.has_connection());
    }

    #[tokio::test]
    async fn test_pull_failure_releases_connection() {
        let pool = FakePool::direct(behavior_with_records(5));
        let mut session = Session::new(pool.clone(), SessionConfig::new().with_fetch_size(2));

        let mut result = session.run("RETURN n", None).await.unwrap();
        pool.behavior().fail_next(
            Op::Pull,
            DriverError::server("Neo.DatabaseError.General.UnknownError", "boom"),
        );

        assert!(result.next().await.unwrap().is_some());
        assert!(result.next().await.unwrap().is_some());
        let err = result.next().await.unwrap_err();
        assert_eq!(err.code(), Some("Neo.DatabaseError.General.UnknownError"));
        assert!(!session.has_connection());
        assert!(matches!(result.next().await, Err(DriverError::ResultConsumed(_))));

        let calls = pool.log().names();
        let reset = calls.iter().position(|c| *c == "reset").unwrap();
        let release = calls.iter().position(|c| *c == "release").unwrap();
        assert!(reset < release);
    }
}
