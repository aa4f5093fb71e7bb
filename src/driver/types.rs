//! Driver Types
//!
//! 쿼리 파라미터와 결과 값 타입 정의

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};

// ============================================================================
// Value - 파라미터/레코드 값
// ============================================================================

/// 파라미터 및 레코드 값 타입
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (i64)
    Integer(i64),
    /// Float (f64)
    Float(f64),
    /// String
    String(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Map
    Map(HashMap<String, Value>),
    /// Date
    Date(NaiveDate),
    /// LocalTime
    LocalTime(NaiveTime),
    /// DateTime
    DateTime(DateTime<FixedOffset>),
    /// LocalDateTime
    LocalDateTime(NaiveDateTime),
}

impl Value {
    /// Null 여부
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean으로 변환
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer로 변환
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Float로 변환 (Integer 포함)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String으로 변환
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// List로 변환
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map으로 변환
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// 타입 이름
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Date(_) => "Date",
            Value::LocalTime(_) => "LocalTime",
            Value::DateTime(_) => "DateTime",
            Value::LocalDateTime(_) => "LocalDateTime",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Date(d) => write!(f, "{}", d),
            Value::LocalTime(t) => write!(f, "{}", t),
            Value::DateTime(dt) => write!(f, "{}", dt),
            Value::LocalDateTime(dt) => write!(f, "{}", dt),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Boolean,
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Float,
    String => String,
    &str => String,
    NaiveDate => Date,
    NaiveTime => LocalTime,
    DateTime<FixedOffset> => DateTime,
    NaiveDateTime => LocalDateTime,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

fn conversion_error(value: &Value, target: &str) -> DriverError {
    DriverError::type_conversion(format!(
        "Cannot convert {} to {}",
        value.type_name(),
        target
    ))
}

impl TryFrom<Value> for bool {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| conversion_error(&value, "bool"))
    }
}

impl TryFrom<Value> for i64 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_int().ok_or_else(|| conversion_error(&value, "i64"))
    }
}

impl TryFrom<Value> for f64 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_float().ok_or_else(|| conversion_error(&value, "f64"))
    }
}

impl TryFrom<Value> for String {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(conversion_error(&other, "String")),
        }
    }
}

// ============================================================================
// Params - 쿼리 파라미터
// ============================================================================

/// 쿼리 파라미터 맵
pub type Params = HashMap<String, Value>;

/// 파라미터 맵 생성 매크로
///
/// ```
/// use bolt_session::params;
///
/// let p = params! { "x" => 1, "name" => "Alice" };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Params::new();
        $(
            map.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        map
    }};
}

/// 파라미터 병합
///
/// 위치 파라미터 맵과 키워드 파라미터를 합친다. 같은 키는 키워드 값이 이긴다.
pub fn merge_parameters(positional: Option<Params>, keyword: Params) -> Params {
    let mut merged = positional.unwrap_or_default();
    merged.extend(keyword);
    merged
}

// ============================================================================
// RunOverrides - 예약 키
// ============================================================================

/// 쿼리 파라미터에서 분리되는 예약 키
pub const RESERVED_KEYS: [&str; 5] = ["timeout", "imp_user", "impersonated_user", "db", "database"];

/// 예약 키에서 추출한 실행 설정
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    /// 트랜잭션 타임아웃
    pub timeout: Option<Duration>,
    /// 가장 사용자
    pub impersonated_user: Option<String>,
    /// 데이터베이스
    pub database: Option<String>,
}

impl RunOverrides {
    /// 설정된 값이 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.impersonated_user.is_none() && self.database.is_none()
    }
}

/// 병합된 파라미터 맵에서 예약 키를 제거하고 실행 설정으로 반환
///
/// `timeout`은 초 단위 숫자, 나머지는 문자열이어야 한다. Null은 미설정으로 본다.
pub fn extract_reserved(params: &mut Params) -> DriverResult<RunOverrides> {
    let mut overrides = RunOverrides::default();

    if let Some(value) = params.remove("timeout") {
        overrides.timeout = timeout_from_value(&value)?;
    }
    for key in ["imp_user", "impersonated_user"] {
        if let Some(value) = params.remove(key) {
            if let Some(user) = string_from_value(key, value)? {
                overrides.impersonated_user = Some(user);
            }
        }
    }
    for key in ["db", "database"] {
        if let Some(value) = params.remove(key) {
            if let Some(db) = string_from_value(key, value)? {
                overrides.database = Some(db);
            }
        }
    }

    Ok(overrides)
}

fn timeout_from_value(value: &Value) -> DriverResult<Option<Duration>> {
    if value.is_null() {
        return Ok(None);
    }
    let secs = value.as_float().ok_or_else(|| {
        DriverError::invalid_type(format!("timeout must be a number, got {}", value.type_name()))
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(DriverError::invalid_argument(format!(
            "timeout must be a non-negative number of seconds, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
        DriverError::invalid_argument(format!("timeout is out of range, got {}", secs))
    })
}

fn string_from_value(key: &str, value: Value) -> DriverResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(DriverError::invalid_type(format!(
            "{} must be a string, got {}",
            key,
            other.type_name()
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
