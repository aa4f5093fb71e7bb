//! Bookmarks - 인과적 일관성 토큰
//!
//! 서버가 작업 단위 완료 시 돌려주는 북마크 집합과
//! 세션 간 북마크를 공유하는 BookmarkManager 정의

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::ops::Add;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::DriverResult;

// ============================================================================
// Bookmarks - 북마크 집합
// ============================================================================

/// 불변 북마크 집합
///
/// 동등성과 합집합은 집합 기준이며 순서와 중복은 의미가 없습니다.
/// 마지막으로 넣은 값만 따로 기억합니다 (`latest`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmarks {
    values: BTreeSet<String>,
    #[serde(skip)]
    latest: Option<String>,
}

impl PartialEq for Bookmarks {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Bookmarks {}

impl Hash for Bookmarks {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl Bookmarks {
    /// 빈 집합
    pub fn empty() -> Self {
        Self::default()
    }

    /// 원시 문자열에서 생성
    pub fn from_raw<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        let mut latest = None;
        for value in values {
            let value: String = value.into();
            latest = Some(value.clone());
            set.insert(value);
        }
        Self {
            values: set,
            latest,
        }
    }

    /// 가장 최근에 넣은 북마크
    pub fn latest(&self) -> Option<&str> {
        self.latest.as_deref()
    }

    /// 원시 문자열 목록
    pub fn raw_values(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.iter().map(String::as_str)
    }

    /// 원시 문자열 Vec으로 변환
    pub fn into_raw(self) -> Vec<String> {
        self.values.into_iter().collect()
    }

    /// 북마크 개수
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 빈 집합 여부
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 포함 여부
    pub fn contains(&self, bookmark: &str) -> bool {
        self.values.contains(bookmark)
    }

    /// 합집합
    pub fn union(&self, other: &Bookmarks) -> Bookmarks {
        Bookmarks {
            values: self.values.union(&other.values).cloned().collect(),
            latest: other.latest.clone().or_else(|| self.latest.clone()),
        }
    }

    /// 차집합
    pub fn difference(&self, other: &Bookmarks) -> Bookmarks {
        let values: BTreeSet<String> = self.values.difference(&other.values).cloned().collect();
        let latest = self.latest.clone().filter(|bm| values.contains(bm));
        Bookmarks { values, latest }
    }
}

impl Add for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: Bookmarks) -> Bookmarks {
        self.values.extend(rhs.values);
        if rhs.latest.is_some() {
            self.latest = rhs.latest;
        }
        self
    }
}

impl<'a> Add<&'a Bookmarks> for &'a Bookmarks {
    type Output = Bookmarks;

    fn add(self, rhs: &'a Bookmarks) -> Bookmarks {
        self.union(rhs)
    }
}

impl<S: Into<String>> FromIterator<S> for Bookmarks {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_raw(iter)
    }
}

impl<'a> IntoIterator for &'a Bookmarks {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

// ============================================================================
// BookmarkManager - 세션 간 북마크 관리
// ============================================================================

/// 세션 간 북마크 공급/병합 인터페이스
///
/// 여러 세션이 동시에 호출할 수 있으므로 구현체는 스레드 안전해야 합니다.
#[async_trait]
pub trait BookmarkManager: Send + Sync + Debug {
    /// 현재 북마크 조회
    async fn get_bookmarks(&self) -> DriverResult<Bookmarks>;

    /// 완료된 작업 단위의 북마크 반영
    ///
    /// `previous`는 작업에 사용된 북마크, `new`는 서버가 돌려준 북마크입니다.
    async fn update_bookmarks(&self, previous: &Bookmarks, new: &Bookmarks) -> DriverResult<()>;
}

/// 메모리 기반 기본 BookmarkManager
#[derive(Debug, Default)]
pub struct InMemoryBookmarkManager {
    bookmarks: Mutex<Bookmarks>,
}

impl InMemoryBookmarkManager {
    /// 초기 북마크로 생성
    pub fn new(initial: Bookmarks) -> Self {
        Self {
            bookmarks: Mutex::new(initial),
        }
    }

    /// 현재 북마크 스냅샷
    pub fn snapshot(&self) -> Bookmarks {
        self.bookmarks.lock().clone()
    }
}

#[async_trait]
impl BookmarkManager for InMemoryBookmarkManager {
    async fn get_bookmarks(&self) -> DriverResult<Bookmarks> {
        Ok(self.snapshot())
    }

    async fn update_bookmarks(&self, previous: &Bookmarks, new: &Bookmarks) -> DriverResult<()> {
        if new.is_empty() {
            return Ok(());
        }
        let mut current = self.bookmarks.lock();
        let updated = current.difference(previous).union(new);
        debug!(
            before = current.len(),
            after = updated.len(),
            "Bookmark manager updated"
        );
        *current = updated;
        Ok(())
    }
}
