//! Session data as seen by the client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;
use crate::proto;
use crate::token::SessionToken;

/// Default page size of [`ListQuery`], matching the service's own default.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Client-side copy of a session held by the service. May be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: SessionToken,
    pub subject_id: String,
    pub subject_client: String,
    pub bag: HashMap<String, String>,
    /// `None` means the session never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
}

impl SessionRecord {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.bag.get(key).map(String::as_str)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Decode a session from a service reply.
    pub(crate) fn from_proto(session: proto::Session) -> SessionResult<Self> {
        Ok(Self {
            token: SessionToken::decode(session.access_token.as_bytes())?,
            subject_id: session.subject_id,
            subject_client: session.subject_client,
            bag: session.bag,
            expires_at: session.expire_at.and_then(datetime_from_timestamp),
            refresh_token: non_empty(session.refresh_token),
        })
    }
}

/// Parameters of a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSession {
    pub subject_id: String,
    pub subject_client: String,
    pub bag: HashMap<String, String>,
    pub refresh_token: Option<String>,
}

impl NewSession {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_subject_client(mut self, subject_client: impl Into<String>) -> Self {
        self.subject_client = subject_client.into();
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bag.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub(crate) fn to_proto(&self) -> proto::Session {
        proto::Session {
            subject_id: self.subject_id.clone(),
            subject_client: self.subject_client.clone(),
            bag: self.bag.clone(),
            refresh_token: self.refresh_token.clone().unwrap_or_default(),
            ..proto::Session::default()
        }
    }
}

/// Page of sessions to list, optionally filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub offset: i64,
    pub limit: i64,
    pub expire_at_from: Option<DateTime<Utc>>,
    pub expire_at_to: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIST_LIMIT,
            expire_at_from: None,
            expire_at_to: None,
            refresh_token: None,
        }
    }
}

impl ListQuery {
    pub(crate) fn to_proto(&self) -> proto::ListRequest {
        let has_filter = self.expire_at_from.is_some()
            || self.expire_at_to.is_some()
            || self.refresh_token.is_some();
        proto::ListRequest {
            offset: self.offset,
            limit: if self.limit <= 0 { DEFAULT_LIST_LIMIT } else { self.limit },
            query: has_filter.then(|| proto::Query {
                expire_at_from: self.expire_at_from.map(timestamp_from_datetime),
                expire_at_to: self.expire_at_to.map(timestamp_from_datetime),
                refresh_token: self.refresh_token.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Filter for bulk deletion. Set fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteQuery {
    pub token: Option<SessionToken>,
    pub expire_at_from: Option<DateTime<Utc>>,
    pub expire_at_to: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub subject_id: Option<String>,
}

impl DeleteQuery {
    pub fn by_token(token: SessionToken) -> Self {
        Self { token: Some(token), ..Self::default() }
    }

    pub fn by_subject(subject_id: impl Into<String>) -> Self {
        Self { subject_id: Some(subject_id.into()), ..Self::default() }
    }

    /// True when no filter is set; such a query would match every session.
    pub fn is_empty(&self) -> bool {
        self.token.is_none()
            && self.expire_at_from.is_none()
            && self.expire_at_to.is_none()
            && self.refresh_token.as_deref().is_none_or(str::is_empty)
            && self.subject_id.as_deref().is_none_or(str::is_empty)
    }

    pub(crate) fn to_proto(&self) -> proto::DeleteRequest {
        proto::DeleteRequest {
            access_token: self.token.as_ref().map(|t| t.as_str().to_string()).unwrap_or_default(),
            expire_at_from: self.expire_at_from.map(timestamp_from_datetime),
            expire_at_to: self.expire_at_to.map(timestamp_from_datetime),
            refresh_token: self.refresh_token.clone().unwrap_or_default(),
            subject_id: self.subject_id.clone().unwrap_or_default(),
        }
    }
}

pub(crate) fn timestamp_from_datetime(datetime: DateTime<Utc>) -> proto::Timestamp {
    proto::Timestamp {
        seconds: datetime.timestamp(),
        nanos: i32::try_from(datetime.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

pub(crate) fn datetime_from_timestamp(timestamp: proto::Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(timestamp.nanos).ok()?;
    DateTime::from_timestamp(timestamp.seconds, nanos)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
