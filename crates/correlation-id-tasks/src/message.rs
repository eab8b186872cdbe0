//! Task messages and the headers travelling with them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// String metadata carried alongside a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHeaders(BTreeMap<String, String>);

impl TaskHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value under `key`, treating an empty string as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A task as enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Queue-assigned task ID (hyphenated v4 UUID)
    pub id: String,
    pub name: String,
    pub headers: TaskHeaders,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            headers: TaskHeaders::new(),
            payload,
            published_at: Utc::now(),
        }
    }

    pub fn with_headers(mut self, headers: TaskHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Header value, treating an empty string as absent
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }
}
