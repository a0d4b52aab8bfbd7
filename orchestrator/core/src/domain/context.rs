// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Digital Twin Context Document
//!
//! Typed model of `Task.context`: a minimal required key set
//! (`original_user_request`, `metadata`) plus an open extension map. The document
//! serialises flat, so `{"original_user_request": .., "metadata": .., "plan": ..}`
//! is the wire shape.
//!
//! Mutation rules:
//!
//! - **merge**: top-level keys of the update overwrite, all other keys survive
//! - **replace**: the extension map is swapped wholesale; required keys and
//!   history lists are carried over
//! - **append**: history lists only grow; entries are `{type, timestamp, data}`
//!
//! `metadata` is owned by the document and may never appear in an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::domain::task::TaskId;

pub const ORIGINAL_USER_REQUEST: &str = "original_user_request";
pub const METADATA: &str = "metadata";

/// Keys the pipeline writes into the document
pub mod keys {
    pub const INTERPRETATION: &str = "interpretation";
    pub const ROUTING: &str = "routing";
    pub const PLAN: &str = "plan";
    pub const HISTORICAL_TODOS: &str = "historical_todos";
    pub const ARTIFACTS: &str = "artifacts";
    pub const CLARIFICATIONS: &str = "clarifications";
    pub const APPROVAL: &str = "approval";
    pub const REFLECTION: &str = "reflection";
    pub const CHECKPOINTS: &str = "checkpoints";
    pub const INTERACTION_HISTORY: &str = "interaction_history";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Context key '{0}' is reserved and cannot be updated")]
    ReservedKey(String),

    #[error("original_user_request must be a string")]
    InvalidOriginalRequest,

    #[error("Context key '{0}' is an append-only history list")]
    HistoryKey(String),

    #[error("Context key '{0}' exists and is not a history list")]
    NotAHistoryList(String),

    #[error("History type must not be empty")]
    EmptyHistoryType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every successful mutation
    #[serde(default)]
    pub revision: u64,
    /// Keys that hold append-only history lists
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub history_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub original_user_request: String,
    pub metadata: ContextMetadata,
    #[serde(flatten)]
    extensions: Map<String, Value>,
}

impl TaskContext {
    pub fn new(task_id: TaskId, original_user_request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            original_user_request: original_user_request.into(),
            metadata: ContextMetadata {
                task_id,
                created_at: now,
                updated_at: now,
                revision: 0,
                history_keys: BTreeSet::new(),
            },
            extensions: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    /// Shallow merge of top-level keys
    pub fn merge(&mut self, updates: Map<String, Value>) -> Result<(), ContextError> {
        let (request, rest) = self.split_updates(updates)?;
        if let Some(key) = rest.keys().find(|k| self.metadata.history_keys.contains(*k)) {
            return Err(ContextError::HistoryKey(key.clone()));
        }

        if let Some(request) = request {
            self.original_user_request = request;
        }
        for (key, value) in rest {
            self.extensions.insert(key, value);
        }
        self.touch();
        Ok(())
    }

    /// Full replacement of the open part of the document
    pub fn replace(&mut self, updates: Map<String, Value>) -> Result<(), ContextError> {
        let (request, mut rest) = self.split_updates(updates)?;
        if let Some(key) = rest.keys().find(|k| self.metadata.history_keys.contains(*k)) {
            return Err(ContextError::HistoryKey(key.clone()));
        }

        for key in &self.metadata.history_keys {
            if let Some(list) = self.extensions.get(key) {
                rest.insert(key.clone(), list.clone());
            }
        }
        if let Some(request) = request {
            self.original_user_request = request;
        }
        self.extensions = rest;
        self.touch();
        Ok(())
    }

    /// Append one `{type, timestamp, data}` record to the list named `history_type`
    pub fn append_history(&mut self, history_type: &str, data: Value) -> Result<HistoryEntry, ContextError> {
        if history_type.is_empty() {
            return Err(ContextError::EmptyHistoryType);
        }
        if history_type == METADATA || history_type == ORIGINAL_USER_REQUEST {
            return Err(ContextError::ReservedKey(history_type.to_string()));
        }

        let entry = HistoryEntry {
            entry_type: history_type.to_string(),
            timestamp: Utc::now(),
            data,
        };
        let record = serde_json::to_value(&entry).map_err(|_| ContextError::NotAHistoryList(history_type.to_string()))?;

        match self.extensions.get_mut(history_type) {
            Some(Value::Array(list)) => list.push(record),
            Some(_) => return Err(ContextError::NotAHistoryList(history_type.to_string())),
            None => {
                self.extensions
                    .insert(history_type.to_string(), Value::Array(vec![record]));
            }
        }
        self.metadata.history_keys.insert(history_type.to_string());
        self.touch();
        Ok(entry)
    }

    /// Entries of a history list, oldest first
    pub fn history(&self, history_type: &str) -> Vec<HistoryEntry> {
        match self.extensions.get(history_type) {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn split_updates(&self, mut updates: Map<String, Value>) -> Result<(Option<String>, Map<String, Value>), ContextError> {
        if updates.contains_key(METADATA) {
            return Err(ContextError::ReservedKey(METADATA.to_string()));
        }
        let request = match updates.remove(ORIGINAL_USER_REQUEST) {
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(ContextError::InvalidOriginalRequest),
            None => None,
        };
        Ok((request, updates))
    }

    fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
        self.metadata.revision += 1;
    }
}

/// A single change to the document, applied under the store's lock
#[derive(Debug, Clone)]
pub enum ContextMutation {
    Merge(Map<String, Value>),
    Replace(Map<String, Value>),
    AppendHistory { history_type: String, data: Value },
}

impl ContextMutation {
    pub fn update(updates: Map<String, Value>, merge: bool) -> Self {
        if merge {
            ContextMutation::Merge(updates)
        } else {
            ContextMutation::Replace(updates)
        }
    }

    pub fn history(history_type: impl Into<String>, data: Value) -> Self {
        ContextMutation::AppendHistory {
            history_type: history_type.into(),
            data,
        }
    }

    /// Convenience for a single-key merge
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(key.into(), value);
        ContextMutation::Merge(map)
    }

    pub fn apply(self, context: &mut TaskContext) -> Result<(), ContextError> {
        match self {
            ContextMutation::Merge(updates) => context.merge(updates),
            ContextMutation::Replace(updates) => context.replace(updates),
            ContextMutation::AppendHistory { history_type, data } => {
                context.append_history(&history_type, data).map(|_| ())
            }
        }
    }
}
