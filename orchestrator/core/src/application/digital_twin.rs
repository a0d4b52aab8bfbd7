// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Digital Twin Store - Application Layer
//!
//! Owns reads and writes of `Task.context`. Every write goes through
//! [`TaskRepository::apply_context`], so the read-modify-write and the
//! persistence commit happen as one atomic step in the repository.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::context::{ContextMutation, HistoryEntry, TaskContext};
use crate::domain::pipeline::PipelineError;
use crate::domain::repository::TaskRepository;
use crate::domain::task::TaskId;

pub struct DigitalTwinStore {
    tasks: Arc<dyn TaskRepository>,
}

impl DigitalTwinStore {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    /// Current document, initialised on first access
    pub async fn get_context(&self, task_id: TaskId) -> Result<TaskContext, PipelineError> {
        let task = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Task {}", task_id)))?;

        match task.context() {
            Some(context) => Ok(context.clone()),
            // An empty merge initialises the document under the repository lock
            None => Ok(self.tasks.apply_context(task_id, ContextMutation::Merge(Map::new())).await?),
        }
    }

    /// Shallow-merge `updates` into the document, or replace it when `merge` is false
    pub async fn update_context(
        &self,
        task_id: TaskId,
        updates: Map<String, Value>,
        merge: bool,
    ) -> Result<TaskContext, PipelineError> {
        let keys: Vec<String> = updates.keys().cloned().collect();
        let context = self
            .tasks
            .apply_context(task_id, ContextMutation::update(updates, merge))
            .await?;
        debug!(task_id = %task_id, merge, keys = ?keys, revision = context.metadata.revision, "Context updated");
        Ok(context)
    }

    pub async fn set(&self, task_id: TaskId, key: &str, value: Value) -> Result<TaskContext, PipelineError> {
        Ok(self.tasks.apply_context(task_id, ContextMutation::set(key, value)).await?)
    }

    pub async fn add_to_history(
        &self,
        task_id: TaskId,
        history_type: &str,
        data: Value,
    ) -> Result<TaskContext, PipelineError> {
        let context = self
            .tasks
            .apply_context(task_id, ContextMutation::history(history_type, data))
            .await?;
        debug!(task_id = %task_id, history_type, "History entry appended");
        Ok(context)
    }

    pub async fn history(&self, task_id: TaskId, history_type: &str) -> Result<Vec<HistoryEntry>, PipelineError> {
        Ok(self.get_context(task_id).await?.history(history_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::keys;
    use crate::domain::task::{AutonomyLevel, Task};
    use crate::infrastructure::repositories::InMemoryTaskRepository;
    use serde_json::json;

    async fn store_with_task() -> (DigitalTwinStore, TaskId) {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let task = Task::new("Plan the offsite", AutonomyLevel::Supervised);
        repo.save(&task).await.unwrap();
        (DigitalTwinStore::new(repo), task.id)
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_get_context_initialises_required_keys() {
        let (store, id) = store_with_task().await;
        let context = store.get_context(id).await.unwrap();
        assert_eq!(context.original_user_request, "Plan the offsite");
        assert_eq!(context.metadata.task_id, id);

        let value = context.to_value();
        assert!(value.get("original_user_request").is_some());
        assert!(value["metadata"].get("task_id").is_some());
    }

    #[tokio::test]
    async fn test_successive_merges_are_shallow_and_ordered() {
        let (store, id) = store_with_task().await;
        store
            .update_context(id, obj(json!({"a": {"x": 1}, "b": 1})), true)
            .await
            .unwrap();
        store.update_context(id, obj(json!({"a": {"y": 2}, "c": 3})), true).await.unwrap();

        let context = store.get_context(id).await.unwrap();
        assert_eq!(context.get("a"), Some(&json!({"y": 2})));
        assert_eq!(context.get("b"), Some(&json!(1)));
        assert_eq!(context.get("c"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_history_grows_by_one_and_keeps_prior_entries() {
        let (store, id) = store_with_task().await;
        store.add_to_history(id, keys::APPROVAL, json!({"by": "ops"})).await.unwrap();
        let before = store.history(id, keys::APPROVAL).await.unwrap();

        store
            .add_to_history(id, keys::APPROVAL, json!({"by": "lead"}))
            .await
            .unwrap();
        let after = store.history(id, keys::APPROVAL).await.unwrap();

        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after[1].data, json!({"by": "lead"}));
    }

    #[tokio::test]
    async fn test_replace_keeps_required_keys_and_history() {
        let (store, id) = store_with_task().await;
        store.set(id, keys::PLAN, json!({"goal": "x"})).await.unwrap();
        store.add_to_history(id, keys::HISTORICAL_TODOS, json!({"v": 1})).await.unwrap();

        let context = store.update_context(id, obj(json!({"routing": []})), false).await.unwrap();
        assert!(context.get(keys::PLAN).is_none());
        assert_eq!(context.history(keys::HISTORICAL_TODOS).len(), 1);
        assert_eq!(context.original_user_request, "Plan the offsite");
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (store, _) = store_with_task().await;
        let err = store.get_context(TaskId::new()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
