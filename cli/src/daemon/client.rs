// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with the server API

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use aard_core::application::orchestrator::{WorkflowReport, WorkflowRequest};
use aard_core::domain::approval::ApprovalRequest;
use aard_core::domain::events::WorkflowEvent;
use aard_core::domain::prompt::{AssignmentScope, Prompt, PromptAssignment, ResolvedPrompt};
use aard_core::domain::registry::{CapabilityDescriptor, CapabilityFilter, RegistryEntry};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

/// Result of `POST /api/requests`
#[derive(Debug)]
pub enum Submission {
    Accepted(String),
    Finished(Box<WorkflowReport>),
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://{}:{}", host, port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        // No global timeout: synchronous requests wait for whole workflows
        let client = Client::builder().build().context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn is_healthy(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn submit(&self, request: &WorkflowRequest, wait: bool) -> Result<Submission> {
        let path = if wait { "/api/requests?wait=true" } else { "/api/requests" };
        let value: Value = self
            .send(self.client.post(self.url(path)).json(request), "submit request")
            .await?;

        if wait {
            let report = serde_json::from_value(value).context("Failed to parse workflow report")?;
            return Ok(Submission::Finished(Box::new(report)));
        }

        #[derive(Deserialize)]
        struct Accepted {
            workflow_id: String,
        }
        let accepted: Accepted = serde_json::from_value(value).context("Failed to parse submit response")?;
        Ok(Submission::Accepted(accepted.workflow_id))
    }

    pub async fn resume(&self, workflow_id: &str, answer: &str) -> Result<WorkflowReport> {
        let url = self.url(&format!("/api/workflows/{}/clarifications", workflow_id));
        self.send(self.client.post(url).json(&json!({"answer": answer})), "resume workflow")
            .await
    }

    pub async fn cancel(&self, workflow_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/workflows/{}/cancel", workflow_id));
        let _: Value = self.send(self.client.post(url), "cancel workflow").await?;
        Ok(())
    }

    pub async fn events(&self, workflow_id: Option<&str>, limit: usize) -> Result<Vec<WorkflowEvent>> {
        let url = match workflow_id {
            Some(id) => self.url(&format!("/api/events?workflow_id={}", id)),
            None => self.url(&format!("/api/events?limit={}", limit)),
        };
        self.send(self.client.get(url), "list events").await
    }

    pub async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>> {
        self.send(self.client.get(self.url("/api/approvals")), "list approvals")
            .await
    }

    pub async fn approve(&self, id: &str, actor: &str, comment: Option<&str>) -> Result<ApprovalRequest> {
        let url = self.url(&format!("/api/approvals/{}/approve", id));
        let body = json!({"actor": actor, "comment": comment});
        self.send(self.client.post(url).json(&body), "approve").await
    }

    pub async fn reject(&self, id: &str, actor: &str, reason: Option<&str>) -> Result<ApprovalRequest> {
        let url = self.url(&format!("/api/approvals/{}/reject", id));
        let body = json!({"actor": actor, "comment": reason});
        self.send(self.client.post(url).json(&body), "reject").await
    }

    pub async fn list_registry(&self, filter: &CapabilityFilter) -> Result<Vec<RegistryEntry>> {
        self.send(
            self.client.get(self.url("/api/registry")).query(filter),
            "list registry",
        )
        .await
    }

    pub async fn register(&self, descriptor: &CapabilityDescriptor) -> Result<String> {
        #[derive(Deserialize)]
        struct Registered {
            id: String,
        }
        let registered: Registered = self
            .send(self.client.post(self.url("/api/registry")).json(descriptor), "register entry")
            .await?;
        Ok(registered.id)
    }

    pub async fn set_entry_status(&self, name: &str, activate: bool) -> Result<RegistryEntry> {
        let action = if activate { "activate" } else { "deprecate" };
        let url = self.url(&format!("/api/registry/{}/{}", name, action));
        self.send(self.client.post(url), action).await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.send(self.client.get(self.url("/api/prompts")), "list prompts")
            .await
    }

    pub async fn register_prompt(&self, name: &str, role: &str, text: &str, created_by: Option<&str>) -> Result<Prompt> {
        let body = json!({"name": name, "component_role": role, "text": text, "created_by": created_by});
        self.send(self.client.post(self.url("/api/prompts")).json(&body), "register prompt")
            .await
    }

    pub async fn assign_prompt(
        &self,
        role: &str,
        scope: &AssignmentScope,
        prompt_id: &str,
        version: u32,
        assigned_by: Option<&str>,
    ) -> Result<PromptAssignment> {
        let body = json!({
            "component_role": role,
            "scope": scope,
            "prompt_id": prompt_id,
            "version": version,
            "assigned_by": assigned_by,
        });
        self.send(
            self.client.post(self.url("/api/prompts/assignments")).json(&body),
            "assign prompt",
        )
        .await
    }

    pub async fn resolve_prompt(
        &self,
        role: &str,
        agent_id: Option<&str>,
        experiment_id: Option<&str>,
    ) -> Result<ResolvedPrompt> {
        let mut query = vec![("role", role)];
        if let Some(agent_id) = agent_id {
            query.push(("agent_id", agent_id));
        }
        if let Some(experiment_id) = experiment_id {
            query.push(("experiment_id", experiment_id));
        }
        self.send(
            self.client.get(self.url("/api/prompts/resolve")).query(&query),
            "resolve prompt",
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, action: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to {}: is `aard serve` running at {}?", action, self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to {} ({}): {}", action, status, error_message(&text));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", action))
    }
}

/// `CODE: message` from an API error body, or the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            Some(format!(
                "{}: {}",
                error.get("code")?.as_str()?,
                error.get("message")?.as_str()?
            ))
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_api_error_body() {
        let body = r#"{"error": {"code": "REGISTRY_CONFLICT", "message": "'calendar' already registered"}}"#;
        assert_eq!(error_message(body), "REGISTRY_CONFLICT: 'calendar' already registered");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[tokio::test]
    async fn test_submit_without_wait_returns_workflow_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/requests")
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"workflow_id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427"}"#)
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        let submission = client.submit(&WorkflowRequest::new("book a room"), false).await.unwrap();

        mock.assert_async().await;
        assert!(matches!(submission, Submission::Accepted(id) if id.starts_with("1b4e28ba")));
    }

    #[tokio::test]
    async fn test_api_errors_surface_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/workflows/abc/cancel")
            .with_status(409)
            .with_body(r#"{"error": {"code": "INVALID_STATE", "message": "Workflow abc is already completed"}}"#)
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        let err = client.cancel("abc").await.unwrap_err();
        assert!(err.to_string().contains("INVALID_STATE"));
    }
}
