//! Supabase conversation store.
//!
//! Talks to PostgREST (`/rest/v1/<table>`) and GoTrue (`/auth/v1`) over
//! plain HTTPS with the project's publishable key.

use super::{Conversation, ConversationStore, ConversationSummary};
use crate::config::SupabaseConfig;
use crate::core::error::EspejoError;
use crate::providers::base_client::HttpClient;
use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimal PostgREST client shared by the conversation store and the agent
/// registry.
#[derive(Clone)]
pub struct SupabaseClient {
    http: HttpClient,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Result<Self, EspejoError> {
        let headers = HashMap::from([
            ("apikey".to_string(), config.key.clone()),
            ("Authorization".to_string(), format!("Bearer {}", config.key)),
        ]);
        let http = HttpClient::new(config.url.clone(), Some(REQUEST_TIMEOUT), Some(headers))?;
        Ok(Self { http })
    }

    fn table_path(table: &str) -> String {
        format!("rest/v1/{}", table)
    }

    async fn check(response: Response, action: &str) -> Result<Response, EspejoError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(EspejoError::Storage(format!(
            "Supabase {} failed ({}): {}",
            action, status, body
        )))
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, EspejoError> {
        let response = self
            .http
            .get(&Self::table_path(table), query)
            .await
            .map_err(|e| EspejoError::Storage(format!("Supabase select failed: {}", e)))?;
        let response = Self::check(response, "select").await?;
        response
            .json()
            .await
            .map_err(|e| EspejoError::Storage(format!("Failed to parse Supabase response: {}", e)))
    }

    pub async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        row: &T,
        on_conflict: &str,
    ) -> Result<(), EspejoError> {
        let response = self
            .http
            .send(
                Method::POST,
                &Self::table_path(table),
                &[("on_conflict", on_conflict)],
                &[("Prefer", "resolution=merge-duplicates,return=minimal")],
                Some(row),
            )
            .await
            .map_err(|e| EspejoError::Storage(format!("Supabase upsert failed: {}", e)))?;
        Self::check(response, "upsert").await?;
        Ok(())
    }

    pub async fn delete(&self, table: &str, query: &[(&str, &str)]) -> Result<(), EspejoError> {
        let response = self
            .http
            .delete(&Self::table_path(table), query)
            .await
            .map_err(|e| EspejoError::Storage(format!("Supabase delete failed: {}", e)))?;
        Self::check(response, "delete").await?;
        Ok(())
    }

    /// Creates an anonymous user and returns its id.
    pub async fn sign_in_anonymously(&self) -> Result<String, EspejoError> {
        let response = self
            .http
            .post("auth/v1/signup", &[], &serde_json::json!({}))
            .await
            .map_err(|e| EspejoError::Storage(format!("Anonymous sign-in failed: {}", e)))?;
        let response = Self::check(response, "anonymous sign-in").await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EspejoError::Storage(format!("Failed to parse sign-in response: {}", e)))?;

        let id = body
            .pointer("/user/id")
            .or_else(|| body.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| EspejoError::Storage("Sign-in response carried no user id".to_string()))?;
        info!("Signed in anonymously to Supabase");
        Ok(id.to_string())
    }
}

pub struct SupabaseStore {
    client: SupabaseClient,
    table: String,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub fn from_config(config: &SupabaseConfig) -> Result<Self, EspejoError> {
        Ok(Self::new(
            SupabaseClient::new(config)?,
            config.conversations_table.clone(),
        ))
    }
}

#[async_trait]
impl ConversationStore for SupabaseStore {
    async fn save(&self, conversation: &Conversation) -> Result<(), EspejoError> {
        self.client.upsert(&self.table, conversation, "id").await?;
        debug!(id = %conversation.id, "Saved conversation to Supabase");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Conversation, EspejoError> {
        let filter = format!("eq.{}", id);
        let rows: Vec<Conversation> = self
            .client
            .select(&self.table, &[("select", "*"), ("id", filter.as_str())])
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| EspejoError::NotFound(format!("conversation {}", id)))
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<ConversationSummary>, EspejoError> {
        let owner_filter = owner_id.map(|owner| format!("eq.{}", owner));
        let mut query = vec![("select", "id,title,updatedAt"), ("order", "updatedAt.desc")];
        if let Some(filter) = owner_filter.as_deref() {
            query.push(("ownerId", filter));
        }
        self.client.select(&self.table, &query).await
    }

    async fn delete(&self, id: &str) -> Result<(), EspejoError> {
        let filter = format!("eq.{}", id);
        self.client.delete(&self.table, &[("id", filter.as_str())]).await
    }
}
