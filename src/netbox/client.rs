use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::types::PaginatedResponse;
use super::{Endpoint, InventoryClient, InventoryError, Query};

/// Page size requested on every list call
const PAGE_LIMIT: &str = "1000";

/// NetBox API client
pub struct NetBoxClient {
    base_url: String,
    token: String,
    client: Client,
}

impl NetBoxClient {
    pub fn new(url: &str, token: &str, timeout_secs: u64) -> Result<Self, InventoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| InventoryError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    /// Test connectivity to NetBox
    pub async fn test_connection(&self) -> bool {
        match self
            .client
            .get(self.api_url("/dcim/sites/?limit=1"))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Turn a non-success response into the matching error
    async fn check(endpoint: Endpoint, id: Option<i32>, resp: Response) -> Result<Response, InventoryError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify(endpoint, id, status, body))
    }
}

/// NetBox reports unique-key collisions as 400 with a field message
fn classify(endpoint: Endpoint, id: Option<i32>, status: StatusCode, body: String) -> InventoryError {
    let duplicate = body.contains("already exists") || body.contains("must make a unique set");
    match status {
        StatusCode::CONFLICT => InventoryError::Conflict { endpoint, message: body },
        StatusCode::BAD_REQUEST if duplicate => InventoryError::Conflict { endpoint, message: body },
        StatusCode::NOT_FOUND => InventoryError::NotFound {
            endpoint,
            id: id.map(|i| i.to_string()).unwrap_or_default(),
        },
        _ => InventoryError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl InventoryClient for NetBoxClient {
    async fn filter(&self, endpoint: Endpoint, query: &Query<'_>) -> Result<Vec<Value>, InventoryError> {
        let mut results = Vec::new();

        let first = self
            .client
            .get(self.api_url(endpoint.path()))
            .query(query)
            .query(&[("limit", PAGE_LIMIT)])
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;
        let mut page: PaginatedResponse<Value> = Self::check(endpoint, None, first).await?.json().await?;

        // `next` is an absolute URL carrying the original query
        loop {
            results.append(&mut page.results);
            let Some(next) = page.next.take() else { break };

            let resp = self
                .client
                .get(&next)
                .header("Authorization", self.auth_header())
                .header("Accept", "application/json")
                .send()
                .await?;
            page = Self::check(endpoint, None, resp).await?.json().await?;
        }

        tracing::debug!("NetBox {}: {} result(s) for {:?}", endpoint.path(), results.len(), query);
        Ok(results)
    }

    async fn create(&self, endpoint: Endpoint, body: Value) -> Result<Value, InventoryError> {
        let resp = self
            .client
            .post(self.api_url(endpoint.path()))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        Ok(Self::check(endpoint, None, resp).await?.json().await?)
    }

    async fn update(&self, endpoint: Endpoint, id: i32, body: Value) -> Result<Value, InventoryError> {
        let resp = self
            .client
            .patch(self.api_url(&format!("{}{}/", endpoint.path(), id)))
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        Ok(Self::check(endpoint, Some(id), resp).await?.json().await?)
    }
}
