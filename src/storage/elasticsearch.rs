//! Elasticsearch REST implementation of [`IndexStore`].
//!
//! | Operation        | Request                               |
//! |------------------|---------------------------------------|
//! | `upsert`         | `PUT /{index}/_doc/{id}`              |
//! | `create`         | `PUT /{index}/_create/{id}` (409 = exists) |
//! | `get`            | `GET /{index}/_doc/{id}`              |
//! | `create_index`   | `PUT /{index}`                        |
//! | `delete_index`   | `DELETE /{index}`                     |
//! | `update_aliases` | `POST /_aliases`                      |
//! | `alias_targets`  | `GET /_alias/{alias}`                 |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::IndexConfig;
use crate::storage::{AliasAction, CreateOutcome, IndexStore};

/// Index store backed by an Elasticsearch-compatible cluster.
#[derive(Clone)]
pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
}

impl ElasticsearchStore {
    /// Create a store for the given base URL.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a store from the `[index]` configuration section.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::new(client, &config.url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turn a non-success response into a store error carrying the body.
    async fn fail(context: &str, response: Response) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        AppError::store(format!("{context} returned {status}: {body}"))
    }
}

#[async_trait]
impl IndexStore for ElasticsearchStore {
    async fn upsert(&self, index: &str, id: &str, doc: &Value) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("{index}/_doc/{id}")))
            .json(doc)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("upsert {index}/{id}"), response).await);
        }
        Ok(())
    }

    async fn create(&self, index: &str, id: &str, doc: &Value) -> Result<CreateOutcome> {
        let response = self
            .client
            .put(self.url(&format!("{index}/_create/{id}")))
            .json(doc)
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(CreateOutcome::AlreadyExists),
            status if status.is_success() => Ok(CreateOutcome::Created),
            _ => Err(Self::fail(&format!("create {index}/{id}"), response).await),
        }
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url(&format!("{index}/_doc/{id}")))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let mut body: Value = response.json().await?;
                Ok(body.get_mut("_source").map(Value::take))
            }
            _ => Err(Self::fail(&format!("get {index}/{id}"), response).await),
        }
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let response = self.client.put(self.url(index)).send().await?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("create index {index}"), response).await);
        }
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let response = self.client.delete(self.url(index)).send().await?;
        if !response.status().is_success() {
            return Err(Self::fail(&format!("delete index {index}"), response).await);
        }
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        let response = self
            .client
            .post(self.url("_aliases"))
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail("alias update", response).await);
        }
        let body: Value = response.json().await?;
        if body.get("acknowledged").and_then(Value::as_bool) != Some(true) {
            return Err(AppError::store(format!("alias update not acknowledged: {body}")));
        }
        Ok(())
    }

    async fn alias_targets(&self, alias: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url(&format!("_alias/{alias}")))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let body: Value = response.json().await?;
                let mut targets: Vec<String> = body
                    .as_object()
                    .map(|indices| indices.keys().cloned().collect())
                    .unwrap_or_default();
                targets.sort();
                Ok(targets)
            }
            _ => Err(Self::fail(&format!("get alias {alias}"), response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> ElasticsearchStore {
        ElasticsearchStore::new(Client::new(), server.uri())
    }

    #[tokio::test]
    async fn test_create_conflict_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resolver/_create/abc"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let outcome = store
            .create("resolver", "abc", &json!({"original_url": "http://x/1"}))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_create_new_entry() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/resolver/_create/abc"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": "created"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let outcome = store.create("resolver", "abc", &json!({})).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
    }

    #[tokio::test]
    async fn test_upsert_failure_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/combined_index/_doc/abc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        let err = store
            .upsert("combined_index", "abc", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_update_aliases_single_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_aliases"))
            .and(body_json(json!({
                "actions": [
                    { "remove": { "index": "items_1", "alias": "items" } },
                    { "add": { "index": "items_2", "alias": "items" } }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        store
            .update_aliases(&[
                AliasAction::remove("items_1", "items"),
                AliasAction::add("items_2", "items"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_alias_targets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_alias/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items_2": { "aliases": { "items": {} } },
                "items_1": { "aliases": { "items": {} } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_alias/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert_eq!(
            store.alias_targets("items").await.unwrap(),
            vec!["items_1".to_string(), "items_2".to_string()]
        );
        assert!(store.alias_targets("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_returns_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items/_doc/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_id": "1",
                "_source": { "title": "Nachtwacht" }
            })))
            .mount(&server)
            .await;

        let store = store_for(&server).await;
        assert_eq!(
            store.get("items", "1").await.unwrap(),
            Some(json!({ "title": "Nachtwacht" }))
        );
        assert_eq!(store.get("items", "2").await.unwrap(), None);
    }
}
