//! Backend record API client.

use crate::endpoint::Endpoint;
use crate::{RecordroomError, Result};
use async_trait::async_trait;
use recordroom_types::{CreateRecordRequest, CreateRecordResponse, RecordLookup};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The record-management calls the lifecycle controller makes.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// `POST {base}/api/records`. Non-2xx responses are `CreateFailed`.
    async fn create_record(
        &self,
        endpoint: &Endpoint,
        request: &CreateRecordRequest,
    ) -> Result<CreateRecordResponse>;

    /// `GET {base}/api/records/{id}`. Any failure means the record cannot be attached.
    async fn get_record(&self, endpoint: &Endpoint, record_id: &str) -> Result<RecordLookup>;
}

/// [`RecordApi`] over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpRecordApi {
    client: reqwest::Client,
}

impl HttpRecordApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordApi for HttpRecordApi {
    async fn create_record(
        &self,
        endpoint: &Endpoint,
        request: &CreateRecordRequest,
    ) -> Result<CreateRecordResponse> {
        let response = self
            .client
            .post(endpoint.records_url())
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecordroomError::CreateFailed {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreateRecordResponse = response.json().await?;
        debug!(target: "recordroom::lifecycle", "Backend created record {}", created.record_id);
        Ok(created)
    }

    async fn get_record(&self, endpoint: &Endpoint, record_id: &str) -> Result<RecordLookup> {
        let response = self
            .client
            .get(endpoint.record_url(record_id))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RecordroomError::RecordNotFound(record_id.to_string())),
            status if !status.is_success() => Err(RecordroomError::Transport(format!(
                "record lookup returned {}",
                status
            ))),
            _ => Ok(response.json().await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(app: Router) -> Endpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Endpoint::parse(&format!("http://{}", addr)).unwrap()
    }

    fn request() -> CreateRecordRequest {
        CreateRecordRequest {
            page_url: "app://test".to_string(),
            user_agent: "ua".to_string(),
            app_version: "0.5.0".to_string(),
            session_id: "s-1".to_string(),
            previous_record_id: Some("r-0".to_string()),
            device_info: None,
            user_id: None,
            user_email: None,
        }
    }

    #[tokio::test]
    async fn test_create_posts_camel_case_body() {
        let app = Router::new().route(
            "/api/records",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["sessionId"], "s-1");
                assert_eq!(body["previousRecordId"], "r-0");
                Json(json!({"recordId": "r-1"}))
            }),
        );
        let endpoint = serve(app).await;

        let created = HttpRecordApi::new()
            .create_record(&endpoint, &request())
            .await
            .unwrap();
        assert_eq!(created.record_id, "r-1");
        assert!(created.share_url.is_none());
    }

    #[tokio::test]
    async fn test_create_non_2xx_is_create_failed() {
        let app = Router::new().route(
            "/api/records",
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "db down") }),
        );
        let endpoint = serve(app).await;

        let err = HttpRecordApi::new()
            .create_record(&endpoint, &request())
            .await
            .unwrap_err();
        match err {
            RecordroomError::CreateFailed { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "db down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_record_not_found() {
        let app = Router::new().route(
            "/api/records/{id}",
            get(|Path(id): Path<String>| async move {
                if id == "known" {
                    Ok(Json(json!({"recordId": "known", "previousRecordId": "older"})))
                } else {
                    Err(AxumStatus::NOT_FOUND)
                }
            }),
        );
        let endpoint = serve(app).await;
        let api = HttpRecordApi::new();

        let lookup = api.get_record(&endpoint, "known").await.unwrap();
        assert_eq!(lookup.previous_record_id.as_deref(), Some("older"));
        assert!(matches!(
            api.get_record(&endpoint, "missing").await,
            Err(RecordroomError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_http_error() {
        let endpoint = Endpoint::parse("http://127.0.0.1:1").unwrap();
        let err = HttpRecordApi::new()
            .create_record(&endpoint, &request())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordroomError::Http(_)));
    }
}
