//! HTTP routes registered by the extension.
//!
//! | Method | Path | Body | Success |
//! |---|---|---|---|
//! | POST | `/probe` | none | 204 |
//! | POST | `/sql_query` | `{query, params?}` | 200, JSON array of rows |
//! | POST | `/<backend>_sql_query` | `{query, params?}` | 200, JSON array of rows |
//! | POST | `/get_blob_url` | `{blobName}` | 200, `{"blob_url": ...}` |
//!
//! Every failure, including an unparseable body, is answered with
//! `500 Internal Server Error` and a plain-text body. Details are logged
//! server side only.

use crate::error::ExtensionError;
use crate::extension::ExtensionState;
use crate::models::{BackendConfig, QueryParam, QueryRequest};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error};

pub const PROBE_PATH: &str = "/probe";
pub const SQL_QUERY_PATH: &str = "/sql_query";
pub const BLOB_URL_PATH: &str = "/get_blob_url";

/// Plain-text body of every failed response.
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

type Rows = Vec<Map<String, JsonValue>>;

#[derive(Debug, Deserialize)]
pub struct SqlQueryBody {
    pub query: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

impl From<SqlQueryBody> for QueryRequest {
    fn from(body: SqlQueryBody) -> Self {
        QueryRequest {
            sql: body.query,
            params: body.params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BlobUrlBody {
    #[serde(rename = "blobName")]
    pub blob_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlobUrlResponse {
    pub blob_url: String,
}

/// Failure of a route handler. Always rendered as a bare 500.
#[derive(Debug)]
pub enum ApiError {
    /// Request body missing or not the expected JSON
    Body(JsonRejection),

    /// Anything raised below the dispatcher
    Extension(ExtensionError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection)
    }
}

impl From<ExtensionError> for ApiError {
    fn from(err: ExtensionError) -> Self {
        Self::Extension(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Body(rejection) => {
                error!(error = %rejection, "Rejected request body");
            }
            Self::Extension(err) => {
                error!(
                    error = %err,
                    suggestion = err.suggestion().unwrap_or_default(),
                    details = ?err,
                    "Request failed"
                );
            }
        }
        (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
    }
}

/// Build the extension's routes over `state`.
///
/// One `/<backend>_sql_query` route is added per registered backend.
pub fn router(state: ExtensionState) -> Router {
    let mut router = Router::new()
        .route(PROBE_PATH, post(probe))
        .route(SQL_QUERY_PATH, post(default_sql_query))
        .route(BLOB_URL_PATH, post(get_blob_url));

    for name in state.registry.names() {
        let path = BackendConfig::route_path_for(name);
        debug!(backend = %name, path = %path, "Registering backend route");

        let backend = name.to_string();
        router = router.route(
            &path,
            post(
                move |State(state): State<ExtensionState>,
                      body: Result<Json<SqlQueryBody>, JsonRejection>| {
                    let backend = backend.clone();
                    async move { run_sql_query(&state, &backend, body).await }
                },
            ),
        );
    }

    router.with_state(state)
}

/// Liveness check; never touches a database.
async fn probe() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn default_sql_query(
    State(state): State<ExtensionState>,
    body: Result<Json<SqlQueryBody>, JsonRejection>,
) -> Result<Json<Rows>, ApiError> {
    let backend = state
        .registry
        .default_backend()
        .ok_or_else(|| ExtensionError::configuration("No database backend is registered"))?
        .to_string();
    run_sql_query(&state, &backend, body).await
}

async fn run_sql_query(
    state: &ExtensionState,
    backend: &str,
    body: Result<Json<SqlQueryBody>, JsonRejection>,
) -> Result<Json<Rows>, ApiError> {
    let Json(body) = body?;
    let pool = state.registry.get(backend)?;
    let request = QueryRequest::from(body);

    debug!(backend = %backend, "Dispatching query");
    let result = state.executor.execute_request(&pool, &request).await?;
    Ok(Json(result.into_rows()))
}

async fn get_blob_url(
    State(state): State<ExtensionState>,
    body: Result<Json<BlobUrlBody>, JsonRejection>,
) -> Result<Json<BlobUrlResponse>, ApiError> {
    let Json(body) = body?;
    let blob_url = state.issuer.issue_read_url(&body.blob_name)?;
    Ok(Json(BlobUrlResponse { blob_url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_sql_body_params_default_to_empty() {
        let body: SqlQueryBody = serde_json::from_str(r#"{"query":"SELECT 1"}"#).unwrap();
        let request = QueryRequest::from(body);
        assert_eq!(request.sql, "SELECT 1");
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_sql_body_positional_params() {
        let body: SqlQueryBody =
            serde_json::from_str(r#"{"query":"SELECT ?","params":[1,"a",null,true]}"#).unwrap();
        assert_eq!(
            body.params,
            vec![
                QueryParam::Int(1),
                QueryParam::String("a".to_string()),
                QueryParam::Null,
                QueryParam::Bool(true),
            ]
        );
    }

    #[test]
    fn test_blob_body_uses_camel_case_key() {
        let body: BlobUrlBody = serde_json::from_str(r#"{"blobName":"a/b.txt"}"#).unwrap();
        assert_eq!(body.blob_name, "a/b.txt");
        assert!(serde_json::from_str::<BlobUrlBody>(r#"{"blob_name":"a"}"#).is_err());
    }

    #[tokio::test]
    async fn test_api_error_is_opaque() {
        let response = ApiError::from(ExtensionError::database(
            "relation \"secret_table\" does not exist",
            Some("42P01".to_string()),
            "Check the SQL",
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], INTERNAL_ERROR_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_probe_handler() {
        let app = Router::new().route(PROBE_PATH, post(probe));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(PROBE_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
