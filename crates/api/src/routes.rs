use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use extract::{FieldName, TriageOutcome};
use ingest::{ConversionStatus, Submission};
use merge::InvestmentView;
use pipeline::{BatchSummary, DocumentState, MetricsSnapshot, Receipt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/tenants/:tenant/documents", post(submit_document))
        .route("/tenants/:tenant/documents/:id", get(document_status))
        .route("/tenants/:tenant/runs", post(run_batch))
        .route("/tenants/:tenant/runs/stream", get(stream_run))
        .route("/tenants/:tenant/investments", get(list_investments))
        .route("/tenants/:tenant/investments/:id", get(get_investment))
        .route("/tenants/:tenant/investments/:id/fields/:field", put(edit_field))
        .route("/tenants/:tenant/investments/:id/archive", post(archive_investment))
        .route("/tenants/:tenant/investments/:id/packet", get(investment_packet))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_endpoint: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_endpoint = match &state.model_client {
        Some(client) if client.ping().await => "reachable",
        Some(_) => "unreachable",
        None => "not_configured",
    };
    Json(HealthResponse {
        status: "ok",
        model_endpoint,
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.orchestrator.metrics())
}

#[derive(Deserialize)]
struct SubmitRequest {
    message_id: String,
    filename: String,
    subject: Option<String>,
    sender: Option<String>,
    content_base64: String,
}

async fn submit_document(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Receipt>, ApiError> {
    if req.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename is required".to_string()));
    }
    let bytes = STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("content_base64 is not valid base64: {e}")))?;

    let receipt = state
        .orchestrator
        .submit(
            &tenant,
            Submission {
                message_id: req.message_id,
                filename: req.filename,
                subject: req.subject,
                sender: req.sender,
                bytes,
            },
        )
        .await?;
    Ok(Json(receipt))
}

#[derive(Serialize)]
struct DocumentStatus {
    id: Uuid,
    filename: String,
    state: DocumentState,
    conversion_status: ConversionStatus,
    failure: Option<String>,
    triage: Option<TriageOutcome>,
    extraction_count: usize,
    investment_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

async fn document_status(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, Uuid)>,
) -> Result<Json<DocumentStatus>, ApiError> {
    let record = state
        .orchestrator
        .ledger()
        .get_for_tenant(&tenant, id)
        .ok_or(ApiError::NotFound(format!("document {id} not found")))?;

    Ok(Json(DocumentStatus {
        id,
        filename: record.document.filename,
        state: record.state,
        conversion_status: record.document.conversion_status,
        failure: record.failure,
        triage: record.triage,
        extraction_count: record.extractions.len(),
        investment_id: record.investment_id,
        created_at: record.document.created_at,
        updated_at: record.updated_at,
    }))
}

/// The batch runs on its own task so a dropped request does not strand
/// documents mid-pipeline.
async fn run_batch(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<BatchSummary>, ApiError> {
    let run = state.orchestrator.start_run(&tenant)?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let handle = tokio::spawn(async move { orchestrator.execute(run).await });

    let summary = handle
        .await
        .map_err(|e| ApiError::Internal(format!("batch task ended abnormally: {e}")))??;
    Ok(Json(summary))
}

/// Starts a run on its own task and streams its events; a client that
/// disconnects only drops its receiver.
async fn stream_run(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Response, ApiError> {
    let run = state.orchestrator.start_run(&tenant)?;
    let rx = run.tracker().subscribe();

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(e) = orchestrator.execute(run).await {
            warn!(tenant = %tenant, error = %e, "streamed batch failed");
        }
    });

    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(event.to_sse()), rx))
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}

#[derive(Deserialize)]
struct ListQuery {
    search: Option<String>,
    #[serde(default)]
    include_archived: bool,
}

async fn list_investments(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<InvestmentView>> {
    let search = query.search.as_deref().filter(|s| !s.trim().is_empty());
    let investments = state
        .orchestrator
        .merge_engine()
        .store()
        .list(&tenant, search, query.include_archived)
        .await;
    Json(investments)
}

async fn get_investment(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, Uuid)>,
) -> Result<Json<InvestmentView>, ApiError> {
    let investment = state.orchestrator.merge_engine().store().get(&tenant, id).await?;
    Ok(Json(investment.view()))
}

#[derive(Deserialize)]
struct FieldEdit {
    value: Value,
    editor: Option<String>,
}

async fn edit_field(
    State(state): State<AppState>,
    Path((tenant, id, field)): Path<(String, Uuid, String)>,
    Json(edit): Json<FieldEdit>,
) -> Result<Json<InvestmentView>, ApiError> {
    let field: FieldName = field.parse().map_err(ApiError::BadRequest)?;
    let editor = edit.editor.as_deref().unwrap_or("user");

    let view = state
        .orchestrator
        .merge_engine()
        .apply_manual_edit(&tenant, id, field, &edit.value, editor)
        .await?;
    info!(tenant = %tenant, investment_id = %id, %field, editor, "field edited");
    Ok(Json(view))
}

async fn archive_investment(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, Uuid)>,
) -> Result<Json<InvestmentView>, ApiError> {
    let view = state.orchestrator.merge_engine().archive(&tenant, id).await?;
    Ok(Json(view))
}

async fn investment_packet(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, Uuid)>,
) -> Result<Response, ApiError> {
    let investment = state.orchestrator.merge_engine().store().get(&tenant, id).await?;
    let disposition = format!(
        "inline; filename=\"{}\"",
        merge::packet::packet_filename(&investment)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        merge::packet::render_packet(&investment),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use extract::{
        Classifier, Confidence, Extracted, ExtractedFields, FieldExtraction, Extractor, Relevance,
        StageError, TriageSignals, TriageVerdict,
    };
    use http_body_util::BodyExt;
    use pipeline::{Orchestrator, PipelineConfig, Stages};
    use serde_json::json;
    use tower::ServiceExt;

    struct AlwaysRelevant;

    #[async_trait]
    impl Classifier for AlwaysRelevant {
        async fn classify(&self, _signals: &TriageSignals) -> Result<TriageVerdict, StageError> {
            Ok(TriageVerdict::new(Relevance::Relevant, "fund deck"))
        }

        async fn classify_full_text(
            &self,
            _signals: &TriageSignals,
            _full_text: &str,
        ) -> Result<TriageVerdict, StageError> {
            Ok(TriageVerdict::new(Relevance::Relevant, "fund deck"))
        }
    }

    /// First line is the investment name, second the firm.
    struct HeaderExtractor;

    #[async_trait]
    impl Extractor for HeaderExtractor {
        async fn extract(&self, text: &str) -> Result<FieldExtraction, StageError> {
            let text = match text.strip_prefix("SLOW\n") {
                Some(rest) => {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    rest
                }
                None => text,
            };
            let mut lines = text.lines();
            let mut fields = ExtractedFields::default();
            fields.investment_name = lines
                .next()
                .map(|name| Extracted::new(name.to_string(), Confidence::High));
            fields.firm = lines
                .next()
                .map(|firm| Extracted::new(firm.to_string(), Confidence::Medium));
            Ok(FieldExtraction {
                fields,
                attempts: 1,
                model: "header".into(),
            })
        }
    }

    fn app() -> (Router, Arc<Orchestrator>) {
        let stages = Stages {
            converter: Arc::new(ingest::pdf_converter(Default::default())),
            classifier: Arc::new(AlwaysRelevant),
            extractor: Arc::new(HeaderExtractor),
            enricher: None,
        };
        let config = PipelineConfig::default();
        let matcher = merge::IdentityMatcher::default();
        let store = merge::InvestmentStore::in_memory(config.lock_timeout());
        let engine = merge::MergeEngine::new(Arc::new(store), matcher);
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            stages,
            Arc::new(pipeline::DocumentLedger::in_memory()),
            Arc::new(engine),
        ));
        let router = build_router(AppState::new(Arc::clone(&orchestrator), None));
        (router, orchestrator)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn submission(message_id: &str, text: &str) -> Value {
        json!({
            "message_id": message_id,
            "filename": "deck.txt",
            "subject": "Q3 update",
            "content_base64": STANDARD.encode(text),
        })
    }

    async fn submit_and_run(app: &Router, text: &str) -> Value {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/tenants/acme/documents", submission("m1", text)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(empty_request("POST", "/tenants/acme/runs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_health_without_model_client() {
        let (app, _) = app();
        let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_endpoint"], "not_configured");
    }

    #[tokio::test]
    async fn test_submit_reports_duplicates() {
        let (app, _) = app();
        let first = app
            .clone()
            .oneshot(json_request("POST", "/tenants/acme/documents", submission("m1", "Fund I")))
            .await
            .unwrap();
        let first = body_json(first).await;
        let second = app
            .oneshot(json_request("POST", "/tenants/acme/documents", submission("m1", "Fund I")))
            .await
            .unwrap();
        let second = body_json(second).await;

        assert_eq!(first["duplicate"], false);
        assert_eq!(second["duplicate"], true);
        assert_eq!(first["document_id"], second["document_id"]);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_base64() {
        let (app, _) = app();
        let body = json!({
            "message_id": "m1",
            "filename": "deck.txt",
            "content_base64": "***",
        });
        let response = app
            .oneshot(json_request("POST", "/tenants/acme/documents", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_then_read_edit_and_archive() {
        let (app, _) = app();
        let summary = submit_and_run(&app, "Harbor Credit Fund II\nHarbor Partners").await;
        assert_eq!(summary["succeeded"], 1);
        assert_eq!(summary["investments_created"], 1);

        let list = app
            .clone()
            .oneshot(empty_request("GET", "/tenants/acme/investments?search=harbor"))
            .await
            .unwrap();
        let list = body_json(list).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        let id = list[0]["id"].as_str().unwrap().to_string();
        assert_eq!(list[0]["values"]["investment_name"], "Harbor Credit Fund II");

        let edited = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/tenants/acme/investments/{id}/fields/firm"),
                json!({ "value": "Harbor Partners LLC", "editor": "analyst@acme.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(edited.status(), StatusCode::OK);
        let edited = body_json(edited).await;
        assert_eq!(edited["values"]["firm"], "Harbor Partners LLC");
        assert_eq!(edited["fields"]["firm"]["source_type"], "manual");
        assert_eq!(edited["fields"]["firm"]["all_values"].as_array().unwrap().len(), 2);

        let packet = app
            .clone()
            .oneshot(empty_request("GET", &format!("/tenants/acme/investments/{id}/packet")))
            .await
            .unwrap();
        assert_eq!(packet.status(), StatusCode::OK);
        assert!(body_text(packet).await.contains("Harbor Credit Fund II"));

        let archived = app
            .clone()
            .oneshot(empty_request("POST", &format!("/tenants/acme/investments/{id}/archive")))
            .await
            .unwrap();
        assert_eq!(body_json(archived).await["archived"], true);

        let list = app
            .oneshot(empty_request("GET", "/tenants/acme/investments"))
            .await
            .unwrap();
        assert!(body_json(list).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_rejects_unknown_field_and_empty_value() {
        let (app, _) = app();
        submit_and_run(&app, "Harbor Credit Fund II\nHarbor Partners").await;
        let list = app
            .clone()
            .oneshot(empty_request("GET", "/tenants/acme/investments"))
            .await
            .unwrap();
        let id = body_json(list).await[0]["id"].as_str().unwrap().to_string();

        let unknown = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/tenants/acme/investments/{id}/fields/aum"),
                json!({ "value": "1bn" }),
            ))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

        let empty = app
            .oneshot(json_request(
                "PUT",
                &format!("/tenants/acme/investments/{id}/fields/management_fees"),
                json!({ "value": "  " }),
            ))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_read_investment() {
        let (app, _) = app();
        submit_and_run(&app, "Harbor Credit Fund II\nHarbor Partners").await;
        let list = app
            .clone()
            .oneshot(empty_request("GET", "/tenants/acme/investments"))
            .await
            .unwrap();
        let id = body_json(list).await[0]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(empty_request("GET", &format!("/tenants/beta/investments/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_concurrent_run_returns_conflict() {
        let (app, orchestrator) = app();
        let _active = orchestrator.start_run("acme").unwrap();

        let response = app
            .oneshot(empty_request("POST", "/tenants/acme/runs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["status"], "already_running");
    }

    #[tokio::test]
    async fn test_stream_emits_events_until_complete() {
        let (app, orchestrator) = app();
        orchestrator
            .submit(
                "acme",
                Submission {
                    message_id: "m1".into(),
                    filename: "deck.txt".into(),
                    subject: None,
                    sender: None,
                    bytes: b"Harbor Credit Fund II\nHarbor Partners".to_vec(),
                },
            )
            .await
            .unwrap();

        let response = app
            .oneshot(empty_request("GET", "/tenants/acme/runs/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let body = body_text(response).await;
        let steps: Vec<String> = body
            .split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|json| serde_json::from_str::<Value>(json).unwrap()["step"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(steps.first().map(String::as_str), Some("start"));
        assert!(steps.contains(&"done".to_string()));
        assert_eq!(steps.last().map(String::as_str), Some("complete"));
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let (app, _) = app();
        let response = app
            .oneshot(empty_request("GET", &format!("/tenants/acme/documents/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dropped_run_request_still_finishes_batch() {
        let (app, orchestrator) = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/tenants/acme/documents", submission("m1", "SLOW\nFund I\nAcme")))
            .await
            .unwrap();
        let id: Uuid = body_json(response).await["document_id"].as_str().unwrap().parse().unwrap();

        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(30),
            app.clone().oneshot(empty_request("POST", "/tenants/acme/runs")),
        )
        .await;
        assert!(dropped.is_err());

        let mut state = DocumentState::Pending;
        for _ in 0..100 {
            state = orchestrator.ledger().get(id).unwrap().state;
            if state == DocumentState::Done {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(state, DocumentState::Done);
        assert!(!orchestrator.runs().is_running("acme"));
    }

    #[tokio::test]
    async fn test_document_status_after_run() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/tenants/acme/documents", submission("m1", "Fund I\nAcme")))
            .await
            .unwrap();
        let id = body_json(response).await["document_id"].as_str().unwrap().to_string();
        app.clone()
            .oneshot(empty_request("POST", "/tenants/acme/runs"))
            .await
            .unwrap();

        let status = app
            .oneshot(empty_request("GET", &format!("/tenants/acme/documents/{id}")))
            .await
            .unwrap();
        let status = body_json(status).await;
        assert_eq!(status["state"], "done");
        assert_eq!(status["conversion_status"], "converted");
        assert_eq!(status["extraction_count"], 1);
    }
}
