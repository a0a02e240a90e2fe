//! HTTP endpoints for ticket intake and lookup.

pub mod intake;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::{DatabaseError, IntakeError};
use crate::store::traits::{TicketIntake, TicketStore};
use intake::IntakeRequest;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TicketStore>,
    pub intake: Arc<dyn TicketIntake>,
    /// Reported by `/health`.
    pub service: String,
}

/// Build the Axum router with intake, lookup, and health routes.
pub fn ticket_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tickets", get(lookup_ticket).post(submit_ticket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = match &self {
            IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
            IntakeError::Store(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            IntakeError::Store(e) => {
                error!(error = %e, "Ticket request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            IntakeError::Store(DatabaseError::NotFound { .. }) => "ticket not found".to_string(),
            IntakeError::Store(_) => "some error happened".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({"message": message}))).into_response()
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.service
    }))
}

// ── Tickets ─────────────────────────────────────────────────────────────

async fn submit_ticket(State(state): State<AppState>, body: Bytes) -> Response {
    // Parsed by hand so malformed bodies get the same JSON error shape.
    let request = if body.is_empty() {
        IntakeRequest::default()
    } else {
        match serde_json::from_slice::<IntakeRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return IntakeError::Validation(format!("invalid request body: {e}"))
                    .into_response();
            }
        }
    };

    match intake::create_ticket(state.intake.as_ref(), request).await {
        Ok(ticket) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "new ticket has been created for this request",
                "ticketId": ticket.id
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupQuery {
    ticket_id: Option<String>,
}

async fn lookup_ticket(State(state): State<AppState>, Query(query): Query<LookupQuery>) -> Response {
    let Some(ticket_id) = query.ticket_id else {
        return IntakeError::Validation("ticketId is required".into()).into_response();
    };

    match intake::lookup_response(state.store.as_ref(), &ticket_id).await {
        Ok(lookup) => (StatusCode::OK, Json(lookup)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::store::LibSqlBackend;
    use crate::store::traits::TicketQueue;

    async fn app() -> (Router, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let state = AppState {
            store: db.clone(),
            intake: db.clone(),
            service: "test-desk".into(),
        };
        (ticket_routes(state), db)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(body: &str) -> Request<Body> {
        Request::post("/api/tickets")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (app, _db) = app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "test-desk");
    }

    #[tokio::test]
    async fn post_returns_accepted_with_ticket_id() {
        let (app, db) = app().await;
        let response = app
            .oneshot(post(r#"{"content":"App crashes on login"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json = body_json(response).await;
        let ticket_id = json["ticketId"].as_str().unwrap();
        let ticket = db.get_ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.customer_id, "anonymous");
    }

    #[tokio::test]
    async fn post_without_content_is_bad_request() {
        let (app, db) = app().await;
        let response = app.oneshot(post(r#"{"customerId":"c-1"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "content is required");
        let pending = db.receive(10, std::time::Duration::from_secs(300)).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn post_malformed_json_is_bad_request() {
        let (app, _db) = app().await;
        let response = app.oneshot(post("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_without_ticket_id_is_bad_request() {
        let (app, _db) = app().await;
        let response = app
            .oneshot(Request::get("/api/tickets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_unknown_ticket_is_not_found() {
        let (app, _db) = app().await;
        let response = app
            .oneshot(
                Request::get("/api/tickets?ticketId=nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_pending_ticket_omits_response() {
        let (app, db) = app().await;
        let ticket = crate::pipeline::types::SupportTicket::new("x", "c");
        db.insert_ticket(&ticket).await.unwrap();

        let response = app
            .oneshot(
                Request::get(format!("/api/tickets?ticketId={}", ticket.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.get("response").is_none());
    }
}
