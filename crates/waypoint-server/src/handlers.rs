//! Placeholder domain routes.
//!
//! Access to these routes is decided by the enforcement middleware before
//! they run; handlers only see authorized callers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use waypoint_auth::{AuthError, Authenticated, AuthorizedClient};

/// State of the domain routes.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Client for the downstream backend, when one is configured.
    pub backend: Option<AuthorizedClient>,
}

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "waypoint",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "UP" }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
}

fn customers() -> Vec<Customer> {
    [("1", "Acme Travel"), ("2", "Globex Tours")]
        .into_iter()
        .map(|(id, name)| Customer {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}

pub async fn list_customers(Authenticated(caller): Authenticated) -> impl IntoResponse {
    tracing::debug!(subject = %caller.subject, "Listing customers");
    Json(customers())
}

pub async fn read_customer(Path(id): Path<String>) -> Response {
    match customers().into_iter().find(|c| c.id == id) {
        Some(customer) => Json(customer).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn read_booking(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({ "id": id, "status": "CONFIRMED" }))
}

pub async fn create_booking(
    Authenticated(caller): Authenticated,
    Json(mut booking): Json<Value>,
) -> impl IntoResponse {
    let id = uuid::Uuid::new_v4().to_string();
    if let Some(object) = booking.as_object_mut() {
        object.insert("id".to_string(), Value::String(id.clone()));
        object.insert("createdBy".to_string(), Value::String(caller.subject.clone()));
    }
    tracing::info!(booking_id = %id, subject = %caller.subject, "Booking created");
    (StatusCode::CREATED, Json(booking))
}

pub async fn update_booking(Path(id): Path<String>, Json(mut booking): Json<Value>) -> impl IntoResponse {
    if let Some(object) = booking.as_object_mut() {
        object.insert("id".to_string(), Value::String(id));
    }
    Json(booking)
}

pub async fn cancel_booking(
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> StatusCode {
    tracing::info!(booking_id = %id, subject = %caller.subject, "Booking cancelled");
    StatusCode::NO_CONTENT
}

/// `GET /api/customers`: the logged-in browser's view, fetched from the
/// backend with this service's own client-credentials token.
pub async fn browser_customers(
    State(state): State<DomainState>,
    Authenticated(caller): Authenticated,
) -> Result<Response, AuthError> {
    let Some(backend) = state.backend else {
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no backend configured" })),
        )
            .into_response());
    };
    tracing::debug!(subject = %caller.subject, "Fetching customers from backend");
    let customers: Vec<Customer> = backend.get_json("/customers").await?;
    Ok(Json(customers).into_response())
}
