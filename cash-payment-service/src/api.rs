use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{CashPaymentError, Result};
use crate::handlers::{CashPaymentHandler, Submission};
use crate::lifecycle::Reservation;
use crate::store::ReservationStore;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

pub struct AppState<S> {
    pub handler: CashPaymentHandler<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<S: ReservationStore> AppState<S> {
    pub fn new(handler: CashPaymentHandler<S>) -> Self {
        Self { handler }
    }

    pub fn store(&self) -> &Arc<S> {
        self.handler.store()
    }
}

/// Identity forwarded by the gateway. A missing role header means customer.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity(pub Identity);

fn caller_from_headers(headers: &HeaderMap) -> Result<Identity> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i32>().ok())
        .ok_or(CashPaymentError::Unauthenticated)?;
    let role = match headers.get(USER_ROLE_HEADER) {
        None => Role::Customer,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|value| value.parse::<Role>().ok())
            .ok_or(CashPaymentError::Unauthenticated)?,
    };
    Ok(Identity { user_id, role })
}

#[async_trait]
impl<St: Send + Sync> FromRequestParts<St> for CallerIdentity {
    type Rejection = CashPaymentError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> std::result::Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers).map(CallerIdentity)
    }
}

#[derive(Debug, Deserialize)]
pub struct CartRequest {
    pub cart: Vec<CartLine>,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
    pub user_id: i32,
    pub status: ReservationStatus,
    pub code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cart: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            reservation_id: reservation.id,
            user_id: reservation.user_id,
            status: reservation.status,
            code: reservation.code,
            expires_at: reservation.expires_at,
            cart: reservation.cart,
            created_at: reservation.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub sale_id: Uuid,
    pub user_id: i32,
    pub lines: Vec<SaleLine>,
    pub total: BigDecimal,
}

impl From<SaleReceipt> for RedeemResponse {
    fn from(receipt: SaleReceipt) -> Self {
        Self {
            sale_id: receipt.sale_id,
            user_id: receipt.user_id,
            lines: receipt.lines,
            total: receipt.total,
        }
    }
}

pub fn create_router<S: ReservationStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/cash-payments", post(create_reservation::<S>))
        .route("/cash-payments/redeem", post(redeem::<S>))
        .route("/cash-payments/cancel-by-code", post(cancel_by_code::<S>))
        .route("/cash-payments/:id", get(reservation_status::<S>))
        .route("/cash-payments/:id/code", post(issue_code::<S>))
        .route("/cash-payments/:id/cancel", post(cancel::<S>))
        .route("/cash-payments/:id/cart", put(update_cart::<S>))
        .route("/admin/cash-payments/pending", get(list_pending::<S>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_reservation<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Json(request): Json<CartRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>)> {
    let submission = state.handler.create_reservation(&identity, request.cart).await?;
    let status = match submission {
        Submission::Created(_) => StatusCode::CREATED,
        Submission::Existing(_) => StatusCode::OK,
    };
    Ok((status, Json(submission.into_reservation().into())))
}

pub async fn issue_code<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>> {
    let reservation = state.handler.issue_code(&identity, id).await?;
    Ok(Json(reservation.into()))
}

pub async fn reservation_status<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>> {
    let reservation = state.handler.reservation_status(&identity, id).await?;
    Ok(Json(reservation.into()))
}

pub async fn cancel<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>> {
    let reservation = state.handler.cancel(&identity, id).await?;
    Ok(Json(reservation.into()))
}

pub async fn cancel_by_code<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Json(request): Json<CodeRequest>,
) -> Result<Json<ReservationResponse>> {
    let reservation = state.handler.cancel_by_code(&identity, request.code.trim()).await?;
    Ok(Json(reservation.into()))
}

pub async fn update_cart<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Path(id): Path<Uuid>,
    Json(request): Json<CartRequest>,
) -> Result<Json<ReservationResponse>> {
    let reservation = state.handler.update_cart(&identity, id, request.cart).await?;
    Ok(Json(reservation.into()))
}

pub async fn redeem<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
    Json(request): Json<CodeRequest>,
) -> Result<Json<RedeemResponse>> {
    let receipt = state.handler.redeem(&identity, request.code.trim()).await?;
    Ok(Json(receipt.into()))
}

pub async fn list_pending<S: ReservationStore>(
    State(state): State<AppState<S>>,
    CallerIdentity(identity): CallerIdentity,
) -> Result<Json<Vec<ReservationResponse>>> {
    let pending = state.handler.list_pending(&identity).await?;
    Ok(Json(pending.into_iter().map(ReservationResponse::from).collect()))
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn identity_defaults_to_customer() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("7"));
        assert_eq!(caller_from_headers(&headers).unwrap(), Identity::customer(7));

        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert_eq!(caller_from_headers(&headers).unwrap(), Identity::admin(7));
    }

    #[test]
    fn missing_or_garbled_identity_is_unauthenticated() {
        let headers = HeaderMap::new();
        assert!(matches!(caller_from_headers(&headers), Err(CashPaymentError::Unauthenticated)));

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("seven"));
        assert!(matches!(caller_from_headers(&headers), Err(CashPaymentError::Unauthenticated)));

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("7"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("root"));
        assert!(matches!(caller_from_headers(&headers), Err(CashPaymentError::Unauthenticated)));
    }
}
