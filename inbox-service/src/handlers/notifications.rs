use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Channel, DeliveryAttempt, Notification, NotificationStatus, NotificationType};
use crate::services::{DispatchRequest, ListFilter, PageRequest};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub payload: serde_json::Value,
    pub channel: Vec<Channel>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub deliveries: Vec<DeliveryAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            recipient_id: n.recipient_id,
            notification_type: n.notification_type,
            payload: n.payload,
            channel: n.channels,
            status: n.status,
            created_at: n.created_at,
            updated_at: n.updated_at,
            delivered_at: n.delivered_at,
            read_at: n.read_at,
            deliveries: n.deliveries,
            error: n.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
}

impl SuccessResponse {
    fn ok() -> Self {
        Self {
            success: true,
            updated: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsQuery {
    pub recipient_id: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsResponse {
    pub data: Vec<NotificationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientQuery {
    pub recipient_id: Option<String>,
}

/// Axum answers a malformed body with 422; this API reports 400.
pub(crate) fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", rejection.body_text()))
}

fn required_recipient(recipient_id: Option<String>) -> Result<String, AppError> {
    recipient_id
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("recipientId is required")))
}

#[tracing::instrument(skip(state, body))]
pub async fn create_notification(
    State(state): State<AppState>,
    body: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let Json(request) = body.map_err(bad_json)?;
    let id = state.dispatcher.dispatch(request).await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[tracing::instrument(skip(state))]
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<ListNotificationsResponse>, AppError> {
    let recipient_id = required_recipient(query.recipient_id)?;

    let mut filter = ListFilter::default();
    if let Some(status) = query.status.as_deref() {
        filter = filter.with_status(status.parse::<NotificationStatus>()?);
    }

    let page = PageRequest::new(
        query.page.unwrap_or(1),
        query
            .page_size
            .unwrap_or(state.config.inbox.default_page_size),
    );

    let inbox_page = state.inbox.list_inbox(&recipient_id, page, filter).await?;

    Ok(Json(ListNotificationsResponse {
        data: inbox_page.data.into_iter().map(Into::into).collect(),
        next_page: inbox_page.next_page,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NotificationResponse>, AppError> {
    let notification = state.inbox.get(&id).await?;
    Ok(Json(notification.into()))
}

#[tracing::instrument(skip(state))]
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.inbox.mark_read(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[tracing::instrument(skip(state))]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let recipient_id = required_recipient(query.recipient_id)?;
    let updated = state.inbox.mark_all_read(&recipient_id).await?;

    Ok(Json(SuccessResponse {
        success: true,
        updated: Some(updated),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.inbox.delete(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_shape() {
        let n = Notification::new(
            "u1".to_string(),
            NotificationType::Reminder,
            vec![Channel::InApp],
            json!({ "title": "Walk" }),
            Utc::now(),
        );

        let value = serde_json::to_value(NotificationResponse::from(n.clone())).unwrap();
        assert_eq!(value["id"], json!(n.id));
        assert_eq!(value["recipientId"], json!("u1"));
        assert_eq!(value["type"], json!("reminder"));
        assert_eq!(value["channel"], json!(["in_app"]));
        assert_eq!(value["status"], json!("pending"));
        assert!(value.get("readAt").is_none());
        assert!(value.get("_id").is_none());
    }

    #[test]
    fn test_required_recipient() {
        assert!(required_recipient(None).is_err());
        assert!(required_recipient(Some("  ".to_string())).is_err());
        assert_eq!(required_recipient(Some("u1".to_string())).unwrap(), "u1");
    }
}
