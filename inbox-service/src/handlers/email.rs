use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use super::notifications::{bad_json, CreatedResponse};
use crate::models::{Channel, NotificationType};
use crate::services::DispatchRequest;
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    #[validate(length(min = 1, max = 128, message = "recipientId must be 1-128 characters"))]
    pub recipient_id: String,
    #[validate(email(message = "Invalid email address"))]
    pub to: String,
    #[validate(length(min = 1, message = "Subject cannot be empty"))]
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(rename = "type", default)]
    pub notification_type: Option<NotificationType>,
}

impl SendEmailRequest {
    fn into_dispatch(self) -> DispatchRequest {
        let mut payload = json!({
            "email": self.to,
            "subject": self.subject,
        });
        if let Some(body) = self.body {
            payload["body"] = json!(body);
        }
        if let Some(html) = self.html {
            payload["html"] = json!(html);
        }

        DispatchRequest::new(
            self.recipient_id,
            self.notification_type.unwrap_or(NotificationType::System),
            vec![Channel::Email],
        )
        .with_payload(payload)
    }
}

/// Convenience route: a dispatch on the email channel only.
#[tracing::instrument(skip(state, body))]
pub async fn send_email(
    State(state): State<AppState>,
    body: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let Json(request) = body.map_err(bad_json)?;
    request.validate()?;

    if request.body.is_none() && request.html.is_none() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "At least one of body or html must be provided"
        )));
    }

    let id = state.dispatcher.dispatch(request.into_dispatch()).await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}
