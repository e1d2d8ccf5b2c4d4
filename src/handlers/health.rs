use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::error::AppError;
use crate::services::AuditService;

/// Liveness probe. Public; also surfaces the audit drop counter so operators
/// can alert on a saturated audit channel.
pub async fn health_check(audit: web::Data<AuditService>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "droppedAuditEvents": audit.dropped_events(),
    })))
}
