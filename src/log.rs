use chrono::Utc;
use serde_json::Value;
use tracing::{error, info};

use crate::{
    database::{models::User, Database},
    ServerError,
};

/// Records an admin action in the audit trail.
///
/// A failure to write the entry is logged and does not fail the action it describes.
pub async fn admin_log_info(database: &dyn Database, admin: &User, action: &str, details: Value) {
    if let Err(e) = try_admin_log(database, admin, action, details).await {
        error!(
            "Error writing admin log for {} by {}: {:?}",
            action, admin.username, e
        );
    }
}

async fn try_admin_log(
    database: &dyn Database,
    admin: &User,
    action: &str,
    mut details: Value,
) -> Result<(), ServerError> {
    info!("ℹ️ {} by {}\n\n{:#?}", action, admin.username, details);

    if let Value::Object(ref mut fields) = details {
        fields.insert(
            "happenedAt".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    database.append_admin_log(admin.id, action, details).await
}

/// Sends an in-app notification, logging instead of failing when it cannot be stored.
pub async fn notify_user(database: &dyn Database, user_id: uuid::Uuid, title: &str, message: &str) {
    if let Err(e) = database.create_notification(user_id, title, message).await {
        error!("Error notifying user {}: {:?}", user_id, e);
    }
}
