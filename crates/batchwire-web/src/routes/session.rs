//! Session introspection.

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub user_id: String,
}

/// The user behind the presented token, i.e. the only owner a live
/// connection with that token may bind to.
pub async fn current_session(AuthUser(user_id): AuthUser) -> Json<SessionInfo> {
    Json(SessionInfo { user_id })
}
