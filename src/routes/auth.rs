//! OAuth consent endpoints

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::auth::AuthError;
use crate::error::{AppError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/:profile", get(start_authorization))
        .route("/oauth2callback", get(oauth_callback))
}

/// Redirect the browser to the consent page for a profile
pub async fn start_authorization(
    State(state): State<AppState>,
    Path(profile): Path<String>,
) -> Result<Redirect> {
    let request = state.authenticator().begin_authorization(&profile)?;

    tracing::info!(profile = %request.profile, "Redirecting to consent page");
    Ok(Redirect::temporary(&request.url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Consent redirect target
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<String> {
    let oauth_state = query
        .state
        .ok_or_else(|| AppError::Validation("Missing state parameter".to_string()))?;

    if let Some(reason) = query.error {
        state.authenticator().reject_authorization(&oauth_state, &reason)?;
        return Err(AuthError::Denied(reason).into());
    }

    let code = query
        .code
        .ok_or_else(|| AppError::Validation("Missing code parameter".to_string()))?;

    let profile = state
        .authenticator()
        .complete_authorization(&oauth_state, &code)
        .await?;

    Ok(format!(
        "Authentication successful for {}! You can now upload videos.",
        profile
    ))
}
