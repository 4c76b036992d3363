//! Supabase OAuth / magic-link redirect target.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use serde::Deserialize;
use tracing::instrument;

use crate::state::AppState;

/// Query parameters from the Supabase redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code to exchange for a session.
    pub code: Option<String>,
    /// Local path to continue to after sign-in.
    pub next: Option<String>,
}

/// `next` if it is a path on this site, otherwise `/`.
fn local_path(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}

/// Exchange the authorization code and send the browser on.
///
/// Any failure sends the browser to the site root instead.
///
/// # Route
///
/// `GET /auth/callback`
#[instrument(skip_all)]
pub async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Redirect {
    let origin = &state.config().base_url;

    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        tracing::warn!("Auth callback missing code");
        return Redirect::to(origin);
    };
    let Some(supabase) = state.supabase() else {
        tracing::warn!("Auth callback reached without Supabase configured");
        return Redirect::to(origin);
    };

    match supabase.exchange_code_for_session(&code, None).await {
        Ok(session) => {
            tracing::info!(user_id = %session.user.id, "Auth callback completed");
            Redirect::to(&format!("{origin}{}", local_path(query.next.as_deref())))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to exchange auth code");
            Redirect::to(origin)
        }
    }
}
