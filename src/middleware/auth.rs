use axum::{
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    extract::{Request, State},
    body::Body,
};
use tower_sessions::Session;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::{Account, SessionUser};

pub const SESSION_KEY: &str = "user_session";

fn is_public(path: &str) -> bool {
    path == "/" || path == "/login" || path == "/register" || path.starts_with("/assets/")
}

/// Lets a request through only while its session points at an existing
/// account. Sessions of deleted accounts are dropped.
pub async fn require_auth(
    State(state): State<AppState>,
    session: Session,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let user = match session.get::<SessionUser>(SESSION_KEY).await {
        Ok(Some(user)) => user,
        _ => return Redirect::to("/").into_response(),
    };

    let id = user.id;
    match state.accounts.call(move |s| s.find_by_id(id)).await {
        Ok(Some(_)) => next.run(req).await,
        Ok(None) => {
            tracing::info!("Session of deleted account {} ended", user.username);
            if let Err(e) = session.flush().await {
                tracing::warn!("Session flush error: {}", e);
            }
            Redirect::to("/").into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

pub async fn current_user(session: &Session) -> AppResult<SessionUser> {
    session
        .get::<SessionUser>(SESSION_KEY)
        .await?
        .ok_or_else(|| AppError::Auth("Please log in".into()))
}

/// Reloads the session's account so role changes apply immediately
pub async fn current_account(state: &AppState, session: &Session) -> AppResult<Account> {
    let user = current_user(session).await?;
    state
        .accounts
        .call(move |s| s.find_by_id(user.id))
        .await?
        .ok_or_else(|| AppError::Auth("Account no longer exists".into()))
}

pub async fn require_admin(state: &AppState, session: &Session) -> AppResult<Account> {
    let account = current_account(state, session).await?;
    if !account.is_admin {
        tracing::warn!("{} tried an admin-only action", account.username);
        return Err(AppError::Forbidden("Admin privileges required".into()));
    }
    Ok(account)
}
