use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::HashMap;
use tower_sessions::Session;
use crate::app::AppState;
use crate::errors::{AppResult, StoreError};
use crate::middleware::require_admin;
use crate::models::{Account, OpOutcome};
use super::{escape_html, load_template, outcome_response, report_bridge};

fn user_rows(accounts: &[Account], current: &str) -> String {
    accounts
        .iter()
        .map(|account| {
            let name = escape_html(&account.username);
            let role_action = if account.is_admin {
                format!(r#"<a href="/unset_admin/{}">Revoke admin</a>"#, account.id)
            } else {
                format!(r#"<a href="/set_admin/{}">Make admin</a>"#, account.id)
            };
            let delete_action = if account.username == current {
                String::new()
            } else {
                format!(
                    r#"<form method="post" action="/delete_user/{}" class="inline"><button type="submit" class="delete-btn">Delete</button></form>"#,
                    urlencoding::encode(&account.username)
                )
            };
            format!(
                r#"<tr>
                <td>{}</td>
                <td>{}</td>
                <td>{}</td>
                <td class="action-cell">{} {}</td>
            </tr>"#,
                account.id,
                name,
                if account.is_admin { "Admin" } else { "User" },
                role_action,
                delete_action
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn serve_users_page(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    let accounts = state.accounts.call(|s| s.list_accounts()).await?;
    let msg = params.get("msg").map(String::as_str).unwrap_or_default();

    let html = load_template(&state, "users.html")?
        .replace("{{username}}", &escape_html(&admin.username))
        .replace("{{msg}}", &escape_html(msg))
        .replace("{{users}}", &user_rows(&accounts, &admin.username))
        .replace("{{user_count}}", &accounts.len().to_string());
    Ok(Html(html).into_response())
}

/// Store refusals become a flash message, anything else propagates
fn store_outcome(result: Result<(), StoreError>, success: &str) -> AppResult<OpOutcome> {
    match result {
        Ok(()) => Ok(OpOutcome::success(success)),
        Err(e @ (StoreError::LastAdmin
        | StoreError::LastAccount
        | StoreError::SelfDeletion
        | StoreError::NotFound(_))) => Ok(OpOutcome::failure(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub async fn set_admin(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(uid): Path<i64>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    tracing::info!("{} granting admin to user {}", admin.username, uid);
    let result = state.accounts.call(move |s| s.set_admin(uid, true)).await;
    let outcome = store_outcome(result, "User is now an admin")?;
    Ok(outcome_response(&headers, outcome, "/users"))
}

pub async fn unset_admin(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(uid): Path<i64>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    tracing::info!("{} revoking admin from user {}", admin.username, uid);
    let result = state.accounts.call(move |s| s.set_admin(uid, false)).await;
    let outcome = store_outcome(result, "Admin rights removed")?;
    Ok(outcome_response(&headers, outcome, "/users"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    tracing::info!("{} deleting user {}", admin.username, username);

    let target = username.clone();
    let acting = admin.username.clone();
    let result = state.accounts.call(move |s| s.delete_account(&target, &acting)).await.map(|deleted| {
        let bridge = state.bridge.clone();
        tokio::spawn(async move {
            report_bridge("user removal", bridge.remove_user(&deleted.username).await);
        });
    });
    let outcome = store_outcome(result, "User deleted")?;
    Ok(outcome_response(&headers, outcome, "/users"))
}

pub async fn check_last_user(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    require_admin(&state, &session).await?;
    let count = state.accounts.call(|s| s.count_accounts()).await?;
    Ok(Json(json!({ "isLastUser": count <= 1 })).into_response())
}
