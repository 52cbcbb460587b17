use axum::{
    extract::{Form, Query, State},
    response::{Html, IntoResponse, Response, Redirect},
};
use std::collections::HashMap;
use tower_sessions::Session;
use crate::app::AppState;
use crate::errors::{AppError, AppResult, StoreError};
use crate::middleware::{current_account, SESSION_KEY};
use crate::models::{ChangePasswordForm, LoginForm, RegisterForm, SessionUser};
use super::{escape_html, flash_redirect, load_template, report_bridge};

fn error_redirect(to: &str, message: &str) -> Response {
    let sep = if to.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{}{}error={}", to, sep, urlencoding::encode(message))).into_response()
}

async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password.as_bytes(), cost)).await??;
    Ok(hashed)
}

async fn verify_password(password: String, hashed: String) -> AppResult<bool> {
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password.as_bytes(), &hashed)).await??;
    Ok(ok)
}

fn check_password_policy(state: &AppState, password: &str) -> Result<(), String> {
    let min = state.config.security.password_min_length;
    if password.chars().count() < min {
        return Err(format!("Password must be at least {} characters", min));
    }
    Ok(())
}

pub async fn serve_login_page(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    if let Ok(Some(_)) = session.get::<SessionUser>(SESSION_KEY).await {
        return Ok(Redirect::to("/dashboard").into_response());
    }

    let error = params.get("error").map(String::as_str).unwrap_or_default();
    let form = match params.get("form").map(String::as_str) {
        Some("register") => "register",
        _ => "login",
    };

    let html = load_template(&state, "login.html")?
        .replace("{{error}}", &escape_html(error))
        .replace("{{form}}", form)
        .replace("{{min_length}}", &state.config.security.password_min_length.to_string());
    Ok(Html(html).into_response())
}

pub async fn handle_login(
    State(state): State<AppState>,
    session: Session,
    Form(login_form): Form<LoginForm>,
) -> AppResult<Response> {
    tracing::info!("Login attempt for user: {}", login_form.username);

    let username = login_form.username.trim().to_string();
    let account = state
        .accounts
        .call(move |s| s.find_by_username(&username))
        .await?
        .ok_or_else(|| {
            tracing::info!("User not found: {}", login_form.username);
            AppError::Auth("Invalid username or password".into())
        })?;

    if !verify_password(login_form.password, account.password_hash.clone()).await? {
        tracing::info!("Invalid password for user: {}", account.username);
        return Err(AppError::Auth("Invalid username or password".into()));
    }

    session.insert(SESSION_KEY, SessionUser::from(&account)).await?;
    tracing::info!("User {} logged in", account.username);
    Ok(Redirect::to("/dashboard").into_response())
}

pub async fn handle_register(
    State(state): State<AppState>,
    Form(register_form): Form<RegisterForm>,
) -> AppResult<Response> {
    let back = "/?form=register";
    let username = register_form.username.trim().to_string();

    if username.is_empty() {
        return Ok(error_redirect(back, "Username is required"));
    }
    if let Err(msg) = check_password_policy(&state, &register_form.password) {
        return Ok(error_redirect(back, &msg));
    }
    if let Some(confirm) = &register_form.confirm_password {
        if confirm != &register_form.password {
            return Ok(error_redirect(back, "Passwords don't match"));
        }
    }
    let lookup = username.clone();
    if state.accounts.call(move |s| s.find_by_username(&lookup)).await?.is_some() {
        return Ok(error_redirect(back, "Username already taken"));
    }

    let password_hash = hash_password(register_form.password.clone(), state.config.security.bcrypt_cost).await?;
    let new_name = username.clone();
    match state.accounts.call(move |s| s.create_account(&new_name, &password_hash, false)).await {
        Ok(account) => tracing::info!("Registered user {} (id {})", account.username, account.id),
        Err(StoreError::DuplicateUsername(_)) => {
            return Ok(error_redirect(back, "Username already taken"));
        }
        Err(e) => return Err(e.into()),
    }

    let bridge = state.bridge.clone();
    let password = register_form.password;
    tokio::spawn(async move {
        report_bridge("user mirror", bridge.mirror_user(&username, &password, false).await);
    });

    Ok(error_redirect("/", "Registration successful! Please login"))
}

pub async fn handle_logout(session: Session) -> Response {
    if let Err(e) = session.remove::<SessionUser>(SESSION_KEY).await {
        tracing::warn!("Session removal error: {}", e);
    }
    Redirect::to("/").into_response()
}

pub async fn serve_change_password(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let account = current_account(&state, &session).await?;
    let error = params.get("error").map(String::as_str).unwrap_or_default();

    let html = load_template(&state, "change_password.html")?
        .replace("{{username}}", &escape_html(&account.username))
        .replace("{{error}}", &escape_html(error))
        .replace("{{min_length}}", &state.config.security.password_min_length.to_string());
    Ok(Html(html).into_response())
}

pub async fn handle_change_password(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Response> {
    let back = "/change_password";
    let account = current_account(&state, &session).await?;

    if let Err(msg) = check_password_policy(&state, &form.new_password) {
        return Ok(error_redirect(back, &msg));
    }
    if form.new_password != form.confirm_password {
        return Ok(error_redirect(back, "New passwords don't match"));
    }
    if !verify_password(form.old_password, account.password_hash.clone()).await? {
        tracing::info!("Wrong current password for {}", account.username);
        return Ok(error_redirect(back, "Current password is incorrect"));
    }

    let password_hash = hash_password(form.new_password.clone(), state.config.security.bcrypt_cost).await?;
    let id = account.id;
    state.accounts.call(move |s| s.set_password(id, &password_hash)).await?;
    tracing::info!("Password changed for {}", account.username);

    let bridge = state.bridge.clone();
    let new_password = form.new_password;
    tokio::spawn(async move {
        report_bridge(
            "password mirror",
            bridge.mirror_user(&account.username, &new_password, account.is_admin).await,
        );
        if account.is_admin {
            report_bridge("admin secret rotation", bridge.rotate_admin_secret().await);
        }
    });

    Ok(flash_redirect("/dashboard", "Password changed"))
}
