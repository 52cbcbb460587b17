//! Reverse proxy in front of the FileBrowser companion. `/filemanager/*`
//! loses its prefix on the way through, `/static/*` is passed as is since
//! the companion's UI loads its own assets from there.

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use std::net::SocketAddr;
use crate::app::AppState;

pub async fn filemanager_root() -> Redirect {
    Redirect::to("/filemanager/")
}

pub async fn proxy_filemanager(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
) -> Response {
    let path = req
        .uri()
        .path()
        .strip_prefix("/filemanager")
        .filter(|rest| !rest.is_empty())
        .unwrap_or("/")
        .to_string();
    forward(&state.proxy, state.bridge.base_url(), &path, connect_info.map(|c| c.0), req).await
}

pub async fn proxy_static(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
) -> Response {
    let path = req.uri().path().to_string();
    forward(&state.proxy, state.bridge.base_url(), &path, connect_info.map(|c| c.0), req).await
}

/// Sends `req` to `base_url` + `path` (plus the original query) and copies
/// the answer back. Redirects come back to the browser unfollowed.
pub async fn forward(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    remote: Option<SocketAddr>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let target = match parts.uri.query() {
        Some(query) => format!("{}{}?{}", base_url, path, query),
        None => format!("{}{}", base_url, path),
    };

    let body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read request body for {}: {}", target, e);
            return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
        }
    };

    let mut headers = parts.headers.clone();
    let original_host = headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    if let Some(addr) = remote {
        if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
            headers.insert("x-forwarded-for", value);
        }
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Some(host) = original_host {
        headers.insert("x-forwarded-host", host);
    }

    tracing::debug!("Proxying {} {}", parts.method, target);
    let upstream = match client
        .request(parts.method, &target)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("File manager unreachable at {}: {}", target, e);
            return (StatusCode::BAD_GATEWAY, "File manager unavailable").into_response();
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    for name in [header::TRANSFER_ENCODING, header::CONNECTION] {
        response_headers.remove(name);
    }
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to read file manager response: {}", e);
            return (StatusCode::BAD_GATEWAY, "File manager unavailable").into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, Method, Uri},
        Json, Router,
    };
    use serde_json::{json, Value};

    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Response {
        if uri.path() == "/login" {
            return Redirect::to("/files/").into_response();
        }
        let headers: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
            .collect();
        (
            StatusCode::CREATED,
            Json(json!({
                "method": method.as_str(),
                "uri": uri.to_string(),
                "headers": headers,
                "body": body,
            })),
        )
            .into_response()
    }

    async fn spawn_upstream() -> String {
        let app = Router::new().fallback(echo);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_forward_copies_request_and_response() {
        let base = spawn_upstream().await;
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/filemanager/api/resources?x=1")
            .header("host", "nas.local:5000")
            .header("x-auth", "token")
            .body(Body::from("payload"))
            .unwrap();
        let remote: SocketAddr = "10.0.0.7:40000".parse().unwrap();

        let resp = forward(&client(), &base, "/api/resources", Some(remote), req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let echoed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["uri"], "/api/resources?x=1");
        assert_eq!(echoed["body"], "payload");
        assert_eq!(echoed["headers"]["x-auth"], "token");
        assert_eq!(echoed["headers"]["x-forwarded-for"], "10.0.0.7");
        assert_eq!(echoed["headers"]["x-forwarded-host"], "nas.local:5000");
        assert_ne!(echoed["headers"]["host"], "nas.local:5000");
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let base = spawn_upstream().await;
        let req = axum::http::Request::builder().uri("/filemanager/login").body(Body::empty()).unwrap();
        let resp = forward(&client(), &base, "/login", None, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/files/");
    }

    #[tokio::test]
    async fn test_filemanager_root_redirect_is_not_cached() {
        let resp = filemanager_root().await.into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/filemanager/");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = axum::http::Request::builder().uri("/static/app.js").body(Body::empty()).unwrap();
        let resp = forward(&client(), &format!("http://{}", addr), "/static/app.js", None, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
