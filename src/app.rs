use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{auth, config::ServerConfig, error::expose_error_stack, state::AppState};

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
}

async fn health() -> Json<Health> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(Health {
        status: "ok",
        timestamp,
    })
}

fn cors_layer(cfg: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn build_app(state: AppState) -> Router {
    let server = state.config.server.clone();

    let router = Router::new()
        .nest("/api", auth::router(&state))
        .route("/health", get(health))
        .with_state(state);

    let router = if server.env.is_production() {
        router
    } else {
        router.layer(middleware::map_response(expose_error_stack))
    };

    router.layer(cors_layer(&server)).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
            })
            .on_response(
                |res: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 span: &tracing::Span| {
                    let status = res.status();
                    span.record("status", tracing::field::display(status));
                    let latency_ms = latency.as_millis() as u64;
                    if status.is_server_error() {
                        tracing::error!(%status, latency_ms, "response");
                    } else {
                        tracing::info!(%status, latency_ms, "response");
                    }
                },
            ),
    )
}

pub async fn serve(app: Router, cfg: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::{
            extractors::{authorize, AuthUser, RoleGuard},
            jwt::JwtKeys,
            repo::memory::InMemoryUserRepository,
            repo_types::UserRole,
        },
        notify::testing::RecordingNotifier,
    };

    fn app() -> Router {
        build_app(AppState::fake())
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_ana(app: &Router) -> Value {
        let res = call(
            app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"name": "Ana", "email": "ana@x.com", "password": "secret1", "role": "TRAVELER"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        json_body(res).await
    }

    #[tokio::test]
    async fn health_is_ok() {
        let res = call(&app(), "GET", "/health", None, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "ok");
    }

    #[tokio::test]
    async fn register_then_duplicate_conflicts() {
        let app = app();
        let body = register_ana(&app).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "ana@x.com");
        assert_eq!(body["data"]["user"]["role"], "TRAVELER");
        assert!(body["data"]["token"].as_str().is_some());
        assert!(!body.to_string().contains("password"));
        assert!(!body.to_string().contains("argon2"));

        let res = call(
            &app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({"name": "Otra", "email": "ana@x.com", "password": "another1", "role": "HOST"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        let body = json_body(res).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn registration_token_decodes_to_user() {
        let state = AppState::fake();
        let keys = JwtKeys::from_config(&state.config.jwt);
        let app = build_app(state);
        let body = register_ana(&app).await;

        let claims = keys
            .verify_session(body["data"]["token"].as_str().unwrap())
            .unwrap();
        assert_eq!(claims.id.to_string(), body["data"]["user"]["id"].as_str().unwrap());
        assert_eq!(claims.email, "ana@x.com");
        assert_eq!(claims.role, UserRole::Traveler);
    }

    #[tokio::test]
    async fn invalid_bodies_are_400() {
        let app = app();
        let cases = [
            json!({"name": "Ana", "email": "nope", "password": "secret1"}),
            json!({"name": "Ana", "email": "ana@x.com", "password": "123"}),
            json!({"name": "Ana", "email": "ana@x.com", "password": "secret1", "role": "ADMIN"}),
            json!({"email": "ana@x.com"}),
            json!(["not", "an", "object"]),
        ];
        for body in cases {
            let res = call(&app, "POST", "/api/auth/register", None, Some(body)).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(json_body(res).await["error"]["code"], "VALIDATION_ERROR");
        }
    }

    #[tokio::test]
    async fn login_failures_share_one_body() {
        let app = app();
        register_ana(&app).await;

        let wrong = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@x.com", "password": "wrong"})),
        )
        .await;
        let missing = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "missing@x.com", "password": "anything"})),
        )
        .await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = json_body(wrong).await;
        let missing = json_body(missing).await;
        assert_eq!(wrong["error"]["message"], "Credenciales inválidas");
        assert_eq!(wrong["error"]["message"], missing["error"]["message"]);
        assert_eq!(wrong["error"]["code"], missing["error"]["code"]);
    }

    #[tokio::test]
    async fn login_returns_token_and_me_works() {
        let app = app();
        register_ana(&app).await;
        let res = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        let token = body["data"]["token"].as_str().unwrap().to_string();

        for path in ["/api/auth/me", "/api/auth/profile"] {
            let res = call(&app, "GET", path, Some(&token), None).await;
            assert_eq!(res.status(), StatusCode::OK);
            let me = json_body(res).await;
            assert_eq!(me["data"]["user"]["name"], "Ana");
        }
    }

    #[tokio::test]
    async fn protected_routes_need_a_valid_token() {
        let app = app();
        let res = call(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(res).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        // Outside production the error chain is attached.
        assert!(body["error"]["stack"].is_string());

        let res = call(&app, "GET", "/api/auth/me", Some("garbage"), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_for_vanished_account_is_401() {
        let state = AppState::fake();
        let keys = JwtKeys::from_config(&state.config.jwt);
        let app = build_app(state);
        let token = keys
            .sign_session_for(Uuid::new_v4(), "ghost@x.com", UserRole::Traveler)
            .unwrap();
        let res = call(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(res).await["error"]["message"],
            "Usuario no encontrado o token inválido"
        );

        let res = call(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"currentPassword": "secret1", "newPassword": "newsecret"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = call(
            &app,
            "PUT",
            "/api/auth/profile",
            Some(&token),
            Some(json!({"name": "Nadie"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn update_profile_and_change_password() {
        let app = app();
        let token = register_ana(&app).await["data"]["token"]
            .as_str()
            .unwrap()
            .to_string();

        let res = call(
            &app,
            "PUT",
            "/api/auth/profile",
            Some(&token),
            Some(json!({"phone": "+34 600 000 000", "profilePicture": "https://cdn.divein.app/ana.jpg"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let user = json_body(res).await["data"]["user"].clone();
        assert_eq!(user["name"], "Ana");
        assert_eq!(user["phone"], "+34 600 000 000");
        assert_eq!(user["profilePicture"], "https://cdn.divein.app/ana.jpg");

        let res = call(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"currentPassword": "wrong", "newPassword": "newsecret"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = call(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"currentPassword": "secret1", "newPassword": "abc"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = call(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"currentPassword": "secret1", "newPassword": "newsecret"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let old = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
        let new = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@x.com", "password": "newsecret"})),
        )
        .await;
        assert_eq!(new.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forgot_password_is_uniform_and_notifies_known_accounts() {
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::fake_with(Arc::new(InMemoryUserRepository::default()), notifier.clone());
        let keys = JwtKeys::from_config(&state.config.jwt);
        let app = build_app(state);
        register_ana(&app).await;

        let known = call(
            &app,
            "POST",
            "/api/auth/forgot-password",
            None,
            Some(json!({"email": "ana@x.com"})),
        )
        .await;
        let unknown = call(
            &app,
            "POST",
            "/api/auth/forgot-password",
            None,
            Some(json!({"email": "missing@x.com"})),
        )
        .await;
        assert_eq!(known.status(), StatusCode::OK);
        assert_eq!(unknown.status(), StatusCode::OK);
        assert_eq!(json_body(known).await, json_body(unknown).await);

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ana@x.com");
        let token = sent[0]
            .1
            .split("token=")
            .nth(1)
            .expect("link carries a token")
            .to_string();
        assert!(keys.verify_reset(&token).is_ok());
        assert!(keys.verify_session(&token).is_err());

        let res = call(
            &app,
            "POST",
            "/api/auth/forgot-password",
            None,
            Some(json!({"email": "not-an-email"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = call(
            &app,
            "POST",
            "/api/auth/reset-password",
            None,
            Some(json!({"token": token, "newPassword": "brandnew"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@x.com", "password": "brandnew"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        // A used link cannot set the password again.
        let res = call(
            &app,
            "POST",
            "/api/auth/reset-password",
            None,
            Some(json!({"token": token, "newPassword": "takeover"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@x.com", "password": "brandnew"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_password_rejects_session_tokens() {
        let app = app();
        let token = register_ana(&app).await["data"]["token"]
            .as_str()
            .unwrap()
            .to_string();
        let res = call(
            &app,
            "POST",
            "/api/auth/reset-password",
            None,
            Some(json!({"token": token, "newPassword": "brandnew"})),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forgot_password_is_uniform_when_mail_fails() {
        let state = AppState::fake_with(
            Arc::new(InMemoryUserRepository::default()),
            Arc::new(RecordingNotifier::failing()),
        );
        let app = build_app(state);
        register_ana(&app).await;

        let known = call(
            &app,
            "POST",
            "/api/auth/forgot-password",
            None,
            Some(json!({"email": "ana@x.com"})),
        )
        .await;
        let unknown = call(
            &app,
            "POST",
            "/api/auth/forgot-password",
            None,
            Some(json!({"email": "missing@x.com"})),
        )
        .await;
        assert_eq!(known.status(), StatusCode::OK);
        assert_eq!(known.status(), unknown.status());
        assert_eq!(json_body(known).await, json_body(unknown).await);
    }

    #[tokio::test]
    async fn role_guard_gates_by_role() {
        let state = AppState::fake();
        let keys = JwtKeys::from_config(&state.config.jwt);

        async fn whoami(AuthUser(claims): AuthUser) -> String {
            claims.role.to_string()
        }
        let hosts_only: Router = Router::new()
            .route("/host/dashboard", get(whoami))
            .route_layer(middleware::from_fn_with_state(
                RoleGuard::new(&state, &[UserRole::Host]),
                authorize,
            ))
            .with_state(state);

        let host = keys
            .sign_session_for(Uuid::new_v4(), "host@x.com", UserRole::Host)
            .unwrap();
        let traveler = keys
            .sign_session_for(Uuid::new_v4(), "t@x.com", UserRole::Traveler)
            .unwrap();

        let res = call(&hosts_only, "GET", "/host/dashboard", Some(&host), None).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = call(&hosts_only, "GET", "/host/dashboard", Some(&traveler), None).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(res).await["error"]["code"], "FORBIDDEN");

        let res = call(&hosts_only, "GET", "/host/dashboard", None, None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn production_hides_stack() {
        let mut state = AppState::fake();
        let mut config = (*state.config).clone();
        config.server.env = crate::config::Environment::Production;
        state.config = Arc::new(config);
        let app = build_app(state);

        let res = call(&app, "GET", "/api/auth/me", Some("garbage"), None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(json_body(res).await["error"].get("stack").is_none());
    }
}
