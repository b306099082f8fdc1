//! HTTP router.
//!
//! All API routes live under `/api`. Each gated group declares its allowed
//! role set at registration.

use axum::{
    Json, Router,
    extract::{OriginalUri, State},
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state, map_response},
    routing::{delete, get, post},
};
use chrono::Utc;
use gradebook_platform_access::RoleSet;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::auth::{self, AppState, load_session, require_authenticated, require_role};
use crate::error::{ApiError, expose_error_details};
use crate::{students, users};

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/auth/google", get(auth::google_start))
        .route("/auth/google/callback", get(auth::google_callback))
        .route("/auth/logout", get(auth::logout).post(auth::logout))
        .route("/auth/status", get(auth::status));

    let admin = Router::new()
        .route("/users", post(users::invite).get(users::list))
        .route("/users/{id}", delete(users::delete))
        .route_layer(from_fn_with_state(RoleSet::admin(), require_role));

    let staff = Router::new()
        .route("/students", get(students::list))
        .route_layer(from_fn_with_state(RoleSet::staff(), require_role));

    let student = Router::new()
        .route("/students/me/profile", get(students::my_profile))
        .route_layer(from_fn_with_state(RoleSet::student(), require_role));

    // Later route layers run first: authentication precedes every role check.
    let gated = Router::new()
        .route("/auth/provider-profile", get(auth::provider_profile))
        .merge(admin)
        .merge(staff)
        .merge(student)
        .route_layer(from_fn(require_authenticated));

    let api = public
        .merge(gated)
        .layer(from_fn_with_state(Arc::clone(&state), load_session));

    let mut app = Router::new()
        .route("/", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .with_state(Arc::clone(&state));

    if !state.environment.is_production() {
        app = app.layer(map_response(expose_error_details));
    }

    app.layer(cors(&state.front_url))
        .layer(TraceLayer::new_for_http())
}

fn cors(front_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);
    match HeaderValue::from_str(front_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(front_url, "FRONT_URL is not a valid origin, cross-origin requests disabled");
            layer
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "Gradebook API",
        "status": "OK",
        "environment": state.environment.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound {
        message: format!("route not found: {method} {}", uri.path()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Stores;
    use crate::config::{Environment, SessionConfig};
    use crate::mail::LogMailer;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::COOKIE, header::LOCATION, header::SET_COOKIE};
    use axum::response::Response;
    use chrono::Duration;
    use gradebook_platform_access::{
        CredentialCipher, ExternalIdentity, IdentityProvider, IdentityStore, InvitedUser,
        MemoryIdentityStore, MemoryProfileStore, MemorySessionStore, ProfileStore, ProfileUpdate,
        ProviderError, ProviderGrant, ProviderTokens, Role, Session, SessionStore, StudentProfile,
    };
    use http_body_util::BodyExt;
    use rootcause::Report;
    use tower::ServiceExt;

    const FRONT: &str = "http://localhost:5173";

    struct FakeProvider {
        email: String,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "google"
        }

        fn authorization_url(&self) -> Result<String, Report<ProviderError>> {
            Ok("https://accounts.example.com/auth?client_id=test".to_string())
        }

        async fn exchange_code(&self, code: &str) -> Result<ProviderGrant, Report<ProviderError>> {
            if code == "bad" {
                return Err(ProviderError::TokenExchange {
                    reason: "invalid_grant".to_string(),
                }
                .into());
            }
            Ok(ProviderGrant {
                identity: ExternalIdentity {
                    subject_id: "10769150350006150715113082367".to_string(),
                    email: self.email.clone(),
                    name: Some("Ada Lovelace".to_string()),
                    picture: None,
                },
                tokens: ProviderTokens {
                    access_token: "ya29.access".to_string(),
                    refresh_token: Some("1//refresh".to_string()),
                    expires_in: Some(3599),
                },
            })
        }

        async fn refresh(&self, _: &str) -> Result<ProviderTokens, Report<ProviderError>> {
            Ok(ProviderTokens {
                access_token: "ya29.renewed".to_string(),
                refresh_token: None,
                expires_in: Some(3599),
            })
        }

        async fn user_info(&self, access_token: &str) -> Result<ExternalIdentity, Report<ProviderError>> {
            Ok(ExternalIdentity {
                subject_id: "sub".to_string(),
                email: self.email.clone(),
                name: Some(format!("seen with {access_token}")),
                picture: None,
            })
        }
    }

    struct TestApp {
        app: Router,
        identities: Arc<MemoryIdentityStore>,
        profiles: Arc<MemoryProfileStore>,
        sessions: Arc<MemorySessionStore>,
    }

    fn test_app(provider_email: &str) -> TestApp {
        let identities = Arc::new(MemoryIdentityStore::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let stores = Stores {
            identities: identities.clone(),
            profiles: profiles.clone(),
            sessions: sessions.clone(),
        };
        let state = AppState::new(
            Environment::Test,
            FRONT.to_string(),
            SessionConfig::default(),
            stores,
            Arc::new(FakeProvider {
                email: provider_email.to_string(),
            }),
            Arc::new(CredentialCipher::from_key([3u8; 32])),
            Arc::new(LogMailer::new(FRONT)),
        );
        TestApp {
            app: router(Arc::new(state)),
            identities,
            profiles,
            sessions,
        }
    }

    impl TestApp {
        async fn send(&self, request: Request<Body>) -> Response {
            self.app.clone().oneshot(request).await.unwrap()
        }

        /// Seeds a user of the given role with a live session; returns the cookie value.
        async fn signed_in(&self, email: &str, role: Role) -> (InvitedUser, String) {
            let user = self.identities.invite(email, role).await.unwrap();
            let session = Session::authenticated(&user, Duration::hours(24));
            self.sessions.save(&session).await.unwrap();
            (user, session.id().to_string())
        }
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(id) = cookie {
            builder = builder.header(COOKIE, format!("session={id}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, cookie: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(COOKIE, format!("session={cookie}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    fn session_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.strip_prefix("session="))
            .map(|v| v.split(';').next().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let t = test_app("a@x.com");
        let response = t.send(get("/", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "OK");
        assert_eq!(json["environment"], "test");
    }

    #[tokio::test]
    async fn invited_student_signs_in_once_per_session() {
        let t = test_app("a@x.com");
        let (_, admin) = t.signed_in("admin@x.com", Role::Admin).await;

        let response = t
            .send(post_json(
                "/api/users",
                &admin,
                r#"{"email":"A@X.com","role":"STUDENT"}"#,
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["user"]["status"], "INVITED");
        assert_eq!(json["user"]["email"], "a@x.com");

        t.profiles
            .create(StudentProfile::new("2024001", "Ada", "Lovelace", "a@x.com"))
            .await
            .unwrap();

        let response = t.send(get("/api/auth/google", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("https://accounts.example.com/auth"));
        let pre_auth = session_cookie(&response).unwrap();

        let response = t
            .send(get("/api/auth/google/callback?code=4/0Ab", Some(&pre_auth)))
            .await;
        assert_eq!(location(&response), format!("{FRONT}/dashboard"));
        let bound = session_cookie(&response).unwrap();
        assert_ne!(bound, pre_auth);

        let json = json_body(t.send(get("/api/auth/status", Some(&bound))).await).await;
        assert_eq!(json["authenticated"], true);
        assert_eq!(json["user"]["role"], "STUDENT");
        assert_eq!(json["user"]["email"], "a@x.com");

        let user = t.identities.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.status().as_str(), "ACTIVE");
        assert!(user.refresh_token_encrypted().is_some());
        assert_ne!(user.refresh_token_encrypted(), Some("1//refresh"));

        let response = t.send(get("/api/students/me/profile", Some(&bound))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["studentNumber"], "2024001");

        let response = t
            .send(get("/api/auth/google/callback?code=4/0Ab", Some(&bound)))
            .await;
        assert_eq!(location(&response), format!("{FRONT}/login?error=oauth_reuse"));
    }

    #[tokio::test]
    async fn callback_failures_redirect_with_reason_codes() {
        let t = test_app("stranger@x.com");

        let response = t.send(get("/api/auth/google/callback?code=4/0Ab", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), format!("{FRONT}/login?error=not_invited"));

        let response = t
            .send(get("/api/auth/google/callback?error=access_denied", None))
            .await;
        assert_eq!(location(&response), format!("{FRONT}/login?error=no_code"));

        let response = t.send(get("/api/auth/google/callback?code=bad", None)).await;
        assert_eq!(location(&response), format!("{FRONT}/login?error=provider_error"));
    }

    #[tokio::test]
    async fn malformed_callback_query_redirects_to_login() {
        let t = test_app("a@x.com");
        t.identities.invite("a@x.com", Role::Admin).await.unwrap();

        let response = t
            .send(get("/api/auth/google/callback?code=a&code=b", None))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), format!("{FRONT}/login?error=no_code"));
        assert!(session_cookie(&response).is_some());
    }

    #[tokio::test]
    async fn gate_rejects_anonymous_and_wrong_roles() {
        let t = test_app("a@x.com");
        let (_, student) = t.signed_in("s@x.com", Role::Student).await;
        let (_, registrar) = t.signed_in("r@x.com", Role::Scolarite).await;

        let response = t.send(get("/api/users", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await,
            json!({"success": false, "error": "Not authenticated"})
        );

        let response = t.send(get("/api/users", Some(&student))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["success"], false);

        let response = t.send(get("/api/students", Some(&registrar))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = t.send(get("/api/students", Some(&student))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = t.send(get("/api/students/me/profile", Some(&registrar))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = t.send(get("/api/users", Some("forged-session-id"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_session_is_unauthenticated_and_destroyed() {
        let t = test_app("a@x.com");
        let user = t.identities.invite("s@x.com", Role::Student).await.unwrap();
        let session = Session::authenticated(&user, Duration::seconds(-1));
        t.sessions.save(&session).await.unwrap();
        let cookie = session.id().to_string();

        let json = json_body(t.send(get("/api/auth/status", Some(&cookie))).await).await;
        assert_eq!(json, json!({"authenticated": false, "user": null}));
        assert_eq!(t.sessions.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_negotiates_content() {
        let t = test_app("a@x.com");
        let (_, cookie) = t.signed_in("s@x.com", Role::Student).await;

        for _ in 0..2 {
            let request = Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header(COOKIE, format!("session={cookie}"))
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap();
            let response = t.send(request).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(session_cookie(&response).as_deref(), Some(""));
            assert_eq!(json_body(response).await["success"], true);
        }
        assert_eq!(t.sessions.len().unwrap(), 0);

        let response = t.send(get("/api/auth/logout", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), format!("{FRONT}/login?message=logged_out"));
    }

    #[tokio::test]
    async fn deleting_a_user_revokes_their_session() {
        let t = test_app("a@x.com");
        let (_, admin) = t.signed_in("admin@x.com", Role::Admin).await;
        let (student, student_cookie) = t.signed_in("s@x.com", Role::Student).await;

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/api/users/{}", student.id()))
            .header(COOKIE, format!("session={admin}"))
            .body(Body::empty())
            .unwrap();
        let response = t.send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["revokedSessions"], 1);

        let json = json_body(t.send(get("/api/auth/status", Some(&student_cookie))).await).await;
        assert_eq!(json["authenticated"], false);

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/api/users/{}", student.id()))
            .header(COOKIE, format!("session={admin}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(t.send(request).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invite_validates_input_and_rejects_duplicates() {
        let t = test_app("a@x.com");
        let (_, admin) = t.signed_in("admin@x.com", Role::Admin).await;

        let response = t.send(post_json("/api/users", &admin, r#"{"email":"b@x.com"}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t
            .send(post_json("/api/users", &admin, r#"{"email":"b@x.com","role":"PROFESSOR"}"#))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t.send(post_json("/api/users", &admin, "not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t
            .send(post_json("/api/users", &admin, r#"{"email":"admin@x.com","role":"ADMIN"}"#))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let users = json_body(t.send(get("/api/users", Some(&admin))).await).await;
        assert_eq!(users.as_array().unwrap().len(), 1);
        assert!(users[0].get("refreshTokenEncrypted").is_none());
    }

    #[tokio::test]
    async fn provider_profile_uses_a_fresh_token() {
        let t = test_app("s@x.com");
        let (user, cookie) = t.signed_in("s@x.com", Role::Student).await;

        let response = t.send(get("/api/auth/provider-profile", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let update = ProfileUpdate {
            provider: "google".to_string(),
            provider_subject_id: None,
            display_name: None,
            picture: None,
            access_token: "ya29.cached".to_string(),
            refresh_token_encrypted: None,
            token_expiry: Utc::now().timestamp_millis() + 3_600_000,
        };
        t.identities.activate(user.email(), &update).await.unwrap();

        let response = t.send(get("/api/auth/provider-profile", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["name"], "seen with ya29.cached");
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404s() {
        let t = test_app("a@x.com");
        let response = t.send(get("/api/nope", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({"success": false, "error": "route not found: GET /api/nope"})
        );
    }
}
