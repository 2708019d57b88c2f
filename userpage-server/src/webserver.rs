use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{event, instrument, Level};
use userpage_lib::api::{Credentials, DownloadUrl, ErrorBody, MediaQuery};
use userpage_lib::{
    AuthService, BackendError, DocumentStore, Fields, ImageFile, ObjectMeta, ObjectStore, Session,
};

use crate::db::DB;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A backend failure rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(BackendError);

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            BackendError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BackendError::Forbidden(_) => StatusCode::FORBIDDEN,
            BackendError::Conflict(_) => StatusCode::CONFLICT,
            BackendError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            BackendError::Transport(_) => StatusCode::BAD_GATEWAY,
            BackendError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The raw token of an `Authorization: Bearer` header.
struct BearerToken(String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| BackendError::Unauthorized("missing bearer token".to_string()))?;
        Ok(BearerToken(token.trim().to_string()))
    }
}

/// The caller's live session.
struct AppUser {
    session: Session,
}

impl AppUser {
    /// Documents are keyed by their owner's uid, objects end with it.
    fn authorize(&self, owner: &str) -> Result<(), ApiError> {
        if owner == self.session.uid {
            return Ok(());
        }
        event!(Level::WARN, uid = %self.session.uid, %owner, "Write to another account rejected");
        Err(BackendError::Forbidden(format!("{} does not belong to this session", owner)).into())
    }
}

#[async_trait]
impl<T> FromRequestParts<Arc<T>> for AppUser
where
    T: DB + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, db: &Arc<T>) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, db).await?;
        let session = db.get_session(&token).await?;
        Ok(AppUser { session })
    }
}

pub fn router<T: DB + 'static>(db: Arc<T>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/v1/documents/:collection/:id",
            get(get_document::<T>)
                .put(set_document::<T>)
                .patch(update_document::<T>)
                .delete(delete_document::<T>),
        )
        .route("/v1/objects/*key", put(put_object::<T>))
        .route("/v1/urls/*key", get(download_url::<T>))
        .route("/v1/media/*key", get(media::<T>))
        .route("/v1/accounts", post(sign_up::<T>))
        .route("/v1/accounts/me", delete(delete_account::<T>))
        .route("/v1/sessions", post(sign_in::<T>).delete(sign_out::<T>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(db)
}

/// CORS for browser front ends. An empty origin list allows any origin.
pub fn cors(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(origins))
}

pub async fn start_webserver(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let app = app.layer(TraceLayer::new_for_http());

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                event!(Level::ERROR, error = %err, "Failed to listen for ctrl-c");
            }
        })
        .await?;
    Ok(())
}

// Wildcard captures may or may not keep their leading slash.
fn object_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

fn object_owner(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[instrument(skip(db))]
async fn get_document<T: DB>(
    State(db): State<Arc<T>>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Fields>, ApiError> {
    match db.get(&collection, &id).await? {
        Some(fields) => Ok(Json(fields)),
        None => Err(BackendError::NotFound(format!("{}/{}", collection, id)).into()),
    }
}

#[instrument(skip(db, user, fields), fields(uid = %user.session.uid))]
async fn set_document<T: DB>(
    State(db): State<Arc<T>>,
    Path((collection, id)): Path<(String, String)>,
    user: AppUser,
    Json(fields): Json<Fields>,
) -> Result<StatusCode, ApiError> {
    user.authorize(&id)?;
    db.set(&collection, &id, &fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(db, user, fields), fields(uid = %user.session.uid))]
async fn update_document<T: DB>(
    State(db): State<Arc<T>>,
    Path((collection, id)): Path<(String, String)>,
    user: AppUser,
    Json(fields): Json<Fields>,
) -> Result<StatusCode, ApiError> {
    user.authorize(&id)?;
    db.update(&collection, &id, &fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(db, user), fields(uid = %user.session.uid))]
async fn delete_document<T: DB>(
    State(db): State<Arc<T>>,
    Path((collection, id)): Path<(String, String)>,
    user: AppUser,
) -> Result<StatusCode, ApiError> {
    user.authorize(&id)?;
    db.delete(&collection, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(db, user, headers, body), fields(uid = %user.session.uid, size = body.len()))]
async fn put_object<T: DB>(
    State(db): State<Arc<T>>,
    Path(key): Path<String>,
    user: AppUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ObjectMeta>, ApiError> {
    let key = object_key(&key);
    user.authorize(object_owner(key))?;
    if body.is_empty() {
        return Err(BackendError::InvalidInput("empty upload".to_string()).into());
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let image = ImageFile::new(body.to_vec(), content_type);
    let meta = db.put(key, &image).await?;
    event!(Level::INFO, key = %meta.key, size = meta.size, "Object stored");
    Ok(Json(meta))
}

#[instrument(skip(db))]
async fn download_url<T: DB>(
    State(db): State<Arc<T>>,
    Path(key): Path<String>,
) -> Result<Json<DownloadUrl>, ApiError> {
    let url = db.download_url(object_key(&key)).await?;
    Ok(Json(DownloadUrl { url }))
}

#[instrument(skip(db, query))]
async fn media<T: DB>(
    State(db): State<Arc<T>>,
    Path(key): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Response, ApiError> {
    let object = db.get_media(object_key(&key), &query.token).await?;
    Ok(([(CONTENT_TYPE, object.content_type)], object.bytes).into_response())
}

#[instrument(skip(db, credentials), fields(email = %credentials.email))]
async fn sign_up<T: DB>(
    State(db): State<Arc<T>>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = db
        .sign_up(&credentials.email, &credentials.password)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[instrument(skip(db, credentials), fields(email = %credentials.email))]
async fn sign_in<T: DB>(
    State(db): State<Arc<T>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, ApiError> {
    let session = db
        .sign_in(&credentials.email, &credentials.password)
        .await?;
    Ok(Json(session))
}

/// Ending a session that is already gone, for instance because its account
/// was deleted, succeeds.
#[instrument(skip_all)]
async fn sign_out<T: DB>(
    State(db): State<Arc<T>>,
    BearerToken(token): BearerToken,
) -> Result<StatusCode, ApiError> {
    match db.get_session(&token).await {
        Ok(session) => db.sign_out(&session).await?,
        Err(BackendError::Unauthorized(_)) => event!(Level::DEBUG, "Session already ended"),
        Err(err) => return Err(err.into()),
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(uid = %user.session.uid))]
async fn delete_account<T: DB>(
    State(db): State<Arc<T>>,
    user: AppUser,
) -> Result<StatusCode, ApiError> {
    db.delete_account(&user.session).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserpageDb;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use userpage_lib::{
        profile_image_key, PageMode, ProfileField, ProfilePage, RemoteBackend, SaveOutcome,
        USERS_COLLECTION,
    };

    async fn test_db(dir: &tempfile::TempDir, public_url: &str) -> Arc<UserpageDb> {
        let path = dir.path().join("web.db");
        Arc::new(
            UserpageDb::new(path.to_string_lossy().into_owned(), public_url.to_string())
                .await
                .unwrap(),
        )
    }

    /// Serves the router on an ephemeral port and returns the datastore and
    /// the base URL.
    async fn live_server(dir: &tempfile::TempDir) -> (Arc<UserpageDb>, String) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let db = test_db(dir, &base).await;
        let app = router(db.clone(), 1024 * 1024);
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        (db, base)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(
        method: &str,
        uri: &str,
        session: Option<&Session>,
        body: serde_json::Value,
    ) -> Request<Body> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(session) = session {
            request = request.header(AUTHORIZATION, format!("Bearer {}", session.token));
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    fn upload_request(key: &str, session: Option<&Session>, bytes: Vec<u8>) -> Request<Body> {
        let mut request = Request::builder()
            .method("PUT")
            .uri(format!("/v1/objects/{}", key))
            .header(CONTENT_TYPE, "image/png");
        if let Some(session) = session {
            request = request.header(AUTHORIZATION, format!("Bearer {}", session.token));
        }
        request.body(Body::from(bytes)).unwrap()
    }

    fn u1_record() -> Fields {
        [
            ("firstName", "A"),
            ("lastName", "B"),
            ("email", "a@b.com"),
            ("gender", "F"),
            ("district", "D1"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[tokio::test]
    async fn missing_document_is_404_with_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_db(&dir, "http://test").await, 1024);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/documents/users/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("users/u1"));
    }

    #[tokio::test]
    async fn patch_merges_into_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir, "http://test").await;
        let session = db.sign_up("a@b.com", "pw").await.unwrap();
        let app = router(db.clone(), 1024);
        let uri = format!("/v1/documents/users/{}", session.uid);

        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &uri,
                Some(&session),
                serde_json::json!({ "district": "D2" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &uri,
                Some(&session),
                serde_json::json!({ "district": "D1", "gender": "F" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(json_request(
                "PATCH",
                &uri,
                Some(&session),
                serde_json::json!({ "district": "D2" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let stored = db.get("users", &session.uid).await.unwrap().unwrap();
        assert_eq!(stored["district"], "D2");
        assert_eq!(stored["gender"], "F");
    }

    #[tokio::test]
    async fn anonymous_writes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir, "http://test").await;
        let owner = db.sign_up("a@b.com", "pw").await.unwrap();
        db.set(USERS_COLLECTION, &owner.uid, &u1_record())
            .await
            .unwrap();
        let app = router(db.clone(), 1024);
        let uri = format!("/v1/documents/users/{}", owner.uid);

        for method in ["PUT", "PATCH", "DELETE"] {
            let response = app
                .clone()
                .oneshot(json_request(
                    method,
                    &uri,
                    None,
                    serde_json::json!({ "district": "X" }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", method);
        }

        let response = app
            .oneshot(upload_request(
                &profile_image_key(&owner.uid),
                None,
                vec![1],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(
            db.get(USERS_COLLECTION, &owner.uid).await.unwrap(),
            Some(u1_record())
        );
        assert!(db
            .download_url(&profile_image_key(&owner.uid))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn writes_to_another_account_are_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir, "http://test").await;
        let owner = db.sign_up("a@b.com", "pw").await.unwrap();
        let other = db.sign_up("c@d.com", "pw").await.unwrap();
        db.set(USERS_COLLECTION, &owner.uid, &u1_record())
            .await
            .unwrap();
        let app = router(db.clone(), 1024);
        let uri = format!("/v1/documents/users/{}", owner.uid);

        for method in ["PUT", "PATCH", "DELETE"] {
            let response = app
                .clone()
                .oneshot(json_request(
                    method,
                    &uri,
                    Some(&other),
                    serde_json::json!({ "district": "X" }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", method);
        }

        let response = app
            .oneshot(upload_request(
                &profile_image_key(&owner.uid),
                Some(&other),
                vec![1],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert_eq!(
            db.get(USERS_COLLECTION, &owner.uid).await.unwrap(),
            Some(u1_record())
        );
        assert!(db
            .download_url(&profile_image_key(&owner.uid))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn upload_then_fetch_media() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir, "http://test").await;
        let session = db.sign_up("a@b.com", "pw").await.unwrap();
        let app = router(db, 1024);
        let key = profile_image_key(&session.uid);

        let response = app
            .clone()
            .oneshot(upload_request(&key, Some(&session), vec![1u8, 2, 3]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let meta = body_json(response).await;
        assert_eq!(meta["key"], key.as_str());
        assert_eq!(meta["size"], 3);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/urls/{}", key))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let url = body_json(response).await["url"]
            .as_str()
            .unwrap()
            .to_string();
        let path = url.strip_prefix("http://test").unwrap().to_string();

        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(bytes.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db(&dir, "http://test").await;
        let session = db.sign_up("a@b.com", "pw").await.unwrap();
        let app = router(db, 4);

        let response = app
            .oneshot(upload_request(
                &profile_image_key(&session.uid),
                Some(&session),
                vec![0u8; 16],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn account_routes_require_a_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_db(&dir, "http://test").await, 1024);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/accounts/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/accounts",
                None,
                serde_json::json!({ "email": "a@b.com", "password": "pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let token = body_json(response).await["token"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/accounts/me")
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn signing_out_an_ended_session_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_db(&dir, "http://test").await, 1024);
        let sign_out = |token: Option<&str>| {
            let mut request = Request::builder().method("DELETE").uri("/v1/sessions");
            if let Some(token) = token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }
            request.body(Body::empty()).unwrap()
        };

        let response = app.clone().oneshot(sign_out(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(sign_out(Some("unknown"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn cors_rejects_malformed_origins() {
        assert!(cors(&[]).is_ok());
        assert!(cors(&["http://localhost:3000".to_string()]).is_ok());
        assert!(cors(&["bad\norigin".to_string()]).is_err());
    }

    #[test]
    fn objects_belong_to_their_last_segment() {
        assert_eq!(object_owner("updateProfileImages/u1"), "u1");
        assert_eq!(object_owner("u1"), "u1");
    }

    /// Identifiers with URL delimiters in them reach the same record over
    /// HTTP as they do in process.
    #[tokio::test]
    async fn identifiers_with_url_delimiters_round_trip_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let (db, base) = live_server(&dir).await;
        let remote = RemoteBackend::new(base);

        for id in ["a#b", "a/b", "a?b=c", "a b"] {
            let record: Fields = [("firstName".to_string(), id.to_string())]
                .into_iter()
                .collect();
            db.set(USERS_COLLECTION, id, &record).await.unwrap();
        }
        db.set(USERS_COLLECTION, "a", &u1_record()).await.unwrap();

        for id in ["a#b", "a/b", "a?b=c", "a b"] {
            let fields = remote.get(USERS_COLLECTION, id).await.unwrap().unwrap();
            assert_eq!(fields["firstName"], id);
        }
        assert_eq!(remote.get(USERS_COLLECTION, "a#c").await.unwrap(), None);
    }

    /// Drives a whole page session through the HTTP client against a live
    /// server.
    #[tokio::test]
    async fn profile_page_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let (db, base) = live_server(&dir).await;

        let anonymous = RemoteBackend::new(base.clone());
        let session = anonymous.sign_up("a@b.com", "secret").await.unwrap();
        assert!(matches!(
            anonymous.set(USERS_COLLECTION, &session.uid, &u1_record()).await,
            Err(BackendError::Unauthorized(_))
        ));

        let remote = anonymous.with_session(session.clone());
        remote
            .set(USERS_COLLECTION, &session.uid, &u1_record())
            .await
            .unwrap();

        let mut page = ProfilePage::mount(session.uid.clone(), remote.clone()).await;
        assert_eq!(page.view().unwrap().district, "D1");

        page.begin_edit().unwrap();
        page.set_field(ProfileField::District, "D2").unwrap();
        page.select_image(ImageFile::new(vec![5, 6], "image/png"))
            .unwrap();
        let SaveOutcome::WithPicture { url } = page.save().await.unwrap() else {
            panic!("expected a picture upload");
        };
        assert_eq!(page.mode(), PageMode::Viewing);
        assert!(url.starts_with(&base));

        let stored = db.get(USERS_COLLECTION, &session.uid).await.unwrap().unwrap();
        assert_eq!(stored["district"], "D2");
        assert_eq!(stored["profilePicture"], url);
        assert_eq!(
            remote
                .download_url(&profile_image_key(&session.uid))
                .await
                .unwrap(),
            url
        );

        let report = page.delete(&session).await.unwrap();
        assert!(report.is_complete());
        assert!(page.load().await.unwrap().is_none());
        assert!(remote.sign_in("a@b.com", "secret").await.is_err());
    }
}
