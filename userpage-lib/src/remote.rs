use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{event, instrument, Level};

use crate::api::{self, Credentials, DownloadUrl, ErrorBody};
use crate::backend::{AuthService, DocumentStore, ObjectMeta, ObjectStore, Session};
use crate::error::BackendError;
use crate::profile::{Fields, ImageFile};

/// Talks to a `userpage-server` over HTTP.
///
/// Document and object writes are only accepted for the signed-in account,
/// so a backend that writes needs [`RemoteBackend::with_session`].
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    base_url: String,
    http: reqwest::Client,
    session: Option<Session>,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.session {
            Some(session) => request.bearer_auth(&session.token),
            None => request,
        }
    }
}

/// Maps a non-success response onto a [`BackendError`], using the server's
/// error body when there is one.
async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    event!(Level::DEBUG, %status, %message, "Request rejected");

    Err(match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::UNAUTHORIZED => BackendError::Unauthorized(message),
        StatusCode::FORBIDDEN => BackendError::Forbidden(message),
        StatusCode::CONFLICT => BackendError::Conflict(message),
        StatusCode::BAD_REQUEST => BackendError::InvalidInput(message),
        _ => BackendError::Storage(message),
    })
}

#[async_trait]
impl DocumentStore for RemoteBackend {
    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, BackendError> {
        let response = self
            .http
            .get(self.url(&api::documents_path(collection, id)))
            .send()
            .await?;

        match check(response).await {
            Ok(response) => Ok(Some(response.json::<Fields>().await?)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, fields))]
    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<(), BackendError> {
        let request = self.http.put(self.url(&api::documents_path(collection, id)));
        let response = self
            .authorized(request)
            .json(fields)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<(), BackendError> {
        let request = self.http.patch(self.url(&api::documents_path(collection, id)));
        let response = self
            .authorized(request)
            .json(fields)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let request = self.http.delete(self.url(&api::documents_path(collection, id)));
        let response = self
            .authorized(request)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RemoteBackend {
    #[instrument(skip(self, image), fields(size = image.bytes.len()))]
    async fn put(&self, key: &str, image: &ImageFile) -> Result<ObjectMeta, BackendError> {
        let request = self.http.put(self.url(&api::objects_path(key)));
        let response = self
            .authorized(request)
            .header(CONTENT_TYPE, image.content_type.as_str())
            .body(image.bytes.clone())
            .send()
            .await?;
        Ok(check(response).await?.json::<ObjectMeta>().await?)
    }

    #[instrument(skip(self))]
    async fn download_url(&self, key: &str) -> Result<String, BackendError> {
        let response = self.http.get(self.url(&api::urls_path(key))).send().await?;
        let body = check(response).await?.json::<DownloadUrl>().await?;
        Ok(body.url)
    }
}

#[async_trait]
impl AuthService for RemoteBackend {
    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url(api::ACCOUNTS_PATH))
            .json(&credentials)
            .send()
            .await?;
        Ok(check(response).await?.json::<Session>().await?)
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url(api::SESSIONS_PATH))
            .json(&credentials)
            .send()
            .await?;
        Ok(check(response).await?.json::<Session>().await?)
    }

    #[instrument(skip(self, session), fields(uid = %session.uid))]
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let response = self
            .http
            .delete(self.url(api::SESSIONS_PATH))
            .bearer_auth(&session.token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(uid = %session.uid))]
    async fn delete_account(&self, session: &Session) -> Result<(), BackendError> {
        let response = self
            .http
            .delete(self.url(api::CURRENT_ACCOUNT_PATH))
            .bearer_auth(&session.token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
