//! In-process implementation of every backend trait. Clones share state,
//! so a test can hand one clone to a page and inspect the store through
//! another.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend::{AuthService, DocumentStore, ObjectMeta, ObjectStore, Session};
use crate::error::BackendError;
use crate::profile::{Fields, ImageFile};

/// Backend operations that can be made to fail once with
/// [`MemoryBackend::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
    Update,
    Delete,
    Put,
    DownloadUrl,
    SignUp,
    SignIn,
    SignOut,
    DeleteAccount,
}

#[derive(Debug)]
struct StoredObject {
    image: ImageFile,
    generation: u64,
}

#[derive(Debug)]
struct Account {
    email: String,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<(String, String), Fields>,
    objects: HashMap<String, StoredObject>,
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, String>,
    failures: HashSet<Operation>,
    counter: u64,
}

impl State {
    fn check(&mut self, operation: Operation) -> Result<(), BackendError> {
        if self.failures.remove(&operation) {
            Err(BackendError::Transport(format!(
                "injected failure for {:?}",
                operation
            )))
        } else {
            Ok(())
        }
    }

    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn open_session(&mut self, uid: &str) -> Session {
        let token = format!("token-{}", self.next());
        self.sessions.insert(token.clone(), uid.to_string());
        Session {
            uid: uid.to_string(),
            token,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `operation` fail with a transport error.
    pub async fn fail_next(&self, operation: Operation) {
        self.state.write().await.failures.insert(operation);
    }

    /// Bytes currently stored under `key`.
    pub async fn object(&self, key: &str) -> Option<ImageFile> {
        let state = self.state.read().await;
        state.objects.get(key).map(|object| object.image.clone())
    }

    pub async fn has_account(&self, uid: &str) -> bool {
        self.state.read().await.accounts.contains_key(uid)
    }

    pub async fn has_session(&self, session: &Session) -> bool {
        let state = self.state.read().await;
        state.sessions.get(&session.token) == Some(&session.uid)
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::Get)?;
        Ok(state
            .documents
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::Set)?;
        state
            .documents
            .insert((collection.to_string(), id.to_string()), fields.clone());
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::Update)?;
        let record = state
            .documents
            .get_mut(&(collection.to_string(), id.to_string()))
            .ok_or_else(|| BackendError::NotFound(format!("{}/{}", collection, id)))?;
        record.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::Delete)?;
        state
            .documents
            .remove(&(collection.to_string(), id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn put(&self, key: &str, image: &ImageFile) -> Result<ObjectMeta, BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::Put)?;
        let generation = state.next();
        state.objects.insert(
            key.to_string(),
            StoredObject {
                image: image.clone(),
                generation,
            },
        );
        Ok(ObjectMeta {
            key: key.to_string(),
            content_type: image.content_type.clone(),
            size: image.bytes.len() as u64,
        })
    }

    async fn download_url(&self, key: &str) -> Result<String, BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::DownloadUrl)?;
        let object = state
            .objects
            .get(key)
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;
        Ok(format!("memory://{}?generation={}", key, object.generation))
    }
}

#[async_trait]
impl AuthService for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::SignUp)?;
        if state.accounts.values().any(|account| account.email == email) {
            return Err(BackendError::Conflict(format!("{} is already registered", email)));
        }
        let uid = format!("uid-{}", state.next());
        state.accounts.insert(
            uid.clone(),
            Account {
                email: email.to_string(),
                password: password.to_string(),
            },
        );
        Ok(state.open_session(&uid))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::SignIn)?;
        let uid = state
            .accounts
            .iter()
            .find(|(_, account)| account.email == email && account.password == password)
            .map(|(uid, _)| uid.clone())
            .ok_or_else(|| BackendError::Unauthorized("wrong email or password".to_string()))?;
        Ok(state.open_session(&uid))
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::SignOut)?;
        state.sessions.remove(&session.token);
        Ok(())
    }

    async fn delete_account(&self, session: &Session) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.check(Operation::DeleteAccount)?;
        if state.sessions.get(&session.token) != Some(&session.uid) {
            return Err(BackendError::Unauthorized("session is not active".to_string()));
        }
        state.accounts.remove(&session.uid);
        state.sessions.retain(|_, uid| uid != &session.uid);
        Ok(())
    }
}
