use std::sync::Arc;

use tracing::error;

use huddle_db::Database;
use huddle_gateway::dispatcher::Dispatcher;

use crate::blobs::BlobStore;
use crate::email::EmailSender;
use crate::error::{ApiError, ApiResult};
use crate::unfurl::LinkUnfurler;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub blobs: Arc<dyn BlobStore>,
    pub unfurler: Arc<dyn LinkUnfurler>,
    pub email: Arc<dyn EmailSender>,
    /// Base for invite links, without a trailing slash.
    pub public_url: String,
    pub invite_ttl_days: u32,
}

impl AppStateInner {
    /// Run a store operation off the async runtime.
    pub async fn blocking<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> huddle_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(e.to_string())
            })?
            .map_err(ApiError::from)
    }

    pub fn invite_link(&self, token: &str) -> String {
        format!("{}/invite/{}", self.public_url, token)
    }
}
