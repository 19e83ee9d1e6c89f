pub mod feed;
pub mod groups;
pub mod translate;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use babel_sync::dispatcher::TranslationDispatcher;
use babel_sync::oracle::TranslationOracle;
use babel_sync::store::RemoteStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn RemoteStore>,
    pub dispatcher: TranslationDispatcher,
}

impl AppStateInner {
    pub fn new(store: Arc<dyn RemoteStore>, oracle: Arc<dyn TranslationOracle>) -> Self {
        Self {
            dispatcher: TranslationDispatcher::new(store.clone(), oracle),
            store,
        }
    }
}

/// All HTTP routes. Layers (CORS, tracing) are added by the server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/functions/v1/translate-message", post(translate::translate_message))
        .route("/groups/{group_id}/messages", get(groups::get_messages))
        .route("/groups/{group_id}/presence", get(groups::get_presence))
        .route("/groups/{group_id}/feed", get(feed::feed_upgrade))
        .with_state(state)
}
