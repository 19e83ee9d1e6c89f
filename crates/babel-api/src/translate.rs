use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use babel_sync::error::DispatchError;
use babel_types::api::{ErrorResponse, TranslateRequest, TranslateResponse};

use crate::AppState;

/// Run the fan-out for one message. Safe to call again for the same message:
/// reruns only add or refresh translations.
pub async fn translate_message(
    State(state): State<AppState>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Rejected translate request: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    info!(
        "Translate called for message {} into {:?}",
        req.message_id, req.target_languages
    );

    match state.dispatcher.dispatch(req.message_id, &req.target_languages).await {
        Ok(fan_out) => Json(TranslateResponse {
            success: true,
            translations: fan_out.translations,
        })
        .into_response(),
        Err(DispatchError::MessageNotFound(id)) => {
            error_response(StatusCode::NOT_FOUND, format!("Message not found: {}", id))
        }
        Err(e) => {
            error!("Translate for message {} failed: {}", req.message_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;
    use uuid::Uuid;

    use babel_db::Database;
    use babel_sync::error::OracleError;
    use babel_sync::oracle::TranslationOracle;
    use babel_sync::store::SqliteStore;
    use babel_types::models::{Message, NewMessage};

    use super::*;
    use crate::{AppStateInner, router};

    /// Shouts the input back, tagged with the target language.
    struct ShoutingOracle;

    #[async_trait]
    impl TranslationOracle for ShoutingOracle {
        async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String, OracleError> {
            Ok(format!("[{}] {}", target, text.to_uppercase()))
        }
    }

    fn app_with_message() -> (axum::Router, Arc<Database>, Message) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let group = db.create_group("lobby").unwrap();
        let message = db
            .insert_message(&NewMessage::user(group.id, "asha", "namaste", "hi"))
            .unwrap();

        let store = Arc::new(SqliteStore::new(db.clone()));
        let state = Arc::new(AppStateInner::new(store, Arc::new(ShoutingOracle)));
        (router(state), db, message)
    }

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/functions/v1/translate-message")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn translates_and_merges() {
        let (app, db, message) = app_with_message();

        let response = app
            .oneshot(post_json(serde_json::json!({
                "messageId": message.id,
                "targetLanguages": ["hi", "en"],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["translations"], serde_json::json!({ "en": "[en] NAMASTE" }));

        let stored = db.get_message(&message.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.translated_texts.get("en").map(String::as_str), Some("[en] NAMASTE"));
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let (app, _db, _message) = app_with_message();

        let response = app
            .oneshot(post_json(serde_json::json!({
                "messageId": Uuid::new_v4(),
                "targetLanguages": ["en"],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Message not found"));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (app, _db, message) = app_with_message();

        let response = app
            .oneshot(post_json(serde_json::json!({ "messageId": message.id })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }
}
