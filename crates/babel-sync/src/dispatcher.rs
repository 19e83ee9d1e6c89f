use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use babel_types::models::{Message, Presence};

use crate::error::{DispatchError, SyncError};
use crate::oracle::TranslationOracle;
use crate::store::RemoteStore;

/// Language whose script romanized text is typed in.
pub const DEFAULT_SCRIPT_LANGUAGE: &str = "en";

/// Result of one fan-out: what got merged, and which targets were skipped.
#[derive(Debug, Default)]
pub struct FanOut {
    pub translations: BTreeMap<String, String>,
    pub skipped: Vec<SyncError>,
}

/// Distinct languages among the online users, or `None` when everyone
/// shares one language and no translation is needed.
pub fn plan_targets(online: &[Presence]) -> Option<Vec<String>> {
    let languages: BTreeSet<&str> = online
        .iter()
        .filter(|p| p.is_online)
        .map(|p| p.language.as_str())
        .collect();

    if languages.len() > 1 {
        Some(languages.into_iter().map(str::to_string).collect())
    } else {
        None
    }
}

/// Text made only of letters, digits, whitespace and basic punctuation could
/// be another language transliterated into the default script.
pub fn looks_romanized(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(|c| {
            c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?' | '-' | '\'' | '"')
        })
}

/// Drives the oracle for one message and commits the results in a single
/// store update.
#[derive(Clone)]
pub struct TranslationDispatcher {
    store: Arc<dyn RemoteStore>,
    oracle: Arc<dyn TranslationOracle>,
}

impl TranslationDispatcher {
    pub fn new(store: Arc<dyn RemoteStore>, oracle: Arc<dyn TranslationOracle>) -> Self {
        Self { store, oracle }
    }

    /// Translate `message_id` into each of `targets`.
    ///
    /// Failures for one language are collected in [`FanOut::skipped`] and the
    /// remaining languages still run. Whatever succeeded is unioned into the
    /// stored translations, so reruns only ever add entries.
    pub async fn dispatch(&self, message_id: Uuid, targets: &[String]) -> Result<FanOut, DispatchError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(DispatchError::MessageNotFound(message_id))?;

        let mut fan_out = FanOut::default();

        if message.is_system() {
            debug!("Message {} is a system notice, not translating", message_id);
            return Ok(fan_out);
        }

        let targets: BTreeSet<&str> = targets.iter().map(String::as_str).collect();
        for target in targets {
            if target == message.language {
                continue;
            }

            let source = self.source_language(&message, target).await;
            match self.oracle.translate(&message.original_text, source, target).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("Translated {} {} -> {}", message_id, source, target);
                    fan_out.translations.insert(target.to_string(), text.trim().to_string());
                }
                Ok(_) => {
                    debug!("Oracle returned nothing for {} -> {}", message_id, target);
                }
                Err(e) => {
                    let err = SyncError::OracleCall {
                        target: target.to_string(),
                        source: e,
                    };
                    warn!("Message {}: {}", message_id, err);
                    fan_out.skipped.push(err);
                }
            }
        }

        if !fan_out.translations.is_empty() {
            self.store
                .merge_translations(message_id, fan_out.translations.clone())
                .await?;
        }

        info!(
            "Message {} translated into {:?} ({} skipped)",
            message_id,
            fan_out.translations.keys().collect::<Vec<_>>(),
            fan_out.skipped.len()
        );
        Ok(fan_out)
    }

    /// Source language to hand the oracle for `target`.
    ///
    /// Romanized default-script text is probed in reverse (target -> default).
    /// If the oracle produces something other than the input, the text is taken
    /// to be `target` typed phonetically and `target` becomes the source.
    async fn source_language<'a>(&self, message: &'a Message, target: &'a str) -> &'a str {
        let declared = message.language.as_str();

        if declared != DEFAULT_SCRIPT_LANGUAGE
            || target == DEFAULT_SCRIPT_LANGUAGE
            || !looks_romanized(&message.original_text)
        {
            return declared;
        }

        match self
            .oracle
            .translate(&message.original_text, target, DEFAULT_SCRIPT_LANGUAGE)
            .await
        {
            Ok(probe) if !probe.trim().is_empty() && probe.trim() != message.original_text.trim() => {
                debug!("Message {} looks like romanized '{}'", message.id, target);
                target
            }
            Ok(_) => declared,
            Err(e) => {
                warn!("Romanization probe for {} -> {} failed: {}", message.id, target, e);
                declared
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures_util::{FutureExt, StreamExt};

    use super::*;
    use crate::store::SqliteStore;
    use crate::testing::{RecordingOracle, memory_store};
    use babel_types::models::NewMessage;

    fn presence(username: &str, language: &str) -> Presence {
        Presence {
            group_id: Uuid::nil(),
            username: username.into(),
            language: language.into(),
            is_online: true,
            last_seen: Utc::now(),
        }
    }

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    async fn seed(store: &SqliteStore, text: &str, language: &str) -> Message {
        let group = store.create_group("lobby").await.unwrap();
        store
            .insert_message(NewMessage::user(group.id, "asha", text, language))
            .await
            .unwrap()
    }

    fn dispatcher(store: &Arc<SqliteStore>, oracle: &Arc<RecordingOracle>) -> TranslationDispatcher {
        TranslationDispatcher::new(store.clone(), oracle.clone())
    }

    #[test]
    fn one_language_needs_no_fan_out() {
        let online = vec![presence("asha", "en"), presence("bob", "en")];
        assert_eq!(plan_targets(&online), None);
        assert_eq!(plan_targets(&[]), None);
    }

    #[test]
    fn fan_out_targets_are_distinct_online_languages() {
        let mut offline = presence("carl", "de");
        offline.is_online = false;
        let online = vec![
            presence("zoe", "fr"),
            presence("asha", "hi"),
            presence("bob", "en"),
            presence("lea", "fr"),
            offline,
        ];
        assert_eq!(plan_targets(&online), Some(langs(&["en", "fr", "hi"])));
    }

    #[test]
    fn romanized_detection() {
        assert!(looks_romanized("namaste kaise ho"));
        assert!(looks_romanized("Hi! It's 5 o'clock, right?"));
        assert!(!looks_romanized("नमस्ते"));
        assert!(!looks_romanized("café"));
        assert!(!looks_romanized("a@b"));
        assert!(!looks_romanized(""));
    }

    #[tokio::test]
    async fn translates_into_every_other_language() {
        let store = memory_store();
        let msg = seed(&store, "good morning", "en").await;
        let oracle = Arc::new(
            RecordingOracle::default()
                .reply("en", "hi", "suprabhat")
                .reply("en", "fr", "bonjour"),
        );

        let fan_out = dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["en", "hi", "fr"]))
            .await
            .unwrap();

        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        let keys: Vec<&str> = stored.translated_texts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["fr", "hi"]);
        assert_eq!(fan_out.translations, stored.translated_texts);
        assert!(fan_out.skipped.is_empty());
        // Each foreign target gets an echoed probe, then the forward call
        assert_eq!(
            oracle.calls(),
            vec![
                ("fr".to_string(), "en".to_string()),
                ("en".to_string(), "fr".to_string()),
                ("hi".to_string(), "en".to_string()),
                ("en".to_string(), "hi".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn one_failing_language_does_not_sink_the_rest() {
        let store = memory_store();
        let msg = seed(&store, "namaste", "hi").await;
        let oracle = Arc::new(
            RecordingOracle::default()
                .reply("hi", "en", "hello")
                .fail_for("fr"),
        );

        let fan_out = dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["hi", "en", "fr"]))
            .await
            .unwrap();

        assert_eq!(
            fan_out.translations,
            BTreeMap::from([("en".to_string(), "hello".to_string())])
        );
        assert!(matches!(
            fan_out.skipped.as_slice(),
            [SyncError::OracleCall { target, .. }] if target == "fr"
        ));
        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.translated_texts, fan_out.translations);
    }

    #[tokio::test]
    async fn rerun_extends_existing_translations() {
        let store = memory_store();
        let msg = seed(&store, "namaste", "hi").await;
        store
            .merge_translations(msg.id, BTreeMap::from([("en".to_string(), "x".to_string())]))
            .await
            .unwrap();
        let oracle = Arc::new(RecordingOracle::default().reply("hi", "fr", "y"));

        dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["fr"]))
            .await
            .unwrap();

        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(
            stored.translated_texts,
            BTreeMap::from([
                ("en".to_string(), "x".to_string()),
                ("fr".to_string(), "y".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn romanized_text_is_translated_from_the_probed_language() {
        let store = memory_store();
        let msg = seed(&store, "namaste kaise ho", "en").await;
        let oracle = Arc::new(
            RecordingOracle::default()
                .reply("hi", "en", "hello, how are you")
                .reply("hi", "hi", "नमस्ते कैसे हो"),
        );

        let fan_out = dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["en", "hi"]))
            .await
            .unwrap();

        let calls = oracle.calls();
        assert_eq!(
            calls,
            vec![
                ("hi".to_string(), "en".to_string()),
                ("hi".to_string(), "hi".to_string()),
            ]
        );
        assert_eq!(fan_out.translations.get("hi").map(String::as_str), Some("नमस्ते कैसे हो"));
        // Declared language is untouched
        assert_eq!(store.get_message(msg.id).await.unwrap().unwrap().language, "en");
    }

    #[tokio::test]
    async fn echoed_probe_keeps_declared_source() {
        let store = memory_store();
        let msg = seed(&store, "see you soon", "en").await;
        // Unscripted probe echoes the input back
        let oracle = Arc::new(RecordingOracle::default().reply("en", "fr", "à bientôt"));

        dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["fr"]))
            .await
            .unwrap();

        assert_eq!(
            oracle.calls(),
            vec![
                ("fr".to_string(), "en".to_string()),
                ("en".to_string(), "fr".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn native_script_text_skips_the_probe() {
        let store = memory_store();
        let msg = seed(&store, "crème brûlée", "en").await;
        let oracle = Arc::new(RecordingOracle::default().reply("en", "fr", "crème brûlée"));

        dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["fr"]))
            .await
            .unwrap();

        assert_eq!(oracle.calls(), vec![("en".to_string(), "fr".to_string())]);
    }

    #[tokio::test]
    async fn system_notices_are_never_translated() {
        let store = memory_store();
        let group = store.create_group("lobby").await.unwrap();
        let notice = store
            .insert_message(NewMessage::joined(group.id, "asha"))
            .await
            .unwrap();
        let oracle = Arc::new(RecordingOracle::default());

        let fan_out = dispatcher(&store, &oracle)
            .dispatch(notice.id, &langs(&["hi", "fr"]))
            .await
            .unwrap();

        assert!(fan_out.translations.is_empty());
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn nothing_is_written_when_every_language_fails() {
        let store = memory_store();
        let msg = seed(&store, "namaste", "hi").await;
        let mut sub = store.subscribe(msg.group_id);
        let oracle = Arc::new(RecordingOracle::default().fail_for("fr").fail_for("en"));

        let fan_out = dispatcher(&store, &oracle)
            .dispatch(msg.id, &langs(&["en", "fr"]))
            .await
            .unwrap();

        assert!(fan_out.translations.is_empty());
        assert_eq!(fan_out.skipped.len(), 2);
        assert!(sub.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn unknown_message_is_an_error() {
        let store = memory_store();
        let oracle = Arc::new(RecordingOracle::default());

        let err = dispatcher(&store, &oracle)
            .dispatch(Uuid::new_v4(), &langs(&["fr"]))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::MessageNotFound(_)));
    }
}
