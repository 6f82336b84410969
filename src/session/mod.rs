//! Conversation session store
//!
//! Keeps a bounded, per-project history of user requests and assistant
//! results. The history feeds the context block prepended to AI prompts and
//! answers `conversation_history` requests. Sessions live in memory only.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ConversationConfig;

/// Language marker for sessions that have not seen detectable text yet.
pub const LANGUAGE_AUTO: &str = "auto";

const CONTEXT_ENTRY_CHARS: usize = 500;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The remote client
    User,
    /// Command output or AI response
    Assistant,
}

/// One entry in a project's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Author
    pub role: Role,
    /// Message text
    pub content: String,
    /// Command that produced this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Captured output for assistant entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
}

/// Conversation state for a single project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Owning project
    pub project_id: String,
    /// Messages, oldest first
    pub messages: VecDeque<ConversationMessage>,
    /// `auto` until the first detectable message, then fixed
    pub language: String,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last append
    pub last_activity: DateTime<Utc>,
}

impl ConversationSession {
    fn new(project_id: &str) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.to_string(),
            messages: VecDeque::new(),
            language: LANGUAGE_AUTO.to_string(),
            created_at: now,
            last_activity: now,
        }
    }
}

/// Guess a message's language from its script.
///
/// Kana or CJK ideographs give `ja`, Hangul gives `ko`, Latin letters give
/// `en`; anything else (digits, punctuation, empty) stays `auto`.
pub fn detect_language(text: &str) -> &'static str {
    let mut latin = false;
    for c in text.chars() {
        match c {
            '\u{3040}'..='\u{30ff}' | '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' => {
                return "ja"
            }
            '\u{ac00}'..='\u{d7af}' | '\u{1100}'..='\u{11ff}' => return "ko",
            c if c.is_ascii_alphabetic() => latin = true,
            _ => {}
        }
    }
    if latin {
        "en"
    } else {
        LANGUAGE_AUTO
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// In-memory store of conversation sessions keyed by project ID.
///
/// # Examples
///
/// ```
/// use dockhand::config::ConversationConfig;
/// use dockhand::session::{Role, SessionStore};
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = SessionStore::new(ConversationConfig::default());
/// store.append_message("p1", Role::User, "ls", Some("ls"), None).await;
/// store.append_message("p1", Role::Assistant, "a.txt", Some("ls"), Some("a.txt")).await;
/// let context = store.build_context("p1").await;
/// assert!(context.contains("Previous request: ls"));
/// # }
/// ```
#[derive(Debug)]
pub struct SessionStore {
    config: ConversationConfig,
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the project's session, creating it with language `auto`.
    pub async fn get_or_create(&self, project_id: &str) -> ConversationSession {
        if let Some(session) = self.sessions.read().await.get(project_id) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(project_id.to_string())
            .or_insert_with(|| ConversationSession::new(project_id))
            .clone()
    }

    /// Existing session for a project, if any.
    pub async fn get(&self, project_id: &str) -> Option<ConversationSession> {
        self.sessions.read().await.get(project_id).cloned()
    }

    /// Append a message, evicting the oldest once the cap is reached.
    ///
    /// Returns the number of messages held afterwards.
    pub async fn append_message(
        &self,
        project_id: &str,
        role: Role,
        content: &str,
        command: Option<&str>,
        output: Option<&str>,
    ) -> usize {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(project_id.to_string())
            .or_insert_with(|| ConversationSession::new(project_id));

        let now = Utc::now();
        session.messages.push_back(ConversationMessage {
            role,
            content: content.to_string(),
            command: command.map(str::to_string),
            output: output.map(str::to_string),
            timestamp: now,
        });
        while session.messages.len() > self.config.max_messages {
            session.messages.pop_front();
        }
        session.last_activity = now;
        session.messages.len()
    }

    /// Render the most recent messages as prompt context, oldest first.
    ///
    /// Returns an empty string for a project without history.
    pub async fn build_context(&self, project_id: &str) -> String {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(project_id) else {
            return String::new();
        };

        let skip = session
            .messages
            .len()
            .saturating_sub(self.config.context_messages);
        let mut entries: Vec<String> = session
            .messages
            .iter()
            .skip(skip)
            .filter_map(|m| match m.role {
                Role::User => Some(format!(
                    "Previous request: {}\n",
                    truncate_chars(&m.content, CONTEXT_ENTRY_CHARS)
                )),
                Role::Assistant => m.output.as_ref().map(|out| {
                    format!(
                        "Previous result: {}\n",
                        truncate_chars(out, CONTEXT_ENTRY_CHARS)
                    )
                }),
            })
            .collect();

        // Drop the oldest entries until the block fits.
        while entries.iter().map(|e| e.chars().count()).sum::<usize>()
            > self.config.max_context_chars
            && !entries.is_empty()
        {
            entries.remove(0);
        }
        entries.concat()
    }

    /// Fix the session language from `text` if it is still `auto`.
    ///
    /// Returns the session's language after the call.
    pub async fn observe_language(&self, project_id: &str, text: &str) -> String {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(project_id.to_string())
            .or_insert_with(|| ConversationSession::new(project_id));
        if session.language == LANGUAGE_AUTO {
            let detected = detect_language(text);
            if detected != LANGUAGE_AUTO {
                tracing::debug!(project_id, language = detected, "session language detected");
                session.language = detected.to_string();
            }
        }
        session.language.clone()
    }

    /// Current language of a session, `auto` when unknown.
    pub async fn language(&self, project_id: &str) -> String {
        self.sessions
            .read()
            .await
            .get(project_id)
            .map(|s| s.language.clone())
            .unwrap_or_else(|| LANGUAGE_AUTO.to_string())
    }

    /// Copy of a project's history, oldest first.
    pub async fn snapshot(&self, project_id: &str) -> Vec<ConversationMessage> {
        self.sessions
            .read()
            .await
            .get(project_id)
            .map(|s| s.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget a project's history and language.
    pub async fn clear(&self, project_id: &str) {
        if self.sessions.write().await.remove(project_id).is_some() {
            tracing::info!(project_id, "conversation cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(ConversationConfig::default())
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("list the files"), "en");
        assert_eq!(detect_language("ファイルを作成して"), "ja");
        assert_eq!(detect_language("日本"), "ja");
        assert_eq!(detect_language("파일 만들어"), "ko");
        assert_eq!(detect_language("12345 ?!"), "auto");
        assert_eq!(detect_language(""), "auto");
    }

    #[tokio::test]
    async fn test_get_or_create_starts_auto() {
        let store = store();
        let session = store.get_or_create("p1").await;
        assert_eq!(session.language, "auto");
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped_fifo() {
        let store = store();
        for i in 0..25 {
            store
                .append_message("p1", Role::User, &format!("msg {}", i), None, None)
                .await;
        }
        let history = store.snapshot("p1").await;
        assert_eq!(history.len(), 20);
        assert_eq!(history.first().unwrap().content, "msg 5");
        assert_eq!(history.last().unwrap().content, "msg 24");
    }

    #[tokio::test]
    async fn test_build_context_uses_last_five_oldest_first() {
        let store = store();
        for i in 0..4 {
            let cmd = format!("cmd {}", i);
            store.append_message("p1", Role::User, &cmd, Some(&cmd), None).await;
            store
                .append_message("p1", Role::Assistant, "done", Some(&cmd), Some(&format!("out {}", i)))
                .await;
        }

        let context = store.build_context("p1").await;
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Previous result: out 1",
                "Previous request: cmd 2",
                "Previous result: out 2",
                "Previous request: cmd 3",
                "Previous result: out 3",
            ]
        );
    }

    #[tokio::test]
    async fn test_build_context_respects_char_budget() {
        let config = ConversationConfig {
            max_context_chars: 40,
            ..ConversationConfig::default()
        };
        let store = SessionStore::new(config);
        store.append_message("p1", Role::User, "first request", None, None).await;
        store.append_message("p1", Role::User, "second request", None, None).await;

        let context = store.build_context("p1").await;
        assert_eq!(context, "Previous request: second request\n");
    }

    #[tokio::test]
    async fn test_build_context_empty_for_unknown_project() {
        assert_eq!(store().build_context("nope").await, "");
    }

    #[tokio::test]
    async fn test_language_is_sticky() {
        let store = store();
        assert_eq!(store.observe_language("p1", "123").await, "auto");
        assert_eq!(store.observe_language("p1", "ファイル一覧").await, "ja");
        assert_eq!(store.observe_language("p1", "list files").await, "ja");
        assert_eq!(store.language("p1").await, "ja");
    }

    #[tokio::test]
    async fn test_clear_resets_history_and_language() {
        let store = store();
        store.observe_language("p1", "hello").await;
        store.append_message("p1", Role::User, "hello", None, None).await;
        store.clear("p1").await;
        assert!(store.snapshot("p1").await.is_empty());
        assert_eq!(store.language("p1").await, "auto");
    }
}
