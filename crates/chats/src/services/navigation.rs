//! View/navigation state machine.
//!
//! Owns the active-conversation pointer and the composer buffer. It never
//! touches message content; entering a chat only yields effects the session
//! carries out.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::types::{ChatError, ChatResult, ConversationId};

/// Current screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    List,
    Search,
    Chat { conversation_id: ConversationId },
}

impl View {
    pub fn name(&self) -> &'static str {
        match self {
            View::List => "list",
            View::Search => "search",
            View::Chat { .. } => "chat",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Chat { conversation_id } => write!(f, "chat({})", conversation_id),
            other => f.write_str(other.name()),
        }
    }
}

/// Follow-up work triggered by entering a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEffect {
    MarkRead(ConversationId),
    FetchHistory(ConversationId),
}

/// `list → search → chat`, `list → chat`, `chat → list`, `search → list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigator {
    view: View,
    composer: String,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            view: View::List,
            composer: String::new(),
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn active_conversation(&self) -> Option<&str> {
        match &self.view {
            View::Chat { conversation_id } => Some(conversation_id),
            _ => None,
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active_conversation() == Some(conversation_id)
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    /// Empty the composer and hand back what it held
    pub fn take_composer(&mut self) -> String {
        std::mem::take(&mut self.composer)
    }

    /// `list → search`
    pub fn start_search(&mut self) -> ChatResult<()> {
        match self.view {
            View::List => {
                self.transition(View::Search);
                Ok(())
            }
            _ => Err(self.invalid("start a new conversation")),
        }
    }

    /// `search → list`
    pub fn cancel_search(&mut self) -> ChatResult<()> {
        match self.view {
            View::Search => {
                self.transition(View::List);
                Ok(())
            }
            _ => Err(self.invalid("cancel a search")),
        }
    }

    /// `search → chat`, once create-or-get has resolved the conversation
    pub fn enter_from_search(
        &mut self,
        conversation_id: &str,
        history_loaded: bool,
    ) -> ChatResult<Vec<NavigationEffect>> {
        match self.view {
            View::Search => Ok(self.enter_chat(conversation_id, history_loaded)),
            _ => Err(self.invalid("open a contact")),
        }
    }

    /// `list → chat`
    pub fn open_conversation(
        &mut self,
        conversation_id: &str,
        history_loaded: bool,
    ) -> ChatResult<Vec<NavigationEffect>> {
        match self.view {
            View::List => Ok(self.enter_chat(conversation_id, history_loaded)),
            _ => Err(self.invalid("open a conversation")),
        }
    }

    /// `chat → list`
    pub fn back(&mut self) -> ChatResult<()> {
        match self.view {
            View::Chat { .. } => {
                self.composer.clear();
                self.transition(View::List);
                Ok(())
            }
            _ => Err(self.invalid("go back")),
        }
    }

    fn enter_chat(&mut self, conversation_id: &str, history_loaded: bool) -> Vec<NavigationEffect> {
        self.composer.clear();
        self.transition(View::Chat {
            conversation_id: conversation_id.to_string(),
        });

        let mut effects = vec![NavigationEffect::MarkRead(conversation_id.to_string())];
        if !history_loaded {
            effects.push(NavigationEffect::FetchHistory(conversation_id.to_string()));
        }
        effects
    }

    fn transition(&mut self, next: View) {
        debug!(from = %self.view, to = %next, "view transition");
        self.view = next;
    }

    fn invalid(&self, action: &str) -> ChatError {
        ChatError::invalid_transition(self.view.name(), action)
    }
}
