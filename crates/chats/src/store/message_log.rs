//! Per-conversation ordered message logs.
//!
//! Entries keep local insertion order. Confirmations replace provisional
//! entries at the same index, so a late response never moves a message.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::entities::{Message, MessageDraft, MessageStatus};
use crate::types::{ChatError, ChatResult, ConversationId};
use crate::utils::Validator;

/// Default window for matching a confirmation against a provisional entry.
pub const DEFAULT_RECONCILE_WINDOW_MS: u64 = 30_000;

/// How a confirmed message was placed into a log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Replaced the local entry carrying the same correlation id
    Correlated { index: usize },
    /// The permanent id was already present; updated in place
    Redelivered { index: usize },
    /// Replaced the oldest provisional entry with the same sender and payload
    Matched { index: usize },
    /// No local counterpart; appended at the end
    Appended { index: usize },
}

impl ReconcileOutcome {
    pub fn index(&self) -> usize {
        match *self {
            ReconcileOutcome::Correlated { index }
            | ReconcileOutcome::Redelivered { index }
            | ReconcileOutcome::Matched { index }
            | ReconcileOutcome::Appended { index } => index,
        }
    }

    /// Whether the log gained a message it did not hold in any form
    pub fn is_new(&self) -> bool {
        matches!(self, ReconcileOutcome::Appended { .. })
    }
}

#[derive(Debug, Default, Clone)]
struct MessageLog {
    messages: Vec<Message>,
    loaded: bool,
}

impl MessageLog {
    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Entry addressed by its current id or by the temporary id it started with
    fn position_local(&self, id: &str) -> Option<usize> {
        self.position(id).or_else(|| {
            self.messages
                .iter()
                .position(|m| m.client_ref.as_deref() == Some(id))
        })
    }
}

/// Ordered message logs keyed by conversation id
#[derive(Debug, Clone)]
pub struct MessageLogStore {
    logs: HashMap<ConversationId, MessageLog>,
    reconcile_window: Duration,
}

impl Default for MessageLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECONCILE_WINDOW_MS)
    }
}

impl MessageLogStore {
    pub fn new(reconcile_window_ms: u64) -> Self {
        let millis = i64::try_from(reconcile_window_ms).unwrap_or(i64::MAX);
        Self {
            logs: HashMap::new(),
            reconcile_window: Duration::milliseconds(millis),
        }
    }

    /// Append a provisional entry for a local send.
    pub fn append_optimistic(
        &mut self,
        conversation_id: &str,
        sender_id: &str,
        draft: MessageDraft,
        now: DateTime<Utc>,
    ) -> ChatResult<Message> {
        Validator::draft(&draft)?;

        let message = Message::optimistic(conversation_id, sender_id, draft, now);
        let log = self.logs.entry(conversation_id.to_string()).or_default();
        log.messages.push(message.clone());

        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            len = log.messages.len(),
            "appended optimistic message"
        );
        Ok(message)
    }

    /// Place a server-confirmed message.
    ///
    /// Matching order: correlation id on a local entry, then an entry already
    /// holding the permanent id, then the oldest pending entry from the same
    /// sender with the same payload inside the window. Ambiguous or
    /// unmatched confirmations are appended, never dropped.
    pub fn reconcile(&mut self, conversation_id: &str, confirmed: Message) -> ReconcileOutcome {
        let window = self.reconcile_window;
        let log = self.logs.entry(conversation_id.to_string()).or_default();

        let correlated = confirmed.client_ref.as_deref().and_then(|client_ref| {
            log.messages.iter().position(|m| {
                m.client_ref.as_deref() == Some(client_ref) && !m.status.is_confirmed()
            })
        });

        if let Some(index) = correlated {
            let index = replace_local(log, index, confirmed);
            return ReconcileOutcome::Correlated { index };
        }

        if let Some(index) = log.position(&confirmed.id) {
            let existing = &mut log.messages[index];
            existing.status = existing.status.furthest(confirmed.status);
            if existing.attachment.is_none() {
                existing.attachment = confirmed.attachment;
            }
            debug!(conversation_id = %conversation_id, message_id = %existing.id, "redelivered message");
            return ReconcileOutcome::Redelivered { index };
        }

        // Confirmations carrying a correlation id are never guessed at.
        if confirmed.client_ref.is_none() {
            let candidate = log.messages.iter().position(|m| {
                m.is_pending()
                    && m.is_temporary()
                    && m.sender_id == confirmed.sender_id
                    && m.same_payload(&confirmed)
                    && (confirmed.created_at - m.attempt_reference()).abs() <= window
            });

            if let Some(index) = candidate {
                let index = replace_local(log, index, confirmed);
                return ReconcileOutcome::Matched { index };
            }
        }

        let mut appended = confirmed;
        appended.status = appended.status.furthest(MessageStatus::Sent);
        appended.retry_count = 0;
        appended.last_attempt_at = None;
        log.messages.push(appended);

        let index = log.messages.len() - 1;
        debug!(conversation_id = %conversation_id, index, "appended confirmed message");
        ReconcileOutcome::Appended { index }
    }

    /// Move an entry through the error/retry transitions.
    ///
    /// `message_id` may be the permanent id or the temporary id the entry
    /// started with.
    pub fn mark_status(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) -> ChatResult<Message> {
        let log = self
            .logs
            .get_mut(conversation_id)
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;
        let index = log
            .position_local(message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        let entry = &mut log.messages[index];

        match (entry.status, status) {
            (_, MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Read) => {
                entry.status = entry.status.furthest(status);
                entry.retry_count = 0;
            }
            (current, MessageStatus::Error) if current.is_confirmed() => {
                debug!(message_id = %entry.id, "ignoring failure for confirmed message");
            }
            (_, MessageStatus::Error) => {
                entry.status = MessageStatus::Error;
            }
            (MessageStatus::Error, MessageStatus::Pending) => {
                entry.status = MessageStatus::Pending;
                entry.retry_count += 1;
                entry.last_attempt_at = Some(now);
            }
            (MessageStatus::Pending, MessageStatus::Pending) => {}
            (current, MessageStatus::Pending) => {
                return Err(ChatError::validation(format!(
                    "Message {} is already {}",
                    entry.id,
                    current.as_str()
                )));
            }
        }

        debug!(
            conversation_id = %conversation_id,
            message_id = %entry.id,
            status = entry.status.as_str(),
            retry_count = entry.retry_count,
            "message status changed"
        );
        Ok(entry.clone())
    }

    /// Merge a fetched history into the log and mark it loaded.
    ///
    /// Server entries come first, deduplicated by id. Local entries the
    /// server did not return follow in their original relative order.
    pub fn load_history(&mut self, conversation_id: &str, fetched: Vec<Message>) -> usize {
        let window = self.reconcile_window;
        let log = self.logs.entry(conversation_id.to_string()).or_default();

        let mut seen = HashSet::new();
        let mut merged: Vec<Message> = fetched
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        let server_len = merged.len();
        let mut claimed = vec![false; server_len];

        for local in std::mem::take(&mut log.messages) {
            if seen.contains(&local.id) {
                continue;
            }

            let counterpart = match local.client_ref.as_deref() {
                Some(client_ref) => merged[..server_len]
                    .iter()
                    .position(|m| m.client_ref.as_deref() == Some(client_ref)),
                None => None,
            }
            .or_else(|| {
                if !local.is_pending() {
                    return None;
                }
                merged[..server_len].iter().enumerate().position(|(i, m)| {
                    !claimed[i]
                        && m.client_ref.is_none()
                        && m.sender_id == local.sender_id
                        && m.same_payload(&local)
                        && (m.created_at - local.attempt_reference()).abs() <= window
                })
            });

            match counterpart {
                Some(index) => {
                    claimed[index] = true;
                    let server_entry = &mut merged[index];
                    server_entry.status = server_entry.status.furthest(local.status);
                    if server_entry.client_ref.is_none() {
                        server_entry.client_ref = local.client_ref;
                    }
                }
                None => merged.push(local),
            }
        }

        log.messages = merged;
        log.loaded = true;

        debug!(
            conversation_id = %conversation_id,
            server = server_len,
            len = log.messages.len(),
            "history merged"
        );
        log.messages.len()
    }

    pub fn is_loaded(&self, conversation_id: &str) -> bool {
        self.logs.get(conversation_id).map_or(false, |log| log.loaded)
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.logs
            .get(conversation_id)
            .map_or(&[][..], |log| log.messages.as_slice())
    }

    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        let log = self.logs.get(conversation_id)?;
        log.position_local(message_id).map(|index| &log.messages[index])
    }

    pub fn contains(&self, conversation_id: &str, message_id: &str) -> bool {
        self.logs
            .get(conversation_id)
            .map_or(false, |log| log.position(message_id).is_some())
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.messages(conversation_id).len()
    }

    pub fn is_empty(&self, conversation_id: &str) -> bool {
        self.len(conversation_id) == 0
    }
}

/// Replace a local entry with its confirmation and collapse any copy of the
/// permanent id that arrived earlier through another path.
fn replace_local(log: &mut MessageLog, index: usize, confirmed: Message) -> usize {
    let local = &log.messages[index];
    let mut replacement = confirmed;

    replacement.status = replacement.status.furthest(MessageStatus::Sent);
    replacement.retry_count = 0;
    replacement.last_attempt_at = None;
    if replacement.client_ref.is_none() {
        replacement.client_ref = local.client_ref.clone();
    }
    if replacement.attachment.is_none() {
        replacement.attachment = local.attachment.clone();
    }

    let permanent_id = replacement.id.clone();
    log.messages[index] = replacement;

    let mut index = index;
    if let Some(duplicate) = log
        .messages
        .iter()
        .enumerate()
        .position(|(i, m)| i != index && m.id == permanent_id)
    {
        let removed = log.messages.remove(duplicate);
        let kept = &mut log.messages[if duplicate < index { index - 1 } else { index }];
        kept.status = kept.status.furthest(removed.status);
        if duplicate < index {
            index -= 1;
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(id: &str, sender: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message::confirmed(id, "c1", sender, content, at)
    }

    fn contents(store: &MessageLogStore) -> Vec<&str> {
        store.messages("c1").iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn append_optimistic_adds_a_pending_entry() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();

        let message = store
            .append_optimistic("c1", "u1", MessageDraft::text("Olá"), now)
            .unwrap();

        assert_eq!(store.len("c1"), 1);
        assert!(message.is_temporary());
        assert_eq!(store.messages("c1")[0].status, MessageStatus::Pending);
    }

    #[test]
    fn append_optimistic_rejects_empty_drafts() {
        let mut store = MessageLogStore::default();
        let err = store
            .append_optimistic("c1", "u1", MessageDraft::text("  "), Utc::now())
            .unwrap_err();

        assert!(matches!(err, ChatError::Validation { .. }));
        assert!(store.is_empty("c1"));
    }

    #[test]
    fn heuristic_match_replaces_in_place() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        store.append_optimistic("c1", "u1", MessageDraft::text("Olá"), now).unwrap();

        let outcome = store.reconcile("c1", confirmed("m-42", "u1", "Olá", now + Duration::seconds(1)));

        assert_eq!(outcome, ReconcileOutcome::Matched { index: 0 });
        assert_eq!(store.len("c1"), 1);
        let entry = &store.messages("c1")[0];
        assert_eq!(entry.id, "m-42");
        assert_eq!(entry.status, MessageStatus::Sent);
    }

    #[test]
    fn heuristic_prefers_the_oldest_pending_entry() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        store.append_optimistic("c1", "u1", MessageDraft::text("ok"), now).unwrap();
        store
            .append_optimistic("c1", "u1", MessageDraft::text("ok"), now + Duration::seconds(1))
            .unwrap();

        let outcome = store.reconcile("c1", confirmed("m-1", "u1", "ok", now + Duration::seconds(2)));

        assert_eq!(outcome.index(), 0);
        assert!(store.messages("c1")[1].is_pending());
    }

    #[test]
    fn outside_window_or_other_sender_appends() {
        let mut store = MessageLogStore::new(1_000);
        let now = Utc::now();
        store.append_optimistic("c1", "u1", MessageDraft::text("Olá"), now).unwrap();

        let late = store.reconcile("c1", confirmed("m-1", "u1", "Olá", now + Duration::seconds(5)));
        let other = store.reconcile("c1", confirmed("m-2", "u2", "Olá", now));

        assert!(late.is_new());
        assert!(other.is_new());
        assert_eq!(store.len("c1"), 3);
        assert!(store.messages("c1")[0].is_pending());
    }

    #[test]
    fn correlation_id_wins_over_content() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        let first = store.append_optimistic("c1", "u1", MessageDraft::text("same"), now).unwrap();
        let second = store.append_optimistic("c1", "u1", MessageDraft::text("same"), now).unwrap();

        let outcome = store.reconcile(
            "c1",
            confirmed("m-2", "u1", "same", now).with_client_ref(second.id.clone()),
        );

        assert_eq!(outcome, ReconcileOutcome::Correlated { index: 1 });
        assert_eq!(store.messages("c1")[0].id, first.id);
        assert_eq!(store.messages("c1")[1].id, "m-2");
    }

    #[test]
    fn unknown_correlation_id_is_not_guessed() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        store.append_optimistic("c1", "u1", MessageDraft::text("oi"), now).unwrap();

        let outcome = store.reconcile("c1", confirmed("m-9", "u1", "oi", now).with_client_ref("tmp-elsewhere"));

        assert!(outcome.is_new());
        assert!(store.messages("c1")[0].is_pending());
    }

    #[test]
    fn redelivery_is_idempotent() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        store.reconcile("c1", confirmed("m-1", "u2", "hi", now));

        let mut read = confirmed("m-1", "u2", "hi", now);
        read.status = MessageStatus::Read;
        let outcome = store.reconcile("c1", read);

        assert_eq!(outcome, ReconcileOutcome::Redelivered { index: 0 });
        assert_eq!(store.len("c1"), 1);
        assert_eq!(store.messages("c1")[0].status, MessageStatus::Read);
    }

    #[test]
    fn out_of_order_confirmations_keep_insertion_order() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        let a = store.append_optimistic("c1", "u1", MessageDraft::text("A"), now).unwrap();
        let b = store.append_optimistic("c1", "u1", MessageDraft::text("B"), now).unwrap();

        store.reconcile("c1", confirmed("m-2", "u1", "B", now).with_client_ref(b.id));
        store.reconcile("c1", confirmed("m-1", "u1", "A", now).with_client_ref(a.id));

        assert_eq!(contents(&store), vec!["A", "B"]);
        let ids: Vec<_> = store.messages("c1").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m-1", "m-2"]);
    }

    #[test]
    fn correlated_confirmation_collapses_an_earlier_echo() {
        let mut store = MessageLogStore::new(1);
        let now = Utc::now();
        let local = store.append_optimistic("c1", "u1", MessageDraft::text("x"), now).unwrap();
        store.reconcile("c1", confirmed("m-5", "u1", "x", now + Duration::seconds(10)));
        assert_eq!(store.len("c1"), 2);

        let outcome = store.reconcile("c1", confirmed("m-5", "u1", "x", now).with_client_ref(local.id));

        assert_eq!(outcome.index(), 0);
        assert_eq!(store.len("c1"), 1);
        assert_eq!(store.messages("c1")[0].id, "m-5");
    }

    #[test]
    fn failure_and_retry_transitions() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        let local = store.append_optimistic("c1", "u1", MessageDraft::text("x"), now).unwrap();

        let failed = store.mark_status("c1", &local.id, MessageStatus::Error, now).unwrap();
        assert_eq!(failed.status, MessageStatus::Error);
        assert_eq!(failed.retry_count, 0);

        let retried = store.mark_status("c1", &local.id, MessageStatus::Pending, now).unwrap();
        assert_eq!(retried.status, MessageStatus::Pending);
        assert_eq!(retried.retry_count, 1);

        let sent = store.mark_status("c1", &local.id, MessageStatus::Sent, now).unwrap();
        assert_eq!(sent.retry_count, 0);
        assert_eq!(sent.content, "x");
    }

    #[test]
    fn late_failure_never_downgrades_a_confirmed_entry() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        let local = store.append_optimistic("c1", "u1", MessageDraft::text("x"), now).unwrap();
        store.reconcile("c1", confirmed("m-1", "u1", "x", now).with_client_ref(local.id.clone()));

        let entry = store.mark_status("c1", &local.id, MessageStatus::Error, now).unwrap();
        assert_eq!(entry.status, MessageStatus::Sent);

        let err = store.mark_status("c1", "m-1", MessageStatus::Pending, now).unwrap_err();
        assert!(matches!(err, ChatError::Validation { .. }));
    }

    #[test]
    fn mark_status_reports_missing_targets() {
        let mut store = MessageLogStore::default();
        assert!(matches!(
            store.mark_status("nope", "m", MessageStatus::Sent, Utc::now()),
            Err(ChatError::ConversationNotFound { .. })
        ));

        store.append_optimistic("c1", "u1", MessageDraft::text("x"), Utc::now()).unwrap();
        assert!(matches!(
            store.mark_status("c1", "m-404", MessageStatus::Sent, Utc::now()),
            Err(ChatError::MessageNotFound { .. })
        ));
    }

    #[test]
    fn history_merge_keeps_local_entries_after_server_entries() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        let pending = store.append_optimistic("c1", "u1", MessageDraft::text("draft"), now).unwrap();
        store.reconcile("c1", confirmed("m-3", "u2", "live", now));

        let fetched = vec![
            confirmed("m-1", "u2", "first", now - Duration::minutes(5)),
            confirmed("m-2", "u1", "second", now - Duration::minutes(4)),
            confirmed("m-2", "u1", "second", now - Duration::minutes(4)),
        ];
        let len = store.load_history("c1", fetched);

        assert_eq!(len, 4);
        assert!(store.is_loaded("c1"));
        assert_eq!(contents(&store), vec!["first", "second", "draft", "live"]);
        assert_eq!(store.messages("c1")[2].id, pending.id);
    }

    #[test]
    fn history_merge_absorbs_pending_entries_the_server_already_has() {
        let mut store = MessageLogStore::default();
        let now = Utc::now();
        store.append_optimistic("c1", "u1", MessageDraft::text("Olá"), now).unwrap();

        store.load_history("c1", vec![confirmed("m-42", "u1", "Olá", now)]);

        assert_eq!(store.len("c1"), 1);
        assert_eq!(store.messages("c1")[0].id, "m-42");
        assert!(store.messages("c1")[0].client_ref.is_some());
    }
}
