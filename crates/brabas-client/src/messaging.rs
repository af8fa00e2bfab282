//! Direct messaging state kept in sync with the backend.
//!
//! Two long-lived realtime subscriptions feed the state: the inbox one
//! (every message the member sends or receives) lives as long as the
//! synchronizer, the conversation one is replaced whenever another contact
//! is selected. Both read and write the shared state under one lock, so a
//! message delivered by both is applied once. A feed that drops is reopened
//! with backoff and the messages it missed are reloaded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use brabas_types::events::{Change, ChangeFilter};
use brabas_types::models::{Contact, Message};

use crate::backend::{Backend, Subscription};
use crate::error::{BackendError, ClientError};
use crate::offline::{OfflineAction, OfflineQueue};
use crate::pending::PendingOps;

/// Delay before the first attempt to reopen a closed feed.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
/// Cap for the doubling delay between reopen attempts.
pub const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Inbox,
    Conversation(Uuid),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagingState {
    pub selected_contact: Option<Uuid>,
    pub contacts: Vec<Contact>,
    /// Messages of the selected conversation, ascending by `created_at`.
    pub messages: Vec<Message>,
    pub draft: String,
}

impl MessagingState {
    pub fn contact(&self, id: Uuid) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id() == id)
    }
}

#[derive(Default)]
struct Shared {
    state: MessagingState,
    /// Optimistic messages awaiting the server, keyed by their temporary id.
    pending: PendingOps<Message>,
    /// Inbox deliveries applied to the contact list since it was last loaded.
    seen: HashSet<Uuid>,
}

impl Shared {
    /// Adopt a freshly loaded contact list. The open conversation counts
    /// as read.
    fn replace_contacts(&mut self, contacts: Vec<Contact>) {
        self.state.contacts = contacts;
        if let Some(open) = self.state.selected_contact {
            if let Some(c) = self.state.contacts.iter_mut().find(|c| c.id() == open) {
                c.unread_count = 0;
            }
        }
        sort_contacts(&mut self.state.contacts);
        // The reloaded list already accounts for earlier deliveries.
        self.seen.clear();
    }
}

#[derive(Clone)]
pub struct MessagingSync {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    offline: Arc<OfflineQueue>,
    me: Uuid,
    shared: Mutex<Shared>,
    updates: watch::Sender<MessagingState>,
    inbox: Mutex<Option<JoinHandle<()>>>,
    conversation: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        abort_task(&self.inbox);
        abort_task(&self.conversation);
    }
}

fn abort_task(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Ok(mut slot) = slot.lock() {
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

/// Reopen `feed` until it succeeds, doubling the delay up to
/// [`MAX_RESUBSCRIBE_DELAY`]. `None` once the synchronizer is gone.
async fn resubscribe(weak: &Weak<Inner>, feed: Feed) -> Option<Subscription> {
    let mut delay = RESUBSCRIBE_DELAY;
    let mut attempt = 0u32;
    loop {
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
        let sync = MessagingSync::from_weak(weak)?;
        match sync.subscribe_feed(feed).await {
            Ok(subscription) => {
                info!(
                    "Realtime feed '{}' reopened after {} attempt(s)",
                    subscription.topic(),
                    attempt
                );
                return Some(subscription);
            }
            Err(e) => warn!("Reopening realtime feed failed (attempt {}): {}", attempt, e),
        }
        delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
    }
}

fn insert_sorted(messages: &mut Vec<Message>, message: Message) {
    let at = messages.partition_point(|m| m.created_at <= message.created_at);
    messages.insert(at, message);
}

/// Most recent conversation first, then by name.
fn sort_contacts(contacts: &mut [Contact]) {
    contacts.sort_by(|a, b| {
        b.last_message_at.cmp(&a.last_message_at).then_with(|| {
            a.profile
                .display_name()
                .to_lowercase()
                .cmp(&b.profile.display_name().to_lowercase())
        })
    });
}

impl MessagingSync {
    pub fn new(backend: Arc<dyn Backend>, offline: Arc<OfflineQueue>, me: Uuid) -> Self {
        let (updates, _) = watch::channel(MessagingState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                offline,
                me,
                shared: Mutex::new(Shared::default()),
                updates,
                inbox: Mutex::new(None),
                conversation: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn state(&self) -> MessagingState {
        self.lock().state.clone()
    }

    pub fn watch(&self) -> watch::Receiver<MessagingState> {
        self.inner.updates.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on the shared state and publish the result.
    fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut shared = self.lock();
        let result = f(&mut shared);
        self.inner.updates.send_replace(shared.state.clone());
        result
    }

    /// Load the contact list and open the inbox subscription. Calling it
    /// again reloads contacts but keeps the existing subscription.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.reload_contacts().await?;

        let running = self
            .inner
            .inbox
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false);
        if running {
            return Ok(());
        }

        let subscription = self.subscribe_feed(Feed::Inbox).await?;
        let task = self.spawn_feed(Feed::Inbox, subscription);
        if let Ok(mut slot) = self.inner.inbox.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
        info!("Inbox subscription started");
        Ok(())
    }

    /// Stop both subscriptions.
    pub fn stop(&self) {
        abort_task(&self.inner.inbox);
        abort_task(&self.inner.conversation);
        self.update(|s| s.seen.clear());
    }

    async fn reload_contacts(&self) -> Result<(), ClientError> {
        let contacts = self.inner.backend.list_contacts().await?;
        self.update(|s| s.replace_contacts(contacts));
        Ok(())
    }

    async fn subscribe_feed(&self, feed: Feed) -> Result<Subscription, BackendError> {
        let me = self.inner.me;
        let (topic, filter) = match feed {
            Feed::Inbox => (format!("inbox:{me}"), ChangeFilter::Inbox { user_id: me }),
            Feed::Conversation(contact) => (
                format!("conversation:{me}:{contact}"),
                ChangeFilter::Conversation { a: me, b: contact },
            ),
        };
        self.inner.backend.subscribe(&topic, filter).await
    }

    /// Pump `subscription` into the state. A feed that closes while the
    /// synchronizer is alive is reopened and the gap reloaded.
    fn spawn_feed(&self, feed: Feed, subscription: Subscription) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut subscription = subscription;
            loop {
                while let Some(change) = subscription.next().await {
                    let Some(sync) = MessagingSync::from_weak(&weak) else {
                        return;
                    };
                    if let Change::MessageInsert(message) = change {
                        match feed {
                            Feed::Inbox => sync.on_inbox_message(message).await,
                            Feed::Conversation(_) => sync.on_conversation_message(message).await,
                        }
                    }
                }
                warn!("Realtime feed '{}' closed, resubscribing", subscription.topic());
                let Some(reopened) = resubscribe(&weak, feed).await else {
                    debug!("Messaging stopped before the feed was reopened");
                    return;
                };
                subscription = reopened;
                if let Some(sync) = MessagingSync::from_weak(&weak) {
                    sync.backfill(feed).await;
                }
            }
        })
    }

    /// Catch up on whatever a reopened feed missed while it was down.
    async fn backfill(&self, feed: Feed) {
        let result = match feed {
            Feed::Inbox => self.reload_contacts().await,
            Feed::Conversation(contact) => self.load_conversation(contact).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Failed to reload messages after resubscribing: {}", e);
        }
    }

    fn is_selected(&self, contact: Uuid) -> bool {
        self.lock().state.selected_contact == Some(contact)
    }

    /// Open the conversation with `contact`: follow new messages, fetch the
    /// history, mark the incoming ones read and zero the unread badge.
    pub async fn select_contact(&self, contact: Uuid) -> Result<(), ClientError> {
        abort_task(&self.inner.conversation);
        self.update(|s| {
            s.state.selected_contact = Some(contact);
            s.state.messages.clear();
        });

        // Subscribe before fetching so a message sent in between is covered
        // by one or the other.
        let subscription = self.subscribe_feed(Feed::Conversation(contact)).await?;
        if !self.is_selected(contact) {
            debug!("Selection changed while subscribing to conversation");
            return Ok(());
        }
        let task = self.spawn_feed(Feed::Conversation(contact), subscription);
        if let Ok(mut slot) = self.inner.conversation.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }

        if !self.load_conversation(contact).await? {
            debug!("Selection changed while loading conversation");
        }
        Ok(())
    }

    /// Merge the stored conversation with `contact` into the open one and
    /// mark it read. Returns `false` when another contact got selected
    /// meanwhile.
    async fn load_conversation(&self, contact: Uuid) -> Result<bool, ClientError> {
        let mut messages = self.inner.backend.get_conversation(contact).await?;
        messages.sort_by_key(|m| m.created_at);

        let has_unread = self.update(|s| {
            if s.state.selected_contact != Some(contact) {
                return None;
            }
            // Sends still in flight to this contact stay visible.
            let in_flight: Vec<Message> = s
                .pending
                .values()
                .filter(|m| m.receiver_id == contact)
                .cloned()
                .collect();
            for message in messages.into_iter().chain(in_flight) {
                if !s.state.messages.iter().any(|m| m.id == message.id) {
                    insert_sorted(&mut s.state.messages, message);
                }
            }
            Some(
                s.state
                    .messages
                    .iter()
                    .any(|m| m.sender_id == contact && !m.is_read),
            )
        });
        let Some(has_unread) = has_unread else {
            return Ok(false);
        };

        if has_unread {
            if let Err(e) = self.inner.backend.mark_read(contact).await {
                warn!("Failed to mark conversation read: {}", e);
            }
        }
        self.update(|s| {
            if s.state.selected_contact != Some(contact) {
                return;
            }
            for message in s.state.messages.iter_mut() {
                if message.sender_id == contact {
                    message.is_read = true;
                }
            }
            if let Some(c) = s.state.contacts.iter_mut().find(|c| c.id() == contact) {
                c.unread_count = 0;
            }
        });
        Ok(true)
    }

    pub fn set_draft(&self, draft: impl Into<String>) {
        let draft = draft.into();
        self.update(|s| s.state.draft = draft);
    }

    /// Send the current draft to the selected contact.
    pub async fn send_draft(&self) -> Result<Message, ClientError> {
        let draft = self.lock().state.draft.clone();
        self.send_message(&draft).await
    }

    /// Send `content` to the selected contact. The message shows up at once
    /// under a temporary id and is swapped for the stored row when the
    /// backend confirms it. On failure it is removed again; connectivity
    /// failures also queue the message for a later retry.
    pub async fn send_message(&self, content: &str) -> Result<Message, ClientError> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ClientError::Validation(
                "A mensagem não pode ficar vazia.".into(),
            ));
        }
        let me = self.inner.me;
        let receiver_id = self
            .lock()
            .state
            .selected_contact
            .ok_or_else(|| ClientError::Validation("Selecione uma conversa.".into()))?;

        let temp_id = self.update(|s| {
            let temp_id = s.pending.begin_with(|id| Message {
                id,
                content: content.clone(),
                sender_id: me,
                receiver_id,
                created_at: Utc::now(),
                is_read: false,
            });
            if let Some(temp) = s.pending.get(temp_id).cloned() {
                insert_sorted(&mut s.state.messages, temp);
            }
            s.state.draft.clear();
            temp_id
        });

        match self.inner.backend.send_message(receiver_id, &content).await {
            Ok(row) => {
                self.update(|s| {
                    if s.pending.resolve(temp_id).is_some() {
                        s.state.messages.retain(|m| m.id != temp_id);
                        let open = s.state.selected_contact == Some(receiver_id);
                        if open && !s.state.messages.iter().any(|m| m.id == row.id) {
                            insert_sorted(&mut s.state.messages, row.clone());
                        }
                    }
                    touch_contact(&mut s.state.contacts, receiver_id, &row);
                });
                Ok(row)
            }
            Err(e) => {
                warn!("Failed to send message: {}", e);
                self.update(|s| {
                    if s.pending.rollback(temp_id).is_some() {
                        s.state.messages.retain(|m| m.id != temp_id);
                    }
                });
                if e.is_network() {
                    self.inner.offline.enqueue(OfflineAction::SendMessage {
                        receiver_id,
                        content,
                    });
                }
                Err(e.into())
            }
        }
    }

    /// Apply a message from the inbox feed: append it to the open
    /// conversation and update the contact list.
    async fn on_inbox_message(&self, message: Message) {
        let me = self.inner.me;
        let other = message.counterpart(me);
        let known = self.update(|s| {
            if !s.seen.insert(message.id) {
                return true;
            }
            ingest(s, me, &message);
            let open = s.state.selected_contact == Some(other);
            let Some(contact) = s.state.contacts.iter_mut().find(|c| c.id() == other) else {
                return false;
            };
            contact.last_message = Some(message.content.clone());
            contact.last_message_at = Some(message.created_at);
            if message.sender_id == other && !open && !message.is_read {
                contact.unread_count += 1;
            }
            sort_contacts(&mut s.state.contacts);
            true
        });
        if known {
            return;
        }

        debug!("Message from unknown contact {}, fetching profile", other);
        let profile = match self.inner.backend.get_profile(other).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!("Message counterpart {} has no profile", other);
                return;
            }
            Err(e) => {
                warn!("Failed to fetch contact profile: {}", e);
                return;
            }
        };
        self.update(|s| {
            let open = s.state.selected_contact == Some(other);
            let contact = match s.state.contacts.iter().position(|c| c.id() == other) {
                Some(at) => &mut s.state.contacts[at],
                None => {
                    s.state.contacts.push(Contact::new(profile));
                    let last = s.state.contacts.len() - 1;
                    &mut s.state.contacts[last]
                }
            };
            contact.last_message = Some(message.content.clone());
            contact.last_message_at = Some(message.created_at);
            if message.sender_id == other && !open && !message.is_read {
                contact.unread_count += 1;
            }
            sort_contacts(&mut s.state.contacts);
        });
    }

    /// Apply a message from the conversation feed. Incoming ones are
    /// marked read right away.
    async fn on_conversation_message(&self, message: Message) {
        let me = self.inner.me;
        let other = message.counterpart(me);
        let incoming = message.sender_id == other && !message.is_read;
        let open = self.update(|s| {
            ingest(s, me, &message);
            s.state.selected_contact == Some(other)
        });
        if !(incoming && open) {
            return;
        }

        if let Err(e) = self.inner.backend.mark_read(other).await {
            warn!("Failed to mark message read: {}", e);
            return;
        }
        self.update(|s| {
            if let Some(m) = s.state.messages.iter_mut().find(|m| m.id == message.id) {
                m.is_read = true;
            }
            if let Some(c) = s.state.contacts.iter_mut().find(|c| c.id() == other) {
                c.unread_count = 0;
            }
        });
    }
}

/// Put a delivered message into the open conversation, at most once. The
/// echo of one of our own in-flight sends replaces its optimistic copy.
fn ingest(s: &mut Shared, me: Uuid, message: &Message) {
    if s.state.messages.iter().any(|m| m.id == message.id) {
        return;
    }
    if message.sender_id == me {
        let echo = s
            .pending
            .find(|p| p.receiver_id == message.receiver_id && p.content == message.content)
            .map(|(temp_id, _)| temp_id);
        if let Some(temp_id) = echo {
            s.pending.resolve(temp_id);
            s.state.messages.retain(|m| m.id != temp_id);
        }
    }
    if s.state.selected_contact == Some(message.counterpart(me)) {
        insert_sorted(&mut s.state.messages, message.clone());
    }
}

fn touch_contact(contacts: &mut [Contact], id: Uuid, message: &Message) {
    if let Some(contact) = contacts.iter_mut().find(|c| c.id() == id) {
        contact.last_message = Some(message.content.clone());
        contact.last_message_at = Some(message.created_at);
        sort_contacts(contacts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brabas_types::models::Profile;

    fn contact(email: &str, unread: u32) -> Contact {
        let mut contact = Contact::new(Profile::default_for(Uuid::new_v4(), email));
        contact.unread_count = unread;
        contact
    }

    #[test]
    fn reloading_contacts_forgets_applied_deliveries() {
        let mut shared = Shared::default();
        shared.seen.extend([Uuid::new_v4(), Uuid::new_v4()]);
        let open = contact("ana@x.com", 3);
        shared.state.selected_contact = Some(open.id());

        shared.replace_contacts(vec![contact("bia@x.com", 2), open.clone()]);

        assert!(shared.seen.is_empty());
        assert_eq!(shared.state.contact(open.id()).unwrap().unread_count, 0);
        let unread: u32 = shared.state.contacts.iter().map(|c| c.unread_count).sum();
        assert_eq!(unread, 2);
    }
}
