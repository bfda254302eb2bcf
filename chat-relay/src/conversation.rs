//! Per-contact conversation buffers on the client.
//!
//! Decoded [`ServerEvent`]s are dispatched into one append-only buffer per
//! [`Contact`]. The store pushes a [`ViewUpdate`] whenever something the
//! presentation shows changes: the contact list, the selection, or a line
//! appended to the selected conversation.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{Contact, ServerEvent};

/// Ordered, append-only lines of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationBuffer {
    lines: Vec<String>,
}

impl ConversationBuffer {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    /// Every line followed by a newline.
    pub fn text(&self) -> String {
        self.lines.iter().fold(String::new(), |mut text, line| {
            text.push_str(line);
            text.push('\n');
            text
        })
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }
}

/// Changes pushed to the presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewUpdate {
    /// `Global` first, then every other registered user.
    ContactsChanged { contacts: Vec<Contact> },
    /// The selection moved; `lines` is the full buffer for the first render.
    SelectionChanged { contact: Contact, lines: Vec<String> },
    LineAppended { contact: Contact, line: String },
}

pub struct ConversationStore {
    me: String,
    buffers: HashMap<Contact, ConversationBuffer>,
    selected: Contact,
    contacts: Vec<Contact>,
    updates: mpsc::UnboundedSender<ViewUpdate>,
}

impl ConversationStore {
    /// Creates a store for the local user `me` with `Global` selected.
    pub fn new(me: impl Into<String>, updates: mpsc::UnboundedSender<ViewUpdate>) -> Self {
        let mut buffers = HashMap::new();
        buffers.insert(Contact::Global, ConversationBuffer::default());

        Self {
            me: me.into(),
            buffers,
            selected: Contact::Global,
            contacts: vec![Contact::Global],
            updates,
        }
    }

    pub fn selected(&self) -> &Contact {
        &self.selected
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn buffer(&self, contact: &Contact) -> Option<&ConversationBuffer> {
        self.buffers.get(contact)
    }

    /// Appends to `contact`'s buffer, creating it on first use. Lines for the
    /// selected contact are pushed to the presentation immediately.
    pub fn append(&mut self, contact: Contact, line: impl Into<String>) {
        let line = line.into();
        if contact == self.selected {
            self.push(ViewUpdate::LineAppended {
                contact: contact.clone(),
                line: line.clone(),
            });
        }
        self.buffers.entry(contact).or_default().push(line);
    }

    /// Selects `contact` and returns its accumulated buffer.
    pub fn select(&mut self, contact: Contact) -> &ConversationBuffer {
        self.selected = contact.clone();
        let lines = self
            .buffers
            .entry(contact.clone())
            .or_default()
            .lines()
            .to_vec();
        self.push(ViewUpdate::SelectionChanged {
            contact: contact.clone(),
            lines,
        });
        self.buffers.entry(contact).or_default()
    }

    pub fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::RosterUpdate { names } => self.update_roster(names),
            ServerEvent::PrivateIncoming { sender, body } => {
                let line = format!("{sender}: {body}");
                self.append(Contact::from(sender), line);
            }
            ServerEvent::PrivateEcho { target, body } => {
                self.append(Contact::from(target), format!("Me: {body}"));
            }
            ServerEvent::SystemNotice { text } | ServerEvent::GlobalMessage { text } => {
                self.append(Contact::Global, text);
            }
        }
    }

    /// Replaces the contact list with `Global` plus every name other than
    /// ours. A selected user who left drops the selection back to `Global`.
    fn update_roster(&mut self, names: Vec<String>) {
        let contacts: Vec<Contact> = std::iter::once(Contact::Global)
            .chain(
                names
                    .into_iter()
                    .filter(|name| *name != self.me)
                    .map(Contact::from),
            )
            .collect();

        self.contacts = contacts.clone();
        self.push(ViewUpdate::ContactsChanged { contacts });

        if !self.contacts.contains(&self.selected) {
            self.select(Contact::Global);
        }
    }

    fn push(&self, update: ViewUpdate) {
        if self.updates.send(update).is_err() {
            debug!("presentation gone; dropping view update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(me: &str) -> (ConversationStore, mpsc::UnboundedReceiver<ViewUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConversationStore::new(me, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ViewUpdate>) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    #[test]
    fn starts_with_empty_global_buffer() {
        let (store, _rx) = store("Alice");
        assert_eq!(store.selected(), &Contact::Global);
        assert_eq!(store.contacts(), &[Contact::Global]);
        assert!(store.buffer(&Contact::Global).expect("global").is_empty());
        assert!(store.buffer(&Contact::from("Bob")).is_none());
    }

    #[test]
    fn appends_accumulate_in_arrival_order() {
        let (mut store, mut rx) = store("Alice");
        let bob = Contact::from("Bob");

        for n in 1..=5 {
            store.append(bob.clone(), format!("Bob: {n}"));
        }
        assert!(drain(&mut rx).is_empty(), "unselected lines are not pushed");

        let buffer = store.select(bob.clone());
        assert_eq!(buffer.lines(), ["Bob: 1", "Bob: 2", "Bob: 3", "Bob: 4", "Bob: 5"]);
        assert_eq!(buffer.text(), "Bob: 1\nBob: 2\nBob: 3\nBob: 4\nBob: 5\n");
        assert_eq!(store.buffer(&bob).expect("bob").len(), 5);
    }

    #[test]
    fn selected_contact_gets_live_lines() {
        let (mut store, mut rx) = store("Alice");
        store.append(Contact::Global, "Server: Alice joined.");

        assert_eq!(
            drain(&mut rx),
            vec![ViewUpdate::LineAppended {
                contact: Contact::Global,
                line: "Server: Alice joined.".into()
            }]
        );
    }

    #[test]
    fn selecting_unseen_contact_creates_empty_buffer() {
        let (mut store, mut rx) = store("Alice");
        let carol = Contact::from("Carol");

        assert!(store.select(carol.clone()).is_empty());
        assert_eq!(store.selected(), &carol);
        assert!(store.buffer(&carol).is_some());
        assert_eq!(
            drain(&mut rx),
            vec![ViewUpdate::SelectionChanged {
                contact: carol,
                lines: vec![]
            }]
        );
    }

    #[test]
    fn dispatches_events_to_their_buffers() {
        let (mut store, _rx) = store("Alice");

        store.dispatch(ServerEvent::PrivateIncoming {
            sender: "Bob".into(),
            body: "yo".into(),
        });
        store.dispatch(ServerEvent::PrivateEcho {
            target: "Bob".into(),
            body: "hey".into(),
        });
        store.dispatch(ServerEvent::SystemNotice {
            text: "Server: Bob joined.".into(),
        });
        store.dispatch(ServerEvent::GlobalMessage {
            text: "Bob: hi all".into(),
        });

        let bob = store.buffer(&Contact::from("Bob")).expect("bob buffer");
        assert_eq!(bob.lines(), ["Bob: yo", "Me: hey"]);
        let global = store.buffer(&Contact::Global).expect("global buffer");
        assert_eq!(global.lines(), ["Server: Bob joined.", "Bob: hi all"]);
    }

    #[test]
    fn roster_excludes_self_and_creates_no_buffers() {
        let (mut store, mut rx) = store("Alice");

        store.dispatch(ServerEvent::RosterUpdate {
            names: vec!["Alice".into(), "Bob".into()],
        });

        let expected = vec![Contact::Global, Contact::from("Bob")];
        assert_eq!(store.contacts(), expected.as_slice());
        assert!(store.buffer(&Contact::from("Bob")).is_none());
        assert_eq!(
            drain(&mut rx),
            vec![ViewUpdate::ContactsChanged { contacts: expected }]
        );
    }

    #[test]
    fn departed_selection_falls_back_to_global() {
        let (mut store, mut rx) = store("Alice");
        store.dispatch(ServerEvent::RosterUpdate {
            names: vec!["Alice".into(), "Bob".into()],
        });
        store.select(Contact::from("Bob"));
        store.append(Contact::Global, "Server: Bob left.");
        drain(&mut rx);

        store.dispatch(ServerEvent::RosterUpdate {
            names: vec!["Alice".into()],
        });

        assert_eq!(store.selected(), &Contact::Global);
        assert_eq!(
            drain(&mut rx),
            vec![
                ViewUpdate::ContactsChanged {
                    contacts: vec![Contact::Global]
                },
                ViewUpdate::SelectionChanged {
                    contact: Contact::Global,
                    lines: vec!["Server: Bob left.".into()]
                },
            ]
        );
        assert!(store.buffer(&Contact::from("Bob")).is_some());
    }

    #[test]
    fn view_updates_serialize_as_tagged_json() {
        let update = ViewUpdate::LineAppended {
            contact: Contact::from("Bob"),
            line: "Me: hi".into(),
        };
        assert_eq!(
            serde_json::to_string(&update).expect("serialize"),
            r#"{"type":"line_appended","contact":"Bob","line":"Me: hi"}"#
        );
    }
}
