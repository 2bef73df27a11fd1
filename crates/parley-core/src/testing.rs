use std::sync::Arc;

use parley_db::Database;
use parley_types::{ChatEvent, ConversationId, ParticipantRef};
use tokio::sync::broadcast;

use crate::{Chat, ChatConfig, Dispatcher, MemoryResolver, ParticipantDirectory, Profile};

pub fn user(id: &str) -> ParticipantRef {
    ParticipantRef::new("user", id)
}

/// Log to the test writer; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_core=debug,parley_db=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory chat with broadcasts on and a subscriber attached.
pub struct Harness {
    pub chat: Chat,
    events: broadcast::Receiver<ChatEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ChatConfig {
            broadcasts: true,
            ..Default::default()
        })
    }

    pub fn with_config(config: ChatConfig) -> Self {
        Self::with_database(Database::open_in_memory().unwrap(), config)
    }

    pub fn with_database(db: Database, config: ChatConfig) -> Self {
        init_tracing();

        let users = Arc::new(MemoryResolver::new());
        for name in ["alice", "bob", "carol", "dave"] {
            users.insert(Arc::new(
                Profile::new(user(name))
                    .with("name", name)
                    .with("email", format!("{}@example.com", name)),
            ));
        }
        let directory = ParticipantDirectory::new().register("user", users);

        let dispatcher = Dispatcher::new();
        let events = dispatcher.subscribe();
        let chat = Chat::new(db, config, directory, Arc::new(dispatcher)).unwrap();

        Self { chat, events }
    }

    /// Non-direct conversation of the named users.
    pub fn group(&self, names: &[&str]) -> ConversationId {
        let members: Vec<ParticipantRef> = names.iter().map(|n| user(n)).collect();
        self.chat
            .start_conversation(&members, serde_json::json!({}), false)
            .unwrap()
            .id
    }

    /// Everything published since the last drain.
    pub fn drain(&mut self) -> Vec<ChatEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ChatEvent::name).collect()
    }
}
