//! Participant directory: maps opaque `ParticipantRef`s onto the entities
//! behind them so sender and member details can be shown next to messages
//! and conversations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use parley_types::{ParticipantDetails, ParticipantRef};
use serde_json::Value;

/// Anything that can take part in a conversation.
pub trait Participant: Send + Sync {
    fn participant_ref(&self) -> ParticipantRef;

    /// Full attribute set of the entity.
    fn attributes(&self) -> ParticipantDetails;

    /// Display projection. The default keeps the whitelisted attributes (all
    /// of them when the whitelist is empty); implementors may override it.
    fn details(&self, whitelist: &[String]) -> ParticipantDetails {
        let attributes = self.attributes();
        if whitelist.is_empty() {
            return attributes;
        }
        attributes
            .into_iter()
            .filter(|(key, _)| whitelist.iter().any(|w| w == key))
            .collect()
    }
}

/// Looks up participants of one type by id.
pub trait ParticipantResolver: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Arc<dyn Participant>>;
}

/// Registry of resolvers keyed by participant type tag.
#[derive(Default, Clone)]
pub struct ParticipantDirectory {
    resolvers: HashMap<String, Arc<dyn ParticipantResolver>>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the resolver for a participant type, replacing any previous one.
    pub fn register(mut self, kind: impl Into<String>, resolver: Arc<dyn ParticipantResolver>) -> Self {
        self.resolvers.insert(kind.into(), resolver);
        self
    }

    pub fn resolve(&self, participant: &ParticipantRef) -> Option<Arc<dyn Participant>> {
        self.resolvers
            .get(&participant.kind)
            .and_then(|resolver| resolver.resolve(&participant.id))
    }

    /// Whitelisted details, or `None` when nothing resolves the reference.
    pub fn details(&self, participant: &ParticipantRef, whitelist: &[String]) -> Option<ParticipantDetails> {
        self.resolve(participant).map(|p| p.details(whitelist))
    }
}

/// Plain attribute bag, enough for participants whose data lives elsewhere
/// and is mirrored into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub reference: ParticipantRef,
    pub attributes: ParticipantDetails,
}

impl Profile {
    pub fn new(reference: ParticipantRef) -> Self {
        Self {
            reference,
            attributes: ParticipantDetails::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl Participant for Profile {
    fn participant_ref(&self) -> ParticipantRef {
        self.reference.clone()
    }

    fn attributes(&self) -> ParticipantDetails {
        self.attributes.clone()
    }
}

/// In-memory resolver for a single participant type.
#[derive(Default)]
pub struct MemoryResolver {
    participants: RwLock<HashMap<String, Arc<dyn Participant>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, participant: Arc<dyn Participant>) {
        let id = participant.participant_ref().id;
        if let Ok(mut map) = self.participants.write() {
            map.insert(id, participant);
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.participants
            .write()
            .map(|mut map| map.remove(id).is_some())
            .unwrap_or(false)
    }
}

impl ParticipantResolver for MemoryResolver {
    fn resolve(&self, id: &str) -> Option<Arc<dyn Participant>> {
        self.participants.read().ok()?.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Bot {
        id: String,
    }

    impl Participant for Bot {
        fn participant_ref(&self) -> ParticipantRef {
            ParticipantRef::new("bot", &self.id)
        }

        fn attributes(&self) -> ParticipantDetails {
            let mut attrs = ParticipantDetails::new();
            attrs.insert("name".into(), json!(format!("bot-{}", self.id)));
            attrs.insert("token".into(), json!("secret"));
            attrs
        }

        fn details(&self, _whitelist: &[String]) -> ParticipantDetails {
            let mut details = ParticipantDetails::new();
            details.insert("display".into(), json!("Bot"));
            details
        }
    }

    fn directory() -> ParticipantDirectory {
        let users = Arc::new(MemoryResolver::new());
        users.insert(Arc::new(
            Profile::new(ParticipantRef::new("user", "alice"))
                .with("name", "Alice")
                .with("email", "alice@example.com"),
        ));

        let bots = Arc::new(MemoryResolver::new());
        bots.insert(Arc::new(Bot { id: "7".into() }));

        ParticipantDirectory::new()
            .register("user", users)
            .register("bot", bots)
    }

    #[test]
    fn whitelist_filters_attributes() {
        let dir = directory();
        let alice = ParticipantRef::new("user", "alice");

        let all = dir.details(&alice, &[]).unwrap();
        assert_eq!(all.len(), 2);

        let named = dir.details(&alice, &["name".to_string()]).unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named["name"], "Alice");
    }

    #[test]
    fn custom_details_override() {
        let dir = directory();
        let details = dir.details(&ParticipantRef::new("bot", "7"), &["name".into()]).unwrap();
        assert_eq!(details["display"], "Bot");
        assert!(!details.contains_key("token"));
    }

    #[test]
    fn unknown_type_or_id_resolves_to_none() {
        let dir = directory();
        assert!(dir.resolve(&ParticipantRef::new("client", "alice")).is_none());
        assert!(dir.details(&ParticipantRef::new("user", "nobody"), &[]).is_none());
    }

    #[test]
    fn memory_resolver_remove() {
        let resolver = MemoryResolver::new();
        resolver.insert(Arc::new(Profile::new(ParticipantRef::new("user", "bob"))));
        assert!(resolver.resolve("bob").is_some());
        assert!(resolver.remove("bob"));
        assert!(!resolver.remove("bob"));
        assert!(resolver.resolve("bob").is_none());
    }
}
