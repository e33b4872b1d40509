use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::consumer::Consumer;
use crate::errors::SqsPollerError;
use crate::message::Message;

/// Maps message types to the single consumer that handles them.
///
/// The registry is built once, before polling starts, from an explicit list of
/// consumer instances. It is read-only afterwards and shared by every worker
/// task without locking.
#[derive(Default, Clone)]
pub struct ConsumerRegistry {
    consumers: HashMap<String, Arc<dyn Consumer>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of consumers.
    ///
    /// Fails with [`SqsPollerError::DuplicateConsumerType`] if two consumers
    /// declare the same message type. No registry is produced in that case.
    pub fn from_consumers<I>(consumers: I) -> Result<Self, SqsPollerError>
    where
        I: IntoIterator<Item = Arc<dyn Consumer>>,
    {
        let mut registry = Self::new();
        for consumer in consumers {
            registry.register(consumer)?;
        }
        Ok(registry)
    }

    /// Adds a consumer keyed by its declared message type.
    pub fn register(&mut self, consumer: Arc<dyn Consumer>) -> Result<(), SqsPollerError> {
        match self.consumers.entry(consumer.message_type().to_string()) {
            Entry::Occupied(entry) => Err(SqsPollerError::DuplicateConsumerType(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(consumer);
                Ok(())
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_consumer(mut self, consumer: Arc<dyn Consumer>) -> Result<Self, SqsPollerError> {
        self.register(consumer)?;
        Ok(self)
    }

    /// Looks up the consumer for the message's type.
    ///
    /// Messages without a type, or with a type nobody registered, are
    /// unresolved. This is a plain lookup with no side effects.
    pub fn resolve(&self, message: &Message) -> Result<&Arc<dyn Consumer>, SqsPollerError> {
        message
            .message_type()
            .and_then(|message_type| self.consumers.get(message_type))
            .ok_or_else(|| SqsPollerError::UnresolvedConsumerError {
                message_id: message.message_id().to_string(),
                message_type: message.message_type().map(str::to_string),
            })
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// The registered message types, sorted.
    pub fn message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.consumers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("message_types", &self.message_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::consumer_fn;

    fn noop(message_type: &str) -> Arc<dyn Consumer> {
        consumer_fn(message_type, (), |_message, _, _| async { Ok(()) })
    }

    #[test]
    fn resolves_registered_type_to_its_consumer() {
        let placed = noop("OrderPlaced");
        let shipped = noop("OrderShipped");
        let registry =
            ConsumerRegistry::from_consumers(vec![placed.clone(), shipped.clone()]).unwrap();

        let message = Message::new("m-1", "{}", "rh-1").with_message_type("OrderShipped");
        let resolved = registry.resolve(&message).unwrap();

        assert!(Arc::ptr_eq(resolved, &shipped));
        assert!(!Arc::ptr_eq(resolved, &placed));
        assert_eq!(registry.message_types(), vec!["OrderPlaced", "OrderShipped"]);
    }

    #[test]
    fn duplicate_type_fails_construction() {
        let result = ConsumerRegistry::from_consumers(vec![
            noop("OrderPlaced"),
            noop("OrderShipped"),
            noop("OrderPlaced"),
        ]);

        match result {
            Err(SqsPollerError::DuplicateConsumerType(message_type)) => {
                assert_eq!(message_type, "OrderPlaced")
            }
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_registration_keeps_first_consumer() {
        let first = noop("OrderPlaced");
        let mut registry = ConsumerRegistry::new();
        registry.register(first.clone()).unwrap();

        assert!(registry.register(noop("OrderPlaced")).is_err());

        let message = Message::new("m-1", "{}", "rh-1").with_message_type("OrderPlaced");
        assert!(Arc::ptr_eq(registry.resolve(&message).unwrap(), &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_or_missing_type_is_unresolved() {
        let registry = ConsumerRegistry::new()
            .with_consumer(noop("OrderPlaced"))
            .unwrap();

        let unknown = Message::new("m-2", "{}", "rh-2").with_message_type("Refund");
        match registry.resolve(&unknown) {
            Err(SqsPollerError::UnresolvedConsumerError {
                message_id,
                message_type,
            }) => {
                assert_eq!(message_id, "m-2");
                assert_eq!(message_type.as_deref(), Some("Refund"));
            }
            _ => panic!("expected unresolved"),
        }

        let untyped = Message::new("m-3", "{}", "rh-3");
        assert!(matches!(
            registry.resolve(&untyped),
            Err(SqsPollerError::UnresolvedConsumerError { message_type: None, .. })
        ));
    }
}
