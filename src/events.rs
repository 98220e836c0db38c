//! Ordered, fail-fast event dispatch
//!
//! Consumers register for a payload type at composition time through
//! [`SubscriberRegistryBuilder`]; the registered set is closed once built.
//! [`EventPublisher::publish`] resolves the consumers fresh on every call,
//! orders them by rank and dispatches strictly sequentially, stopping at the
//! first failure.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

/// Wraps one event payload entity; carries no identity beyond it.
#[derive(Debug, Clone)]
pub struct Event<T> {
    entity: T,
}

impl<T> Event<T> {
    pub fn new(entity: T) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &T {
        &self.entity
    }

    pub fn into_entity(self) -> T {
        self.entity
    }
}

/// Handles events carrying a payload of type `T`.
#[async_trait]
pub trait Consumer<T>: Send + Sync {
    async fn handle(&self, message: &T) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Dispatch rank; lower ranks are dispatched first.
    fn order(&self) -> i32 {
        0
    }
}

type ConsumerSet = Vec<Box<dyn Any + Send + Sync>>;

/// Closed set of consumer registrations, keyed by payload type.
#[derive(Default)]
pub struct SubscriberRegistry {
    consumers: HashMap<TypeId, ConsumerSet>,
}

impl SubscriberRegistry {
    pub fn builder() -> SubscriberRegistryBuilder {
        SubscriberRegistryBuilder::default()
    }

    /// All consumers registered for payload type `T`, in registration order.
    /// Resolved fresh on every call; nothing is cached across calls.
    pub fn subscribers<T: 'static>(&self) -> Vec<Arc<dyn Consumer<T>>> {
        self.consumers
            .get(&TypeId::of::<T>())
            .map(|set| {
                set.iter()
                    .filter_map(|entry| entry.downcast_ref::<Arc<dyn Consumer<T>>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builds the consumer registrations at composition time.
#[derive(Default)]
pub struct SubscriberRegistryBuilder {
    consumers: HashMap<TypeId, ConsumerSet>,
}

impl SubscriberRegistryBuilder {
    pub fn register<T: 'static>(mut self, consumer: Arc<dyn Consumer<T>>) -> Self {
        self.consumers
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Box::new(consumer));
        self
    }

    pub fn build(self) -> SubscriberRegistry {
        SubscriberRegistry {
            consumers: self.consumers,
        }
    }
}

/// Publishes typed events to the registered consumers.
#[derive(Clone)]
pub struct EventPublisher {
    registry: Arc<SubscriberRegistry>,
}

impl EventPublisher {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatches `message` to every consumer registered for `T`, ordered by
    /// ascending rank, one at a time, each awaited to completion. Consumers
    /// with equal rank keep their registration order.
    ///
    /// Fail-fast: the first consumer failure is logged and returned, and no
    /// later consumer receives the event. No timeout is applied; a stuck
    /// consumer blocks the publisher.
    pub async fn publish<T: Send + Sync + 'static>(
        &self,
        message: &T,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut consumers = self.registry.subscribers::<T>();
        consumers.sort_by_key(|consumer| consumer.order());
        for consumer in consumers {
            if let Err(e) = consumer.handle(message).await {
                error!("Consumer failed handling event: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}
