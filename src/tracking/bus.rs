use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::model::Slug;

type Listener = Arc<dyn Fn(u64) + Send + Sync>;

static GLOBAL: Lazy<ViewEventBus> = Lazy::new(ViewEventBus::default);

/// In-process publish/subscribe registry announcing new view counts, keyed by movie slug.
///
/// Publishing is synchronous: every listener registered for the slug has been called, in
/// registration order, by the time [ViewEventBus::publish] returns. Nothing is buffered, so a
/// listener that subscribes after a publish never sees it.
#[derive(Clone, Default)]
pub struct ViewEventBus {
    registry: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    listeners: DashMap<Slug, Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ViewEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    pub fn subscribe<F>(&self, slug: &Slug, listener: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .listeners
            .entry(slug.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            bus: self.clone(),
            slug: slug.clone(),
            id,
        }
    }

    /// Notify every listener of `slug`, returning how many were called.
    pub fn publish(&self, slug: &Slug, count: u64) -> usize {
        // Listeners run outside the map shard lock so they are free to (un)subscribe.
        let listeners: Vec<Listener> = match self.registry.listeners.get(slug) {
            Some(entry) => entry.iter().map(|(_, listener)| listener.clone()).collect(),
            None => return 0,
        };

        for listener in &listeners {
            listener(count);
        }

        listeners.len()
    }

    pub fn subscriber_count(&self, slug: &Slug) -> usize {
        self.registry
            .listeners
            .get(slug)
            .map_or(0, |entry| entry.len())
    }

    /// Number of slugs with at least one listener.
    pub fn tracked_slugs(&self) -> usize {
        self.registry.listeners.len()
    }

    fn remove(&self, slug: &Slug, id: u64) {
        if let Some(mut entry) = self.registry.listeners.get_mut(slug) {
            entry.retain(|(listener_id, _)| *listener_id != id);
        }

        self.registry
            .listeners
            .remove_if(slug, |_, listeners| listeners.is_empty());
    }
}

impl fmt::Debug for ViewEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewEventBus")
            .field("slugs", &self.registry.listeners.len())
            .finish()
    }
}

/// Handle returned by [ViewEventBus::subscribe]. Dropping it without calling
/// [Subscription::unsubscribe] leaves the listener registered.
#[derive(Debug)]
pub struct Subscription {
    bus: ViewEventBus,
    slug: Slug,
    id: u64,
}

impl Subscription {
    pub fn slug(&self) -> &Slug {
        &self.slug
    }

    pub fn unsubscribe(self) {
        self.bus.remove(&self.slug, self.id);
    }
}
