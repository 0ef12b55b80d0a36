use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::model::Slug;
use crate::tracking::bus::{Subscription, ViewEventBus};
use crate::tracking::storage::{cached_count, KeyValueStore};

/// How long a counter stays highlighted after its value changed.
pub const PULSE: Duration = Duration::from_millis(500);

/// A view count display that follows the [ViewEventBus] for one movie.
#[derive(Debug)]
pub struct LiveCounter {
    slug: Slug,
    state: Arc<Mutex<CounterState>>,
    subscription: Option<Subscription>,
}

#[derive(Debug)]
struct CounterState {
    count: u64,
    changed_at: Option<Instant>,
}

impl LiveCounter {
    /// Mount a counter for a page rendered with `server_count` views. A higher count remembered
    /// in `local` wins, so that navigating back to a stale page never shows fewer views.
    pub fn mount(
        slug: Slug, server_count: u64, bus: &ViewEventBus, local: &dyn KeyValueStore,
    ) -> Self {
        let count = cached_count(local, &slug).map_or(server_count, |cached| cached.max(server_count));
        let state = Arc::new(Mutex::new(CounterState {
            count,
            changed_at: None,
        }));

        let listener = state.clone();
        let subscription = bus.subscribe(&slug, move |count| {
            let mut state = listener.lock().unwrap_or_else(PoisonError::into_inner);
            state.count = count;
            state.changed_at = Some(Instant::now());
        });

        Self {
            slug,
            state,
            subscription: Some(subscription),
        }
    }

    pub fn slug(&self) -> &Slug {
        &self.slug
    }

    pub fn count(&self) -> u64 {
        self.state().count
    }

    /// Whether the count changed within the last [PULSE].
    pub fn is_pulsing(&self) -> bool {
        self.state()
            .changed_at
            .is_some_and(|changed_at| changed_at.elapsed() < PULSE)
    }

    pub fn render(&self) -> String {
        format!("{} views", format_count(self.count()))
    }

    pub fn unmount(mut self) {
        self.detach();
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for LiveCounter {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Format a count with `,` thousands separators.
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }

    formatted
}
