use std::time::Duration;

use crate::model::Slug;
use crate::time::Timestamp;
use crate::tracking::storage::{last_view_key, viewed_key, Storage};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// How repeated visits to the same movie are de-duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingPolicy {
    /// At most one counted view per movie per session.
    #[default]
    Session,
    /// A new view counts once `window` has passed since the last counted one.
    Cooldown { window: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    AlreadyCounted,
    CoolingDown { remaining: Duration },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl TrackingPolicy {
    pub fn cooldown() -> Self {
        TrackingPolicy::Cooldown {
            window: DEFAULT_COOLDOWN,
        }
    }

    pub fn eligibility(&self, slug: &Slug, storage: &Storage, now: Timestamp) -> Eligibility {
        match self {
            TrackingPolicy::Session => match storage.session.get(&viewed_key(slug)) {
                Some(_) => Eligibility::AlreadyCounted,
                None => Eligibility::Eligible,
            },
            TrackingPolicy::Cooldown { window } => {
                let Some(last) = storage
                    .local
                    .get(&last_view_key(slug))
                    .and_then(|millis| millis.parse::<i64>().ok())
                else {
                    return Eligibility::Eligible;
                };

                // A marker from the future (clock moved backwards) counts as zero elapsed time.
                let elapsed = Duration::from_millis(u64::try_from(now.millis() - last).unwrap_or(0));
                match window.checked_sub(elapsed) {
                    Some(remaining) if !remaining.is_zero() => {
                        Eligibility::CoolingDown { remaining }
                    }
                    _ => Eligibility::Eligible,
                }
            }
        }
    }

    /// Record a counted view so later visits are judged against it.
    pub fn mark(&self, slug: &Slug, storage: &Storage, now: Timestamp) {
        match self {
            TrackingPolicy::Session => storage.session.set(&viewed_key(slug), "true".to_string()),
            TrackingPolicy::Cooldown { .. } => storage
                .local
                .set(&last_view_key(slug), now.millis().to_string()),
        }
    }
}
