use std::time::Duration;

use tokio::sync::watch;

/// How long to wait before assuming the movie was seen when nothing reports visibility.
pub const FALLBACK_DELAY: Duration = Duration::from_secs(2);

/// Reports how much of an element is inside the viewport, as a ratio between 0 and 1.
#[derive(Debug)]
pub struct VisibilityFeed {
    tx: watch::Sender<f64>,
}

impl VisibilityFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0.0);
        Self { tx }
    }

    pub fn report(&self, ratio: f64) {
        self.tx.send_replace(ratio.clamp(0.0, 1.0));
    }

    pub fn ratio(&self) -> f64 {
        *self.tx.borrow()
    }

    /// Whether a tracker is still watching this element.
    pub fn is_watched(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

impl Default for VisibilityFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// The element whose visibility proves the visitor is actually looking at the movie.
#[derive(Debug, Clone)]
pub enum AttentionTarget {
    Observed(watch::Receiver<f64>),
    Unobservable,
}

impl AttentionTarget {
    pub fn observe(feed: &VisibilityFeed) -> Self {
        AttentionTarget::Observed(feed.tx.subscribe())
    }

    /// Prefer the media element, then the main content container.
    pub fn locate(media: Option<&VisibilityFeed>, container: Option<&VisibilityFeed>) -> Self {
        media
            .or(container)
            .map_or(AttentionTarget::Unobservable, AttentionTarget::observe)
    }

    /// Resolves once the target is at least `threshold` visible, or after [FALLBACK_DELAY] when
    /// visibility cannot be observed. Returns `false` if the element went away first.
    ///
    /// The watch is released as soon as this returns.
    pub async fn attended(self, threshold: f64) -> bool {
        match self {
            AttentionTarget::Observed(mut visibility) => visibility
                .wait_for(|ratio| *ratio > 0.0 && *ratio >= threshold)
                .await
                .is_ok(),
            AttentionTarget::Unobservable => {
                tokio::time::sleep(FALLBACK_DELAY).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn fires_once_the_threshold_is_reached() {
        let feed = VisibilityFeed::new();
        let target = AttentionTarget::observe(&feed);
        let waiting = tokio::spawn(target.attended(0.5));

        feed.report(0.3);
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        feed.report(0.6);
        assert!(waiting.await.unwrap());
        assert!(!feed.is_watched());
    }

    #[tokio::test]
    async fn zero_visibility_never_satisfies_a_zero_threshold() {
        let feed = VisibilityFeed::new();
        let waiting = tokio::spawn(AttentionTarget::observe(&feed).attended(0.0));

        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        feed.report(0.01);
        assert!(waiting.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_elements_are_not_attended() {
        let feed = VisibilityFeed::new();
        let target = AttentionTarget::observe(&feed);
        drop(feed);

        assert!(!target.attended(0.5).await);
    }

    #[tokio::test(start_paused = true)]
    async fn unobservable_targets_fall_back_to_a_timer() {
        let start = Instant::now();
        assert!(AttentionTarget::Unobservable.attended(0.5).await);
        assert!(start.elapsed() >= FALLBACK_DELAY);
    }

    #[test]
    fn locate_prefers_the_media_element() {
        let media = VisibilityFeed::new();
        let container = VisibilityFeed::new();

        assert!(matches!(
            AttentionTarget::locate(Some(&media), Some(&container)),
            AttentionTarget::Observed(_)
        ));
        let _target = AttentionTarget::locate(Some(&media), Some(&container));
        assert!(media.is_watched());
        assert!(!container.is_watched());

        assert!(matches!(
            AttentionTarget::locate(None, None),
            AttentionTarget::Unobservable
        ));
    }
}
