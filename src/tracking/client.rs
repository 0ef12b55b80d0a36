use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use reqwest::StatusCode;
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;
use url::Url;

use crate::model::Slug;
use crate::time::Clock;
use crate::tracking::attention::AttentionTarget;
use crate::tracking::bus::ViewEventBus;
use crate::tracking::policy::{Eligibility, TrackingPolicy};
use crate::tracking::storage::{cache_count, cached_count, Storage};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IncrementError {
    #[snafu(display("movie `{slug}` does not exist or is not published"))]
    NotFound { slug: Slug },
    #[snafu(display("view counter answered with an unexpected status {status}"))]
    UnexpectedStatus { status: u16 },
    #[snafu(display("could not reach the view counter: {source}"))]
    Transport { source: reqwest::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementReply {
    /// The authoritative count, `None` when the response body could not be read.
    pub view_count: Option<u64>,
}

/// The server-side "+1" operation of the view counter.
pub trait IncrementApi: Send + Sync + 'static {
    fn increment(
        &self, slug: &Slug,
    ) -> impl Future<Output = Result<IncrementReply, IncrementError>> + Send;
}

/// Calls `POST {base}/content/{slug}/views` on a running server.
#[derive(Debug, Clone)]
pub struct HttpIncrementApi {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct IncrementBody {
    #[serde(rename = "viewCount")]
    view_count: u64,
}

impl HttpIncrementApi {
    pub fn new(base: &Url) -> Self {
        Self::with_client(reqwest::Client::new(), base)
    }

    pub fn with_client(client: reqwest::Client, base: &Url) -> Self {
        Self {
            client,
            base: base.as_str().trim_end_matches('/').to_string(),
        }
    }
}

impl IncrementApi for HttpIncrementApi {
    async fn increment(&self, slug: &Slug) -> Result<IncrementReply, IncrementError> {
        let url = format!("{}/content/{}/views", self.base, slug);
        let response = self.client.post(url).send().await.context(TransportSnafu)?;

        match response.status() {
            StatusCode::NOT_FOUND => return NotFoundSnafu { slug: slug.clone() }.fail(),
            status if !status.is_success() => {
                return UnexpectedStatusSnafu {
                    status: status.as_u16(),
                }
                .fail()
            }
            _ => {}
        }

        let body = response.bytes().await.context(TransportSnafu)?;
        let view_count = serde_json::from_slice::<IncrementBody>(&body)
            .ok()
            .map(|body| body.view_count);

        Ok(IncrementReply { view_count })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingOptions {
    pub policy: TrackingPolicy,
    /// Time the page has to stay mounted before visibility is watched.
    pub delay: Duration,
    /// Fraction of the target that has to be visible.
    pub threshold: f64,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            policy: TrackingPolicy::Session,
            delay: Duration::from_millis(500),
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Counted(u64),
    /// Not eligible, already counted by this mount, or another attempt is still in flight.
    Skipped,
    /// The increment failed; nothing was recorded.
    Abandoned,
}

/// Decides whether a visit counts as a view and reports it.
pub struct ViewTracker<A> {
    inner: Arc<TrackerInner<A>>,
}

struct TrackerInner<A> {
    api: A,
    storage: Storage,
    bus: ViewEventBus,
    clock: Arc<dyn Clock>,
    options: TrackingOptions,
    /// Slugs with an increment on the wire, shared by every mount of this tracker.
    in_flight: DashSet<Slug>,
}

/// Keeps a slug in the in-flight set until dropped, including when the counting future is.
struct InFlight<'a> {
    slugs: &'a DashSet<Slug>,
    slug: &'a Slug,
}

impl<'a> InFlight<'a> {
    fn claim(slugs: &'a DashSet<Slug>, slug: &'a Slug) -> Option<Self> {
        slugs.insert(slug.clone()).then_some(InFlight { slugs, slug })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slugs.remove(self.slug);
    }
}

impl<A> Clone for ViewTracker<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// State of one mounted tracker.
#[derive(Debug)]
struct Visit {
    slug: Slug,
    baseline: u64,
    tracked: AtomicBool,
}

#[derive(Debug)]
enum Message {
    Stop,
}

impl<A: IncrementApi> ViewTracker<A> {
    pub fn new(
        api: A, storage: Storage, bus: ViewEventBus, clock: Arc<dyn Clock>,
        options: TrackingOptions,
    ) -> Self {
        let inner = TrackerInner {
            api,
            storage,
            bus,
            clock,
            options,
            in_flight: DashSet::new(),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn options(&self) -> &TrackingOptions {
        &self.inner.options
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn eligibility(&self, slug: &Slug) -> Eligibility {
        self.inner
            .options
            .policy
            .eligibility(slug, &self.inner.storage, self.inner.clock.now())
    }

    /// Start tracking a visit to `slug`, whose page was rendered with `baseline` views.
    ///
    /// Visits that are not eligible return an idle mount without touching the network. Otherwise
    /// the visit is counted once `target` has been attended after the configured delay, unless
    /// the mount is dropped first.
    #[instrument(skip(self, target))]
    pub fn mount(&self, slug: Slug, baseline: u64, target: AttentionTarget) -> TrackerMount {
        let eligibility = self.eligibility(&slug);
        if !eligibility.is_eligible() {
            tracing::debug!(?eligibility, "view of `{}` is not counted", slug);
            return TrackerMount::idle();
        }

        let visit = Arc::new(Visit {
            slug,
            baseline,
            tracked: AtomicBool::new(false),
        });

        let (tx, mut message) = mpsc::channel(1);
        let tracker = self.clone();
        let task_visit = visit.clone();
        let TrackingOptions {
            delay, threshold, ..
        } = self.inner.options;

        let task = tokio::spawn(async move {
            // `recv` also resolves once the mount is dropped.
            select! {
                _ = tokio::time::sleep(delay) => {},
                msg = message.recv() => {
                    tracing::debug!(?msg, "tracker for `{}` unmounted before the delay", task_visit.slug);
                    return;
                }
            }

            select! {
                attended = target.attended(threshold) => {
                    if !attended {
                        tracing::debug!("`{}` went away before it was seen", task_visit.slug);
                        return;
                    }
                },
                msg = message.recv() => {
                    tracing::debug!(?msg, "tracker for `{}` unmounted while watching", task_visit.slug);
                    return;
                }
            }

            tracker.count(&task_visit).await;
        });

        TrackerMount {
            visit: Some(visit),
            tx: Some(tx),
            task: Some(task),
        }
    }

    /// Count the mounted visit right away, as if its target had just been attended.
    pub async fn track(&self, mount: &TrackerMount) -> Outcome {
        match &mount.visit {
            Some(visit) => self.count(visit).await,
            None => Outcome::Skipped,
        }
    }

    async fn count(&self, visit: &Visit) -> Outcome {
        if visit.tracked.load(Ordering::SeqCst) {
            return Outcome::Skipped;
        }

        let Some(_claim) = InFlight::claim(&self.inner.in_flight, &visit.slug) else {
            tracing::debug!("increment for `{}` already in flight, dropping", visit.slug);
            return Outcome::Skipped;
        };

        self.increment(visit).await
    }

    async fn increment(&self, visit: &Visit) -> Outcome {
        let TrackerInner {
            api,
            storage,
            bus,
            clock,
            options,
            ..
        } = self.inner.as_ref();

        // Another mount of the same movie may have been counted while this one waited.
        let eligibility = self.eligibility(&visit.slug);
        if !eligibility.is_eligible() {
            tracing::debug!(?eligibility, "view of `{}` is not counted", visit.slug);
            return Outcome::Skipped;
        }

        let reply = match api.increment(&visit.slug).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::debug!(%error, "abandoned counting a view of `{}`", visit.slug);
                return Outcome::Abandoned;
            }
        };

        let count = reply.view_count.unwrap_or_else(|| {
            let last_known = cached_count(storage.local.as_ref(), &visit.slug)
                .map_or(visit.baseline, |cached| cached.max(visit.baseline));
            last_known + 1
        });

        options.policy.mark(&visit.slug, storage, clock.now());
        cache_count(storage.local.as_ref(), &visit.slug, count);
        visit.tracked.store(true, Ordering::SeqCst);

        let listeners = bus.publish(&visit.slug, count);
        tracing::debug!(count, listeners, "counted a view of `{}`", visit.slug);

        Outcome::Counted(count)
    }
}

/// A mounted tracker. Dropping it cancels the pending delay and visibility watch.
#[derive(Debug)]
pub struct TrackerMount {
    visit: Option<Arc<Visit>>,
    tx: Option<mpsc::Sender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl TrackerMount {
    fn idle() -> Self {
        Self {
            visit: None,
            tx: None,
            task: None,
        }
    }

    /// Whether the visit was judged ineligible at mount time.
    pub fn is_idle(&self) -> bool {
        self.visit.is_none()
    }

    pub fn has_tracked(&self) -> bool {
        self.visit
            .as_ref()
            .is_some_and(|visit| visit.tracked.load(Ordering::SeqCst))
    }

    /// Wait until the background task is done, either by counting or by giving up.
    pub async fn settle(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "view tracker task failed");
            }
        }
    }

    pub async fn unmount(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Stop).await;
        }

        self.settle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::Mutex;

    use crate::time::{ManualClock, Timestamp};
    use crate::tracking::attention::VisibilityFeed;
    use crate::tracking::storage::{last_view_key, viewed_key};

    #[derive(Debug, Clone, Copy)]
    pub enum Reply {
        Count,
        Garbled,
        NotFound,
    }

    /// Counts calls and plays the server's part.
    #[derive(Debug, Clone)]
    pub struct FakeApi {
        pub calls: Arc<AtomicUsize>,
        pub count: Arc<AtomicU64>,
        pub reply: Reply,
        pub latency: Duration,
    }

    impl FakeApi {
        pub fn new(count: u64, reply: Reply) -> Self {
            Self {
                calls: Arc::default(),
                count: Arc::new(AtomicU64::new(count)),
                reply,
                latency: Duration::ZERO,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IncrementApi for FakeApi {
        async fn increment(&self, slug: &Slug) -> Result<IncrementReply, IncrementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            match self.reply {
                Reply::NotFound => NotFoundSnafu { slug: slug.clone() }.fail(),
                Reply::Count => Ok(IncrementReply {
                    view_count: Some(self.count.fetch_add(1, Ordering::SeqCst) + 1),
                }),
                Reply::Garbled => {
                    self.count.fetch_add(1, Ordering::SeqCst);
                    Ok(IncrementReply { view_count: None })
                }
            }
        }
    }

    fn slug(text: &str) -> Slug {
        text.parse().unwrap()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000).unwrap()))
    }

    fn tracker(api: FakeApi, storage: Storage, bus: ViewEventBus, policy: TrackingPolicy) -> ViewTracker<FakeApi> {
        let options = TrackingOptions {
            policy,
            ..Default::default()
        };
        ViewTracker::new(api, storage, bus, clock(), options)
    }

    fn recorder(bus: &ViewEventBus, slug: &Slug) -> Arc<Mutex<Vec<u64>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        // Left registered for the rest of the test.
        let _subscription = bus.subscribe(slug, move |count| sink.lock().unwrap().push(count));
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn counts_a_view_once_the_movie_is_seen() {
        let api = FakeApi::new(15420, Reply::Count);
        let bus = ViewEventBus::new();
        let storage = Storage::in_memory();
        let tracker = tracker(api.clone(), storage.clone(), bus.clone(), TrackingPolicy::Session);
        let seen = recorder(&bus, &slug("quantum-paradox"));

        let feed = VisibilityFeed::new();
        let mut mount = tracker.mount(slug("quantum-paradox"), 15420, AttentionTarget::observe(&feed));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(api.calls(), 0);

        feed.report(0.6);
        mount.settle().await;

        assert_eq!(api.calls(), 1);
        assert!(mount.has_tracked());
        assert_eq!(*seen.lock().unwrap(), [15421]);
        assert_eq!(storage.session.get(&viewed_key(&slug("quantum-paradox"))).as_deref(), Some("true"));
        assert_eq!(cached_count(storage.local.as_ref(), &slug("quantum-paradox")), Some(15421));
        assert!(!feed.is_watched());
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_before_the_delay_waits_for_the_delay() {
        let api = FakeApi::new(0, Reply::Count);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let feed = VisibilityFeed::new();
        feed.report(1.0);
        let _mount = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::observe(&feed));

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(api.calls(), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_at_most_once_per_session() {
        let api = FakeApi::new(15420, Reply::Count);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let mut first = tracker.mount(slug("quantum-paradox"), 15420, AttentionTarget::Unobservable);
        first.settle().await;

        let second = tracker.mount(slug("quantum-paradox"), 15420, AttentionTarget::Unobservable);
        assert!(second.is_idle());
        second.unmount().await;

        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_mounts_in_one_session_count_once() {
        let mut api = FakeApi::new(0, Reply::Count);
        api.latency = Duration::from_secs(1);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let mut first = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::Unobservable);
        let mut second = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::Unobservable);
        first.settle().await;
        second.settle().await;

        assert_eq!(api.calls(), 1);
        assert_ne!(first.has_tracked(), second.has_tracked());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_increments_release_the_slug() {
        let mut api = FakeApi::new(0, Reply::NotFound);
        api.latency = Duration::from_secs(1);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let mut mount = tracker.mount(slug("ghost-movie"), 0, AttentionTarget::Unobservable);
        mount.settle().await;
        assert_eq!(tracker.track(&mount).await, Outcome::Abandoned);
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_window_is_respected() {
        let api = FakeApi::new(0, Reply::Count);
        let clock = clock();
        let window = Duration::from_secs(30 * 60);
        let options = TrackingOptions {
            policy: TrackingPolicy::Cooldown { window },
            ..Default::default()
        };
        let storage = Storage::in_memory();
        let tracker = ViewTracker::new(api.clone(), storage.clone(), ViewEventBus::new(), clock.clone(), options);

        tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::Unobservable).settle().await;
        assert_eq!(api.calls(), 1);
        assert!(storage.local.get(&last_view_key(&slug("quantum-paradox"))).is_some());

        clock.advance(Duration::from_secs(10 * 60));
        let mount = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::Unobservable);
        assert!(mount.is_idle());
        assert_eq!(api.calls(), 1);

        clock.advance(Duration::from_secs(21 * 60));
        tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::Unobservable).settle().await;
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unmounting_before_the_delay_cancels_the_view() {
        let api = FakeApi::new(0, Reply::Count);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let feed = VisibilityFeed::new();
        feed.report(1.0);
        let mount = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::observe(&feed));
        tokio::time::sleep(Duration::from_millis(100)).await;
        mount.unmount().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls(), 0);
        assert!(!feed.is_watched());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_mount_detaches_the_watch() {
        let api = FakeApi::new(0, Reply::Count);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let feed = VisibilityFeed::new();
        let mount = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::observe(&feed));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(feed.is_watched());

        drop(mount);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!feed.is_watched());

        feed.report(1.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_movies_leave_no_trace() {
        let api = FakeApi::new(0, Reply::NotFound);
        let bus = ViewEventBus::new();
        let storage = Storage::in_memory();
        let tracker = tracker(api.clone(), storage.clone(), bus.clone(), TrackingPolicy::Session);
        let seen = recorder(&bus, &slug("ghost-movie"));

        let mut mount = tracker.mount(slug("ghost-movie"), 0, AttentionTarget::Unobservable);
        mount.settle().await;

        assert_eq!(api.calls(), 1);
        assert!(!mount.has_tracked());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(storage.session.get(&viewed_key(&slug("ghost-movie"))), None);
        assert_eq!(cached_count(storage.local.as_ref(), &slug("ghost-movie")), None);

        // A later visit gets a fresh chance.
        let mut retry = tracker.mount(slug("ghost-movie"), 0, AttentionTarget::Unobservable);
        assert!(!retry.is_idle());
        retry.settle().await;
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn garbled_replies_fall_back_to_the_last_known_count() {
        let api = FakeApi::new(15420, Reply::Garbled);
        let bus = ViewEventBus::new();
        let storage = Storage::in_memory();
        cache_count(storage.local.as_ref(), &slug("quantum-paradox"), 15430);
        let tracker = tracker(api.clone(), storage.clone(), bus.clone(), TrackingPolicy::Session);
        let seen = recorder(&bus, &slug("quantum-paradox"));

        let mut mount = tracker.mount(slug("quantum-paradox"), 15420, AttentionTarget::Unobservable);
        mount.settle().await;

        assert!(mount.has_tracked());
        assert_eq!(*seen.lock().unwrap(), [15431]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_fires_are_dropped_while_in_flight() {
        let mut api = FakeApi::new(0, Reply::Count);
        api.latency = Duration::from_secs(1);
        let tracker = tracker(api.clone(), Storage::in_memory(), ViewEventBus::new(), TrackingPolicy::Session);

        let feed = VisibilityFeed::new();
        let mount = tracker.mount(slug("quantum-paradox"), 0, AttentionTarget::observe(&feed));

        let (first, second) = tokio::join!(tracker.track(&mount), tracker.track(&mount));
        assert_eq!(api.calls(), 1);
        assert!([first, second].contains(&Outcome::Counted(1)));
        assert!([first, second].contains(&Outcome::Skipped));

        assert_eq!(tracker.track(&mount).await, Outcome::Skipped);
        assert_eq!(api.calls(), 1);
    }
}
