use async_trait::async_trait;
use mocks::FakeGalleryApi;
use poll::{
    bind_scheduler, ChannelNotifier, LogNotifier, NetworkProbe, PeriodicPollScheduler, PollConstraints,
    PollOutcome, PollScheduler, PollTaskError, Poller,
};
use prefs::PreferencesStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

fn poller(store: &Arc<PreferencesStore>, api: &Arc<FakeGalleryApi>) -> Arc<Poller> {
    Arc::new(Poller::new(store.clone(), api.clone(), Arc::new(LogNotifier)))
}

async fn next_report(rx: &mut mpsc::UnboundedReceiver<PollOutcome>) -> PollOutcome {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for poll report")
        .expect("report channel closed")
}

#[tokio::test]
async fn register_polls_immediately_and_keeps_existing() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    store.set_stored_query("cats".into()).await.unwrap();
    let api = Arc::new(FakeGalleryApi::new());
    api.respond("cats", &["c1"]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = PeriodicPollScheduler::new(poller(&store, &api), Duration::from_secs(3600))
        .with_reports(tx);

    assert!(scheduler.register_periodic());
    assert!(!scheduler.register_periodic());
    assert!(scheduler.is_registered());

    assert_eq!(next_report(&mut rx).await, PollOutcome::NewResult("c1".into()));
    sleep(Duration::from_millis(50)).await;
    // A second registration would have produced another immediate poll.
    assert!(rx.try_recv().is_err());
    assert_eq!(api.call_count(), 1);

    assert!(scheduler.cancel());
}

#[tokio::test]
async fn cancel_stops_future_polls() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    store.set_stored_query("cats".into()).await.unwrap();
    let api = Arc::new(FakeGalleryApi::new());
    api.respond("cats", &["c1"]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = PeriodicPollScheduler::new(poller(&store, &api), Duration::from_millis(10))
        .with_reports(tx);

    assert!(scheduler.register_periodic());
    next_report(&mut rx).await;
    next_report(&mut rx).await;

    assert!(scheduler.cancel());
    assert!(!scheduler.cancel());
    sleep(Duration::from_millis(50)).await;
    while rx.try_recv().is_ok() {}
    let calls = api.call_count();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(api.call_count(), calls);
    assert!(!scheduler.is_registered());
}

#[tokio::test]
async fn failures_back_off_and_report_last_success() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    store.set_stored_query("dogs".into()).await.unwrap();
    let api = Arc::new(FakeGalleryApi::new());
    api.fail("dogs");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let scheduler = PeriodicPollScheduler::new(poller(&store, &api), Duration::from_secs(3600))
        .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
        .with_reports(tx)
        .with_errors(err_tx);

    scheduler.register_periodic();
    assert!(matches!(next_report(&mut rx).await, PollOutcome::Failed(_)));
    assert!(matches!(next_report(&mut rx).await, PollOutcome::Failed(_)));

    let err = timeout(Duration::from_secs(5), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let PollTaskError::PeriodicPollFailed(detail) = err;
    assert!(detail.contains("last_success: never"));

    // Recovery resets to the regular interval.
    api.respond("dogs", &["d1"]);
    loop {
        if next_report(&mut rx).await == PollOutcome::NewResult("d1".into()) {
            break;
        }
    }
    scheduler.cancel();
}

fn announcing_poller(
    store: &Arc<PreferencesStore>,
    api: &Arc<FakeGalleryApi>,
) -> (Arc<Poller>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let poller = Poller::new(store.clone(), api.clone(), Arc::new(ChannelNotifier::new(tx)));
    (Arc::new(poller), rx)
}

#[tokio::test]
async fn cancel_lets_running_poll_finish() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    store.set_stored_query("mountains".into()).await.unwrap();
    let api = Arc::new(FakeGalleryApi::new());
    api.respond("mountains", &["42"]);
    let gate = api.hold("mountains");
    let (poller, mut announced) = announcing_poller(&store, &api);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = PeriodicPollScheduler::new(poller, Duration::from_secs(3600)).with_reports(tx);

    scheduler.register_periodic();
    wait_until(|| api.call_count() == 1).await;
    assert!(scheduler.cancel());
    gate.release();

    assert_eq!(next_report(&mut rx).await, PollOutcome::NewResult("42".into()));
    assert_eq!(announced.recv().await.as_deref(), Some("42"));
    assert_eq!(store.read_last_result_id().await.unwrap(), "42");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(api.call_count(), 1);
    assert!(announced.try_recv().is_err());
}

#[tokio::test]
async fn reregister_during_running_poll_announces_once() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    store.set_stored_query("mountains".into()).await.unwrap();
    let api = Arc::new(FakeGalleryApi::new());
    api.respond("mountains", &["42"]);
    let gate = api.hold("mountains");
    let (poller, mut announced) = announcing_poller(&store, &api);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = PeriodicPollScheduler::new(poller, Duration::from_secs(3600)).with_reports(tx);

    scheduler.register_periodic();
    wait_until(|| api.call_count() == 1).await;
    assert!(scheduler.cancel());
    assert!(scheduler.register_periodic());

    // The new loop's first poll waits for the one still running.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(api.call_count(), 1);

    gate.release();
    assert_eq!(next_report(&mut rx).await, PollOutcome::NewResult("42".into()));
    wait_until(|| api.call_count() == 2).await;
    gate.release();
    assert_eq!(next_report(&mut rx).await, PollOutcome::Unchanged);

    assert_eq!(announced.recv().await.as_deref(), Some("42"));
    assert!(announced.try_recv().is_err());
    assert_eq!(store.last_result_id(), "42");
    scheduler.cancel();
}

struct ToggleProbe {
    online: AtomicBool,
    checks: AtomicUsize,
}

#[async_trait]
impl NetworkProbe for ToggleProbe {
    async fn is_available(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn unmet_network_constraint_defers_poll() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    store.set_stored_query("cats".into()).await.unwrap();
    let api = Arc::new(FakeGalleryApi::new());
    api.respond("cats", &["c1"]);
    let probe = Arc::new(ToggleProbe {
        online: AtomicBool::new(false),
        checks: AtomicUsize::new(0),
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = PeriodicPollScheduler::new(poller(&store, &api), Duration::from_millis(10))
        .with_constraints(PollConstraints { require_network: true }, probe.clone())
        .with_reports(tx);

    scheduler.register_periodic();
    sleep(Duration::from_millis(60)).await;
    assert_eq!(api.call_count(), 0);
    assert!(probe.checks.load(Ordering::SeqCst) >= 2);

    probe.online.store(true, Ordering::SeqCst);
    assert_eq!(next_report(&mut rx).await, PollOutcome::NewResult("c1".into()));
    scheduler.cancel();
}

#[derive(Default)]
struct CountingScheduler {
    registered: AtomicBool,
    registers: AtomicUsize,
    cancels: AtomicUsize,
}

impl PollScheduler for CountingScheduler {
    fn register_periodic(&self) -> bool {
        self.registers.fetch_add(1, Ordering::SeqCst);
        !self.registered.swap(true, Ordering::SeqCst)
    }

    fn cancel(&self) -> bool {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.registered.swap(false, Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn binding_follows_polling_flag() {
    let store = Arc::new(PreferencesStore::in_memory().unwrap());
    let scheduler = Arc::new(CountingScheduler::default());
    let task = bind_scheduler(&store, scheduler.clone());

    // Initial `false` cancels (a no-op).
    wait_until(|| scheduler.cancels.load(Ordering::SeqCst) == 1).await;

    store.set_polling_enabled(true).await.unwrap();
    wait_until(|| scheduler.is_registered()).await;
    store.set_polling_enabled(true).await.unwrap();

    store.set_polling_enabled(false).await.unwrap();
    wait_until(|| !scheduler.is_registered()).await;
    assert_eq!(scheduler.registers.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.cancels.load(Ordering::SeqCst), 2);

    task.abort();
}
