//! Periodic check-and-update loop.
//!
//! One background task owns every mutable piece of updater state: the
//! version store, the cycle phase, and the outstanding prompt, if any.
//! Everything else talks to it through channels, so at most one update
//! cycle is ever in flight and no lock guards the live binary path beyond
//! the installer's atomic rename.
//!
//! The loop wakes on a channel-dependent timer tick, on an explicit
//! check-now request, or on the answer to an open consent prompt. A full
//! cycle runs query → compare → consent → fetch → install → commit; every
//! failure ends the cycle, lands in the published status, and is retried
//! on a later wake rather than in-process.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::component;
use crate::config::UpdaterConfig;
use crate::consent::{self, ConsentDecision, PromptResponse, UpdatePrompt};
use crate::error::{Result, UpdateError};
use crate::fetch;
use crate::install;
use crate::paths::InstallLayout;
use crate::progress::ProgressCallback;
use crate::source::{self, ReleaseDescriptor, ReleaseIndex};
use crate::status::{self, CyclePhase, StatusReporter, StatusSnapshot};
use crate::store::VersionStore;
use crate::version::VersionRecord;

/// Cloneable control surface for a running [`UpdateScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    check_now_tx: mpsc::Sender<()>,
    status: StatusReporter,
}

impl SchedulerHandle {
    /// Request an immediate update check.
    ///
    /// Requests arriving while a cycle is already running are coalesced
    /// into at most one queued follow-up check. Returns `false` once the
    /// scheduler has shut down.
    pub fn check_now(&self) -> bool {
        match self.check_now_tx.try_send(()) {
            // Full means a check is already queued, which is what the
            // caller asked for.
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Status observer for this scheduler.
    #[must_use]
    pub fn status(&self) -> StatusReporter {
        self.status.clone()
    }
}

/// A consent prompt the scheduler is waiting on.
struct PendingPrompt {
    descriptor: ReleaseDescriptor,
    response_rx: oneshot::Receiver<PromptResponse>,
    deadline: Instant,
}

/// What woke the scheduler loop.
enum Wake {
    Shutdown,
    Cycle(&'static str),
    Prompt(PromptOutcome),
    Nothing,
}

/// How an open consent prompt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptOutcome {
    /// The frontend delivered an explicit verdict.
    Answered(PromptResponse),
    /// The responder was dropped without a verdict.
    Dropped,
    /// The consent window expired.
    TimedOut,
}

/// Background update manager. Construct with [`UpdateScheduler::new`],
/// then spawn [`UpdateScheduler::run`]:
///
/// ```rust,ignore
/// let (scheduler, handle, mut prompts) = UpdateScheduler::new(config, layout, index, cancel);
/// tokio::spawn(scheduler.run());
/// ```
pub struct UpdateScheduler {
    config: UpdaterConfig,
    layout: InstallLayout,
    index: Arc<dyn ReleaseIndex>,
    store: VersionStore,
    cancel: CancellationToken,
    check_now_rx: mpsc::Receiver<()>,
    prompt_tx: mpsc::Sender<UpdatePrompt>,
    status_tx: tokio::sync::watch::Sender<StatusSnapshot>,
    progress: Option<Arc<ProgressCallback>>,
    pending: Option<PendingPrompt>,
    phase: CyclePhase,
    last_error: Option<String>,
}

impl UpdateScheduler {
    /// Build a scheduler, its control handle, and the prompt stream.
    ///
    /// Loads the version store from `layout.state_file`; an unreadable
    /// store is surfaced as the initial `last_error` and treated as
    /// "installed version unknown", which forces a fresh install candidate
    /// and disables rollback until the next successful install.
    pub fn new(
        config: UpdaterConfig,
        layout: InstallLayout,
        index: Arc<dyn ReleaseIndex>,
        cancel: CancellationToken,
    ) -> (Self, SchedulerHandle, mpsc::Receiver<UpdatePrompt>) {
        let (store, load_error) = match VersionStore::load(&layout.state_file) {
            Ok(store) => (store, None),
            Err(e) => {
                warn!(error = %e, "version store unreadable; treating installed version as unknown");
                (VersionStore::recover(&layout.state_file), Some(e.to_string()))
            }
        };

        let (check_now_tx, check_now_rx) = mpsc::channel(1);
        // At most one *answerable* prompt exists at a time; the second slot
        // leaves room for a timed-out prompt the frontend has not drained
        // yet, so a stale offer never blocks the next one.
        let (prompt_tx, prompt_rx) = mpsc::channel(2);

        let initial = StatusSnapshot {
            current: store.current().cloned(),
            channel: config.channel,
            phase: CyclePhase::Idle,
            last_checked_at: store.last_checked_at(),
            last_error: load_error.clone(),
            pending_prompt: None,
            server_path_override: config.server_path.clone(),
        };
        let (status_tx, status) = status::channel(initial);

        let scheduler = Self {
            config,
            layout,
            index,
            store,
            cancel,
            check_now_rx,
            prompt_tx,
            status_tx,
            progress: None,
            pending: None,
            phase: CyclePhase::Idle,
            last_error: load_error,
        };
        let handle = SchedulerHandle {
            check_now_tx,
            status,
        };
        (scheduler, handle, prompt_rx)
    }

    /// Attach a download progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Run the scheduler until the cancellation token fires.
    ///
    /// An enabled timer ticks once immediately, so starting the scheduler
    /// also performs the startup check.
    pub async fn run(mut self) {
        self.ensure_component().await;
        self.publish();

        let mut timer = self.config.check_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            // No catch-up bursts after the host machine wakes from sleep.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        match self.config.check_interval() {
            Some(period) => info!(
                channel = %self.config.channel,
                interval_secs = period.as_secs(),
                "update scheduler started"
            ),
            None => info!(
                channel = %self.config.channel,
                "update scheduler started; periodic checks disabled"
            ),
        }

        let mut check_now_open = true;
        loop {
            let wake = tokio::select! {
                () = self.cancel.cancelled() => Wake::Shutdown,
                () = Self::tick(&mut timer) => Wake::Cycle("timer"),
                received = self.check_now_rx.recv(), if check_now_open => match received {
                    Some(()) => Wake::Cycle("check-now"),
                    None => {
                        // All handles dropped; the timer keeps the loop alive.
                        check_now_open = false;
                        Wake::Nothing
                    }
                },
                response = Self::await_prompt(&mut self.pending) => Wake::Prompt(response),
            };
            match wake {
                Wake::Shutdown => {
                    info!("update scheduler stopped");
                    break;
                }
                Wake::Cycle(reason) => self.run_cycle(reason).await,
                Wake::Prompt(response) => self.finish_prompt(response).await,
                Wake::Nothing => {}
            }
        }
    }

    /// One startup pass over the external `quillup` component. Failure
    /// degrades analysis (no stdlib sources) but never blocks updates.
    async fn ensure_component(&mut self) {
        let component = self.config.component.clone();
        match tokio::task::spawn_blocking(move || component::ensure_stdlib_component(&component))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "stdlib component provisioning failed");
                self.last_error = Some(e.to_string());
            }
            Err(e) => warn!(error = %e, "component provisioning task panicked"),
        }
    }

    async fn tick(timer: &mut Option<tokio::time::Interval>) {
        match timer.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Resolve the open prompt: a frontend verdict, a dropped responder,
    /// or a lapsed consent window.
    async fn await_prompt(pending: &mut Option<PendingPrompt>) -> PromptOutcome {
        match pending.as_mut() {
            None => std::future::pending().await,
            Some(prompt) => tokio::select! {
                response = &mut prompt.response_rx => match response {
                    Ok(verdict) => PromptOutcome::Answered(verdict),
                    Err(_) => PromptOutcome::Dropped,
                },
                () = tokio::time::sleep_until(prompt.deadline) => PromptOutcome::TimedOut,
            },
        }
    }

    /// Run one check cycle. While a prompt is outstanding this is a
    /// re-check only: the index is queried and `last_checked_at` refreshed,
    /// but no second prompt or install can start.
    async fn run_cycle(&mut self, reason: &'static str) {
        if let Some(path) = &self.config.server_path {
            debug!(
                path = %path.display(),
                "server path overridden by configuration; skipping update cycle"
            );
            return;
        }

        debug!(reason, channel = %self.config.channel, "starting update cycle");
        if self.pending.is_none() {
            self.set_phase(CyclePhase::Checking);
        }
        let result = self.check_cycle().await;
        self.record_outcome(result);
        let next = if self.pending.is_some() {
            CyclePhase::AwaitingConsent
        } else {
            CyclePhase::Idle
        };
        self.set_phase(next);
    }

    async fn check_cycle(&mut self) -> Result<()> {
        let channel = self.config.channel;
        let platform_key = source::platform_key().ok_or_else(|| {
            UpdateError::NoReleaseForPlatform(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
        })?;

        let descriptor = self.query_index(channel, platform_key).await?;
        if let Err(e) = self.store.mark_checked(channel) {
            warn!(error = %e, "cannot persist last-checked timestamp");
        }
        if descriptor.channel != channel {
            return Err(UpdateError::Scheduler(format!(
                "index returned a {} release for a {channel} query",
                descriptor.channel
            )));
        }

        if !descriptor.supersedes(self.store.current()) {
            debug!(version = %descriptor.version, "installed binary is current");
            return Ok(());
        }

        let dismissed = self.store.dismissed().cloned();
        if let Some(dismissed) = dismissed {
            if descriptor.version == dismissed {
                debug!(
                    version = %descriptor.version,
                    "release was dismissed by the user; not offering it again"
                );
                return Ok(());
            }
            // A different release supersedes the dismissal.
            if let Err(e) = self.store.clear_dismissed() {
                warn!(error = %e, "cannot clear dismissed release");
            }
        }

        match consent::decide(self.config.ask_before_download, self.pending.is_some()) {
            ConsentDecision::Defer => {
                debug!("prompt already outstanding; deferring newly discovered release");
                Ok(())
            }
            ConsentDecision::AskUser => {
                self.open_prompt(descriptor);
                Ok(())
            }
            ConsentDecision::Proceed => {
                self.set_phase(CyclePhase::Installing);
                self.download_and_install(descriptor).await
            }
        }
    }

    /// Query the release index off the async runtime; returns early with
    /// `Cancelled` on shutdown while the blocking call winds down alone.
    async fn query_index(
        &self,
        channel: Channel,
        platform_key: &'static str,
    ) -> Result<ReleaseDescriptor> {
        let index = Arc::clone(&self.index);
        let task = tokio::task::spawn_blocking(move || index.latest(channel, platform_key));
        tokio::select! {
            joined = task => joined
                .map_err(|e| UpdateError::Scheduler(format!("index query panicked: {e}")))?,
            () = self.cancel.cancelled() => Err(UpdateError::Cancelled),
        }
    }

    fn open_prompt(&mut self, descriptor: ReleaseDescriptor) {
        let (tx, rx) = oneshot::channel();
        let prompt = UpdatePrompt::new(
            descriptor.version.clone(),
            descriptor.channel,
            descriptor.size,
            tx,
        );
        match self.prompt_tx.try_send(prompt) {
            Ok(()) => {
                info!(version = %descriptor.version, "update available; asking the user");
                self.pending = Some(PendingPrompt {
                    descriptor,
                    response_rx: rx,
                    deadline: Instant::now() + self.config.consent_timeout(),
                });
            }
            Err(e) => {
                // Nobody is listening for prompts; the next cycle will
                // rediscover the release.
                warn!(error = %e, "cannot deliver update prompt");
            }
        }
    }

    /// Close out the outstanding prompt. Only an explicit decline is
    /// persisted as a dismissal; an unanswered prompt (timeout or dropped
    /// responder) just returns to idle, so the next cycle re-offers the
    /// release.
    async fn finish_prompt(&mut self, outcome: PromptOutcome) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match outcome {
            PromptOutcome::Answered(PromptResponse::Declined) => {
                info!(version = %pending.descriptor.version, "update declined");
                if let Err(e) = self.store.dismiss(pending.descriptor.version.clone()) {
                    warn!(error = %e, "cannot record dismissed release");
                }
                self.set_phase(CyclePhase::Idle);
            }
            PromptOutcome::Answered(PromptResponse::Confirmed) => {
                self.set_phase(CyclePhase::Installing);
                let result = self.download_and_install(pending.descriptor).await;
                self.record_outcome(result);
                self.set_phase(CyclePhase::Idle);
            }
            PromptOutcome::TimedOut => {
                debug!(
                    version = %pending.descriptor.version,
                    "consent window lapsed without a response; deferring to the next cycle"
                );
                self.set_phase(CyclePhase::Idle);
            }
            PromptOutcome::Dropped => {
                debug!(
                    version = %pending.descriptor.version,
                    "prompt dropped unanswered; deferring to the next cycle"
                );
                self.set_phase(CyclePhase::Idle);
            }
        }
    }

    /// Fetch, verify, swap, and commit one release. The store commit is
    /// the last step; if it fails the swap is undone so the record and the
    /// binary never diverge at cycle end.
    async fn download_and_install(&mut self, descriptor: ReleaseDescriptor) -> Result<()> {
        let record = VersionRecord::installed_now(descriptor.version.clone(), descriptor.channel);
        let allow_rollback = self.store.current().is_some();
        let layout = self.layout.clone();
        let staging_root = self.layout.staging_dir.clone();
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let artifact =
                fetch::fetch_artifact(&descriptor, &staging_root, &cancel, progress.as_deref())?;
            install::install(artifact, &layout, allow_rollback)
        })
        .await
        .map_err(|e| UpdateError::Scheduler(format!("install task panicked: {e}")))??;

        if let Err(e) = self.store.commit(record) {
            if let Err(undo) = install::rollback_swap(&self.layout) {
                warn!(error = %undo, "cannot roll back after failed version-record commit");
            }
            return Err(e);
        }
        if !self.config.keep_previous {
            install::discard_previous(&self.layout);
        }
        Ok(())
    }

    fn record_outcome(&mut self, result: Result<()>) {
        match result {
            Ok(()) => self.last_error = None,
            Err(UpdateError::Cancelled) => debug!("update cycle interrupted by shutdown"),
            Err(e) => {
                warn!(error = %e, "update cycle failed");
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn set_phase(&mut self, phase: CyclePhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "scheduler phase transition");
            self.phase = phase;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(StatusSnapshot {
            current: self.store.current().cloned(),
            channel: self.config.channel,
            phase: self.phase,
            last_checked_at: self.store.last_checked_at(),
            last_error: self.last_error.clone(),
            pending_prompt: self.pending.as_ref().map(|p| p.descriptor.version.clone()),
            server_path_override: self.config.server_path.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::ComponentConfig;
    use crate::version::VersionId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingIndex {
        calls: Arc<AtomicUsize>,
    }

    impl ReleaseIndex for CountingIndex {
        fn latest(&self, _channel: Channel, _platform_key: &str) -> Result<ReleaseDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(UpdateError::SourceUnreachable("test index".to_owned()))
        }
    }

    fn test_config() -> UpdaterConfig {
        UpdaterConfig {
            check_interval_override_secs: Some(0),
            component: ComponentConfig {
                ensure_stdlib: false,
                quillup_path: None,
            },
            ..Default::default()
        }
    }

    fn build_scheduler(
        config: UpdaterConfig,
    ) -> (
        tempfile::TempDir,
        Arc<AtomicUsize>,
        UpdateScheduler,
        SchedulerHandle,
        mpsc::Receiver<UpdatePrompt>,
    ) {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::under_root(root.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let index = Arc::new(CountingIndex {
            calls: Arc::clone(&calls),
        });
        let (scheduler, handle, prompts) =
            UpdateScheduler::new(config, layout, index, CancellationToken::new());
        (root, calls, scheduler, handle, prompts)
    }

    fn descriptor(version: &str, channel: Channel) -> ReleaseDescriptor {
        ReleaseDescriptor {
            version: version.parse::<VersionId>().unwrap(),
            channel,
            platform_key: "x86_64-unknown-linux-gnu".to_owned(),
            download_url: "https://example.invalid/artifact.gz".to_owned(),
            checksum: "0".repeat(64),
            size: None,
        }
    }

    #[tokio::test]
    async fn check_now_coalesces_and_reports_shutdown() {
        let (_root, _calls, scheduler, handle, _prompts) = build_scheduler(test_config());

        // Not running yet: the first request queues, the second coalesces.
        assert!(handle.check_now());
        assert!(handle.check_now());

        drop(scheduler);
        assert!(!handle.check_now());
    }

    #[tokio::test]
    async fn await_prompt_reports_timeout_distinctly() {
        let (_tx, rx) = oneshot::channel();
        let mut pending = Some(PendingPrompt {
            descriptor: descriptor("1.3.0", Channel::Stable),
            response_rx: rx,
            deadline: Instant::now() + Duration::from_millis(50),
        });
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            UpdateScheduler::await_prompt(&mut pending),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PromptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn await_prompt_reports_dropped_responder() {
        let (tx, rx) = oneshot::channel::<PromptResponse>();
        let mut pending = Some(PendingPrompt {
            descriptor: descriptor("1.3.0", Channel::Stable),
            response_rx: rx,
            deadline: Instant::now() + Duration::from_secs(60),
        });
        drop(tx);
        let outcome = UpdateScheduler::await_prompt(&mut pending).await;
        assert_eq!(outcome, PromptOutcome::Dropped);
    }

    #[tokio::test]
    async fn await_prompt_delivers_confirmation() {
        let (tx, rx) = oneshot::channel();
        let mut pending = Some(PendingPrompt {
            descriptor: descriptor("1.3.0", Channel::Stable),
            response_rx: rx,
            deadline: Instant::now() + Duration::from_secs(60),
        });
        tx.send(PromptResponse::Confirmed).unwrap();
        let outcome = UpdateScheduler::await_prompt(&mut pending).await;
        assert_eq!(outcome, PromptOutcome::Answered(PromptResponse::Confirmed));
    }

    #[tokio::test]
    async fn scheduler_stops_on_cancel() {
        let (_root, _calls, scheduler, _handle, _prompts) = build_scheduler(test_config());
        let cancel = scheduler.cancel.clone();

        let task = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok(), "scheduler task should finish after cancel");
    }

    #[tokio::test]
    async fn server_path_override_skips_cycles() {
        let mut config = test_config();
        config.server_path = Some(std::path::PathBuf::from("/opt/quill/bin/quill-analyzer"));
        let (_root, calls, scheduler, handle, _prompts) = build_scheduler(config);
        let cancel = scheduler.cancel.clone();

        let task = tokio::spawn(scheduler.run());
        assert!(handle.check_now());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let snapshot = handle.status().snapshot();
        assert_eq!(snapshot.phase, CyclePhase::Idle);
        assert!(snapshot.last_checked_at.is_none());
        assert!(snapshot.server_path_override.is_some());

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }

    #[tokio::test]
    async fn failed_check_lands_in_last_error_and_returns_to_idle() {
        let (_root, calls, scheduler, handle, _prompts) = build_scheduler(test_config());
        let cancel = scheduler.cancel.clone();
        let mut status = handle.status();

        let task = tokio::spawn(scheduler.run());
        assert!(handle.check_now());

        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = status.changed().await.expect("scheduler ended early");
                if snapshot.phase == CyclePhase::Idle && snapshot.last_error.is_some() {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 1);
        let error = snapshot.last_error.unwrap();
        assert!(error.contains("release source unreachable"), "error: {error}");
        assert!(snapshot.current.is_none());

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }
}
