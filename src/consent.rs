//! Consent mediation between the scheduler and whatever frontend hosts it.
//!
//! With `ask_before_download` set, a discovered update is not fetched until
//! the user confirms. The scheduler hands the frontend an [`UpdatePrompt`];
//! the frontend answers through the embedded oneshot. Dropping the prompt,
//! or letting the consent window lapse, abandons the offer for this cycle;
//! only an explicit decline suppresses the release from future cycles.

use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::version::VersionId;

/// What the scheduler does with a discovered update candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    /// Fetch and install without asking.
    Proceed,
    /// Surface a prompt and wait for the verdict.
    AskUser,
    /// Do nothing this cycle; an earlier prompt is still unanswered.
    Defer,
}

/// Decide how to treat a new candidate under the current config.
///
/// `Defer` is returned only while a previous prompt is outstanding, so the
/// user is never shown two prompts at once.
#[must_use]
pub fn decide(ask_before_download: bool, prompt_outstanding: bool) -> ConsentDecision {
    if prompt_outstanding {
        ConsentDecision::Defer
    } else if ask_before_download {
        ConsentDecision::AskUser
    } else {
        ConsentDecision::Proceed
    }
}

/// Frontend verdict on an update prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// Download and install the offered version.
    Confirmed,
    /// Skip the offered version.
    Declined,
}

/// A request for the user to confirm or decline downloading an update.
///
/// The frontend calls `confirm()` or `decline()`. Dropping the prompt
/// unanswered closes the channel; the scheduler then withdraws the offer
/// and re-offers the release on the next cycle.
#[derive(Debug)]
pub struct UpdatePrompt {
    /// Version waiting to be installed.
    pub version: VersionId,
    /// Channel the version was found on.
    pub channel: Channel,
    /// Download size in bytes, when the release index reported one.
    pub size: Option<u64>,
    respond_to: oneshot::Sender<PromptResponse>,
}

impl UpdatePrompt {
    pub(crate) fn new(
        version: VersionId,
        channel: Channel,
        size: Option<u64>,
        respond_to: oneshot::Sender<PromptResponse>,
    ) -> Self {
        Self {
            version,
            channel,
            size,
            respond_to,
        }
    }

    /// Approve the download.
    ///
    /// Returns `true` if the verdict was delivered to the waiting scheduler.
    pub fn confirm(self) -> bool {
        self.respond_to.send(PromptResponse::Confirmed).is_ok()
    }

    /// Decline the download.
    pub fn decline(self) -> bool {
        self.respond_to.send(PromptResponse::Declined).is_ok()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn prompt() -> (UpdatePrompt, oneshot::Receiver<PromptResponse>) {
        let (tx, rx) = oneshot::channel();
        let version = "1.4.0".parse::<VersionId>().unwrap();
        (
            UpdatePrompt::new(version, Channel::Stable, Some(9_000_000), tx),
            rx,
        )
    }

    #[test]
    fn proceeds_without_asking_when_consent_not_required() {
        assert_eq!(decide(false, false), ConsentDecision::Proceed);
    }

    #[test]
    fn asks_when_consent_required() {
        assert_eq!(decide(true, false), ConsentDecision::AskUser);
    }

    #[test]
    fn defers_while_a_prompt_is_outstanding() {
        assert_eq!(decide(true, true), ConsentDecision::Defer);
        assert_eq!(decide(false, true), ConsentDecision::Defer);
    }

    #[test]
    fn confirm_delivers_verdict() {
        let (prompt, mut rx) = prompt();
        assert!(prompt.confirm());
        assert_eq!(rx.try_recv().unwrap(), PromptResponse::Confirmed);
    }

    #[test]
    fn decline_delivers_verdict() {
        let (prompt, mut rx) = prompt();
        assert!(prompt.decline());
        assert_eq!(rx.try_recv().unwrap(), PromptResponse::Declined);
    }

    #[test]
    fn dropped_prompt_closes_the_channel() {
        let (prompt, mut rx) = prompt();
        drop(prompt);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn responding_after_scheduler_gave_up_reports_failure() {
        let (prompt, rx) = prompt();
        drop(rx);
        assert!(!prompt.confirm());
    }
}
