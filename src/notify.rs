//! Outbound notifications for memo transitions.
//!
//! Dispatch is best effort: callers log and swallow failures, nothing is
//! retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::memos::MemoStatus;
use crate::models::Memo;

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// `false` when dispatch is switched off; delivery records then stay pending.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Posts each message as JSON to a mail relay webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    from: String,
}

impl WebhookNotifier {
    /// `timeout` bounds both connecting and the whole request, so a relay
    /// that never answers turns into a failed send.
    pub fn new(url: impl Into<String>, from: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("failed to build notification client")?;
        Ok(Self {
            client,
            url: url.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let payload = json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "body": body,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("notification request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "notification relay rejected message");
            bail!("notification relay responded with status {status}");
        }
        Ok(())
    }
}

/// Used when no relay is configured.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        debug!(%to, %subject, "notification dispatch disabled; message dropped");
        Ok(())
    }
}

pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    Ok(match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            config.notify_from.clone(),
            config.notify_timeout,
        )?),
        None => Arc::new(DisabledNotifier),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Approver,
    Author,
    Recipients,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionNotice {
    pub audience: Audience,
    pub subject: String,
    pub body: String,
}

/// Chooses who hears about a status change and what they are told.
///
/// `memo` is the row as written by the transition.
pub fn transition_notice(
    previous: MemoStatus,
    current: MemoStatus,
    memo: &Memo,
) -> Option<TransitionNotice> {
    use MemoStatus::*;

    let number = memo.correlative_number.as_deref().unwrap_or("(unnumbered)");
    let subject = memo.subject.trim();

    let (audience, title, body) = match (previous, current) {
        (Draft | ModificationRequested, PendingApproval) => (
            Audience::Approver,
            format!("Memo {number} awaiting your approval"),
            format!("The memo \"{subject}\" has been submitted for your approval."),
        ),
        (PendingApproval, Approved) => (
            Audience::Author,
            format!("Memo {number} approved"),
            format!("Your memo \"{subject}\" was approved and is being distributed."),
        ),
        (PendingApproval, Rejected) => {
            let reason = memo
                .rejection_reason
                .as_deref()
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .unwrap_or("no reason given");
            (
                Audience::Author,
                format!("Memo {number} rejected"),
                format!("Your memo \"{subject}\" was rejected.\n\nReason: {reason}"),
            )
        }
        (PendingApproval, ModificationRequested) => (
            Audience::Author,
            format!("Changes requested on memo {number}"),
            format!(
                "Your memo \"{subject}\" needs changes before approval.\n\nComments: {}",
                memo.modification_comments.as_deref().unwrap_or_default()
            ),
        ),
        (Approved, Distributed) => {
            let body = if memo.confidential {
                format!("You have received the confidential memo {number}. Sign in to read it.")
            } else {
                format!("{subject}\n\n{}", memo.body.trim())
            };
            (Audience::Recipients, format!("New memo {number}: {subject}"), body)
        }
        _ => return None,
    };

    Some(TransitionNotice {
        audience,
        subject: title,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memos::policy::tests::sample_memo;
    use uuid::Uuid;

    #[test]
    fn submission_goes_to_the_approver() {
        let mut memo = sample_memo(Uuid::new_v4(), Some(Uuid::new_v4()), MemoStatus::PendingApproval);
        memo.correlative_number = Some("FIN-2024-03-0001".to_string());
        for previous in [MemoStatus::Draft, MemoStatus::ModificationRequested] {
            let notice = transition_notice(previous, MemoStatus::PendingApproval, &memo).unwrap();
            assert_eq!(notice.audience, Audience::Approver);
            assert!(notice.subject.contains("FIN-2024-03-0001"));
        }
    }

    #[test]
    fn decisions_go_back_to_the_author() {
        let mut memo = sample_memo(Uuid::new_v4(), Some(Uuid::new_v4()), MemoStatus::Rejected);
        memo.rejection_reason = Some("  ".to_string());
        let rejected =
            transition_notice(MemoStatus::PendingApproval, MemoStatus::Rejected, &memo).unwrap();
        assert_eq!(rejected.audience, Audience::Author);
        assert!(rejected.body.contains("no reason given"));

        memo.modification_comments = Some("Add the Q3 totals".to_string());
        let returned = transition_notice(
            MemoStatus::PendingApproval,
            MemoStatus::ModificationRequested,
            &memo,
        )
        .unwrap();
        assert_eq!(returned.audience, Audience::Author);
        assert!(returned.body.contains("Add the Q3 totals"));

        let approved =
            transition_notice(MemoStatus::PendingApproval, MemoStatus::Approved, &memo).unwrap();
        assert_eq!(approved.audience, Audience::Author);
    }

    #[test]
    fn confidential_distribution_withholds_the_body() {
        let mut memo = sample_memo(Uuid::new_v4(), None, MemoStatus::Distributed);
        let open = transition_notice(MemoStatus::Approved, MemoStatus::Distributed, &memo).unwrap();
        assert_eq!(open.audience, Audience::Recipients);
        assert!(open.body.contains("attached budget"));

        memo.confidential = true;
        let sealed =
            transition_notice(MemoStatus::Approved, MemoStatus::Distributed, &memo).unwrap();
        assert!(!sealed.body.contains("attached budget"));
    }

    #[test]
    fn unrelated_changes_are_silent() {
        let memo = sample_memo(Uuid::new_v4(), None, MemoStatus::Draft);
        assert!(transition_notice(MemoStatus::Draft, MemoStatus::Draft, &memo).is_none());
        assert!(
            transition_notice(MemoStatus::Rejected, MemoStatus::PendingApproval, &memo).is_none()
        );
    }

    #[tokio::test]
    async fn disabled_notifier_accepts_and_reports_disabled() {
        let notifier = DisabledNotifier;
        assert!(!notifier.is_enabled());
        assert!(notifier.send("a@example.com", "s", "b").await.is_ok());
    }

    #[tokio::test]
    async fn silent_relay_fails_within_the_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accepting = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = WebhookNotifier::new(
            format!("http://{addr}/relay"),
            "memos@example.test",
            Duration::from_millis(300),
        )
        .unwrap();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            notifier.send("a@example.com", "subject", "body"),
        )
        .await
        .expect("send did not return within the bound");
        assert!(outcome.is_err());
    }
}
