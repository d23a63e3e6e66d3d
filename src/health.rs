use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::KubeApi;
use crate::error::{Error, Result};
use crate::informer::next_id;

/// Progress of one readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSignal {
    pub id: u64,
    pub context_name: String,
    pub checking: bool,
    pub reachable: bool,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Probes `/readyz` of one context, first right away then on every interval.
///
/// Every check is announced with `checking` set, carrying the previous
/// outcome, then settles with its own.
pub struct ContextHealthChecker {
    id: u64,
    context_name: String,
    client: Arc<dyn KubeApi>,
    timeout: Duration,
    interval: Duration,
    token: CancellationToken,
}

impl ContextHealthChecker {
    pub fn new(
        context_name: impl Into<String>,
        client: Arc<dyn KubeApi>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            id: next_id(),
            context_name: context_name.into(),
            client,
            timeout,
            interval,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start(&self, signals: mpsc::UnboundedSender<HealthSignal>) {
        let id = self.id;
        let context_name = self.context_name.clone();
        let client = Arc::clone(&self.client);
        let (timeout, interval) = (self.timeout, self.interval);
        let token = self.token.clone();

        log::info!("health: checking context {context_name} every {interval:?}");
        tokio::spawn(async move {
            let signal = |checking: bool, reachable: bool, error_message: Option<String>| HealthSignal {
                id,
                context_name: context_name.clone(),
                checking,
                reachable,
                error_message,
                checked_at: Utc::now(),
            };

            let mut reachable = false;
            let mut last_error = None;
            loop {
                if token.is_cancelled() || signals.send(signal(true, reachable, last_error.clone())).is_err() {
                    return;
                }
                let outcome = tokio::select! {
                    _ = token.cancelled() => return,
                    outcome = probe(client.as_ref(), timeout) => outcome,
                };
                let error_message = match &outcome {
                    Ok(()) => None,
                    Err(e) => {
                        log::debug!("health: context {context_name} unreachable: {e}");
                        Some(e.to_string())
                    }
                };
                reachable = outcome.is_ok();
                last_error = error_message.clone();
                if token.is_cancelled() || signals.send(signal(false, reachable, error_message)).is_err() {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }

    pub fn dispose(&self) {
        self.token.cancel();
    }
}

async fn probe(client: &dyn KubeApi, timeout: Duration) -> Result<()> {
    tokio::time::timeout(timeout, client.readyz())
        .await
        .map_err(|_| Error::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    fn checker(api: &Arc<FakeApi>) -> ContextHealthChecker {
        ContextHealthChecker::new(
            "kind-test",
            api.clone(),
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn reports_checking_then_reachable() {
        let api = FakeApi::new();
        let checker = checker(&api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        checker.start(tx);

        let first = rx.recv().await.unwrap();
        assert!(first.checking);
        assert_eq!(first.id, checker.id());
        let second = rx.recv().await.unwrap();
        assert!(!second.checking);
        assert!(second.reachable);
        assert_eq!(second.error_message, None);
        checker.dispose();
    }

    #[tokio::test]
    async fn every_check_is_announced_then_settled() {
        let api = FakeApi::new();
        let checker = checker(&api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        checker.start(tx);
        let mut signals = Vec::new();
        for _ in 0..6 {
            signals.push(rx.recv().await.unwrap());
        }
        checker.dispose();

        let checking: Vec<bool> = signals.iter().map(|s| s.checking).collect();
        assert_eq!(checking, vec![true, false, true, false, true, false]);
        assert!(!signals[0].reachable);
        // a re-check keeps the settled outcome while in flight
        assert!(signals[2].reachable);
        assert!(signals[3].reachable);
    }

    #[tokio::test]
    async fn unreachable_carries_the_error_and_recovers() {
        let api = FakeApi::new();
        api.set_ready(false);
        let checker = checker(&api);
        let (tx, mut rx) = mpsc::unbounded_channel();

        checker.start(tx);
        rx.recv().await.unwrap();
        let failed = rx.recv().await.unwrap();
        assert!(!failed.reachable);
        assert!(failed.error_message.unwrap().contains("connection refused"));

        api.set_ready(true);
        loop {
            let signal = rx.recv().await.unwrap();
            if signal.reachable {
                break;
            }
        }
        checker.dispose();
    }

    #[tokio::test]
    async fn dispose_stops_probing() {
        let api = FakeApi::new();
        let checker = checker(&api);
        let (tx, mut rx) = mpsc::unbounded_channel();
        checker.start(tx);
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        checker.dispose();
        tokio::time::sleep(Duration::from_millis(60)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(rx.try_recv().is_err());
    }
}
