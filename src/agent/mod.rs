use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::ProbeEngine;
use crate::export::{HealthMetrics, SnapshotExporter};
use crate::peer::{Peer, PeerEvent, PeerEventHandler};
use crate::reconciler::{Jitter, Reconciler};

/// How often the event source's sync flag is polled.
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delivery side of the peer lifecycle feed.
///
/// Events themselves arrive on the channel handed to [`Agent::start`];
/// the source only reports whether its initial listing is complete.
pub trait EventSource: Send + Sync {
    /// True once every object of the initial listing has been delivered.
    fn has_synced(&self) -> bool;
}

/// Startup failures of the agent.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AgentError {
    #[error("event source did not sync within {0:?}")]
    SyncTimeout(Duration),

    #[error("cancelled while waiting for event source sync")]
    Cancelled,
}

/// Wait until `source` reports its initial sync, polling every 100ms.
pub async fn wait_for_sync(
    source: &dyn EventSource,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(SYNC_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            _ = &mut deadline => return Err(AgentError::SyncTimeout(timeout)),
            _ = ticker.tick() => {
                if source.has_synced() {
                    return Ok(());
                }
            }
        }
    }
}

/// Agent wires the reconciler, snapshot exporter and metrics server.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    reconciler: Option<Reconciler>,
    event_loop: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent for the local peer `me`.
    ///
    /// `me` is the local peer as known at startup; its probe address may
    /// still be empty.
    pub fn new(cfg: Config, me: Peer, engine: Arc<dyn ProbeEngine>) -> Result<Self> {
        cfg.validate()?;

        if me.name != cfg.self_name {
            bail!(
                "local peer {:?} does not match self_name {:?}",
                me.name,
                cfg.self_name
            );
        }

        let health =
            Arc::new(HealthMetrics::new(&cfg.metrics.addr).context("creating health metrics")?);

        let exporter = SnapshotExporter::new(Arc::clone(&engine))
            .context("creating snapshot exporter")?
            .with_render_duration(health.render_duration.clone());
        health
            .register(Box::new(exporter))
            .context("registering snapshot exporter")?;

        let reconciler = Reconciler::new(me, engine)
            .with_jitter(Jitter::new(cfg.reconciler.jitter_max))
            .with_version_ordering(cfg.reconciler.version_ordering)
            .with_metrics(Arc::clone(&health));

        Ok(Self {
            cfg,
            health,
            reconciler: Some(reconciler),
            event_loop: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Channel sized for this agent's event feed.
    pub fn event_channel(&self) -> (mpsc::Sender<PeerEvent>, mpsc::Receiver<PeerEvent>) {
        mpsc::channel(self.cfg.event_buffer)
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    /// Start serving metrics, consume `events`, and block until `source`
    /// has synced.
    ///
    /// Returns the metrics server address. A sync timeout stops the agent
    /// and is returned as an [`AgentError`].
    pub async fn start(
        &mut self,
        events: mpsc::Receiver<PeerEvent>,
        source: Arc<dyn EventSource>,
    ) -> Result<SocketAddr> {
        let Some(reconciler) = self.reconciler.take() else {
            bail!("agent already started");
        };

        let addr = self
            .health
            .start()
            .await
            .context("starting metrics server")?;

        self.event_loop = Some(tokio::spawn(run_event_loop(
            reconciler,
            events,
            self.cancel.child_token(),
        )));

        info!(
            timeout = ?self.cfg.sync_timeout,
            "waiting for event source initial sync",
        );
        if let Err(e) = wait_for_sync(source.as_ref(), self.cfg.sync_timeout, &self.cancel).await {
            warn!(error = %e, "event source sync failed");
            self.stop().await?;
            return Err(e).context("failed to sync");
        }

        self.health.synced.set(1.0);
        info!(%addr, "agent fully started");

        Ok(addr)
    }

    /// Gracefully stop the event loop and metrics server.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(handle) = self.event_loop.take() {
            handle.await.context("joining event loop")?;
        }

        self.health.stop().await?;

        Ok(())
    }
}

/// Feed events to the reconciler one at a time until cancelled or the
/// sender side closes.
async fn run_event_loop(
    mut reconciler: Reconciler,
    mut events: mpsc::Receiver<PeerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => reconciler.dispatch(event),
                None => {
                    info!("event feed closed");
                    break;
                }
            },
        }
    }

    debug!(
        peers = reconciler.registry().len(),
        targets = reconciler.registry().active_len(),
        "event loop stopped",
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::engine::fake::FakeEngine;

    #[derive(Default)]
    struct Flag(AtomicBool);

    impl EventSource for Flag {
        fn has_synced(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config {
            self_name: "ping-a".to_string(),
            sync_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        cfg.metrics.addr = "127.0.0.1:0".to_string();
        cfg.reconciler.jitter_max = Duration::ZERO;
        cfg
    }

    #[tokio::test]
    async fn test_wait_for_sync_returns_once_synced() {
        let flag = Arc::new(Flag::default());
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            setter.0.store(true, Ordering::Relaxed);
        });

        let cancel = CancellationToken::new();
        let result = wait_for_sync(flag.as_ref(), Duration::from_secs(5), &cancel).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_wait_for_sync_times_out() {
        let flag = Flag::default();
        let cancel = CancellationToken::new();
        let result = wait_for_sync(&flag, Duration::from_millis(250), &cancel).await;
        assert_eq!(result, Err(AgentError::SyncTimeout(Duration::from_millis(250))));
    }

    #[tokio::test]
    async fn test_wait_for_sync_cancelled() {
        let flag = Flag::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = wait_for_sync(&flag, Duration::from_secs(5), &cancel).await;
        assert_eq!(result, Err(AgentError::Cancelled));
    }

    #[test]
    fn test_new_rejects_mismatched_self() {
        let engine = Arc::new(FakeEngine::default());
        let result = Agent::new(test_config(), Peer::new("someone-else"), engine);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_agent_reconciles_events_and_serves_metrics() {
        let engine = Arc::new(FakeEngine::default());
        let me = Peer::new("ping-a").with_version("1");
        let mut agent = Agent::new(test_config(), me, engine.clone()).expect("agent");
        let (tx, rx) = agent.event_channel();

        tx.send(PeerEvent::Added(
            Peer::new("ping-b")
                .with_probe_address("10.0.0.2")
                .with_version("2"),
        ))
        .await
        .expect("send");
        tx.send(PeerEvent::Added(
            Peer::new("ping-a")
                .with_probe_address("10.0.0.1")
                .with_version("3"),
        ))
        .await
        .expect("send");

        let source = Arc::new(Flag(AtomicBool::new(true)));
        agent.start(rx, source).await.expect("starts");

        // Events are processed asynchronously after sync.
        for _ in 0..50 {
            if !engine.target_ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.target_ids().len(), 1);
        assert_eq!(agent.health().synced.get(), 1.0);

        agent.stop().await.expect("stops");
    }

    #[tokio::test]
    async fn test_agent_start_fails_without_sync() {
        let engine = Arc::new(FakeEngine::default());
        let mut agent =
            Agent::new(test_config(), Peer::new("ping-a"), engine).expect("agent");
        let (_tx, rx) = agent.event_channel();

        let err = agent
            .start(rx, Arc::new(Flag::default()))
            .await
            .expect_err("never syncs");

        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::SyncTimeout(_))
        ));
        assert_eq!(agent.health().synced.get(), 0.0);
    }

    #[tokio::test]
    async fn test_agent_cannot_start_twice() {
        let engine = Arc::new(FakeEngine::default());
        let mut agent =
            Agent::new(test_config(), Peer::new("ping-a"), engine).expect("agent");
        let (_tx, rx) = agent.event_channel();
        agent
            .start(rx, Arc::new(Flag(AtomicBool::new(true))))
            .await
            .expect("starts");

        let (_tx2, rx2) = agent.event_channel();
        let result = agent.start(rx2, Arc::new(Flag(AtomicBool::new(true)))).await;
        assert!(result.is_err());

        agent.stop().await.expect("stops");
    }
}
