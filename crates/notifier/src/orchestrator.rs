//! Wires the dispatch engine together and owns its task lifecycle.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use beacon_common::policy::TargetPolicy;
use beacon_common::queue::{DeadLetterQueue, DelayStore, IntakeQueue};

use crate::config::NotifierConfig;
use crate::dispatcher::Dispatcher;
use crate::gateway::PushGateway;
use crate::limiter::RateLimiter;
use crate::resolver::IdentityResolver;
use crate::scheduler::RetryScheduler;
use crate::stat_log::StatLog;
use crate::stat_store::StatStore;
use crate::stats::{StatAggregator, StatFlusher};
use crate::worker::{SharedReceiver, Worker, WorkerContext};

/// External collaborators the engine is built over.
pub struct NotifierDeps {
    pub intake: Arc<dyn IntakeQueue>,
    pub delay: Arc<dyn DelayStore>,
    pub dead_letter: Arc<dyn DeadLetterQueue>,
    pub gateway: Arc<dyn PushGateway>,
    pub resolver: Arc<dyn IdentityResolver>,
    pub stat_store: Arc<dyn StatStore>,
    pub policy: TargetPolicy,
}

pub struct Notifier {
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
    /// Stops the stat flusher. Cancelled only after every worker has exited so
    /// the final flush sees counts recorded while draining.
    stat_cancel: CancellationToken,
    rx: Option<SharedReceiver>,
    dispatchers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    flusher: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn new(config: NotifierConfig, deps: NotifierDeps) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.send_rate_per_second,
            config.send_burst,
        ));
        let ctx = WorkerContext {
            config,
            policy: deps.policy,
            limiter,
            stats: Arc::new(StatAggregator::new()),
            intake: deps.intake,
            delay: deps.delay,
            dead_letter: deps.dead_letter,
            gateway: deps.gateway,
            resolver: deps.resolver,
            stat_store: deps.stat_store,
        };

        Self {
            ctx: Arc::new(ctx),
            cancel: CancellationToken::new(),
            stat_cancel: CancellationToken::new(),
            rx: None,
            dispatchers: Vec::new(),
            workers: Vec::new(),
            background: Vec::new(),
            flusher: None,
        }
    }

    pub fn stats(&self) -> Arc<StatAggregator> {
        self.ctx.stats.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the dispatcher pool, worker pool, retry scheduler and stat flusher.
    pub fn start(&mut self) {
        if self.rx.is_some() {
            tracing::warn!("Notifier already started");
            return;
        }
        let config = &self.ctx.config;
        let (tx, rx) = mpsc::channel::<String>(config.channel_buffer);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        for id in 0..config.dispatcher_count {
            let dispatcher = Dispatcher::new(
                id,
                self.ctx.intake.clone(),
                tx.clone(),
                config.pop_timeout,
                config.store_error_backoff,
            );
            self.dispatchers
                .push(tokio::spawn(dispatcher.run(self.cancel.clone())));
        }
        drop(tx);

        for id in 0..config.worker_count {
            let worker = Worker::new(id, self.ctx.clone());
            self.workers
                .push(tokio::spawn(worker.run(rx.clone(), self.cancel.clone())));
        }

        let scheduler = RetryScheduler::new(
            self.ctx.delay.clone(),
            self.ctx.intake.clone(),
            config.scheduler_batch_size,
            config.scheduler_tick,
        );
        self.background
            .push(tokio::spawn(scheduler.run(self.cancel.clone())));

        let flusher = StatFlusher::new(
            self.ctx.stats.clone(),
            StatLog::new(&config.stat_log_dir),
            self.ctx.stat_store.clone(),
        );
        self.flusher = Some(tokio::spawn(flusher.run(self.stat_cancel.clone())));

        tracing::info!(
            dispatchers = config.dispatcher_count,
            workers = config.worker_count,
            channel_buffer = config.channel_buffer,
            rate_per_second = config.send_rate_per_second,
            burst = config.send_burst,
            "Notifier started"
        );
        self.rx = Some(rx);
    }

    /// Run an extra task under the engine's cancellation token, joined on shutdown.
    pub fn spawn_background<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.background.push(tokio::spawn(task(self.cancel.clone())));
    }

    /// Stop pulling new entries, let in-flight messages finish, hand anything
    /// still buffered in the channel back to the intake queue, then write the
    /// final stat flush.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        tracing::info!("Notifier shutting down");
        self.cancel.cancel();

        for handle in self
            .dispatchers
            .drain(..)
            .chain(self.workers.drain(..))
            .chain(self.background.drain(..))
        {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Task panicked during shutdown");
            }
        }

        let mut returned = 0usize;
        let mut lost = 0usize;
        if let Some(rx) = self.rx.take() {
            let mut rx = rx.lock().await;
            rx.close();
            while let Ok(raw) = rx.try_recv() {
                match self.ctx.intake.push(&raw).await {
                    Ok(()) => returned += 1,
                    Err(e) => {
                        lost += 1;
                        tracing::error!(error = %e, payload = %raw, "Failed to return buffered entry");
                    }
                }
            }
        }

        self.stat_cancel.cancel();
        if let Some(flusher) = self.flusher.take()
            && let Err(e) = flusher.await
        {
            tracing::error!(error = %e, "Stat flusher panicked during shutdown");
        }

        tracing::info!(returned, lost, "Notifier stopped");
        if lost > 0 {
            anyhow::bail!("{} buffered entries could not be returned to the intake queue", lost);
        }
        Ok(())
    }
}
