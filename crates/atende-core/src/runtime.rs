//! Event loop: per-chat ordered workers fed from the event bus, plus the
//! periodic store sweep.

use anyhow::Result;
use atende_config::PipelineConfig;
use atende_ipc::{EventBus, InboundBatch, InboundEvent};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::{route_event, InboundPipeline};

struct Worker {
    tx: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

type WorkerMap = Arc<Mutex<HashMap<String, Worker>>>;

pub struct AtendeRuntime {
    pipeline: Arc<InboundPipeline>,
    event_bus: EventBus,
    workers: WorkerMap,
    worker_idle: Duration,
    sweep_interval: Duration,
}

impl AtendeRuntime {
    pub fn new(
        pipeline: Arc<InboundPipeline>,
        event_bus: EventBus,
        worker_idle: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            event_bus,
            workers: Arc::new(Mutex::new(HashMap::new())),
            worker_idle,
            sweep_interval,
        }
    }

    pub fn from_config(
        pipeline: Arc<InboundPipeline>,
        event_bus: EventBus,
        config: &PipelineConfig,
    ) -> Self {
        Self::new(
            pipeline,
            event_bus,
            Duration::from_secs(config.worker_idle_secs),
            Duration::from_secs(config.sweep_interval_secs),
        )
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn pipeline(&self) -> &Arc<InboundPipeline> {
        &self.pipeline
    }

    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Consumes the event bus until `shutdown` resolves, then drains the
    /// workers.
    pub async fn run<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        self.serve(self.event_bus.subscribe(), shutdown).await
    }

    /// Like [`run`](Self::run) with a receiver subscribed up front, so a
    /// host can publish before the loop is first polled. Batches already
    /// queued when `shutdown` resolves are still processed.
    pub async fn serve<S>(
        &self,
        mut inbound_rx: broadcast::Receiver<InboundBatch>,
        shutdown: S,
    ) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        info!("Atende runtime starting...");
        let mut sweep_interval =
            tokio::time::interval(self.sweep_interval.max(Duration::from_millis(1)));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = inbound_rx.recv() => {
                    match result {
                        Ok(batch) => {
                            for event in batch.events {
                                self.submit(event).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping message processor");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event bus lagged by {} batches", n);
                        }
                    }
                }
                _ = sweep_interval.tick() => {
                    let report = self.pipeline.sweep(Instant::now());
                    if report.total() > 0 {
                        debug!(
                            contexts = report.contexts,
                            payments = report.payments,
                            rate_limits = report.rate_limits,
                            dedup = report.dedup,
                            "Swept idle state"
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    while let Ok(batch) = inbound_rx.try_recv() {
                        for event in batch.events {
                            self.submit(event).await;
                        }
                    }
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Queues an event on its chat's worker, starting one if needed. Events
    /// of one chat are processed strictly in submission order.
    pub async fn submit(&self, event: InboundEvent) {
        let chat_id = match route_event(&event) {
            Ok((chat_id, _)) => chat_id.to_string(),
            Err(reason) => {
                debug!(trace_id = %event.trace_id, ?reason, "Dropping inbound event");
                return;
            }
        };

        let mut workers = self.workers.lock().await;
        let event = match workers.get(&chat_id) {
            Some(worker) => match worker.tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            return;
        }
        let handle = tokio::spawn(run_worker(
            chat_id.clone(),
            rx,
            Arc::clone(&self.workers),
            Arc::clone(&self.pipeline),
            self.worker_idle,
        ));
        debug!(chat_id = %chat_id, "Started chat worker");
        workers.insert(chat_id, Worker { tx, handle });
    }

    /// Closes every worker's queue and waits for queued events to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<Worker> = {
            let mut workers = self.workers.lock().await;
            workers.drain().map(|(_, worker)| worker).collect()
        };
        for Worker { tx, handle } in drained {
            drop(tx);
            if let Err(e) = handle.await {
                warn!("Chat worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    chat_id: String,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    workers: WorkerMap,
    pipeline: Arc<InboundPipeline>,
    idle: Duration,
) {
    loop {
        let event = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                // senders only push while holding the map lock
                let mut map = workers.lock().await;
                match rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => {
                        map.remove(&chat_id);
                        debug!(chat_id = %chat_id, "Chat worker idle, exiting");
                        break;
                    }
                }
            }
        };
        let outcome = pipeline.process_event(&event).await;
        debug!(chat_id = %chat_id, ?outcome, "Processed inbound event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DialogState;
    use crate::testing::{Harness, MemoryBilling};

    fn runtime(h: &Harness, idle: Duration) -> AtendeRuntime {
        AtendeRuntime::new(
            Arc::clone(&h.pipeline),
            EventBus::new(),
            idle,
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn chat_messages_are_processed_in_order() {
        let h = Harness::new(MemoryBilling::new());
        let rt = runtime(&h, Duration::from_secs(5));
        rt.submit(InboundEvent::text("chat", "oi")).await;
        rt.submit(InboundEvent::text("chat", "2")).await;
        rt.submit(InboundEvent::text("chat", "1")).await;
        rt.submit(InboundEvent::text("group@g.us", "oi")).await;
        assert_eq!(rt.active_workers().await, 1);
        rt.shutdown().await;

        let sent = h.transport.texts_for("chat");
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains("Bem-vindo"));
        assert_eq!(sent[1], crate::texts::SUPPORT_MENU);
        assert_eq!(sent[2], crate::texts::SLOW_INTERNET);
        assert!(h.transport.texts_for("group@g.us").is_empty());
    }

    #[tokio::test]
    async fn idle_worker_exits_and_is_restarted() {
        let h = Harness::new(MemoryBilling::new());
        let rt = runtime(&h, Duration::from_millis(30));
        rt.submit(InboundEvent::text("chat", "oi")).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rt.active_workers().await, 0);

        rt.submit(InboundEvent::text("chat", "4")).await;
        rt.shutdown().await;
        assert_eq!(h.context("chat").state, DialogState::Other);
    }

    #[tokio::test]
    async fn run_consumes_bus_until_shutdown() {
        let h = Harness::new(MemoryBilling::new());
        let rt = Arc::new(runtime(&h, Duration::from_secs(5)));
        let bus = rt.event_bus().clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let runner = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move {
                rt.run(async move {
                    let _ = stop_rx.await;
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(InboundBatch {
            events: vec![
                InboundEvent::text("a", "oi"),
                InboundEvent::text("b", "bom dia"),
            ],
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop_tx.send(());
        runner.await.unwrap().unwrap();

        assert_eq!(h.transport.texts_for("a").len(), 1);
        assert_eq!(h.transport.texts_for("b").len(), 1);
        assert_eq!(rt.active_workers().await, 0);
        assert!(h.contexts.get("a").is_some());
    }

    #[tokio::test]
    async fn sweep_tick_evicts_idle_state_while_running() {
        let mut config = Harness::config();
        config.pipeline.context_idle_secs = 0;
        config.pipeline.rate_limit_idle_secs = 0;
        let h = Harness::with_config(MemoryBilling::new(), config);
        let rt = Arc::new(runtime(&h, Duration::from_secs(5)));
        h.contexts.set("chat", Default::default());
        h.pipeline.rate_limiter().record_response("chat");
        assert_eq!(h.contexts.len(), 1);
        assert_eq!(h.pipeline.rate_limiter().len(), 1);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let runner = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move {
                rt.run(async move {
                    let _ = stop_rx.await;
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.contexts.len(), 0);
        assert!(h.pipeline.rate_limiter().is_empty());
        let _ = stop_tx.send(());
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn batches_queued_before_shutdown_are_still_processed() {
        let h = Harness::new(MemoryBilling::new());
        let rt = runtime(&h, Duration::from_secs(5));
        let rx = rt.event_bus().subscribe();
        rt.event_bus()
            .publish(InboundBatch::single(InboundEvent::text("chat", "oi")))
            .unwrap();

        rt.serve(rx, async {}).await.unwrap();

        assert_eq!(h.transport.texts_for("chat").len(), 1);
    }
}
