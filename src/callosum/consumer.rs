//! The agent-consumer contract: subscribe to a tract, process messages, write
//! results back.
//!
//! Implement [`AgentConsumer::process_message`] for your agent, then hand it
//! to an [`AgentRunner`] (or to
//! [`Orchestrator::register_agent_consumer`](crate::callosum::orchestrator::Orchestrator::register_agent_consumer)).
//! The runner subscribes to the configured tract, processes one message at a
//! time under a timeout, and writes a Completed or Failed
//! [`ExecutionResult`] back through the task envelope's result handle.
//!
//! Messages without a task envelope are still processed; their results are
//! simply not stored anywhere, and the omission is logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use callosum::consumer::{AgentConfig, AgentConsumer, AgentRunner};
//! use callosum::{CorpusCallosum, Message, TractType};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! struct EchoAgent;
//!
//! #[async_trait]
//! impl AgentConsumer for EchoAgent {
//!     async fn process_message(
//!         &self,
//!         message: &Message,
//!     ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
//!         Ok(serde_json::json!({ "echoed": message.id }))
//!     }
//! }
//!
//! # async fn example(bridge: Arc<CorpusCallosum>) {
//! let runner = AgentRunner::new(
//!     AgentConfig::new("echo-1", TractType::External),
//!     bridge,
//!     Arc::new(EchoAgent),
//! );
//! runner.start().await;
//! // ... runner consumes in the background ...
//! runner.stop().await;
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::callosum::bridge::CorpusCallosum;
use crate::callosum::message::{Message, TractType};
use crate::callosum::task::ExecutionResult;

/// Configuration for one agent runner.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique agent id; doubles as the stream subscriber id.
    pub agent_id: String,
    /// Tract the agent consumes from.
    pub tract: TractType,
    /// Per-subscriber queue capacity (initial demand).
    pub buffer_size: usize,
    /// Bound on a single `process_message` call.
    pub processing_timeout: Duration,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>, tract: TractType) -> Self {
        Self {
            agent_id: agent_id.into(),
            tract,
            buffer_size: 100,
            processing_timeout: Duration::from_secs(30),
        }
    }

    /// Override the subscriber queue capacity (builder pattern).
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Override the per-message processing timeout (builder pattern).
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }
}

/// An agent that consumes messages from the corpus callosum.
#[async_trait]
pub trait AgentConsumer: Send + Sync {
    /// Process a single message and return a structured result.
    ///
    /// Runs under the configured timeout; both errors and timeouts become
    /// Failed [`ExecutionResult`]s for the correlated task.
    async fn process_message(
        &self,
        message: &Message,
    ) -> Result<Value, Box<dyn Error + Send + Sync>>;
}

/// Per-agent counters exposed by [`AgentRunner::get_stats`].
#[derive(Debug, Clone)]
pub struct AgentStats {
    pub agent_id: String,
    pub tract: TractType,
    pub messages_processed: u64,
    pub messages_failed: u64,
    /// processed / (processed + failed); 0 before any message.
    pub success_rate: f64,
}

/// Drives one [`AgentConsumer`] against a tract subscription.
pub struct AgentRunner {
    config: AgentConfig,
    /// `None` for detached runners that only serve direct invocation.
    bridge: Option<Arc<CorpusCallosum>>,
    consumer: Arc<dyn AgentConsumer>,
    task: StdMutex<Option<JoinHandle<()>>>,
    messages_processed: AtomicU64,
    messages_failed: AtomicU64,
    running: AtomicBool,
}

impl AgentRunner {
    pub fn new(
        config: AgentConfig,
        bridge: Arc<CorpusCallosum>,
        consumer: Arc<dyn AgentConsumer>,
    ) -> Arc<Self> {
        Self::build(config, Some(bridge), consumer)
    }

    /// A runner with no bus attachment. It never consumes on its own and is
    /// driven solely through [`AgentRunner::process_direct`] (the
    /// orchestrator's degraded mode).
    pub fn detached(config: AgentConfig, consumer: Arc<dyn AgentConsumer>) -> Arc<Self> {
        Self::build(config, None, consumer)
    }

    fn build(
        config: AgentConfig,
        bridge: Option<Arc<CorpusCallosum>>,
        consumer: Arc<dyn AgentConsumer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bridge,
            consumer,
            task: StdMutex::new(None),
            messages_processed: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the consumption loop. Starting an already-running agent is a
    /// logged no-op, as is starting a detached runner.
    pub async fn start(self: &Arc<Self>) {
        if self.bridge.is_none() {
            log::warn!(
                "agent {} is detached from the bus; nothing to consume",
                self.config.agent_id
            );
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            log::warn!("agent {} already running", self.config.agent_id);
            return;
        }
        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            runner.consume_loop().await;
        });
        *self.task.lock().unwrap() = Some(handle);
        log::info!(
            "agent {} started consuming from {} tract",
            self.config.agent_id,
            self.config.tract
        );
    }

    /// Cancel the consumption loop and await its termination.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        log::info!(
            "agent {} stopped (processed: {}, failed: {})",
            self.config.agent_id,
            self.messages_processed.load(Ordering::Acquire),
            self.messages_failed.load(Ordering::Acquire)
        );
    }

    async fn consume_loop(self: Arc<Self>) {
        let bridge = match &self.bridge {
            Some(bridge) => Arc::clone(bridge),
            None => return,
        };
        let mut feed = bridge
            .subscribe_with_buffer(
                &self.config.agent_id,
                self.config.tract,
                self.config.buffer_size,
            )
            .await;

        while let Some(message) = feed.next().await {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.handle_message(&message).await;
        }
        feed.cancel().await;
    }

    async fn handle_message(&self, message: &Message) {
        let start = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.processing_timeout,
            self.consumer.process_message(message),
        )
        .await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(output)) => {
                self.messages_processed.fetch_add(1, Ordering::AcqRel);
                self.store_outcome(message, Ok(output), elapsed);
            }
            Ok(Err(e)) => {
                self.messages_failed.fetch_add(1, Ordering::AcqRel);
                log::error!(
                    "agent {} error processing message {}: {}",
                    self.config.agent_id,
                    message.id,
                    e
                );
                self.store_outcome(message, Err(e.to_string()), elapsed);
            }
            Err(_) => {
                self.messages_failed.fetch_add(1, Ordering::AcqRel);
                log::error!(
                    "agent {} timed out processing message {}",
                    self.config.agent_id,
                    message.id
                );
                let description = format!(
                    "Timeout after {:.1}s",
                    self.config.processing_timeout.as_secs_f64()
                );
                self.store_outcome(message, Err(description), elapsed);
            }
        }
    }

    /// Write the outcome back through the envelope's result handle, when the
    /// message carries one.
    fn store_outcome(&self, message: &Message, outcome: Result<Value, String>, elapsed: f64) {
        let envelope = match message.payload.as_task() {
            Some(envelope) => envelope,
            None => {
                log::debug!(
                    "agent {} computed a result for message {} with no task envelope; not stored",
                    self.config.agent_id,
                    message.id
                );
                return;
            }
        };

        let result = match outcome {
            Ok(output) => ExecutionResult::completed(
                &envelope.task.id,
                &self.config.agent_id,
                output,
                elapsed,
            ),
            Err(error) => {
                ExecutionResult::failed(&envelope.task.id, &self.config.agent_id, error, elapsed)
            }
        };
        envelope.reply.store_task_result(&envelope.task.id, result);
    }

    /// Invoke the consumer directly, bypassing the bus but honoring the
    /// processing timeout. Used by the orchestrator's degraded mode.
    pub async fn process_direct(
        &self,
        message: &Message,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        match tokio::time::timeout(
            self.config.processing_timeout,
            self.consumer.process_message(message),
        )
        .await
        {
            Ok(result) => {
                match &result {
                    Ok(_) => {
                        self.messages_processed.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(_) => {
                        self.messages_failed.fetch_add(1, Ordering::AcqRel);
                    }
                }
                result
            }
            Err(_) => {
                self.messages_failed.fetch_add(1, Ordering::AcqRel);
                Err(format!(
                    "Timeout after {:.1}s",
                    self.config.processing_timeout.as_secs_f64()
                )
                .into())
            }
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn get_stats(&self) -> AgentStats {
        let processed = self.messages_processed.load(Ordering::Acquire);
        let failed = self.messages_failed.load(Ordering::Acquire);
        let total = processed + failed;
        AgentStats {
            agent_id: self.config.agent_id.clone(),
            tract: self.config.tract,
            messages_processed: processed,
            messages_failed: failed,
            success_rate: if total > 0 {
                processed as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}
