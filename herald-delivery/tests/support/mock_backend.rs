//! Scripted backend for testing dispatch scenarios
//!
//! The backend replays a script of responses, one per send, and falls back
//! to a default response once the script is exhausted. Every send is
//! counted and the subject of every message is recorded.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = MockBackend::builder("primary")
//!     .then(Step::Error)
//!     .then(Step::Succeed)
//!     .otherwise(Step::Reject)
//!     .with_delay(Duration::from_millis(20))
//!     .build();
//! ```

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_common::{DeliveryOutcome, Message};
use herald_delivery::{Backend, DispatchError};

/// One scripted response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Accept the message
    Succeed,
    /// Return an outcome with `success == false`
    Reject,
    /// Return `Err(DispatchError::Provider)`
    Error,
    /// Return an error the pipeline does not retry
    Refuse,
}

#[derive(Debug)]
pub struct MockBackend {
    name: String,
    script: parking_lot::Mutex<VecDeque<Step>>,
    otherwise: Step,
    delay: Duration,
    healthy: bool,
    calls: AtomicUsize,
    subjects: parking_lot::Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn builder(name: impl Into<String>) -> MockBackendBuilder {
        MockBackendBuilder {
            name: name.into(),
            script: VecDeque::new(),
            otherwise: Step::Succeed,
            delay: Duration::ZERO,
            healthy: true,
        }
    }

    /// A backend that always responds with `step`
    pub fn always(name: impl Into<String>, step: Step) -> Arc<Self> {
        Self::builder(name).otherwise(step).build()
    }

    /// Number of sends this backend has seen
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Subjects of every message sent, in order
    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<DeliveryOutcome, DispatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.subjects.lock().push(message.subject().to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self.script.lock().pop_front().unwrap_or(self.otherwise);
        match step {
            Step::Succeed => Ok(DeliveryOutcome::delivered(
                &self.name,
                format!("{}-{call}", self.name),
            )),
            Step::Reject => Ok(DeliveryOutcome::rejected(&self.name, "mailbox unavailable")),
            Step::Error => Err(DispatchError::Provider {
                backend: self.name.clone(),
                message: "connection refused".to_string(),
            }),
            Step::Refuse => Err(DispatchError::CircuitOpen {
                backend: format!("{}-upstream", self.name),
                last_failure: None,
            }),
        }
    }

    async fn is_healthy(&self) -> bool {
        self.healthy
    }
}

pub struct MockBackendBuilder {
    name: String,
    script: VecDeque<Step>,
    otherwise: Step,
    delay: Duration,
    healthy: bool,
}

impl MockBackendBuilder {
    /// Respond with `step` to the next unscripted send
    pub fn then(mut self, step: Step) -> Self {
        self.script.push_back(step);
        self
    }

    /// Respond with `step` once the script runs out
    pub const fn otherwise(mut self, step: Step) -> Self {
        self.otherwise = step;
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub const fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn build(self) -> Arc<MockBackend> {
        Arc::new(MockBackend {
            name: self.name,
            script: parking_lot::Mutex::new(self.script),
            otherwise: self.otherwise,
            delay: self.delay,
            healthy: self.healthy,
            calls: AtomicUsize::new(0),
            subjects: parking_lot::Mutex::new(Vec::new()),
        })
    }
}
