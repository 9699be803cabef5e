//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Level;

use taskrun_core::{ExecutionContext, Task, TaskError, TaskFn, TaskRef};

/// Route test logs through the test writer; repeated calls are ignored
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Task that fails with a numbered error until `succeed_on`, recording when
/// each attempt started
#[derive(Debug)]
pub struct FlakyTask {
    name: String,
    succeed_on: Option<u32>,
    calls: AtomicU32,
    started: Mutex<Vec<Instant>>,
}

impl FlakyTask {
    pub fn always_failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            succeed_on: None,
            calls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding_on(name: &str, attempt: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            succeed_on: Some(attempt),
            calls: AtomicU32::new(0),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive attempt start times
    pub fn gaps(&self) -> Vec<Duration> {
        let started = self.started.lock();
        started
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.started.lock().clear();
    }
}

#[async_trait]
impl Task for FlakyTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &ExecutionContext) -> Result<(), TaskError> {
        self.started.lock().push(Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.succeed_on {
            Some(target) if call >= target => Ok(()),
            _ => Err(TaskError::failed(format!("attempt {call} failed"))),
        }
    }
}

pub fn ok_task(name: &'static str) -> TaskRef {
    TaskFn::arc(name, |_ctx: ExecutionContext| async { Ok(()) })
}

pub fn failing_task(name: &'static str, message: &'static str) -> TaskRef {
    TaskFn::arc(name, move |_ctx: ExecutionContext| async move {
        Err(TaskError::failed(message))
    })
}

/// Sleeps for `duration`, then marks `<name>.done` in the context
pub fn slow_task(name: &'static str, duration: Duration) -> TaskRef {
    TaskFn::arc(name, move |ctx: ExecutionContext| async move {
        tokio::time::sleep(duration).await;
        ctx.put(format!("{name}.done"), true);
        Ok(())
    })
}

/// Runs `statement` on the connection published by the enclosing scope
pub fn statement_task(name: &'static str, statement: &'static str) -> TaskRef {
    TaskFn::arc(name, move |ctx: ExecutionContext| async move {
        let connection = ctx
            .shared_connection()
            .ok_or_else(|| TaskError::permanent("no shared connection in context"))?;
        connection.execute(statement).await?;
        ctx.put(format!("{name}.ran"), true);
        Ok(())
    })
}
