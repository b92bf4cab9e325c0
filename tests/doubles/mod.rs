use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use ebookforge::pacing::Sleeper;
use ebookforge::render::{RenderInvocation, Typesetter};

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .map(|slept| slept.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) -> anyhow::Result<()> {
        self.slept
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sleeper lock poisoned"))?
            .push(duration);
        Ok(())
    }
}

/// Records invocations and fails for the listed engines.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct StubTypesetter {
    failing_engines: Vec<String>,
    calls: Mutex<Vec<RenderInvocation>>,
}

#[allow(dead_code)]
impl StubTypesetter {
    pub fn failing(engines: &[&str]) -> Self {
        Self {
            failing_engines: engines.iter().map(|e| (*e).to_owned()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RenderInvocation> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Typesetter for StubTypesetter {
    async fn typeset(&self, invocation: &RenderInvocation) -> anyhow::Result<()> {
        self.calls
            .lock()
            .map_err(|_| anyhow::anyhow!("stub typesetter lock poisoned"))?
            .push(invocation.clone());
        if self.failing_engines.contains(&invocation.engine) {
            anyhow::bail!("engine {} is unavailable", invocation.engine);
        }
        tokio::fs::write(&invocation.output, b"%PDF-stub\n")
            .await
            .with_context(|| format!("write stub artifact: {}", invocation.output.display()))?;
        Ok(())
    }
}
