//! In-crate doubles for the sleeper and typesetter seams.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::pacing::Sleeper;
use crate::render::{RenderInvocation, Typesetter};

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn recorded(&self) -> Vec<Duration> {
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

/// Records invocations and fails for the listed engines. Writes a
/// placeholder artifact on success.
#[derive(Debug, Default)]
pub(crate) struct StubTypesetter {
    failing_engines: Vec<String>,
    calls: Mutex<Vec<RenderInvocation>>,
}

impl StubTypesetter {
    pub(crate) fn failing(engines: &[&str]) -> Self {
        Self {
            failing_engines: engines.iter().map(|e| (*e).to_owned()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<RenderInvocation> {
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

#[tokio::test]
async fn recording_sleeper_keeps_every_delay() -> anyhow::Result<()> {
    let sleeper = RecordingSleeper::new();
    sleeper.sleep(Duration::from_millis(5)).await?;
    sleeper.sleep(Duration::from_millis(7)).await?;
    assert_eq!(
        sleeper.recorded(),
        vec![Duration::from_millis(5), Duration::from_millis(7)]
    );
    Ok(())
}
