use std::io::Write;

use async_trait::async_trait;

/// Consumer side of an `llm_display` step: the provider task writes chunks,
/// the sink renders them. Implementations must tolerate interleaved calls
/// from a single producer only.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    async fn write(&self, chunk: &str) -> Result<(), std::io::Error>;
}

/// Writes chunks straight to stdout, flushing after each one.
pub struct StdoutSink;

#[async_trait]
impl DisplaySink for StdoutSink {
    async fn write(&self, chunk: &str) -> Result<(), std::io::Error> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(chunk.as_bytes())?;
        stdout.flush()
    }
}

/// Discards everything. Used when no display is attached.
pub struct NullSink;

#[async_trait]
impl DisplaySink for NullSink {
    async fn write(&self, _chunk: &str) -> Result<(), std::io::Error> {
        Ok(())
    }
}

/// Accumulates chunks in memory; handy in tests and for capturing a
/// streamed response as a whole.
#[derive(Default)]
pub struct CollectSink {
    collected: std::sync::Mutex<String>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.collected.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl DisplaySink for CollectSink {
    async fn write(&self, chunk: &str) -> Result<(), std::io::Error> {
        self.collected
            .lock()
            .expect("sink lock poisoned")
            .push_str(chunk);
        Ok(())
    }
}
