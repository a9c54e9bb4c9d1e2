//! Shared fixtures for integration tests: canned content modules and
//! descriptor shorthands.

#![allow(dead_code)]

use async_trait::async_trait;
use promptloom::descriptor::{ModuleDescriptor, ModuleDescriptorBuilder};
use promptloom::module::{ContentModule, ModuleContext, ModuleError, ModuleOutput};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Emits fixed content and fixed writes.
pub struct StaticModule {
    pub content: String,
    pub writes: Vec<(String, Value)>,
}

impl StaticModule {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            writes: Vec::new(),
        }
    }

    pub fn with_write(mut self, key: impl Into<String>, value: Value) -> Self {
        self.writes.push((key.into(), value));
        self
    }
}

#[async_trait]
impl ContentModule for StaticModule {
    async fn execute(&self, _ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
        let mut output = ModuleOutput::new().with_content(self.content.clone());
        for (key, value) in &self.writes {
            output = output.with_write(key.clone(), value.clone());
        }
        Ok(output)
    }
}

/// Reads one consumed key and echoes it into its content, so tests can
/// observe cross-wave state propagation.
pub struct EchoModule {
    pub key: String,
}

#[async_trait]
impl ContentModule for EchoModule {
    async fn execute(&self, ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
        let value = ctx.require(&self.key)?;
        Ok(ModuleOutput::new().with_content(format!("{}={}", self.key, value)))
    }
}

/// Always fails with the given message.
pub struct FailingModule {
    pub message: String,
}

#[async_trait]
impl ContentModule for FailingModule {
    async fn execute(&self, _ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
        Err(ModuleError::Failed(self.message.clone()))
    }
}

/// Sleeps for a fixed duration before emitting, for timeout scenarios.
pub struct DelayedModule {
    pub delay: Duration,
    pub content: String,
}

#[async_trait]
impl ContentModule for DelayedModule {
    async fn execute(&self, _ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
        tokio::time::sleep(self.delay).await;
        Ok(ModuleOutput::new().with_content(self.content.clone()))
    }
}

/// Counts executions, for at-most-once and singleton assertions.
pub struct CountingModule {
    pub executions: Arc<AtomicUsize>,
    pub content: String,
}

impl CountingModule {
    pub fn new(executions: Arc<AtomicUsize>, content: impl Into<String>) -> Self {
        Self {
            executions,
            content: content.into(),
        }
    }
}

#[async_trait]
impl ContentModule for CountingModule {
    async fn execute(&self, _ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(ModuleOutput::new().with_content(self.content.clone()))
    }
}

/// Descriptor builder shorthand used throughout the suite.
pub fn descriptor(id: &str) -> ModuleDescriptorBuilder {
    ModuleDescriptor::builder(id)
}

/// A linear chain `m0 <- m1 <- ... <- m{n-1}`, each module depending on its
/// predecessor.
pub fn chain(n: usize) -> Vec<ModuleDescriptor> {
    (0..n)
        .map(|i| {
            let mut builder = descriptor(&format!("m{i}")).priority(i as i32);
            if i > 0 {
                builder = builder.depends_on([format!("m{}", i - 1)]);
            }
            builder.build()
        })
        .collect()
}
