//! Threading Primitives
//!
//! Named background threads with explicit joining.

use std::thread::{self, JoinHandle};

use crate::{PlatformError, PlatformResult};

/// Named thread that is joined on drop
pub struct Thread {
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl Thread {
    /// Spawn a new thread with the given name and function
    pub fn spawn<F>(name: impl Into<String>, f: F) -> PlatformResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(f)?;
        log::debug!("Spawned thread '{}'", name);

        Ok(Self {
            handle: Some(handle),
            name,
        })
    }

    /// Get the thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the thread, waiting for it to complete
    pub fn join(mut self) -> PlatformResult<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> PlatformResult<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                PlatformError::ThreadPanicked(message)
            }),
            None => Ok(()),
        }
    }

    /// Check if the thread has finished
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if let Err(err) = self.join_inner() {
            log::error!("Thread '{}' ended abnormally: {}", self.name, err);
        }
    }
}
