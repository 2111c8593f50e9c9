//! Host-visible buffer contract
//!
//! The compositor exchanges pixel data with the GPU through host-visible,
//! DMA-capable buffers with two usage patterns: `WriteOnly` (upload) and
//! `ReadOnly` (asynchronous download). The core only depends on the contract
//! below — in particular the `ready`/`wait` semantics of readback — never on
//! a concrete GL object. This module also provides the CPU reference
//! implementation backing the frame factory and the software mixer.
//!
//! State rules: a buffer must be bound before `map`/`begin_read`, and a
//! readback must be waited on (or polled ready) before its data is observed.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Buffer usage pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// CPU fills the buffer, GPU consumes it
    WriteOnly,
    /// GPU fills the buffer via async readback, CPU consumes it
    ReadOnly,
}

/// Opaque GPU context handle. Owned by the mixer task; encode tasks never
/// touch it.
#[derive(Debug, Default)]
pub struct GpuContext {
    _priv: (),
}

/// A host-visible pixel buffer.
#[derive(Debug)]
pub struct HostBuffer {
    usage: Usage,
    data: Vec<u8>,
    bound: bool,
    mapped: bool,
    read_pending: bool,
}

impl HostBuffer {
    pub fn new(size: usize, usage: Usage) -> HostBuffer {
        HostBuffer {
            usage,
            data: vec![0; size],
            bound: false,
            mapped: false,
            read_pending: false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Bind the buffer on the GPU context.
    pub fn bind(&mut self) {
        self.bound = true;
    }

    pub fn unbind(&mut self) {
        self.bound = false;
    }

    /// Expose the buffer memory for CPU access. Requires a prior `bind`.
    pub fn map(&mut self) -> Result<&mut [u8]> {
        if !self.bound {
            return Err(Error::Config("host buffer mapped while unbound".into()));
        }
        self.mapped = true;
        Ok(&mut self.data)
    }

    pub fn unmap(&mut self) {
        self.mapped = false;
    }

    /// Issue an asynchronous readback of `width * height * bytes_per_pixel`
    /// bytes. The reference implementation completes immediately; `ready`
    /// and `wait` still gate access so callers honor the contract.
    pub fn begin_read(&mut self, width: usize, height: usize, bytes_per_pixel: usize) -> Result<()> {
        if self.usage != Usage::ReadOnly {
            return Err(Error::Config("begin_read on a write-only buffer".into()));
        }
        if !self.bound {
            return Err(Error::Config("begin_read while unbound".into()));
        }
        let needed = width * height * bytes_per_pixel;
        if needed > self.data.len() {
            return Err(Error::Config(format!(
                "begin_read of {needed} bytes exceeds buffer size {}",
                self.data.len()
            )));
        }
        self.read_pending = true;
        Ok(())
    }

    /// Non-blocking poll for readback completion.
    pub fn ready(&self) -> bool {
        !self.read_pending
    }

    /// Block until the pending readback completes on the given context.
    pub fn wait(&mut self, _ctx: &GpuContext) {
        self.read_pending = false;
    }

    /// Access the buffer bytes. Panics in debug builds if a readback is
    /// still pending, which indicates a missing `wait`.
    pub fn data(&self) -> &[u8] {
        debug_assert!(self.ready(), "host buffer read before readback completed");
        &self.data
    }

    /// Write into the buffer from the GPU side (reference implementation of
    /// the readback source).
    pub(crate) fn fill_from(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
    }
}

/// Pool of reusable host buffers, keyed by size and usage.
#[derive(Debug, Default)]
pub struct HostBufferPool {
    free: Mutex<HashMap<(usize, Usage), Vec<HostBuffer>>>,
}

impl HostBufferPool {
    pub fn new() -> HostBufferPool {
        HostBufferPool::default()
    }

    /// Take a buffer of the given size and usage, allocating when the pool
    /// is empty. Returned buffers are zeroed and unbound.
    pub fn take(&self, size: usize, usage: Usage) -> HostBuffer {
        let mut free = self.free.lock().unwrap();
        if let Some(mut buffer) = free.get_mut(&(size, usage)).and_then(Vec::pop) {
            buffer.data.fill(0);
            buffer.bound = false;
            buffer.mapped = false;
            buffer.read_pending = false;
            buffer
        } else {
            HostBuffer::new(size, usage)
        }
    }

    /// Return a buffer for reuse.
    pub fn give_back(&self, buffer: HostBuffer) {
        let key = (buffer.size(), buffer.usage());
        self.free.lock().unwrap().entry(key).or_default().push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_requires_bind() {
        let mut buffer = HostBuffer::new(16, Usage::WriteOnly);
        assert!(buffer.map().is_err());
        buffer.bind();
        assert!(buffer.map().is_ok());
    }

    #[test]
    fn readback_gates_on_wait() {
        let ctx = GpuContext::default();
        let mut buffer = HostBuffer::new(4 * 2 * 2, Usage::ReadOnly);
        buffer.bind();
        buffer.begin_read(2, 2, 4).unwrap();
        assert!(!buffer.ready());
        buffer.wait(&ctx);
        assert!(buffer.ready());
        assert_eq!(buffer.data().len(), 16);
    }

    #[test]
    fn begin_read_rejects_write_only() {
        let mut buffer = HostBuffer::new(16, Usage::WriteOnly);
        buffer.bind();
        assert!(buffer.begin_read(2, 2, 4).is_err());
    }

    #[test]
    fn pool_reuses_and_zeroes() {
        let pool = HostBufferPool::new();
        let mut buffer = pool.take(8, Usage::WriteOnly);
        buffer.bind();
        buffer.map().unwrap().copy_from_slice(&[1; 8]);
        buffer.unmap();
        pool.give_back(buffer);

        let reused = pool.take(8, Usage::WriteOnly);
        assert!(reused.data.iter().all(|&b| b == 0));
    }
}
