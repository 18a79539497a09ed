//! Bounded pool of reusable byte buffers
//!
//! Frame payloads are read into buffers borrowed from a [`ByteAllocator`]
//! and handed back once consumed, so steady-state traffic does not allocate
//! per frame. Pooling is best effort: a buffer that does not fit the pool is
//! simply dropped.

use super::error::{Error, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Sizing parameters for a [`ByteAllocator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Maximum number of buffers kept in the pool
    pub max_pool_count: usize,
    /// Largest buffer `borrow` will hand out
    pub max_buffer_size: usize,
    /// Largest buffer accepted back into the pool
    pub max_poolable_size: usize,
    /// Size of freshly allocated buffers for small requests
    pub default_buffer_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            max_pool_count: 64,
            max_buffer_size: super::MAX_FRAME_SIZE_UPPER_BOUND as usize,
            max_poolable_size: super::DEFAULT_INITIAL_WINDOW_SIZE as usize,
            default_buffer_size: 1024,
        }
    }
}

/// Thread-safe LIFO pool of byte buffers
#[derive(Debug)]
pub struct ByteAllocator {
    config: AllocatorConfig,
    pool: Mutex<Vec<Vec<u8>>>,
}

impl ByteAllocator {
    /// Create an allocator
    ///
    /// Fails unless `max_pool_count > 0`, `default_buffer_size > 0` and
    /// `0 < max_poolable_size <= max_buffer_size`.
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        if config.max_pool_count == 0 {
            return Err(Error::InvalidArgument("max_pool_count must be positive".into()));
        }
        if config.default_buffer_size == 0 {
            return Err(Error::InvalidArgument(
                "default_buffer_size must be positive".into(),
            ));
        }
        if config.max_poolable_size == 0 || config.max_poolable_size > config.max_buffer_size {
            return Err(Error::InvalidArgument(format!(
                "max_poolable_size {} must be in 1..={}",
                config.max_poolable_size, config.max_buffer_size
            )));
        }
        Ok(ByteAllocator {
            config,
            pool: Mutex::new(Vec::with_capacity(config.max_pool_count)),
        })
    }

    /// Allocator parameters
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    fn pool(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow a buffer whose length is at least `max(min_size, default_buffer_size)`
    ///
    /// The most recently released buffer is reused when it is large enough.
    pub fn borrow(&self, min_size: usize) -> Result<Vec<u8>> {
        if min_size == 0 || min_size > self.config.max_buffer_size {
            return Err(Error::InvalidArgument(format!(
                "requested buffer size {} must be in 1..={}",
                min_size, self.config.max_buffer_size
            )));
        }

        if min_size <= self.config.max_poolable_size {
            let mut pool = self.pool();
            let wanted = min_size.max(self.config.default_buffer_size);
            if pool.last().is_some_and(|top| top.len() >= wanted) {
                if let Some(buf) = pool.pop() {
                    return Ok(buf);
                }
            }
        }

        let size = min_size
            .max(self.config.default_buffer_size)
            .min(self.config.max_buffer_size);
        Ok(vec![0u8; size])
    }

    /// Return a buffer to the pool
    ///
    /// Oversized buffers and buffers beyond the pool cap are dropped.
    pub fn release(&self, buf: Vec<u8>) {
        if buf.is_empty() || buf.len() > self.config.max_poolable_size {
            return;
        }
        let mut pool = self.pool();
        if pool.len() < self.config.max_pool_count {
            pool.push(buf);
        }
    }

    /// Number of pooled buffers
    pub fn size(&self) -> usize {
        self.pool().len()
    }

    /// Drop all pooled buffers
    pub fn clear(&self) {
        self.pool().clear();
    }
}
