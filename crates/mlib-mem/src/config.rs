//! Dynamic array configuration.

use crate::chunk::SlotLayout;
use crate::error::{Error, Result};

/// Slots per chunk when not configured.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Payload bytes per slot when not configured.
pub const DEFAULT_ENTRY_SIZE: usize = 64;

/// Ceiling on live entries when not configured.
pub const DEFAULT_ENTRY_MAX_NUM: usize = 4096;

/// Geometry of a [`DynamicArray`](crate::DynamicArray).
///
/// ```
/// use mlib_mem::ArrayConfig;
///
/// let config = ArrayConfig::default()
///     .with_chunk_size(16)
///     .with_entry_size(24);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.entry_max_num, mlib_mem::config::DEFAULT_ENTRY_MAX_NUM);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayConfig {
    /// Slots per chunk.
    pub chunk_size: usize,
    /// Payload bytes per slot.
    pub entry_size: usize,
    /// Maximum number of entries allocated at once.
    pub entry_max_num: usize,
}

impl ArrayConfig {
    pub const fn new(chunk_size: usize, entry_size: usize, entry_max_num: usize) -> Self {
        ArrayConfig {
            chunk_size,
            entry_size,
            entry_max_num,
        }
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn with_entry_size(mut self, entry_size: usize) -> Self {
        self.entry_size = entry_size;
        self
    }

    #[must_use]
    pub const fn with_entry_max_num(mut self, entry_max_num: usize) -> Self {
        self.entry_max_num = entry_max_num;
        self
    }

    /// Checks every field and returns the resulting slot layout.
    pub fn validate(&self) -> Result<SlotLayout> {
        if self.chunk_size == 0 {
            return Err(Error::invalid("chunk_size must be non-zero"));
        }
        if self.entry_size == 0 {
            return Err(Error::invalid("entry_size must be non-zero"));
        }
        if self.entry_max_num == 0 {
            return Err(Error::invalid("entry_max_num must be non-zero"));
        }
        let layout =
            SlotLayout::new(self.entry_size).ok_or(Error::invalid("entry_size is too large"))?;
        layout
            .block_size(self.chunk_size)
            .ok_or(Error::invalid("chunk_size * entry_size overflows"))?;
        Ok(layout)
    }

    /// Bytes one chunk occupies, or `None` if that overflows.
    pub fn chunk_bytes(&self) -> Option<usize> {
        SlotLayout::new(self.entry_size)?.block_size(self.chunk_size)
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        ArrayConfig::new(DEFAULT_CHUNK_SIZE, DEFAULT_ENTRY_SIZE, DEFAULT_ENTRY_MAX_NUM)
    }
}
