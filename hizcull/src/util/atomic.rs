//! Host memory standing in for device storage buffers.

use std::{
    collections::TryReserveError,
    sync::atomic::{AtomicU32, Ordering},
};

/// A buffer of `u32` words with device-style relaxed atomics.
///
/// Kernels running on the host share these between workers the same way
/// compute invocations share a storage buffer. Ordering between passes comes
/// from the passes themselves being joined, never from the atomics.
#[derive(Debug)]
pub struct AtomicBuffer {
    words: Box<[AtomicU32]>,
}

impl AtomicBuffer {
    /// Zero initialized buffer, reporting allocation failure instead of aborting.
    pub fn try_zeroed(len: usize) -> Result<Self, TryReserveError> {
        let mut words = Vec::new();
        words.try_reserve_exact(len)?;
        words.extend((0..len).map(|_| AtomicU32::new(0)));
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    pub fn from_words(data: &[u32]) -> Self {
        Self {
            words: data.iter().map(|&w| AtomicU32::new(w)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn fetch_add(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_add(value, Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn swap(&self, index: usize, value: u32) -> u32 {
        self.words[index].swap(value, Ordering::Relaxed)
    }

    pub fn fill(&self, value: u32) {
        for word in self.words.iter() {
            word.store(value, Ordering::Relaxed);
        }
    }

    pub fn write(&self, offset: usize, data: &[u32]) {
        for (word, &value) in self.words[offset..].iter().zip(data) {
            word.store(value, Ordering::Relaxed);
        }
    }

    /// Copies the words out, the host equivalent of a readback.
    pub fn read(&self, range: std::ops::Range<usize>) -> Vec<u32> {
        self.words[range].iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.read(0..self.len())
    }

    /// Reads the first five words as a structure.
    pub fn read_args<T: bytemuck::Pod>(&self) -> T {
        let mut words = [0_u32; 5];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.load(i);
        }
        bytemuck::cast(words)
    }
}

#[cfg(test)]
mod tests {
    use hizcull_types::IndirectDispatchArgs;

    use super::*;

    #[test]
    fn args_roundtrip() {
        let buffer = AtomicBuffer::from_words(&IndirectDispatchArgs::INITIAL.as_words());
        assert_eq!(buffer.fetch_add(3, 2), 0);
        let args: IndirectDispatchArgs = buffer.read_args();
        assert_eq!(args.count, 2);
        assert_eq!((args.y, args.z), (1, 1));
    }

    #[test]
    fn swap_reports_previous() {
        let buffer = AtomicBuffer::try_zeroed(4).unwrap();
        assert_eq!(buffer.swap(2, 1), 0);
        assert_eq!(buffer.swap(2, 1), 1);
        buffer.fill(0);
        assert_eq!(buffer.snapshot(), [0, 0, 0, 0]);
    }
}
