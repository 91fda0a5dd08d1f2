use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Fixed-size sample buffer, owned by exactly one pipeline stage at a time.
#[derive(Debug)]
pub struct SampleBlock {
    bytes: Vec<u8>,
}

impl Deref for SampleBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for SampleBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Thread-safe free list of sample blocks; grows on demand.
pub struct BlockPool {
    block_size: usize,
    free: Mutex<Vec<SampleBlock>>,
}

impl BlockPool {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Hands out a recycled block or allocates a zeroed one.
    ///
    /// Recycled blocks keep their previous contents.
    pub fn acquire(&self) -> SampleBlock {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        recycled.unwrap_or_else(|| SampleBlock {
            bytes: vec![0; self.block_size],
        })
    }

    /// Returns a block for reuse.
    pub fn release(&self, block: SampleBlock) {
        if block.bytes.len() != self.block_size {
            return;
        }
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(block);
    }

    /// Number of blocks waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_returns_block_of_configured_size() {
        let pool = BlockPool::new(64);
        let block = pool.acquire();
        assert_eq!(block.len(), 64);
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn released_block_is_reused() {
        let pool = BlockPool::new(16);
        let mut block = pool.acquire();
        block[0] = 0xAA;
        let addr = block.as_ptr();
        pool.release(block);
        assert_eq!(pool.idle(), 1);

        let again = pool.acquire();
        assert_eq!(again.as_ptr(), addr);
        assert_eq!(again[0], 0xAA);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn live_blocks_never_alias() {
        let pool = Arc::new(BlockPool::new(32));
        pool.release(pool.acquire());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for _ in 0..50 {
                        held.push(pool.acquire());
                    }
                    let addrs: Vec<usize> = held.iter().map(|b| b.as_ptr() as usize).collect();
                    for block in held {
                        pool.release(block);
                    }
                    addrs
                })
            })
            .collect();

        for handle in handles {
            let addrs = handle.join().unwrap();
            let unique: HashSet<_> = addrs.iter().collect();
            assert_eq!(unique.len(), addrs.len());
        }
    }

    #[test]
    fn concurrent_holders_get_distinct_buffers() {
        let pool = BlockPool::new(8);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.as_ptr(), b.as_ptr());
    }
}
