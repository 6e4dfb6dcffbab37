//! Bounded pool of reusable decode contexts
//!
//! Decoder instances are expensive to create (hardware sessions, worker
//! round trips), so released decoders are reset and parked in an idle set.
//! At most `max_pooled` pooled decoders exist at once, counting both idle
//! and in-use ones. When the pool is saturated a temporary decoder is
//! handed out instead; temporaries are closed on release and never pooled.

use super::{Decoder, DecoderFactory};
use crate::utils::error::Result;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct PoolInner<O> {
    idle: Vec<Box<dyn Decoder<Output = O>>>,
    in_use: usize,
    temporary: usize,
    max_pooled: usize,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pooled decoders waiting for reuse
    pub idle: usize,

    /// Pooled decoders currently acquired
    pub in_use: usize,

    /// Temporary decoders currently acquired
    pub temporary: usize,

    /// Decoders created over the pool's lifetime
    pub created: u64,
}

/// Bounded decoder pool
pub struct DecoderPool<O: Send + 'static> {
    factory: Arc<dyn DecoderFactory<O>>,
    inner: Arc<Mutex<PoolInner<O>>>,
    created: Mutex<u64>,
}

impl<O: Send + 'static> DecoderPool<O> {
    /// Create a pool that keeps at most `max_pooled` reusable decoders
    pub fn new(factory: Arc<dyn DecoderFactory<O>>, max_pooled: usize) -> Self {
        Self {
            factory,
            inner: Arc::new(Mutex::new(PoolInner {
                idle: Vec::new(),
                in_use: 0,
                temporary: 0,
                max_pooled,
            })),
            created: Mutex::new(0),
        }
    }

    /// Acquire a decoder; reuses an idle one when available
    pub fn acquire(&self) -> Result<PooledDecoder<O>> {
        let mut inner = self.inner.lock();

        while let Some(decoder) = inner.idle.pop() {
            if decoder.is_closed() {
                trace!("Discarding idle decoder that closed while parked");
                continue;
            }
            inner.in_use += 1;
            return Ok(PooledDecoder::new(decoder, false, Arc::clone(&self.inner)));
        }

        let decoder = self.factory.create()?;
        *self.created.lock() += 1;

        let temporary = inner.in_use + inner.idle.len() >= inner.max_pooled;
        if temporary {
            inner.temporary += 1;
            debug!(
                "Decoder pool saturated ({} in use), handing out temporary decoder",
                inner.in_use
            );
        } else {
            inner.in_use += 1;
        }

        Ok(PooledDecoder::new(decoder, temporary, Arc::clone(&self.inner)))
    }

    /// Return a decoder to the pool
    ///
    /// Equivalent to dropping the handle.
    pub fn release(&self, handle: PooledDecoder<O>) {
        drop(handle);
    }

    /// Close and drop every idle decoder
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for mut decoder in inner.idle.drain(..) {
            decoder.close();
        }
    }

    /// Current pool statistics
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            idle: inner.idle.len(),
            in_use: inner.in_use,
            temporary: inner.temporary,
            created: *self.created.lock(),
        }
    }
}

impl<O: Send + 'static> Drop for DecoderPool<O> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Decoder handle acquired from a [`DecoderPool`]
///
/// Dropping the handle releases it: pooled decoders are reset and parked,
/// temporary or closed decoders are torn down.
pub struct PooledDecoder<O: Send + 'static> {
    decoder: Option<Box<dyn Decoder<Output = O>>>,
    temporary: bool,
    pool: Arc<Mutex<PoolInner<O>>>,
}

impl<O: Send + 'static> PooledDecoder<O> {
    fn new(
        decoder: Box<dyn Decoder<Output = O>>,
        temporary: bool,
        pool: Arc<Mutex<PoolInner<O>>>,
    ) -> Self {
        Self {
            decoder: Some(decoder),
            temporary,
            pool,
        }
    }

    /// Whether this decoder will be torn down instead of pooled on release
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

impl<O: Send + 'static> Deref for PooledDecoder<O> {
    type Target = dyn Decoder<Output = O>;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the decoder out.
        match &self.decoder {
            Some(decoder) => &**decoder,
            None => unreachable!("pooled decoder used after release"),
        }
    }
}

impl<O: Send + 'static> DerefMut for PooledDecoder<O> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.decoder {
            Some(decoder) => &mut **decoder,
            None => unreachable!("pooled decoder used after release"),
        }
    }
}

impl<O: Send + 'static> Drop for PooledDecoder<O> {
    fn drop(&mut self) {
        let Some(mut decoder) = self.decoder.take() else {
            return;
        };

        let mut inner = self.pool.lock();
        if self.temporary {
            inner.temporary = inner.temporary.saturating_sub(1);
            decoder.close();
            trace!("Temporary decoder torn down");
            return;
        }

        inner.in_use = inner.in_use.saturating_sub(1);
        if decoder.is_closed() {
            debug!("Released decoder was closed, freeing its pool slot");
            return;
        }

        match decoder.reset() {
            Ok(()) => inner.idle.push(decoder),
            Err(e) => {
                warn!("Failed to reset released decoder, discarding it: {}", e);
                decoder.close();
            }
        }
    }
}
