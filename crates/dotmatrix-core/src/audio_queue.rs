use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Single-producer / single-consumer ring buffer of mono i16 samples.
///
/// Intended for the emulator thread (producer) feeding an audio callback
/// thread (consumer).
///
/// This queue is *lossy* when full: the oldest sample is dropped to make
/// room, so the consumer always hears the most recent audio after a stall.
#[derive(Clone)]
pub struct AudioProducer {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct AudioConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    buf: Mutex<VecDeque<i16>>,
    cap: usize,
}

/// Create a producer/consumer pair sharing a ring of `capacity` samples.
pub fn audio_queue(capacity: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity.max(1);
    let inner = Arc::new(Inner {
        buf: Mutex::new(VecDeque::with_capacity(cap)),
        cap,
    });

    (
        AudioProducer {
            inner: Arc::clone(&inner),
        },
        AudioConsumer { inner },
    )
}

impl AudioProducer {
    pub fn push(&self, sample: i16) {
        let mut buf = self.inner.buf.lock().unwrap();
        if buf.len() == self.inner.cap {
            buf.pop_front();
        }
        buf.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.inner.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap
    }
}

impl AudioConsumer {
    /// Pop the oldest sample, or `None` on underflow (the host substitutes
    /// silence).
    pub fn pop(&self) -> Option<i16> {
        self.inner.buf.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.buf.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap
    }
}
