//! Bounded queue between the sampling clock domain and the output domain.
//!
//! The writer half is stepped by the sampling side, the reader half by the
//! output side, possibly on another thread. Neither side ever blocks: the
//! writer checks [`FifoWriter::ready`] and the reader checks
//! [`FifoReader::valid`], the same way a hardware FIFO exposes `!full` and
//! `!empty`.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

/// Create a FIFO holding up to `depth` entries (at least one).
///
/// The reader keeps one extra entry in its output register, which is what it
/// presents as valid.
pub fn async_fifo<T>(depth: usize) -> (FifoWriter<T>, FifoReader<T>) {
    let (tx, rx) = crossbeam_channel::bounded(depth.max(1));
    (
        FifoWriter { tx },
        FifoReader {
            rx,
            head: None,
            disconnected: false,
        },
    )
}

#[derive(Debug)]
pub struct FifoWriter<T> {
    tx: Sender<T>,
}

impl<T> FifoWriter<T> {
    /// There is room for one more entry
    pub fn ready(&self) -> bool {
        !self.tx.is_full()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Push one entry. Hands the entry back if the FIFO is full or the reader
    /// is gone.
    pub fn push(&self, item: T) -> Result<(), T> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item) | TrySendError::Disconnected(item)) => Err(item),
        }
    }
}

#[derive(Debug)]
pub struct FifoReader<T> {
    rx: Receiver<T>,
    head: Option<T>,
    disconnected: bool,
}

impl<T> FifoReader<T> {
    fn fill(&mut self) {
        if self.head.is_none() && !self.disconnected {
            match self.rx.try_recv() {
                Ok(item) => self.head = Some(item),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.disconnected = true,
            }
        }
    }

    /// An entry is presented this step
    pub fn valid(&mut self) -> bool {
        self.fill();
        self.head.is_some()
    }

    /// The presented entry, if any
    pub fn peek(&mut self) -> Option<&T> {
        self.fill();
        self.head.as_ref()
    }

    /// Advance one clock. Returns the presented entry if the consumer was
    /// ready for it.
    pub fn step(&mut self, ready: bool) -> Option<T> {
        self.fill();
        if ready {
            self.head.take()
        } else {
            None
        }
    }

    /// The writer was dropped and everything it pushed has been read
    pub fn is_drained(&mut self) -> bool {
        self.fill();
        self.disconnected && self.head.is_none()
    }
}
