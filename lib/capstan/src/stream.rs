use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};

/// Pull-based source of streaming elements. `None` means the stream closed;
/// the queue and lazy-sequence flavors of the public API are both thin
/// adapters over this one seam.
pub trait Stream<T>: Send {
    fn pull(&mut self) -> Option<T>;
}

/// Queue-backed stream: blocks until the producer sends or hangs up.
pub struct QueueStream<T> {
    queue: Receiver<T>,
}

impl<T> QueueStream<T> {
    #[inline]
    pub fn new(queue: Receiver<T>) -> QueueStream<T> {
        QueueStream { queue }
    }
}

impl<T: Send> Stream<T> for QueueStream<T> {
    #[inline]
    fn pull(&mut self) -> Option<T> {
        self.queue.recv().ok()
    }
}

/// Lazy-sequence stream over any iterator.
pub struct IterStream<I> {
    iter: I,
}

impl<I> IterStream<I> {
    #[inline]
    pub fn new(iter: I) -> IterStream<I> {
        IterStream { iter }
    }
}

impl<I> Stream<I::Item> for IterStream<I>
where
    I: Iterator + Send,
{
    #[inline]
    fn pull(&mut self) -> Option<I::Item> {
        self.iter.next()
    }
}

/// Output side of a streaming bridge. Iterate (or `pull`) to drain; the flow
/// ends when the producing helper thread closes its sender.
pub struct Flow<T> {
    queue: Receiver<T>,
}

impl<T> Flow<T> {
    #[inline]
    pub fn pull(&mut self) -> Option<T> {
        self.queue.recv().ok()
    }
}

impl<T> Iterator for Flow<T> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        self.queue.recv().ok()
    }
}

impl<T: Send> Stream<T> for Flow<T> {
    #[inline]
    fn pull(&mut self) -> Option<T> {
        self.queue.recv().ok()
    }
}

/// Sender half of a flow, honoring the configured bound.
pub(crate) enum FlowSender<T> {
    Unbounded(Sender<T>),
    Bounded(SyncSender<T>),
}

impl<T> FlowSender<T> {
    /// Push one element downstream. Returns false once the receiver is gone.
    pub fn send(&self, item: T) -> bool {
        match self {
            FlowSender::Unbounded(tx) => tx.send(item).is_ok(),
            FlowSender::Bounded(tx) => tx.send(item).is_ok(),
        }
    }
}

impl<T> Clone for FlowSender<T> {
    fn clone(&self) -> Self {
        match self {
            FlowSender::Unbounded(tx) => FlowSender::Unbounded(tx.clone()),
            FlowSender::Bounded(tx) => FlowSender::Bounded(tx.clone()),
        }
    }
}

/// Open a flow, bounded when a queue bound is configured.
pub(crate) fn flow_channel<T>(bound: Option<usize>) -> (FlowSender<T>, Flow<T>) {
    match bound {
        Some(size) => {
            let (tx, rx) = sync_channel(size);
            (FlowSender::Bounded(tx), Flow { queue: rx })
        }
        None => {
            let (tx, rx) = channel();
            (FlowSender::Unbounded(tx), Flow { queue: rx })
        }
    }
}
