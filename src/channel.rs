use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::entries::WriterProp;
use crate::spsc_queue::ByteQueue;

/// The conduit between one writer and the session: an SPSC byte queue, a
/// close flag and the writer's mutable description.
///
/// Exactly one logical producer writes `queue`; only the session's consumer
/// reads it. The session owns the channel through its list and disposes of
/// it on the first consume pass that observes it closed and drained.
pub struct Channel {
    queue: ByteQueue,
    closed: AtomicBool,
    /// Guarded so `Session::set_channel_writer_*` cannot race the consumer
    /// packaging a batch.
    writer_prop: Mutex<WriterProp>,
}

impl Channel {
    pub(crate) fn new(queue_capacity: usize, writer_prop: WriterProp) -> Self {
        Self {
            queue: ByteQueue::with_capacity(queue_capacity),
            closed: AtomicBool::new(false),
            writer_prop: Mutex::new(writer_prop),
        }
    }

    #[inline]
    pub fn queue(&self) -> &ByteQueue {
        &self.queue
    }

    /// Marks the channel as no longer written. The producer calls this when
    /// abandoning the channel; everything still in the queue will be drained
    /// before the session removes it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Snapshot of the close flag. The session samples this *before*
    /// inspecting the queue; see the consume loop for why the order matters.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn writer_prop(&self) -> MutexGuard<'_, WriterProp> {
        self.writer_prop.lock()
    }

    /// Copy of the current writer description.
    pub fn writer_prop_snapshot(&self) -> WriterProp {
        self.writer_prop.lock().clone()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("queue", &self.queue)
            .field("closed", &self.is_closed())
            .field("writer_prop", &*self.writer_prop.lock())
            .finish()
    }
}
