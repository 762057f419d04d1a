//! Per-frame bookkeeping: frames in flight and deferred deletion
//!
//! GPU work runs one frame behind the CPU. Anything a frame's commands may
//! still read (a binding-table slot, a texture) is queued on that frame's
//! [`DeletionQueue`] and only released once the same frame slot comes around
//! again, after its fence has been waited.
//!
//! ```text
//!  frame N     record ──► submit ──► (GPU drains)
//!  frame N+1              record ──► submit
//!  frame N+2  wait fence(N) ─► flush queue(N) ─► record ...
//! ```

/// Number of frames recorded ahead of the GPU
pub const FRAME_OVERLAP: usize = 2;

type DeletionTask<B, S> = Box<dyn FnOnce(&mut B, &mut S)>;

/// A queue of deferred release tasks, run last-in first-out.
///
/// `B` is the device context handed to every task; `S` is optional owner state
/// (for example the binding tables whose slots are being released).
pub struct DeletionQueue<B, S = ()> {
    tasks: Vec<DeletionTask<B, S>>,
}

impl<B, S> std::fmt::Debug for DeletionQueue<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl<B, S> Default for DeletionQueue<B, S> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<B, S> DeletionQueue<B, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: impl FnOnce(&mut B, &mut S) + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Run every pending task, most recently queued first
    pub fn flush(&mut self, backend: &mut B, state: &mut S) {
        if !self.tasks.is_empty() {
            log::trace!("Flushing {} deferred deletions", self.tasks.len());
        }
        while let Some(task) = self.tasks.pop() {
            task(backend, state);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Fixed ring of per-frame data indexed by a monotonically increasing frame number
#[derive(Debug)]
pub struct FrameRing<T> {
    frames: [T; FRAME_OVERLAP],
    frame_number: u64,
}

impl<T: Default> Default for FrameRing<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> FrameRing<T> {
    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        Self {
            frames: std::array::from_fn(f),
            frame_number: 0,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn index(&self) -> usize {
        (self.frame_number % FRAME_OVERLAP as u64) as usize
    }

    pub fn current(&self) -> &T {
        &self.frames[self.index()]
    }

    pub fn current_mut(&mut self) -> &mut T {
        let index = self.index();
        &mut self.frames[index]
    }

    /// Move on to the next frame slot
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.frames.iter_mut()
    }

    /// Consume the ring, yielding each frame's data
    pub fn into_frames(self) -> [T; FRAME_OVERLAP] {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletion_queue_runs_lifo() {
        let mut queue: DeletionQueue<Vec<u32>> = DeletionQueue::new();
        for i in 0..3 {
            queue.push(move |log: &mut Vec<u32>, _: &mut ()| log.push(i));
        }
        assert_eq!(queue.len(), 3);

        let mut log = Vec::new();
        queue.flush(&mut log, &mut ());

        assert_eq!(log, vec![2, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_deletion_queue_passes_state() {
        let mut queue: DeletionQueue<(), Vec<&'static str>> = DeletionQueue::new();
        queue.push(|_, freed: &mut Vec<&'static str>| freed.push("slot"));
        queue.push(|_, freed: &mut Vec<&'static str>| freed.push("texture"));

        let mut freed = Vec::new();
        queue.flush(&mut (), &mut freed);
        assert_eq!(freed, vec!["texture", "slot"]);
    }

    #[test]
    fn test_frame_ring_wraps() {
        let mut ring = FrameRing::from_fn(|i| i * 10);
        assert_eq!(*ring.current(), 0);
        ring.advance();
        assert_eq!(*ring.current(), 10);
        ring.advance();
        assert_eq!(*ring.current(), 0);
        assert_eq!(ring.frame_number(), 2);

        *ring.current_mut() = 5;
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![5, 10]);
    }
}
