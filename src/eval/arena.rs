// eval/arena.rs - Pass-scoped buffer registry
//
// Every intermediate buffer the scheduler allocates during one pass is
// registered here exactly once and released in a single `dispose_all` call
// after the caller has joined the terminal handle. The early-return fault
// branches in the scheduler therefore never need their own cleanup.
//
// The caller's terminal output buffer and externally injected buffers are
// never registered: the caller owns those.

use crate::error::FieldError;
use crate::eval::field::FieldBuffer;

/// Stable id of a registered buffer. Ids keep increasing across disposals,
/// so an id from a released pass is detected instead of aliasing a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct BufferArena {
    live: Vec<FieldBuffer>,
    /// Ids below this value belong to already-released buffers.
    released_before: usize,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take shared ownership of `buffer` until the next `dispose_all`.
    pub fn register(&mut self, buffer: FieldBuffer) -> BufferId {
        let id = BufferId(self.released_before + self.live.len());
        self.live.push(buffer);
        id
    }

    pub fn get(&self, id: BufferId) -> Result<&FieldBuffer, FieldError> {
        id.0
            .checked_sub(self.released_before)
            .and_then(|slot| self.live.get(slot))
            .ok_or(FieldError::DisposedAccess(id.0))
    }

    /// Buffers currently held.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Total buffers ever registered with this arena.
    pub fn registered(&self) -> usize {
        self.released_before + self.live.len()
    }

    /// Total buffers ever released by this arena.
    pub fn disposed(&self) -> usize {
        self.released_before
    }

    /// Release every registered buffer and clear the registry.
    ///
    /// The caller must have joined every handle that writes or reads these
    /// buffers; the arena does not check.
    pub fn dispose_all(&mut self) -> usize {
        let count = self.live.len();
        self.live.clear();
        self.released_before += count;
        tracing::debug!(count, "released pass buffers");
        count
    }
}
