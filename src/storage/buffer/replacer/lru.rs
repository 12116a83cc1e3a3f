use parking_lot::Mutex;

use crate::common::types::FrameId;

/// One arena slot per frame. `resident` doubles as list membership: a frame
/// is in the replacer iff it is currently evictable.
#[derive(Clone, Copy, Default)]
struct Node {
    prev: Option<FrameId>,
    next: Option<FrameId>,
    resident: bool,
}

struct LruList {
    nodes: Vec<Node>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
    len: usize,
}

/// LRU replacement policy over unpinned frames. The list is intrusive:
/// nodes live in an arena indexed by frame id, so pin/unpin are O(1) with
/// no per-entry allocation. Head is the least recently unpinned frame and
/// therefore the eviction victim.
pub struct LruReplacer {
    inner: Mutex<LruList>,
}

impl LruReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(LruList {
                nodes: vec![Node::default(); num_frames],
                head: None,
                tail: None,
                len: 0,
            }),
        }
    }

    /// Evict the least recently unpinned frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        let mut list = self.inner.lock();
        let frame_id = list.head?;
        list.unlink(frame_id);
        Some(frame_id)
    }

    /// A frame was pinned: it is no longer evictable. No-op when absent.
    pub fn pin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if frame_id < list.nodes.len() && list.nodes[frame_id].resident {
            list.unlink(frame_id);
        }
    }

    /// A frame's pin count dropped to zero: it becomes evictable. No-op
    /// when already present, so repeated unpins keep the original order.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if frame_id >= list.nodes.len() || list.nodes[frame_id].resident {
            return;
        }
        list.push_back(frame_id);
    }

    /// Number of evictable frames.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LruList {
    fn unlink(&mut self, frame_id: FrameId) {
        let node = self.nodes[frame_id];
        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        self.nodes[frame_id] = Node::default();
        self.len -= 1;
    }

    fn push_back(&mut self, frame_id: FrameId) {
        self.nodes[frame_id] = Node {
            prev: self.tail,
            next: None,
            resident: true,
        };
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(frame_id),
            None => self.head = Some(frame_id),
        }
        self.tail = Some(frame_id);
        self.len += 1;
    }
}
