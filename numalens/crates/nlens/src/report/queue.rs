//! Bounded Priority Queue
//!
//! Keeps the K highest-scored items from an insertion stream. Backed by a
//! binary min-heap over (score, insertion sequence): the root is always the
//! weakest kept item, so a full queue admits a newcomer with one root
//! comparison. Ties break toward the later insertion, letting newer evidence
//! displace older equal-score findings.
//!
//! Only the shutdown reporter uses this, so it may allocate freely.

/// BoundedPriorityQueue - top-K by score, later-wins on ties
pub struct BoundedPriorityQueue<T> {
    heap: Vec<(u64, u64, T)>,
    capacity: usize,
    next_seq: u64,
}

impl<T> BoundedPriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// A later insertion outranks an equal score, so the weaker entry in
    /// the heap sense is the one with the *lower* sequence number.
    #[inline]
    fn weaker(a: &(u64, u64), b: &(u64, u64)) -> bool {
        a.0 < b.0 || (a.0 == b.0 && a.1 < b.1)
    }

    /// Offer one item. Returns false when the queue is full and the item
    /// does not outrank the current minimum.
    pub fn insert(&mut self, score: u64, item: T) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.heap.len() < self.capacity {
            self.heap.push((score, seq, item));
            self.sift_up(self.heap.len() - 1);
            return true;
        }

        let root = (self.heap[0].0, self.heap[0].1);
        if !Self::weaker(&root, &(score, seq)) {
            return false;
        }
        self.heap[0] = (score, seq, item);
        self.sift_down(0);
        true
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            let child_key = (self.heap[index].0, self.heap[index].1);
            let parent_key = (self.heap[parent].0, self.heap[parent].1);
            if !Self::weaker(&child_key, &parent_key) {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let mut weakest = left;
            if right < self.heap.len() {
                let left_key = (self.heap[left].0, self.heap[left].1);
                let right_key = (self.heap[right].0, self.heap[right].1);
                if Self::weaker(&right_key, &left_key) {
                    weakest = right;
                }
            }
            let weakest_key = (self.heap[weakest].0, self.heap[weakest].1);
            let index_key = (self.heap[index].0, self.heap[index].1);
            if !Self::weaker(&weakest_key, &index_key) {
                break;
            }
            self.heap.swap(index, weakest);
            index = weakest;
        }
    }

    /// Drain into a vector ordered by descending score (ties: later
    /// insertion first).
    pub fn into_sorted_desc(mut self) -> Vec<T> {
        self.heap
            .sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        self.heap.into_iter().map(|(_, _, item)| item).collect()
    }
}
