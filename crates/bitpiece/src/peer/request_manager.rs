use std::{cmp::Reverse, collections::BinaryHeap};

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::tcp_wire::BlockInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pending {
    deadline: Instant,
    /// How many times this request has timed out.
    timeouts: u32,
}

/// Book keeping of the requests that were sent to a peer and not answered
/// yet, ordered by their deadline.
///
/// The heap is never searched, entries whose deadline no longer matches the
/// one in `requests` are stale and skipped when popped.
#[derive(Default, Debug)]
pub(crate) struct RequestManager {
    timeouts: BinaryHeap<Reverse<(Instant, BlockInfo)>>,
    requests: HashMap<BlockInfo, Pending>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn add_request(&mut self, block: BlockInfo, deadline: Instant) {
        self.requests.insert(
            block.clone(),
            Pending {
                deadline,
                timeouts: 0,
            },
        );
        self.timeouts.push(Reverse((deadline, block)));
    }

    /// Return true if the request exists, and false otherwise.
    pub fn remove_request(&mut self, block: &BlockInfo) -> bool {
        let removed = self.requests.remove(block).is_some();
        if self.requests.is_empty() {
            self.timeouts.clear();
        }
        removed
    }

    /// Remove every request, ordered by piece and offset.
    pub fn drain(&mut self) -> Vec<BlockInfo> {
        self.timeouts.clear();
        let mut blocks: Vec<BlockInfo> = self.requests.drain().map(|(block, _)| block).collect();
        blocks.sort();
        blocks
    }

    fn is_stale(&self, deadline: &Instant, block: &BlockInfo) -> bool {
        self.requests.get(block).map(|p| p.deadline) != Some(*deadline)
    }

    /// The earliest deadline of the pending requests.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, block))) = self.timeouts.peek() {
            if !self.is_stale(deadline, block) {
                return Some(*deadline);
            }
            self.timeouts.pop();
        }
        None
    }

    /// Get the blocks whose deadline is not after `now`, and move their
    /// deadline to `new_deadline`. Each block comes with the number of times
    /// it has timed out, this one included.
    pub fn get_timeout_blocks_and_update(
        &mut self,
        now: Instant,
        new_deadline: Instant,
    ) -> Vec<(BlockInfo, u32)> {
        let mut timed_out_blocks = Vec::new();

        while let Some(Reverse((deadline, _))) = self.timeouts.peek() {
            if *deadline > now {
                break;
            }

            let Some(Reverse((deadline, block))) = self.timeouts.pop() else {
                break;
            };

            let Some(pending) = self.requests.get_mut(&block) else {
                continue;
            };

            if pending.deadline != deadline {
                continue;
            }

            pending.deadline = new_deadline;
            pending.timeouts += 1;
            timed_out_blocks.push((block, pending.timeouts));
        }

        for (block, _) in &timed_out_blocks {
            self.timeouts.push(Reverse((new_deadline, block.clone())));
        }

        timed_out_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn add_request() {
        let mut manager = RequestManager::new();
        let block = BlockInfo::new(0, 0, 16384);
        let timeout = Instant::now();

        manager.add_request(block.clone(), timeout);

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.timeouts.len(), 1);
        assert!(manager.requests.contains_key(&block));
        assert_eq!(manager.next_deadline(), Some(timeout));
    }

    #[test]
    fn remove_request() {
        let mut manager = RequestManager::new();
        let block1 = BlockInfo::new(0, 0, 16384);
        let block2 = BlockInfo::new(0, 16384, 16384);
        let now = Instant::now();

        manager.add_request(block1.clone(), now);
        manager.add_request(block2.clone(), now + Duration::from_secs(1));

        assert!(manager.remove_request(&block1));
        assert!(!manager.requests.contains_key(&block1));
        assert_eq!(manager.len(), 1);

        // the stale heap entry of block1 is skipped
        assert_eq!(manager.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(manager.timeouts.len(), 1);

        assert!(manager.remove_request(&block2));
        assert!(manager.requests.is_empty());
        assert!(manager.timeouts.is_empty());
        assert_eq!(manager.next_deadline(), None);
    }

    #[test]
    fn remove_nonexistent_request() {
        let mut manager = RequestManager::new();
        let block = BlockInfo::new(0, 0, 16384);

        assert!(!manager.remove_request(&block));
    }

    #[test]
    fn get_timeout_blocks_and_update() {
        let mut manager = RequestManager::new();
        let now = Instant::now();

        let timed_out_block1 = BlockInfo::new(0, 0, 100);
        manager.add_request(timed_out_block1.clone(), now - Duration::from_secs(15));
        let timed_out_block2 = BlockInfo::new(0, 100, 200);
        manager.add_request(timed_out_block2.clone(), now - Duration::from_secs(10));
        let not_timed_out = BlockInfo::new(0, 300, 200);
        manager.add_request(not_timed_out.clone(), now + Duration::from_secs(10));

        let new_deadline = now + Duration::from_secs(60);
        let timed_out_blocks = manager.get_timeout_blocks_and_update(now, new_deadline);

        assert_eq!(
            timed_out_blocks,
            vec![(timed_out_block1.clone(), 1), (timed_out_block2, 1)]
        );
        assert_eq!(manager.len(), 3);
        assert_eq!(
            manager.next_deadline(),
            Some(now + Duration::from_secs(10))
        );

        // nothing else timed out yet
        assert!(manager.get_timeout_blocks_and_update(now, now).is_empty());

        // everything times out, the first two for the second time
        let later = now + Duration::from_secs(61);
        let mut timed_out_blocks = manager.get_timeout_blocks_and_update(later, later);
        timed_out_blocks.sort();
        assert_eq!(timed_out_blocks.len(), 3);
        assert_eq!(timed_out_blocks[0], (timed_out_block1, 2));
        assert_eq!(timed_out_blocks[2], (not_timed_out, 1));
    }

    #[test]
    fn readded_request_resets_timeouts() {
        let mut manager = RequestManager::new();
        let now = Instant::now();
        let block = BlockInfo::new(0, 0, 16384);

        manager.add_request(block.clone(), now);
        assert_eq!(manager.get_timeout_blocks_and_update(now, now)[0].1, 1);

        manager.remove_request(&block);
        manager.add_request(block.clone(), now);
        assert_eq!(
            manager.get_timeout_blocks_and_update(now, now),
            vec![(block, 1)]
        );
    }

    #[test]
    fn drain() {
        let mut manager = RequestManager::new();
        let block1 = BlockInfo::new(0, 0, 16384);
        let block2 = BlockInfo::new(0, 16384, 16384);
        let block3 = BlockInfo::new(1, 0, 16384);
        let timeout = Instant::now();

        manager.add_request(block3.clone(), timeout);
        manager.add_request(block2.clone(), timeout);
        manager.add_request(block1.clone(), timeout);

        let drained = manager.drain();

        assert!(manager.requests.is_empty());
        assert!(manager.timeouts.is_empty());
        assert_eq!(drained, vec![block1, block2, block3]);

        let drained = manager.drain();
        assert!(drained.is_empty());
    }
}
