//! Priority lanes: one FIFO of task ids per tier.

use std::collections::VecDeque;

use crate::task::Priority;
use crate::types::TaskId;

#[derive(Debug, Default)]
pub(crate) struct Lanes {
    lanes: [VecDeque<TaskId>; 3],
}

impl Lanes {
    /// Append to the tail of the task's lane.
    pub fn push(&mut self, priority: Priority, id: TaskId) {
        self.lanes[priority.lane_index()].push_back(id);
    }

    /// Head of the highest non-empty lane.
    pub fn pop(&mut self) -> Option<TaskId> {
        self.lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    /// Drop a queued id from whichever lane holds it.
    pub fn remove(&mut self, id: &TaskId) -> bool {
        for lane in &mut self.lanes {
            if let Some(pos) = lane.iter().position(|queued| queued == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn depth(&self, priority: Priority) -> usize {
        self.lanes[priority.lane_index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }
}
