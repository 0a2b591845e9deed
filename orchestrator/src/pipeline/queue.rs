//! Bounded priority queue of pending commands: urgent → high → normal →
//! low, FIFO within a level.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Command, CommandPriority, PipelineError};

const LEVELS: [CommandPriority; 4] = [
    CommandPriority::Urgent,
    CommandPriority::High,
    CommandPriority::Normal,
    CommandPriority::Low,
];

#[derive(Default)]
struct Levels {
    urgent: VecDeque<Command>,
    high: VecDeque<Command>,
    normal: VecDeque<Command>,
    low: VecDeque<Command>,
}

impl Levels {
    fn level_mut(&mut self, priority: CommandPriority) -> &mut VecDeque<Command> {
        match priority {
            CommandPriority::Urgent => &mut self.urgent,
            CommandPriority::High => &mut self.high,
            CommandPriority::Normal => &mut self.normal,
            CommandPriority::Low => &mut self.low,
        }
    }

    fn len(&self) -> usize {
        self.urgent.len() + self.high.len() + self.normal.len() + self.low.len()
    }
}

pub struct CommandQueue {
    levels: Mutex<Levels>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: Mutex::new(Levels::default()),
            capacity,
        }
    }

    pub fn push(&self, command: Command) -> Result<(), PipelineError> {
        let mut levels = self.levels.lock().expect("queue lock");
        if levels.len() >= self.capacity {
            return Err(PipelineError::QueueFull);
        }
        levels.level_mut(command.priority).push_back(command);
        Ok(())
    }

    /// Highest-priority command, FIFO within its level.
    pub fn pop(&self) -> Option<Command> {
        let mut levels = self.levels.lock().expect("queue lock");
        for priority in LEVELS {
            if let Some(command) = levels.level_mut(priority).pop_front() {
                return Some(command);
            }
        }
        None
    }

    /// Remove a still-queued command; true when it was present.
    pub fn remove(&self, command_id: &str) -> bool {
        let mut levels = self.levels.lock().expect("queue lock");
        for priority in LEVELS {
            let level = levels.level_mut(priority);
            if let Some(idx) = level.iter().position(|c| c.id == command_id) {
                level.remove(idx);
                return true;
            }
        }
        false
    }

    /// 1-based queue position across levels, if still queued.
    pub fn position(&self, command_id: &str) -> Option<usize> {
        let levels = self.levels.lock().expect("queue lock");
        let mut offset = 0usize;
        for queue in [&levels.urgent, &levels.high, &levels.normal, &levels.low] {
            if let Some(idx) = queue.iter().position(|c| c.id == command_id) {
                return Some(offset + idx + 1);
            }
            offset += queue.len();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.levels.lock().expect("queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(priority: CommandPriority) -> Command {
        Command::new("test").with_priority(priority)
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let queue = CommandQueue::new(16);
        let n1 = cmd(CommandPriority::Normal);
        let n2 = cmd(CommandPriority::Normal);
        let u = cmd(CommandPriority::Urgent);
        let h = cmd(CommandPriority::High);
        let l = cmd(CommandPriority::Low);
        let expected = vec![u.id.clone(), h.id.clone(), n1.id.clone(), n2.id.clone(), l.id.clone()];
        for c in [n1, n2, u, h, l] {
            queue.push(c).unwrap();
        }
        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|c| c.id).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn overflow_reports_queue_full() {
        let queue = CommandQueue::new(2);
        queue.push(cmd(CommandPriority::Normal)).unwrap();
        queue.push(cmd(CommandPriority::Urgent)).unwrap();
        assert!(matches!(
            queue.push(cmd(CommandPriority::Urgent)),
            Err(PipelineError::QueueFull)
        ));
    }

    #[test]
    fn remove_and_position_track_queued_commands() {
        let queue = CommandQueue::new(16);
        let first = cmd(CommandPriority::Normal);
        let second = cmd(CommandPriority::Normal);
        let first_id = first.id.clone();
        let second_id = second.id.clone();
        queue.push(first).unwrap();
        queue.push(second).unwrap();

        assert_eq!(queue.position(&second_id), Some(2));
        assert!(queue.remove(&first_id));
        assert_eq!(queue.position(&second_id), Some(1));
        assert!(!queue.remove(&first_id));
    }
}
