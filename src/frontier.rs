//! FIFO crawl frontier with exact deduplication.

use std::collections::{HashSet, VecDeque};
use url::Url;

/// Reasons the frontier refuses a URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrontierError {
    /// The URL was already queued or fetched.
    #[error("already scheduled: {0}")]
    Duplicate(Url),
    /// The queue is at capacity; the URL is not marked as seen.
    #[error("queue full, dropped: {0}")]
    QueueFull(Url),
}

/// Breadth-first queue that schedules every URL at most once per run.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<Url>,
    seen: HashSet<String>,
    max_queue: usize,
}

impl Frontier {
    /// Creates an empty frontier holding at most `max_queue` pending URLs.
    pub fn new(max_queue: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            max_queue,
        }
    }

    /// Schedules `url` at the back of the queue.
    pub fn push(&mut self, url: Url) -> Result<(), FrontierError> {
        if self.seen.contains(url.as_str()) {
            return Err(FrontierError::Duplicate(url));
        }
        if self.queue.len() >= self.max_queue {
            return Err(FrontierError::QueueFull(url));
        }
        self.seen.insert(url.as_str().to_string());
        self.queue.push_back(url);
        Ok(())
    }

    /// Takes the oldest pending URL.
    pub fn pop(&mut self) -> Option<Url> {
        self.queue.pop_front()
    }

    /// Whether `url` has ever been scheduled.
    pub fn contains(&self, url: &Url) -> bool {
        self.seen.contains(url.as_str())
    }

    /// URLs still waiting to be fetched.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// URLs scheduled since the frontier was created.
    pub fn scheduled(&self) -> usize {
        self.seen.len()
    }
}
