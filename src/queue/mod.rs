//! Background Analysis Queue: priority ring buffer feeding delayed post-hoc
//! reflection, with retry accounting and dead-letter handling.

pub mod background;
pub mod item;

pub use background::{spawn_drainer, BackgroundQueue, EnqueueOutcome, QueueConfig};
pub use item::{PriorityClass, QueueItem};
