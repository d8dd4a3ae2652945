pub mod ids;
pub mod record;
pub mod timestamp;
pub mod events;

pub use ids::{JobId, WorkerId};
pub use record::{JobRecord, JobState, DEFAULT_QUEUE};
pub use events::JobEvent;
