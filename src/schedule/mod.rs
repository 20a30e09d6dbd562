pub mod matcher;
pub mod recurrence;

pub use matcher::{due_calls, due_calls_in, next_due, DueCall};
pub use recurrence::{latest_occurrence, next_occurrence_after, utc_zone};
