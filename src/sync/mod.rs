pub mod archive;
pub mod stats;
pub mod triggers;

pub use archive::{archive_past_shows, ArchiveSummary};
pub use stats::{recalculate_review_stats, ReviewStats};
pub use triggers::{DocumentTrigger, TriggerRegistry};
