pub mod db_assertions;
pub mod mock_events;
pub mod test_harness;

pub use db_assertions::DbAssertions;
pub use mock_events::{EventBuilder, ShowSeeder, ReviewSeeder};
pub use test_harness::TestHarness;
