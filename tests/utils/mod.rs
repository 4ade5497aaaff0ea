pub mod actions;
pub mod assertions;
pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use actions::TestClient;
#[allow(unused_imports)]
pub use assertions::{expect_no_more_events, next_event};
#[allow(unused_imports)]
pub use setup::{TestSetup, TestSetupBuilder};
