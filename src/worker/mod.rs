pub mod dispatcher;
pub mod poller;
pub mod retry;

// Re-export commonly used types
pub use dispatcher::{Dispatcher, JobResult};
pub use poller::{JobPoller, PollResult};
pub use retry::RetryPolicy;
