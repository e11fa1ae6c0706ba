mod helpers;
mod runner;

pub use tokio::test as test_attr;

pub use helpers::*;
pub use runner::{FrameReadback, TestRunner, TestRunnerBuilder};

/// Unwraps a runner, or ends the test early when there is no adapter to run it on.
#[macro_export]
macro_rules! no_gpu_return {
    ($runner:expr) => {
        match $runner {
            Ok(runner) => runner,
            Err(e) => {
                eprintln!("Skipping test, no usable adapter: {e:#}");
                return Ok(());
            }
        }
    };
}
