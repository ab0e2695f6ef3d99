#![allow(dead_code, unused_imports)]

pub use flowdag_test_utils::builders;
pub use flowdag_test_utils::probe;
pub use flowdag_test_utils::{init_tracing, with_timeout};

use flowdag::exec::{BatchResult, TaskStatus};

/// Status of `id` in `batch`, panicking if the task is missing.
pub fn status_of<T>(batch: &BatchResult<T>, id: &str) -> TaskStatus {
    batch
        .result(id)
        .unwrap_or_else(|| panic!("no result for task '{id}'"))
        .status
}
