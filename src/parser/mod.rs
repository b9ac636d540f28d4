pub mod tasks;
pub mod template;

use std::sync::LazyLock;

use regex::Regex;

/// One `<...>` gap marker. Non-greedy, single line.
static SPAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").unwrap());

pub use tasks::{extract_tasks, Tasks};
pub use template::{segments, Segment};
