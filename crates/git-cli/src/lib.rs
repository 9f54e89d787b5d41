//! Shell-based git adapter.
//!
//! Every operation invokes the `git` binary with a working directory. A
//! non-zero exit code maps to `None` / an empty collection — adapter
//! failures never propagate to callers as errors. Stderr is logged at
//! debug level for operators chasing a misbehaving repo.

pub mod diff;
pub mod ops;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use diff::{FileDiff, Hunk, parse_diff, serialize_diff};
pub use ops::{ChangeStatus, ChangedFile, CommitEntry};
