//! Version control backends.
//!
//! - [`git`]: Git working copies, driven through the `git` CLI
//!
//! Each backend implements [`crate::repository::Repository`] and owns its own
//! root discovery, so [`crate::repository::create_repository_from_path`] can
//! probe them in turn.

pub mod git;
