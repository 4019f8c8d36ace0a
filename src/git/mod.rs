//! Git access: CLI operations, libgit2 queries and URL helpers.

mod cli;
mod repo;
pub mod runner;
mod url;

pub use cli::{CommitOutcome, GitCli, GitError, validate_git_ref};
pub use repo::{repository_exists, resolve_head};
pub use runner::{CommandOutput, CommandRunner, Invocation, SystemRunner, program_available};
pub use url::{Transport, redact_credentials};
