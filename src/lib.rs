pub mod backends;
pub mod command;
pub mod commands;
pub mod config;
pub mod error;
pub mod repository;
pub mod watch;

mod app;

// Re-export the types most callers need
pub use app::App;
pub use config::Config;
pub use error::RepoError;
pub use error::RepoResult;
pub use repository::AnyRepository;
pub use repository::Repository;
pub use repository::VcsKind;
pub use repository::create_repository;
pub use repository::create_repository_from_path;

// Disable colors for all tests to get clean output
#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    colored::control::set_override(false);
}
