//! Collaborator implementations behind the execution engine's trait seams:
//! CLI request building, HTTP specification resolution, HTTP dependency
//! fetching, process launch and supervision, and workspace cleanup.

pub mod cleanup;
pub mod fetcher;
pub mod launcher;
pub mod monitor;
pub mod request_builder;
pub mod resolver;

pub use cleanup::WorkspaceCleanup;
pub use fetcher::HttpResourceFetcher;
pub use launcher::ProcessLauncher;
pub use monitor::ProcessMonitor;
pub use request_builder::CliRequestBuilder;
pub use resolver::HttpSpecificationResolver;
