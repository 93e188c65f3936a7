pub mod backoff;
pub mod client;
pub mod error;
pub mod metrics;
pub mod model;
pub mod transport;

pub use client::{GithubClient, GithubClientBuilder, RequestKind};
pub use error::GithubError;
pub use model::{CommitAuthor, CommitPage, CommitPayload};
pub use transport::{HttpExec, ReqwestExecutor, TimeoutElapsed};
