pub mod aggregate;
pub mod commits;
pub mod docid;
pub mod ledger;
pub mod metrics;
pub mod report;
pub mod scan;
pub mod service;

pub use commits::{AuthorInfo, CommitInfo, CommitSource, GithubCommitSource};
pub use ledger::MemoryLedger;
pub use report::{BackfillReport, DocReport};
pub use service::{BackfillJob, BackfillOptions};
