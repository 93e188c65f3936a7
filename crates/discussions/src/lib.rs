pub mod dto;
pub mod error;
pub mod lock;
pub mod metadata;
pub mod queries;
pub mod service;

pub use dto::{
    CommentsCollection, DiscussionAuthor, DiscussionComment, DiscussionReply, DiscussionResponse,
    DiscussionSummary, PageInfo, RepliesConnection, Validate,
};
pub use error::{DiscussionError, DtoIssue};
pub use lock::{CreationGuard, CreationLock, HeldLock, KeyedMutexLock};
pub use metadata::{MetadataCache, MetadataResolver, RepositoryMetadata};
pub use service::{
    build_discussion_body, AddComment, AddReply, DiscussionService, DiscussionThread,
    EnsureDiscussion, FetchOptions,
};
