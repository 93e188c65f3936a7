pub const REPOSITORY_METADATA: &str = "ResolveRepositoryMetadata";
pub const REPOSITORY_METADATA_QUERY: &str = r#"
query ResolveRepositoryMetadata($owner: String!, $repo: String!) {
  repository(owner: $owner, name: $repo) {
    id
    discussionCategories(first: 50) {
      nodes {
        id
        name
        slug
      }
    }
  }
}
"#;

pub const SEARCH_DISCUSSION: &str = "SearchDiscussionByDocId";
pub const SEARCH_DISCUSSION_QUERY: &str = r#"
query SearchDiscussionByDocId($query: String!) {
  search(query: $query, first: 10, type: DISCUSSION) {
    nodes {
      ... on Discussion {
        id
        number
        title
        url
        createdAt
        repository {
          nameWithOwner
        }
      }
    }
  }
}
"#;

pub const DISCUSSION_WITH_COMMENTS: &str = "DiscussionWithComments";
pub const DISCUSSION_WITH_COMMENTS_QUERY: &str = r#"
query DiscussionWithComments(
  $id: ID!
  $commentPageSize: Int!
  $commentCursor: String
  $replyPageSize: Int!
) {
  node(id: $id) {
    ... on Discussion {
      id
      number
      title
      url
      body
      createdAt
      author {
        login
        avatarUrl
        url
      }
      comments(first: $commentPageSize, after: $commentCursor) {
        totalCount
        pageInfo {
          hasNextPage
          endCursor
        }
        nodes {
          id
          body
          bodyHTML
          bodyText
          createdAt
          url
          isAnswer
          author {
            login
            avatarUrl
            url
          }
          replies(first: $replyPageSize) {
            totalCount
            pageInfo {
              hasNextPage
              endCursor
            }
            nodes {
              id
              body
              bodyHTML
              bodyText
              createdAt
              url
              author {
                login
                avatarUrl
                url
              }
            }
          }
        }
      }
    }
  }
}
"#;

pub const CREATE_DISCUSSION: &str = "CreateDiscussion";
pub const CREATE_DISCUSSION_MUTATION: &str = r#"
mutation CreateDiscussion(
  $repositoryId: ID!
  $categoryId: ID!
  $title: String!
  $body: String!
) {
  createDiscussion(
    input: {
      repositoryId: $repositoryId
      categoryId: $categoryId
      title: $title
      body: $body
    }
  ) {
    discussion {
      id
      number
      title
      url
      createdAt
    }
  }
}
"#;

pub const ADD_DISCUSSION_COMMENT: &str = "AddDiscussionComment";
pub const ADD_DISCUSSION_COMMENT_MUTATION: &str = r#"
mutation AddDiscussionComment($discussionId: ID!, $body: String!) {
  addDiscussionComment(input: { discussionId: $discussionId, body: $body }) {
    comment {
      id
      body
      bodyHTML
      bodyText
      createdAt
      url
      author {
        login
        avatarUrl
        url
      }
    }
  }
}
"#;

pub const ADD_DISCUSSION_REPLY: &str = "AddDiscussionReply";
pub const ADD_DISCUSSION_REPLY_MUTATION: &str = r#"
mutation AddDiscussionReply($commentId: ID!, $body: String!) {
  addDiscussionReply(input: { commentId: $commentId, body: $body }) {
    comment {
      id
      body
      bodyHTML
      bodyText
      createdAt
      url
      author {
        login
        avatarUrl
        url
      }
    }
  }
}
"#;
