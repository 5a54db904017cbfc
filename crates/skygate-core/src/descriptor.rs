//! # Feed Descriptors
//!
//! A descriptor names which remote source a feed is read from.
//!
//! ## Grammar
//! ```text
//! following
//! author|<did>|<filter>      filter optional, defaults to posts_with_replies
//! feedgen|<uri>              "generator|<uri>" is accepted as an alias
//! likes|<did>
//! list|<uri>
//! <anything else>            the public default feed (fallback chain)
//! ```
//!
//! Only the Feed Resolver consumes descriptors. A known tag with a missing or
//! malformed argument is a validation error; an unknown tag is not, it selects
//! the default feed.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Which posts of an author feed are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorFilter {
    #[default]
    PostsWithReplies,
    PostsNoReplies,
    PostsWithMedia,
    PostsAndAuthorThreads,
}

impl AuthorFilter {
    /// The value sent to the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorFilter::PostsWithReplies => "posts_with_replies",
            AuthorFilter::PostsNoReplies => "posts_no_replies",
            AuthorFilter::PostsWithMedia => "posts_with_media",
            AuthorFilter::PostsAndAuthorThreads => "posts_and_author_threads",
        }
    }
}

impl std::str::FromStr for AuthorFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts_with_replies" => Ok(AuthorFilter::PostsWithReplies),
            "posts_no_replies" => Ok(AuthorFilter::PostsNoReplies),
            "posts_with_media" => Ok(AuthorFilter::PostsWithMedia),
            "posts_and_author_threads" => Ok(AuthorFilter::PostsAndAuthorThreads),
            _ => Err(ValidationError::NotAllowed {
                field: "filter".to_string(),
                allowed: vec![
                    "posts_with_replies".to_string(),
                    "posts_no_replies".to_string(),
                    "posts_with_media".to_string(),
                    "posts_and_author_threads".to_string(),
                ],
            }),
        }
    }
}

/// A tagged feed source. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedDescriptor {
    /// The session's home timeline.
    Following,
    /// One actor's posts.
    Author { actor: String, filter: AuthorFilter },
    /// A custom feed generator.
    Generator { uri: String },
    /// Posts an actor has liked.
    Likes { actor: String },
    /// Posts from the members of a list.
    List { uri: String },
    /// The default landing feed, served by the fallback chain.
    #[default]
    Public,
}

impl FeedDescriptor {
    /// Parses an optional descriptor string; absent or blank means the
    /// default feed.
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, ValidationError> {
        match raw {
            Some(raw) => raw.parse(),
            None => Ok(FeedDescriptor::Public),
        }
    }

    /// Returns true if the caller named a specific source. Explicit
    /// descriptors fail loudly; only the default feed degrades.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, FeedDescriptor::Public)
    }

    /// Returns true if reading this feed needs a session.
    pub fn requires_session(&self) -> bool {
        matches!(self, FeedDescriptor::Following)
    }

    /// Query-key fragment; equal descriptors share cache entries.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for FeedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedDescriptor::Following => write!(f, "following"),
            FeedDescriptor::Author { actor, filter } => {
                write!(f, "author|{}|{}", actor, filter.as_str())
            }
            FeedDescriptor::Generator { uri } => write!(f, "feedgen|{}", uri),
            FeedDescriptor::Likes { actor } => write!(f, "likes|{}", actor),
            FeedDescriptor::List { uri } => write!(f, "list|{}", uri),
            FeedDescriptor::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for FeedDescriptor {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('|');
        let tag = parts.next().unwrap_or_default();
        let first = parts.next().map(str::trim).unwrap_or_default();
        let second = parts.next().map(str::trim).unwrap_or_default();

        let required = |field: &str, value: &str| {
            if value.is_empty() {
                Err(ValidationError::Required {
                    field: field.to_string(),
                })
            } else {
                Ok(value.to_string())
            }
        };

        match tag {
            "following" => Ok(FeedDescriptor::Following),
            "author" => {
                let actor = required("actor", first)?;
                let filter = if second.is_empty() {
                    AuthorFilter::default()
                } else {
                    second.parse()?
                };
                Ok(FeedDescriptor::Author { actor, filter })
            }
            "feedgen" | "generator" => Ok(FeedDescriptor::Generator {
                uri: required("uri", first)?,
            }),
            "likes" => Ok(FeedDescriptor::Likes {
                actor: required("actor", first)?,
            }),
            "list" => Ok(FeedDescriptor::List {
                uri: required("uri", first)?,
            }),
            _ => Ok(FeedDescriptor::Public),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_tag() {
        assert_eq!("following".parse::<FeedDescriptor>().unwrap(), FeedDescriptor::Following);
        assert_eq!(
            "author|did:plc:abc|posts_with_media".parse::<FeedDescriptor>().unwrap(),
            FeedDescriptor::Author {
                actor: "did:plc:abc".into(),
                filter: AuthorFilter::PostsWithMedia,
            }
        );
        assert_eq!(
            "generator|at://x/y".parse::<FeedDescriptor>().unwrap(),
            FeedDescriptor::Generator { uri: "at://x/y".into() }
        );
        assert_eq!(
            "likes|did:plc:abc".parse::<FeedDescriptor>().unwrap(),
            FeedDescriptor::Likes { actor: "did:plc:abc".into() }
        );
        assert_eq!(
            "list|at://did:plc:abc/app.bsky.graph.list/1".parse::<FeedDescriptor>().unwrap(),
            FeedDescriptor::List { uri: "at://did:plc:abc/app.bsky.graph.list/1".into() }
        );
    }

    #[test]
    fn test_author_filter_defaults() {
        let descriptor: FeedDescriptor = "author|alice.test".parse().unwrap();
        assert_eq!(
            descriptor,
            FeedDescriptor::Author {
                actor: "alice.test".into(),
                filter: AuthorFilter::PostsWithReplies,
            }
        );
        assert!("author|alice.test|everything".parse::<FeedDescriptor>().is_err());
    }

    #[test]
    fn test_unknown_or_missing_is_default_feed() {
        assert_eq!("".parse::<FeedDescriptor>().unwrap(), FeedDescriptor::Public);
        assert_eq!("discover".parse::<FeedDescriptor>().unwrap(), FeedDescriptor::Public);
        assert_eq!(FeedDescriptor::parse_or_default(None).unwrap(), FeedDescriptor::Public);
        assert!(!FeedDescriptor::Public.is_explicit());
    }

    #[test]
    fn test_known_tag_missing_argument_is_rejected() {
        assert!("feedgen|".parse::<FeedDescriptor>().is_err());
        assert!("likes".parse::<FeedDescriptor>().is_err());
        assert!("author||posts_no_replies".parse::<FeedDescriptor>().is_err());
    }

    #[test]
    fn test_display_is_canonical() {
        let descriptor: FeedDescriptor = "generator|at://x/y".parse().unwrap();
        assert_eq!(descriptor.to_string(), "feedgen|at://x/y");
        assert_eq!(descriptor.to_string().parse::<FeedDescriptor>().unwrap(), descriptor);
        assert!(FeedDescriptor::Following.requires_session());
    }
}
