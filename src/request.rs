//! Request parsing module
//!
//! Turns the raw text of an inbound message into a typed download request.
//! Accepted shapes are `<series>` for a whole series and `<series> <ordinal>`
//! for a single episode, where `<series>` is a catalog link or a bare series
//! identifier.

use crate::file_operations::sanitize_filename;
use thiserror::Error;

/// Quality tiers requested when the caller does not ask for specific ones
pub const DEFAULT_QUALITIES: [u32; 3] = [360, 720, 1080];

/// Errors that can occur while parsing request text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The request text contained no tokens at all
    #[error("Empty request: send a series link, optionally followed by an episode number")]
    Empty,

    /// The request text did not have one or two tokens
    #[error("Expected `<series> [episode]`, got {0} tokens")]
    WrongTokenCount(usize),

    /// The episode token was not a positive integer
    #[error("Episode must be a positive integer, got `{0}`")]
    InvalidOrdinal(String),
}

/// What a request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Every episode of the series, handed to the resolver as one link
    AllEpisodes(String),
    /// One episode, addressed by its 1-based position in the series
    SingleEpisode(String, u32),
}

/// A parsed download request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// What to download
    pub target: RequestTarget,
    /// Quality tiers in processing order
    pub qualities: Vec<u32>,
}

impl DownloadRequest {
    /// Creates a request for the given target using the default quality tiers
    pub fn new(target: RequestTarget) -> Self {
        Self {
            target,
            qualities: DEFAULT_QUALITIES.to_vec(),
        }
    }

    /// Replaces the requested quality tiers
    ///
    /// Duplicates are dropped, keeping the first occurrence. An empty list
    /// keeps the current tiers.
    pub fn with_qualities(mut self, qualities: &[u32]) -> Self {
        if qualities.is_empty() {
            return self;
        }

        let mut unique = Vec::with_capacity(qualities.len());
        for quality in qualities {
            if !unique.contains(quality) {
                unique.push(*quality);
            }
        }
        self.qualities = unique;
        self
    }

    /// The series identifier as supplied by the requester
    pub fn series_id(&self) -> &str {
        match &self.target {
            RequestTarget::AllEpisodes(series) | RequestTarget::SingleEpisode(series, _) => series,
        }
    }

    /// The requested episode ordinal, if any
    pub fn ordinal(&self) -> Option<u32> {
        match self.target {
            RequestTarget::AllEpisodes(_) => None,
            RequestTarget::SingleEpisode(_, ordinal) => Some(ordinal),
        }
    }

    /// Filesystem-safe slug derived from the series identifier
    pub fn series_slug(&self) -> String {
        series_slug(self.series_id())
    }
}

/// Parses raw request text into a [`DownloadRequest`] with default qualities
///
/// # Examples
///
/// ```
/// use episode_courier::{parse_request, RequestTarget};
///
/// let request = parse_request("bleach 5").unwrap();
/// assert_eq!(request.target, RequestTarget::SingleEpisode("bleach".to_string(), 5));
/// ```
pub fn parse_request(text: &str) -> Result<DownloadRequest, ParseError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let target = match tokens.as_slice() {
        [] => return Err(ParseError::Empty),
        [series] => RequestTarget::AllEpisodes(series.to_string()),
        [series, ordinal] => {
            let ordinal = parse_ordinal(ordinal)?;
            RequestTarget::SingleEpisode(series.to_string(), ordinal)
        }
        more => return Err(ParseError::WrongTokenCount(more.len())),
    };

    Ok(DownloadRequest::new(target))
}

fn parse_ordinal(token: &str) -> Result<u32, ParseError> {
    match token.parse::<u32>() {
        Ok(0) | Err(_) => Err(ParseError::InvalidOrdinal(token.to_string())),
        Ok(ordinal) => Ok(ordinal),
    }
}

/// Derives a filesystem-safe slug from a series identifier
///
/// Trailing slashes are stripped and the last path segment is sanitized, so
/// both `https://animepahe.ru/anime/abc-123/` and `abc-123` yield `abc-123`.
pub fn series_slug(series_id: &str) -> String {
    let trimmed = series_id.trim().trim_end_matches('/');
    let last_segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    // Query strings are not part of the identity
    let last_segment = last_segment.split(['?', '#']).next().unwrap_or(last_segment);

    let slug = sanitize_filename(last_segment);
    if slug.is_empty() {
        "series".to_string()
    } else {
        slug
    }
}
