/// AnimePahe catalog provider implementation.
use super::animepahe_types::ReleasePage;
use super::{CatalogError, CatalogProvider, EpisodeDescriptor, EpisodeNumber};
use tracing::debug;

/// Upper bound on pages fetched for a single series
const MAX_PAGES: u32 = 100;

/// Catalog provider for the AnimePahe release API.
///
/// Walks `{base_url}/api?m=release&id=<series>&sort=episode_asc&page=<n>`
/// until the last page and concatenates the results.
pub struct AnimePaheCatalog {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl AnimePaheCatalog {
    /// Creates a provider for the catalog at `base_url` (e.g. `https://animepahe.ru`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Extracts the series session token from a link or bare identifier.
    pub(crate) fn series_session(series_id: &str) -> &str {
        let trimmed = series_id.trim().trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        last.split(['?', '#']).next().unwrap_or(last)
    }

    fn fetch_page(&self, session: &str, page: u32) -> Result<ReleasePage, CatalogError> {
        let url = format!("{}/api", self.base_url);
        let page_param = page.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("m", "release"),
                ("id", session),
                ("sort", "episode_asc"),
                ("page", page_param.as_str()),
            ])
            .send()
            .map_err(|e| CatalogError::RequestError(e.to_string()))?;

        if response.status() == 404 {
            return Err(CatalogError::SeriesNotFound(session.to_string()));
        }

        if !response.status().is_success() {
            return Err(CatalogError::RequestError(format!(
                "HTTP {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .text()
            .map_err(|e| CatalogError::RequestError(e.to_string()))?;

        parse_release_page(&body)
    }
}

/// Parses one release page body.
fn parse_release_page(body: &str) -> Result<ReleasePage, CatalogError> {
    serde_json::from_str(body).map_err(|e| CatalogError::ParseError(e.to_string()))
}

/// Converts a release page into episode descriptors.
fn convert_page(page: ReleasePage) -> Vec<EpisodeDescriptor> {
    page.data
        .unwrap_or_default()
        .into_iter()
        .map(|release| EpisodeDescriptor {
            number: EpisodeNumber::from(&release.episode),
            session: release.session,
        })
        .collect()
}

impl CatalogProvider for AnimePaheCatalog {
    fn fetch_episodes(&self, series_id: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
        let session = Self::series_session(series_id);
        let mut episodes = Vec::new();
        let mut page = 1;

        loop {
            let release_page = self.fetch_page(session, page)?;
            let last_page = release_page.last_page.min(MAX_PAGES);
            episodes.extend(convert_page(release_page));

            debug!(series = session, page, last_page, "fetched catalog page");

            if page >= last_page {
                break;
            }
            page += 1;
        }

        Ok(episodes)
    }
}
