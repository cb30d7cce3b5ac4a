//! Audiobookshelf client.
//!
//! Triggers a library rescan after a new episode lands and provides the
//! episode URL for the email link. Both calls are best-effort and the media
//! server being down never blocks the digest.

use reqwest::Client;
use tracing::{info, warn};

use crate::config::LibraryConfig;

pub struct LibraryClient {
    config: LibraryConfig,
    client: Client,
}

impl LibraryClient {
    pub fn new(config: LibraryConfig) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { config, client })
    }

    /// Kick off an async library scan so the new episode shows up.
    /// Returns true if the server accepted the request.
    pub async fn trigger_scan(&self) -> bool {
        let url = format!(
            "{}/api/libraries/{}/scan",
            self.config.base_url.trim_end_matches('/'),
            self.config.library_id
        );

        match self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Audiobookshelf library scan triggered");
                true
            }
            Ok(resp) => {
                warn!("Audiobookshelf scan returned status {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Could not trigger Audiobookshelf scan: {e}");
                false
            }
        }
    }

    /// Base URL for linking the episode in the digest email.
    pub fn podcast_url(&self) -> String {
        self.config.base_url.trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn podcast_url_trims_trailing_slash() {
        let client = LibraryClient::new(LibraryConfig {
            base_url: "http://localhost:13378/".into(),
            api_key: "token".into(),
            library_id: "lib".into(),
        })
        .unwrap();
        assert_eq!(client.podcast_url(), "http://localhost:13378");
    }
}
