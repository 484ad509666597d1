//! Public asset URL resolution.

/// Maps asset keys such as `badges/c1.png` to download URLs and back.
#[derive(Debug, Clone)]
pub struct AssetUrls {
    base_url: String,
}

impl AssetUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn download_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    /// Strip the base URL off `url`. Foreign URLs come back unchanged.
    pub fn strip_download_url(&self, url: &str) -> String {
        url.strip_prefix(&self.base_url)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_else(|| url.to_string())
    }
}
