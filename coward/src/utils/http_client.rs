use std::{sync::OnceLock, time::Duration};

use tracing::debug;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the client used for filter-list downloads.
///
/// `request_timeout` bounds the whole request, body included.
pub fn build_rules_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(request_timeout)
        .user_agent(concat!("coward/", env!("CARGO_PKG_VERSION")))
        .build()
}
