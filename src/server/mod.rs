pub mod api;

use crate::cli::Args;
use governor::{ Quota, RateLimiter };
use log::{ info, warn };
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use self::api::{ router, AppState };

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        let state = match NonZeroU32::new(args.rate_limit_per_second) {
            Some(rate) => {
                info!("Rate limiting chat requests to {} per second", rate);
                state.with_limiter(Arc::new(RateLimiter::direct(Quota::per_second(rate))))
            }
            None => state,
        };
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = router(self.state.clone());

        match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert_path), Some(key_path)) => {
                let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_path,
                    key_path
                ).await?;
                info!("HTTPS server listening on: https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            (enable_tls, _, _) => {
                if enable_tls {
                    warn!("ENABLE_TLS is set but TLS_CERT_PATH/TLS_KEY_PATH are missing, serving plain HTTP");
                }
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!("HTTP server listening on: http://{}", addr);
                axum::serve(listener, app.into_make_service()).await?;
            }
        }
        Ok(())
    }
}
