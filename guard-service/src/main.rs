use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use guard_service::{build_router, GuardConfig, KeySource};
use jwt_guard::JwksProvider;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GuardConfig::from_env().context("failed to load guard-service configuration")?;
    let handle = config.build_validator()?;

    if let (Some(jwks), KeySource::Jwks { refresh, .. }) = (handle.jwks.clone(), &config.key_source)
    {
        // Keys are also fetched lazily on the first unknown kid.
        if let Err(err) = jwks.refresh().await {
            warn!(error = %err, jwks_url = %jwks.fetcher().url(), "initial JWKS fetch failed");
        }
        spawn_jwks_refresh(jwks, *refresh);
    }

    let app = build_router(handle.validator, &config.allowed_origins);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "starting guard-service");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn spawn_jwks_refresh(jwks: Arc<JwksProvider>, period: Duration) {
    let url = jwks.fetcher().url().to_owned();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and startup already fetched.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match jwks.refresh().await {
                Ok(count) => {
                    debug!(count, jwks_url = %url, "refreshed JWKS keys");
                }
                Err(err) => {
                    warn!(error = %err, jwks_url = %url, "failed to refresh JWKS keys");
                }
            }
        }
    });
}
