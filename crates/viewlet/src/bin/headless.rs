//! Headless remote harness: a spawnable worker process around
//! [`HeadlessWidget`], for demos and end-to-end tests.

use viewlet::{HeadlessWidget, Readiness, RemoteConfig};

/// When set, the widget never reports load-finished, so received
/// commands stay deferred forever.
const HOLD_READY_ENV: &str = "VIEWLET_HEADLESS_HOLD";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    viewlet::logging::init();

    let config = RemoteConfig::from_env()?;
    let readiness = Readiness::new();
    let widget = HeadlessWidget::new(readiness.clone())
        .with_hold_ready(std::env::var_os(HOLD_READY_ENV).is_some());

    viewlet::run_remote(widget, config, readiness).await?;
    Ok(())
}
