//! CLI command handling
//!
//! Resolves configuration, wires the real browser and host into a
//! [`DebugSessionController`] and reports results.

use std::path::Path;
use std::sync::Arc;

use crate::browser::discovery::EdgeLocator;
use crate::bundle::{self, BundleContentLoader};
use crate::cdp::ChromiumLauncher;
use crate::commands::Commands;
use crate::common::config::{DebugConfiguration, LaunchConfig, Settings};
use crate::common::{Error, Result};
use crate::controller::DebugSessionController;
use crate::dap;
use crate::host::StandaloneHost;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Launch { config, name, yes } => {
            let config = load_config(&config, name.as_deref())?;
            let host = StandaloneHost::new(yes);
            let controller = build_controller(config.clone(), Arc::clone(&host));

            println!("Debugging {} at {}", config.location.control_name(), config.url);
            println!("Close the browser or press Ctrl+C to stop.");

            let session = async {
                controller.launch().await?;
                tokio::select! {
                    _ = controller.wait_stopped() => {}
                    _ = host.wait_shutdown() => {}
                }
                Ok::<_, Error>(())
            };

            let result = tokio::select! {
                result = session => result,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
                    }
                    println!("Stopping...");
                    Ok(())
                }
            };

            controller.teardown().await;
            controller.dispose();
            if result.is_ok() {
                println!("Debug session ended");
            }
            result
        }

        Commands::Adapter { config, name, yes } => {
            let config = load_config(&config, name.as_deref())?;
            let host = StandaloneHost::new(yes);
            let controller = build_controller(config, host);
            dap::serve(controller, tokio::io::stdin()).await
        }

        Commands::Browsers => {
            let found = EdgeLocator::new().discover_all();
            if found.is_empty() {
                println!("No Microsoft Edge installation found");
            } else {
                println!("Edge installations:");
                for (flavor, path) in &found {
                    println!("  {:<8} {}", flavor.to_string(), path.display());
                }
            }
            Ok(())
        }

        Commands::CheckBundle { file } => {
            let loaded = BundleContentLoader::new(&file).load_file_contents().await?;
            println!("{}: {} bytes", loaded.file_name, loaded.text.len());
            if bundle::has_inline_source_map(&loaded.text) {
                println!("Inline source map: present");
            } else {
                println!("Inline source map: missing (build with devtool 'inline-source-map')");
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path, name: Option<&str>) -> Result<LaunchConfig> {
    let settings = Settings::load()?;
    let config = DebugConfiguration::load(path, name)?;
    let resolved = LaunchConfig::resolve(&config, &settings)?;
    tracing::debug!(
        name = %resolved.name,
        port = resolved.port,
        bundle = %resolved.bundle_path().display(),
        "Resolved launch configuration"
    );
    Ok(resolved)
}

fn build_controller(config: LaunchConfig, host: Arc<StandaloneHost>) -> Arc<DebugSessionController> {
    let launcher = ChromiumLauncher::new(config.timeouts.browser_start());
    DebugSessionController::new(config, Arc::new(EdgeLocator::new()), Arc::new(launcher), host)
}
