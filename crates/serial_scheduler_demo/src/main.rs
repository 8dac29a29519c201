// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serial scheduler demo.
//!
//! Simulates a scrolling list whose rows play a staggered three-step
//! transition, recycling row views while the run is in progress. Time is
//! simulated, so the run finishes instantly.
//!
//! Usage: `serial_scheduler_demo [settings.ron]`
//!
//! A settings path that does not exist yet is created with the defaults.
//!
//! Set `RUST_LOG=serial_scheduler=trace` to also see absorbed stale signals.

mod list;
mod settings;

use list::VirtualList;
use settings::DemoSettings;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["serial_scheduler=debug", "serial_scheduler_demo=info"] {
        match directive.parse::<tracing_subscriber::filter::Directive>() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {directive}: {e}"),
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting serial scheduler demo v{}", env!("CARGO_PKG_VERSION"));

    let settings = match std::env::args().nth(1) {
        Some(path) if !Path::new(&path).exists() => {
            let settings = DemoSettings::default();
            match settings.save(Path::new(&path)) {
                Ok(()) => tracing::info!("Wrote default settings to {}", path),
                Err(e) => tracing::warn!("Failed to write default settings to {}: {e}", path),
            }
            settings
        }
        Some(path) => match DemoSettings::load(Path::new(&path)) {
            Ok(settings) => {
                tracing::info!("Loaded settings from {}", path);
                settings
            }
            Err(e) => {
                tracing::error!("Failed to load settings from {}: {e}", path);
                std::process::exit(1);
            }
        },
        None => DemoSettings::default(),
    };

    let mut list = match VirtualList::new(&settings) {
        Ok(list) => list,
        Err(e) => {
            tracing::error!("Invalid schedule: {e}");
            std::process::exit(1);
        }
    };

    list.run(&settings);

    tracing::info!(
        "Simulated {:?}: {} rows finished, {} failed, first visible row {}",
        list.now(),
        list.finished().len(),
        list.failed_count(),
        list.first_visible()
    );
}
