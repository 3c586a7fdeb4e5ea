//! handfx: gesture-controlled music player.
//!
//! Plays a track (or a directory of tracks) with reverb and delay that are
//! steered by hand landmarks from an external tracker.
//!
//! ## Command line
//!
//! `handfx [PATH] [--landmarks FILE] [--camera N] [--config FILE]
//! [--block-size N] [--save-config] [--list-devices]`

mod app;
mod asset;
mod audio_device;
mod audio_engine;
mod audio_io;
mod coordinator;
mod debounce;
mod error;
mod fx;
mod fx_components;
mod gesture;
mod library;
mod mapper;
mod settings;
mod tracker;
mod volume;

use anyhow::Result;

fn main() -> Result<()> {
    // Set RUST_LOG=debug for per-second status lines.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = settings::parse_args(std::env::args().skip(1))?;
    if cli.help {
        println!("{}", settings::USAGE);
        return Ok(());
    }
    if cli.list_devices {
        for name in audio_device::output_device_names()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let settings_path = settings::settings_path(cli.config_path.as_deref());
    let mut app_settings = settings::load_settings(settings_path.as_deref());
    app_settings.apply_cli(&cli);
    if cli.save_config {
        if let Some(path) = &settings_path {
            settings::save_settings(&app_settings, path);
        }
    }

    log::info!("handfx starting up");
    if let Err(e) = app::run(app_settings) {
        log::error!("{:#}", e);
        return Err(e);
    }
    log::info!("handfx stopped");
    Ok(())
}
