mod input;
mod render;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ctrl_core::client::{MixerApi, MixerClient};
use ctrl_core::controller::Controller;
use ctrl_core::image::HandleRegistry;
use ctrl_core::session::{PollConfig, SessionCommand};
use ctrl_core::settings::{ConnectionSettings, SettingsStore};
use input::Input;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resoctrl", about = "Remote control for a live video mixer")]
struct Args {
    /// Mixer host. Overrides the stored settings for this run only.
    #[arg(long, env = "RESOCTRL_HOST", global = true)]
    host: Option<String>,

    #[arg(long, env = "RESOCTRL_PORT", global = true)]
    port: Option<u16>,

    /// Settings file (defaults to the user config directory).
    #[arg(long, value_name = "PATH", global = true)]
    settings_file: Option<PathBuf>,

    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    #[arg(long, default_value_t = 1000)]
    preview_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive remote: renders the composition and reads commands from stdin.
    Watch {
        /// Write each new master preview image to this file.
        #[arg(long, value_name = "PATH")]
        preview_out: Option<PathBuf>,
    },
    /// Trigger a clip (numbers start at 1).
    Trigger { layer: String, clip: String },
    /// Clear a layer.
    Clear { layer: String },
    /// Set a layer's opacity (0.0 - 1.0).
    Opacity { layer: String, value: f32 },
    /// Trigger a whole column.
    Column { column: String },
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    Set { host: String, port: u16 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = match args.settings_file.clone() {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::open_default()?,
    };

    match args.command {
        Command::Watch { ref preview_out } => {
            let config = PollConfig {
                snapshot_interval: Duration::from_millis(args.poll_ms.max(1)),
                preview_interval: Duration::from_millis(args.preview_ms.max(1)),
            };
            let overridden = args.host.is_some() || args.port.is_some();
            let settings = resolve_settings(&store, &args).await;
            let mut controller = Controller::with_http(store, config);
            if overridden {
                controller.start_with(settings).await?;
            } else {
                controller.start().await?;
            }
            let result = watch(&mut controller, preview_out.as_deref()).await;
            controller.shutdown().await;
            result
        }
        Command::Trigger {
            ref layer,
            ref clip,
        } => {
            let client = one_shot_client(&store, &args).await?;
            client
                .trigger_clip(input::index(layer, "layer")?, input::index(clip, "clip")?)
                .await?;
            eprintln!("clip triggered");
            Ok(())
        }
        Command::Clear { ref layer } => {
            let client = one_shot_client(&store, &args).await?;
            client.clear_layer(input::index(layer, "layer")?).await?;
            eprintln!("layer cleared");
            Ok(())
        }
        Command::Opacity { ref layer, value } => {
            let client = one_shot_client(&store, &args).await?;
            client
                .set_opacity(input::index(layer, "layer")?, value)
                .await?;
            eprintln!("opacity set");
            Ok(())
        }
        Command::Column { ref column } => {
            let client = one_shot_client(&store, &args).await?;
            client
                .trigger_column(input::index(column, "column")?)
                .await?;
            eprintln!("column triggered");
            Ok(())
        }
        Command::Settings(SettingsCommand::Show) => {
            let settings = store.load().await;
            println!("{settings}");
            eprintln!("settings file: {}", store.path().display());
            Ok(())
        }
        Command::Settings(SettingsCommand::Set { ref host, port }) => {
            let settings = ConnectionSettings::new(host.trim(), port);
            store
                .save(&settings)
                .await
                .with_context(|| format!("failed to save {}", store.path().display()))?;
            eprintln!("saved {settings} to {}", store.path().display());
            Ok(())
        }
    }
}

async fn resolve_settings(store: &SettingsStore, args: &Args) -> ConnectionSettings {
    let mut settings = store.load().await;
    if let Some(host) = &args.host {
        settings.host = host.trim().to_string();
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    settings
}

async fn one_shot_client(store: &SettingsStore, args: &Args) -> anyhow::Result<MixerClient> {
    let settings = resolve_settings(store, args).await;
    settings.validate()?;
    Ok(MixerClient::new(&settings, HandleRegistry::new())?)
}

async fn watch(controller: &mut Controller, preview_out: Option<&Path>) -> anyhow::Result<()> {
    let mut views = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut written_preview = None;
    eprintln!("{}", input::HELP);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let (text, preview) = {
                    let view = views.borrow_and_update();
                    (render::render(&view), view.preview.clone())
                };
                print!("{text}");

                if let (Some(path), Some(image)) = (preview_out, preview) {
                    if written_preview != Some(image.id()) {
                        tokio::fs::write(path, image.bytes())
                            .await
                            .with_context(|| format!("failed to write preview to {}", path.display()))?;
                        written_preview = Some(image.id());
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match input::parse(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(parsed)) => {
                        if let Err(e) = dispatch(controller, parsed).await {
                            eprintln!("error: {e:#}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn dispatch(controller: &mut Controller, parsed: Input) -> anyhow::Result<()> {
    let command = match parsed {
        Input::Trigger { layer, clip } => SessionCommand::TriggerClip {
            layer_index: layer,
            clip_index: clip,
        },
        Input::Clear { layer } => SessionCommand::ClearLayer { layer_index: layer },
        Input::Opacity { layer, value } => SessionCommand::SetOpacity {
            layer_index: layer,
            value,
        },
        Input::Column { column } => SessionCommand::TriggerColumn {
            column_index: column,
        },
        Input::Reload => SessionCommand::ReloadThumbnails,
        Input::Host { host, port } => {
            controller
                .apply_settings(ConnectionSettings::new(host, port))
                .await?;
            return Ok(());
        }
        Input::Help => {
            eprintln!("{}", input::HELP);
            return Ok(());
        }
        Input::Quit => return Ok(()),
    };
    controller.send(command).await?;
    Ok(())
}
