//! Command-line interface for formwatch.
//!
//! This binary controls and inspects the formwatch daemon via its HTTP
//! API.

use std::env;

use anyhow::{Context, Result};

use formwatch::api_client::{
    self,
    types::{MonitorState, SoundState},
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let rest: Vec<&str> = args[2..].iter().map(String::as_str).collect();

    match (args[1].as_str(), rest.as_slice()) {
        ("status", []) => cmd_status().await?,
        ("slots", []) => cmd_slots().await?,
        ("start", [slot]) => cmd_start(slot).await?,
        ("stop", []) => cmd_stop().await?,
        ("ack", []) => cmd_ack().await?,
        ("sound", []) => cmd_sound().await?,
        ("sound", ["set", path]) => cmd_sound_set(path, "").await?,
        ("sound", ["set", path, name @ ..]) => cmd_sound_set(path, &name.join(" ")).await?,
        ("sound", ["clear"]) => cmd_sound_clear().await?,
        (command, _) => {
            eprintln!("Unknown command or arguments: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn usage() {
    eprintln!("Usage: formwatch-cli <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                  Show monitor status");
    eprintln!("  slots                   List monitorable slots");
    eprintln!("  start <slot>            Start monitoring a slot");
    eprintln!("  stop                    Stop monitoring");
    eprintln!("  ack                     Acknowledge the alarm");
    eprintln!("  sound                   Show the alarm sound");
    eprintln!("  sound set <path> [name] Import a custom alarm sound");
    eprintln!("  sound clear             Go back to the bundled sound");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  FORMWATCH_API_URL    API base URL (default: {})",
        api_client::DEFAULT_BASE_URL
    );
}

/// Build an API client, honoring FORMWATCH_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("FORMWATCH_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn print_monitor(state: &MonitorState) {
    match (&state.slot, &state.slot_description) {
        (Some(slot), Some(description)) => println!("Slot:     {} ({})", slot, description),
        (Some(slot), None) => println!("Slot:     {}", slot),
        _ => println!("Slot:     (none)"),
    }
    println!("Alarm:    {}", state.alarm);
    if let Some(display) = state.display {
        println!("Form:     {}", display);
    }
    println!("Episodes: {}", state.episodes);

    println!("Channels:");
    for channel in &state.channels {
        if !channel.running {
            println!("  - {}: stopped", channel.channel);
            continue;
        }
        let last = channel
            .last_outcome
            .map(|outcome| outcome.to_string())
            .unwrap_or_else(|| "pending".to_string());
        println!(
            "  - {}: {} (last {}, {} polls, {} consecutive errors)",
            channel.channel, channel.state, last, channel.polls, channel.consecutive_errors
        );
        if let Some(message) = &channel.last_message {
            println!("      {}", message);
        }
    }
}

fn print_sound(sound: &SoundState) {
    match (&sound.name, sound.custom) {
        (Some(name), true) => println!("Alarm sound: {} (custom)", name),
        (Some(name), false) => println!("Alarm sound: bundled default ({} is missing)", name),
        (None, _) => println!("Alarm sound: bundled default"),
    }
}

async fn cmd_status() -> Result<()> {
    let state = make_client().get_monitor().await?;
    print_monitor(&state);
    Ok(())
}

async fn cmd_slots() -> Result<()> {
    let slots = make_client().get_slots().await?;
    for slot in &slots {
        println!("{:<10} {} {}", slot.id, slot.day, slot.label);
    }
    Ok(())
}

async fn cmd_start(slot: &str) -> Result<()> {
    let state = make_client().start(slot, None).await?;
    print_monitor(&state);
    Ok(())
}

async fn cmd_stop() -> Result<()> {
    let state = make_client().stop().await?;
    print_monitor(&state);
    Ok(())
}

async fn cmd_ack() -> Result<()> {
    let state = make_client().acknowledge().await?;
    print_monitor(&state);
    Ok(())
}

async fn cmd_sound() -> Result<()> {
    let sound = make_client().get_sound().await?;
    print_sound(&sound);
    Ok(())
}

async fn cmd_sound_set(path: &str, name: &str) -> Result<()> {
    // The daemon resolves the path, so hand it an absolute one.
    let path = std::path::absolute(path).with_context(|| format!("resolving {}", path))?;
    let sound = make_client()
        .set_sound(&path.to_string_lossy(), name)
        .await?;
    print_sound(&sound);
    Ok(())
}

async fn cmd_sound_clear() -> Result<()> {
    let sound = make_client().clear_sound().await?;
    print_sound(&sound);
    Ok(())
}
