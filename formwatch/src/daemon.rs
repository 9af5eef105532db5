//! Daemon wiring: storage, alarm outputs, channels and the control API.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::alarm::sound::AlarmSoundResolver;
use crate::api::{self, SharedState};
use crate::config::Config;
use crate::coordinator::ChannelCoordinator;
use crate::outputs::{AlarmOutputs, LogNotifier, LogPlayback, PlaybackSink};
use crate::session::Channel;
use crate::status::HttpStatusSource;
use crate::store::{JsonFileStore, KeyValueStore, SELECTED_SLOT_KEY};
use crate::tracing::prelude::*;

/// Run the daemon until `shutdown` is cancelled.
///
/// On the way out every channel is stopped and in-flight polls are
/// awaited. The selected slot stays persisted so the next run resumes it.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        status_url = %config.status_url,
        data_dir = %config.data_dir.display(),
        interval_s = config.poll_interval.as_secs(),
        "formwatch starting"
    );

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(config.state_file()).context("opening state store")?,
    );
    let sounds = Arc::new(Mutex::new(AlarmSoundResolver::new(
        store.clone(),
        config.sounds_dir(),
    )));
    let outputs = AlarmOutputs::new(playback_sink(), Arc::new(LogNotifier), sounds.clone());
    let source = HttpStatusSource::new(&config.status_url, config.request_timeout)
        .context("creating HTTP client")?;

    let coordinator = Arc::new(ChannelCoordinator::new(
        Arc::new(source),
        outputs,
        store.clone(),
        config.poll_interval,
        config.request_timeout,
    ));

    resume(&config, &coordinator, store.as_ref());

    let state = SharedState {
        coordinator: coordinator.clone(),
        sounds,
    };
    let served = api::serve(config.api_addr, state, shutdown).await;

    info!("Shutting down");
    coordinator.shutdown().await;
    served
}

/// Start monitoring the configured slot, or the one selected by the
/// previous run.
fn resume(config: &Config, coordinator: &ChannelCoordinator, store: &dyn KeyValueStore) {
    let persisted = || match store.get(SELECTED_SLOT_KEY) {
        Ok(slot) => slot,
        Err(e) => {
            warn!(error = %e, "Failed to read selected slot");
            None
        }
    };

    let Some(slot_id) = config.slot.clone().or_else(persisted) else {
        info!("No slot selected; waiting for a start request");
        return;
    };

    let channels: &[Channel] = if config.interactive {
        &Channel::ALL
    } else {
        &[Channel::Background]
    };

    for &channel in channels {
        if let Err(e) = coordinator.start_channel(channel, &slot_id) {
            warn!(slot = %slot_id, %channel, error = %e, "Failed to resume monitoring");
        }
    }
}

#[cfg(feature = "audio")]
fn playback_sink() -> Arc<dyn PlaybackSink> {
    match crate::outputs::RodioPlayback::new() {
        Ok(playback) => Arc::new(playback),
        Err(e) => {
            warn!(error = %e, "Alarm audio unavailable, alarms will be silent");
            Arc::new(LogPlayback)
        }
    }
}

#[cfg(not(feature = "audio"))]
fn playback_sink() -> Arc<dyn PlaybackSink> {
    Arc::new(LogPlayback)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::ack_key;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            status_url: "http://127.0.0.1:9".into(),
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(1),
            api_addr: "127.0.0.1:0".parse().unwrap(),
            data_dir: dir.to_path_buf(),
            slot: None,
            interactive: true,
        }
    }

    #[tokio::test]
    async fn shutdown_keeps_selection_for_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.slot = Some("tue_930".into());

        let shutdown = CancellationToken::new();
        let daemon = tokio::spawn(run(config.clone(), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        daemon.await.unwrap().unwrap();

        let store = JsonFileStore::open(config.state_file()).unwrap();
        assert_eq!(
            store.get(SELECTED_SLOT_KEY).unwrap().as_deref(),
            Some("tue_930")
        );
        assert_eq!(store.get(&ack_key("tue_930")).unwrap(), None);
    }

    #[tokio::test]
    async fn resumes_persisted_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.interactive = false;

        let store = Arc::new(JsonFileStore::open(config.state_file()).unwrap());
        store.set(SELECTED_SLOT_KEY, "fri_1110").unwrap();

        let coordinator = ChannelCoordinator::new(
            Arc::new(HttpStatusSource::new(&config.status_url, config.request_timeout).unwrap()),
            AlarmOutputs::new(
                Arc::new(LogPlayback),
                Arc::new(LogNotifier),
                Arc::new(Mutex::new(AlarmSoundResolver::new(store.clone(), config.sounds_dir()))),
            ),
            store.clone(),
            config.poll_interval,
            config.request_timeout,
        );

        resume(&config, &coordinator, store.as_ref());

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.slot.as_deref(), Some("fri_1110"));
        let running: Vec<Channel> = snapshot
            .channels
            .iter()
            .filter(|c| c.running)
            .map(|c| c.channel)
            .collect();
        assert_eq!(running, [Channel::Background]);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn nothing_to_resume() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = Arc::new(crate::store::MemoryStore::new());
        let coordinator = ChannelCoordinator::new(
            Arc::new(HttpStatusSource::new(&config.status_url, config.request_timeout).unwrap()),
            AlarmOutputs::new(
                Arc::new(LogPlayback),
                Arc::new(LogNotifier),
                Arc::new(Mutex::new(AlarmSoundResolver::new(store.clone(), config.sounds_dir()))),
            ),
            store.clone(),
            config.poll_interval,
            config.request_timeout,
        );

        resume(&config, &coordinator, store.as_ref());
        assert!(coordinator.active_slot().is_none());
    }
}
