//! Alarm side effects: sound playback and notifications.
//!
//! The coordinator owns one [`AlarmOutputs`] and drives it from alarm
//! transitions. Sinks are fire-and-forget; a playback failure is logged
//! and never prevents the notification from being shown.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::alarm::sound::{AlarmSoundResolver, SoundRef};
use crate::slot;
use crate::tracing::prelude::*;

pub const ALARM_TITLE: &str = "Form is open!";

/// Shows alarm and status notifications to the user.
pub trait NotificationSink: Send + Sync {
    /// Show a notification that stays until cancelled.
    fn show_persistent_alarm(&self, title: &str, body: &str);

    fn cancel_persistent_alarm(&self);

    fn show_transient_status(&self, title: &str, body: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Device(String),

    #[error("cannot play {path}: {reason}")]
    Source { path: PathBuf, reason: String },

    #[error("audio thread has exited")]
    Disconnected,
}

/// Plays the alarm sound.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, sound: &SoundRef, looping: bool) -> Result<(), PlaybackError>;
    fn stop(&self);
}

/// Notification sink that writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn show_persistent_alarm(&self, title: &str, body: &str) {
        warn!(title, body, "ALARM");
    }

    fn cancel_persistent_alarm(&self) {
        info!("Alarm notification cleared");
    }

    fn show_transient_status(&self, title: &str, body: &str) {
        info!(title, body, "Status");
    }
}

/// Playback sink for builds without audio output.
#[derive(Debug, Default)]
pub struct LogPlayback;

impl PlaybackSink for LogPlayback {
    fn play(&self, sound: &SoundRef, looping: bool) -> Result<(), PlaybackError> {
        info!(sound = ?sound, looping, "Playing alarm sound");
        Ok(())
    }

    fn stop(&self) {
        info!("Alarm sound stopped");
    }
}

/// Keeps at most one alarm sound playing.
struct PlaybackGuard {
    sink: Arc<dyn PlaybackSink>,
    active: bool,
}

impl PlaybackGuard {
    fn start(&mut self, sound: &SoundRef) {
        if self.active {
            debug!("Alarm sound already playing");
            return;
        }
        match self.sink.play(sound, true) {
            Ok(()) => self.active = true,
            Err(e) => warn!(error = %e, "Alarm audio unavailable"),
        }
    }

    fn stop(&mut self) {
        if self.active {
            self.sink.stop();
            self.active = false;
        }
    }
}

/// Owned handles for everything the alarm does when it fires.
pub struct AlarmOutputs {
    playback: Mutex<PlaybackGuard>,
    notifier: Arc<dyn NotificationSink>,
    sounds: Arc<Mutex<AlarmSoundResolver>>,
}

impl AlarmOutputs {
    pub fn new(
        playback: Arc<dyn PlaybackSink>,
        notifier: Arc<dyn NotificationSink>,
        sounds: Arc<Mutex<AlarmSoundResolver>>,
    ) -> Self {
        Self {
            playback: Mutex::new(PlaybackGuard {
                sink: playback,
                active: false,
            }),
            notifier,
            sounds,
        }
    }

    /// Start the looping alarm sound and post the persistent alarm.
    pub fn raise(&self, slot_id: &str) {
        let sound = self.sounds.lock().resolve_playback_source();
        self.playback.lock().start(&sound);

        let when = slot::find(slot_id)
            .map(|slot| slot.describe())
            .unwrap_or_else(|| slot_id.to_string());
        let body = format!("{when} is accepting responses. Acknowledge to silence the alarm.");
        self.notifier.show_persistent_alarm(ALARM_TITLE, &body);
    }

    /// Stop the alarm sound and cancel the persistent alarm.
    pub fn silence(&self) {
        self.playback.lock().stop();
        self.notifier.cancel_persistent_alarm();
    }

    pub fn status(&self, title: &str, body: &str) {
        self.notifier.show_transient_status(title, body);
    }

    pub fn is_sounding(&self) -> bool {
        self.playback.lock().active
    }
}

#[cfg(feature = "audio")]
pub use self::audio::RodioPlayback;

#[cfg(feature = "audio")]
mod audio {
    //! Playback through the default output device.
    //!
    //! `rodio`'s output stream is not `Send`, so a dedicated thread owns
    //! it and receives commands over a channel.

    use std::fs::File;
    use std::io::BufReader;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use rodio::source::SineWave;
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

    use super::{PlaybackError, PlaybackSink};
    use crate::alarm::sound::SoundRef;
    use crate::tracing::prelude::*;

    const TONE_HZ: f32 = 880.0;
    const TONE_ON: Duration = Duration::from_millis(400);
    const TONE_OFF: Duration = Duration::from_millis(250);
    const TONE_VOLUME: f32 = 0.3;
    /// Length of a one-shot play of the bundled tone.
    const TONE_ONE_SHOT: Duration = Duration::from_secs(3);

    enum Command {
        Play {
            sound: SoundRef,
            looping: bool,
            reply: mpsc::Sender<Result<(), PlaybackError>>,
        },
        Stop,
    }

    pub struct RodioPlayback {
        commands: mpsc::Sender<Command>,
    }

    impl RodioPlayback {
        /// Open the default output device on a dedicated thread.
        pub fn new() -> Result<Self, PlaybackError> {
            let (commands, rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel();

            thread::Builder::new()
                .name("alarm-audio".into())
                .spawn(move || run(rx, ready_tx))
                .map_err(|e| PlaybackError::Device(e.to_string()))?;

            ready_rx.recv().map_err(|_| PlaybackError::Disconnected)??;
            Ok(Self { commands })
        }
    }

    impl PlaybackSink for RodioPlayback {
        fn play(&self, sound: &SoundRef, looping: bool) -> Result<(), PlaybackError> {
            let (reply, response) = mpsc::channel();
            self.commands
                .send(Command::Play {
                    sound: sound.clone(),
                    looping,
                    reply,
                })
                .map_err(|_| PlaybackError::Disconnected)?;
            response.recv().map_err(|_| PlaybackError::Disconnected)?
        }

        fn stop(&self) {
            let _ = self.commands.send(Command::Stop);
        }
    }

    fn run(commands: mpsc::Receiver<Command>, ready: mpsc::Sender<Result<(), PlaybackError>>) {
        let (_stream, handle) = match OutputStream::try_default() {
            Ok(output) => output,
            Err(e) => {
                let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        let mut current: Option<Sink> = None;
        while let Ok(command) = commands.recv() {
            match command {
                Command::Play {
                    sound,
                    looping,
                    reply,
                } => {
                    if let Some(sink) = current.take() {
                        sink.stop();
                    }
                    let result = start(&handle, &sound, looping).map(|sink| {
                        current = Some(sink);
                    });
                    let _ = reply.send(result);
                }
                Command::Stop => {
                    if let Some(sink) = current.take() {
                        sink.stop();
                    }
                }
            }
        }
        debug!("Audio thread exiting");
    }

    fn start(handle: &OutputStreamHandle, sound: &SoundRef, looping: bool) -> Result<Sink, PlaybackError> {
        let sink = Sink::try_new(handle).map_err(|e| PlaybackError::Device(e.to_string()))?;

        match sound {
            SoundRef::Bundled => {
                let beeps = SineWave::new(TONE_HZ)
                    .take_duration(TONE_ON)
                    .amplify(TONE_VOLUME)
                    .delay(TONE_OFF)
                    .repeat_infinite();
                if looping {
                    sink.append(beeps);
                } else {
                    sink.append(beeps.take_duration(TONE_ONE_SHOT));
                }
            }
            SoundRef::Custom(path) => {
                let source_error = |reason: String| PlaybackError::Source {
                    path: path.clone(),
                    reason,
                };
                let file = File::open(path).map_err(|e| source_error(e.to_string()))?;
                let decoder =
                    Decoder::new(BufReader::new(file)).map_err(|e| source_error(e.to_string()))?;
                if looping {
                    sink.append(decoder.repeat_infinite());
                } else {
                    sink.append(decoder);
                }
            }
        }

        Ok(sink)
    }
}
