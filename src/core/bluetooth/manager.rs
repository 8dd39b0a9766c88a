//! Session event loop
//! Serializes transport events, consumer commands, radio changes and timers
//! onto a single task so a session never sees two inputs at once.

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::radio::RadioState;

pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// A state machine driven by the loop. Every method runs to completion
/// without awaiting.
pub trait Session {
    type Event: Send + 'static;
    type Command: Send + 'static;

    fn handle_event(&mut self, event: Self::Event);

    fn handle_command(&mut self, command: Self::Command);

    fn on_radio_state(&mut self, state: RadioState);

    /// The earliest pending deadline or scheduled restart
    fn next_timer(&self) -> Option<Instant>;

    fn handle_timer(&mut self, now: Instant);

    /// Ends the lifecycle before the loop exits
    fn shutdown(&mut self);
}

/// Owns one session and feeds it from its input queues
pub struct SessionManager<S: Session> {
    name: &'static str,
    session: S,
    events: mpsc::UnboundedReceiver<S::Event>,
    commands: mpsc::Receiver<S::Command>,
    radio: watch::Receiver<RadioState>,
    cancel_token: CancellationToken,
}

impl<S: Session> SessionManager<S> {
    pub fn new(
        name: &'static str,
        session: S,
        events: mpsc::UnboundedReceiver<S::Event>,
        commands: mpsc::Receiver<S::Command>,
        radio: watch::Receiver<RadioState>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            name,
            session,
            events,
            commands,
            radio,
            cancel_token,
        }
    }

    /// Runs until cancelled or until every command sender is dropped, then
    /// shuts the session down and hands it back.
    pub async fn run(mut self) -> S {
        info!("{} session loop started", self.name);

        let initial = *self.radio.borrow_and_update();
        self.session.on_radio_state(initial);

        let mut events_open = true;
        let mut radio_open = true;

        loop {
            let timer = self.session.next_timer();

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("{} session loop cancelled", self.name);
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.session.handle_command(command),
                    None => {
                        info!("{} session has no more handles", self.name);
                        break;
                    }
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.session.handle_event(event),
                    None => {
                        warn!("{} transport event queue closed", self.name);
                        events_open = false;
                    }
                },
                changed = self.radio.changed(), if radio_open => match changed {
                    Ok(()) => {
                        let state = *self.radio.borrow_and_update();
                        self.session.on_radio_state(state);
                    }
                    Err(_) => {
                        debug!("{} radio monitor dropped", self.name);
                        radio_open = false;
                    }
                },
                _ = sleep_until(timer.unwrap_or_else(Instant::now)), if timer.is_some() => {
                    self.session.handle_timer(Instant::now());
                }
            }
        }

        self.session.shutdown();
        info!("{} session loop stopped", self.name);
        self.session
    }
}

/// Spawns the loop for `session` and returns the command sender that
/// keeps it alive, plus the task to await on shutdown.
pub fn spawn_session<S>(
    name: &'static str,
    session: S,
    events: mpsc::UnboundedReceiver<S::Event>,
    radio: watch::Receiver<RadioState>,
    cancel_token: CancellationToken,
) -> (mpsc::Sender<S::Command>, JoinHandle<()>)
where
    S: Session + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let manager = SessionManager::new(name, session, events, command_rx, radio, cancel_token);
    let handle = tokio::spawn(async move {
        manager.run().await;
    });
    (command_tx, handle)
}
