use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use studio_contracts::events::{EventKind, SessionEvent, SessionLog};
use studio_contracts::session::{reduce, Action, EditRequest, Effect, Phase, Session};
use studio_contracts::{EncodedImage, StudioError};

use crate::acquire::{read_image_file, write_download};
use crate::{EditOutcome, InferenceClient};

/// Result of one edit call, as sent back by the worker thread.
#[derive(Debug)]
struct Completion {
    action: Action,
    note: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudioStats {
    pub edits_requested: u64,
    pub edits_succeeded: u64,
    pub edits_empty: u64,
    pub edits_failed: u64,
    pub completions_ignored: u64,
    pub downloads: u64,
}

/// Owns the one mutable [`Session`] and the single in-flight edit.
///
/// Every change goes through [`reduce`]. Edits run on a worker thread and
/// report back over a channel; call [`EditStudio::pump`] or
/// [`EditStudio::wait_for_edit`] to apply their results.
pub struct EditStudio {
    session: Session,
    client: Arc<dyn InferenceClient>,
    log: SessionLog,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    stats: StudioStats,
}

impl EditStudio {
    pub fn new(client: Arc<dyn InferenceClient>, log: SessionLog) -> Result<Self> {
        let (completions_tx, completions_rx) = mpsc::channel();
        log.record(
            Phase::Empty,
            SessionEvent::new(EventKind::SessionStarted).detail("client", client.name()),
        )?;
        Ok(Self {
            session: Session::new(),
            client,
            log,
            completions_tx,
            completions_rx,
            stats: StudioStats::default(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn stats(&self) -> StudioStats {
        self.stats
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn dispatch(&mut self, action: Action) -> Result<Effect> {
        self.apply(action, None)
    }

    /// Reads a picked file and uploads it. A file that is not an image is
    /// rejected without touching the session.
    pub fn upload_file(&mut self, path: &Path) -> Result<Effect> {
        match read_image_file(path) {
            Ok(image) => self.dispatch(Action::Upload(image)),
            Err(err @ (StudioError::Validation(_) | StudioError::Io(_))) => {
                self.log.record(
                    self.session.phase(),
                    SessionEvent::new(EventKind::ActionRejected)
                        .detail("action", "upload")
                        .detail("kind", err.kind())
                        .detail("message", err.to_string())
                        .detail("path", path.to_string_lossy().into_owned()),
                )?;
                Ok(Effect::Rejected(err))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sets the prompt (when given) and asks for an edit.
    pub fn submit(&mut self, prompt: Option<String>) -> Result<Effect> {
        if let Some(prompt) = prompt {
            let effect = self.dispatch(Action::SetPrompt(prompt))?;
            if matches!(effect, Effect::Rejected(_)) {
                return Ok(effect);
            }
        }
        self.dispatch(Action::RequestEdit)
    }

    pub fn reset(&mut self) -> Result<Effect> {
        self.dispatch(Action::Reset)
    }

    /// Applies every completion that has already arrived.
    pub fn pump(&mut self) -> Result<Vec<Effect>> {
        let mut effects = Vec::new();
        while let Ok(completion) = self.completions_rx.try_recv() {
            effects.push(self.apply(completion.action, completion.note)?);
        }
        Ok(effects)
    }

    /// Blocks until no edit is in flight. Returns `false` if `timeout`
    /// elapsed first.
    pub fn wait_for_edit(&mut self, timeout: Option<Duration>) -> Result<bool> {
        while self.session.in_flight().is_some() {
            let completion = match timeout {
                Some(limit) => match self.completions_rx.recv_timeout(limit) {
                    Ok(completion) => completion,
                    Err(RecvTimeoutError::Timeout) => return Ok(false),
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.completions_rx.recv() {
                    Ok(completion) => completion,
                    Err(_) => break,
                },
            };
            self.apply(completion.action, completion.note)?;
        }
        Ok(true)
    }

    /// Writes the latest edit result into `dir`.
    pub fn download(&mut self, dir: &Path) -> Result<PathBuf> {
        let Some(result) = self.session.last_result().cloned() else {
            return Err(StudioError::validation("No edited image to download yet.").into());
        };
        let path = write_download(&result, dir)?;
        self.stats.downloads += 1;
        self.log.record(
            self.session.phase(),
            SessionEvent::new(EventKind::ImageDownloaded)
                .detail("path", path.to_string_lossy().into_owned())
                .image("image", &result),
        )?;
        Ok(path)
    }

    pub fn finish(&self) -> Result<()> {
        let stats = self.stats;
        self.log.record(
            self.session.phase(),
            SessionEvent::new(EventKind::SessionFinished)
                .detail("edits_requested", stats.edits_requested)
                .detail("edits_succeeded", stats.edits_succeeded)
                .detail("edits_empty", stats.edits_empty)
                .detail("edits_failed", stats.edits_failed)
                .detail("completions_ignored", stats.completions_ignored)
                .detail("downloads", stats.downloads),
        )?;
        Ok(())
    }

    fn apply(&mut self, action: Action, note: Option<String>) -> Result<Effect> {
        let action_name = action.name();
        let event = describe_action(&action);
        let previous = std::mem::take(&mut self.session);
        let (next, effect) = reduce(previous, action);
        self.session = next;
        let phase = self.session.phase();

        match &effect {
            Effect::Rejected(err) => {
                self.log.record(
                    phase,
                    SessionEvent::new(EventKind::ActionRejected)
                        .detail("action", action_name)
                        .detail("kind", err.kind())
                        .detail("message", err.to_string()),
                )?;
            }
            Effect::Ignored(ticket) => {
                self.stats.completions_ignored += 1;
                self.log.record(
                    phase,
                    SessionEvent::new(EventKind::EditIgnored)
                        .ticket(*ticket)
                        .detail("action", action_name),
                )?;
            }
            Effect::StartEdit(request) => {
                self.stats.edits_requested += 1;
                // Spawn first: a failed log write must not leave Editing
                // without a worker to complete it.
                let spawned = self.spawn_edit(request.clone());
                let logged = self.log.record(
                    phase,
                    event
                        .ticket(request.ticket)
                        .image("image", &request.image)
                        .detail("instruction", request.instruction.as_str())
                        .detail("client", self.client.name()),
                );
                if let Err(err) = spawned {
                    self.apply(
                        Action::EditFailed {
                            ticket: request.ticket,
                            message: format!("edit worker spawn failed: {err}"),
                        },
                        None,
                    )?;
                }
                logged?;
            }
            Effect::None => {
                match event.kind() {
                    EventKind::EditSucceeded => self.stats.edits_succeeded += 1,
                    EventKind::EditEmpty => self.stats.edits_empty += 1,
                    EventKind::EditFailed => self.stats.edits_failed += 1,
                    _ => {}
                }
                let event = match note {
                    Some(note) => event.detail("note", note),
                    None => event,
                };
                self.log.record(phase, event)?;
            }
        }
        Ok(effect)
    }

    fn spawn_edit(&self, request: EditRequest) -> std::io::Result<()> {
        let ticket = request.ticket;
        let client = Arc::clone(&self.client);
        let tx = self.completions_tx.clone();
        thread::Builder::new()
            .name(format!("studio-edit-{}", ticket.generation))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    client.edit(&request.image, &request.instruction)
                }));
                let completion = match outcome {
                    Ok(Ok(EditOutcome::Image(result))) => Completion {
                        action: Action::EditSucceeded { ticket, result },
                        note: None,
                    },
                    Ok(Ok(EditOutcome::NoImageProduced { note })) => Completion {
                        action: Action::EditProducedNothing { ticket },
                        note,
                    },
                    Ok(Err(err)) => Completion {
                        action: Action::EditFailed {
                            ticket,
                            message: err.to_string(),
                        },
                        note: None,
                    },
                    Err(_) => Completion {
                        action: Action::EditFailed {
                            ticket,
                            message: "edit worker panicked".to_string(),
                        },
                        note: None,
                    },
                };
                // The studio may be gone already; nothing left to report to.
                let _ = tx.send(completion);
            })?;
        Ok(())
    }
}

fn describe_action(action: &Action) -> SessionEvent {
    match action {
        Action::Upload(image) => {
            SessionEvent::new(EventKind::ImageUploaded).image("image", image)
        }
        Action::SetPrompt(text) => {
            SessionEvent::new(EventKind::PromptSet).detail("prompt", text.as_str())
        }
        Action::RequestEdit => SessionEvent::new(EventKind::EditRequested),
        Action::EditSucceeded { ticket, result } => SessionEvent::new(EventKind::EditSucceeded)
            .ticket(*ticket)
            .image("image", result),
        Action::EditProducedNothing { ticket } => {
            SessionEvent::new(EventKind::EditEmpty).ticket(*ticket)
        }
        Action::EditFailed { ticket, message } => SessionEvent::new(EventKind::EditFailed)
            .ticket(*ticket)
            .detail("message", message.as_str()),
        Action::Reset => SessionEvent::new(EventKind::SessionReset),
    }
}

/// Snapshot helpers the shell renders from.
pub fn image_label(image: Option<&EncodedImage>) -> String {
    match image {
        Some(image) => format!(
            "{} {} bytes #{}",
            image.media_type(),
            image.byte_len(),
            image.fingerprint()
        ),
        None => "No image".to_string(),
    }
}
