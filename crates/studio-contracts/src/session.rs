//! Iterative edit session as a pure reducer.
//!
//! The shell owns the only mutable [`Session`] and feeds every user action and
//! every edit completion through [`reduce`]. Completions carry the
//! [`EditTicket`] they were issued with; a completion whose ticket is not the
//! one currently in flight (for example because the session was reset while
//! the call was outstanding) is ignored.

use serde::Serialize;

use crate::error::StudioError;
use crate::images::{is_image_media_type, EncodedImage};

pub const NO_IMAGE_PRODUCED: &str = "no image produced";
pub const MISSING_INPUT_MESSAGE: &str = "Please enter a prompt and upload an image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Empty,
    Ready,
    Editing,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Ready => "ready",
            Self::Editing => "editing",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EditTicket {
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub ticket: EditTicket,
    pub image: EncodedImage,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Upload(EncodedImage),
    SetPrompt(String),
    RequestEdit,
    EditSucceeded {
        ticket: EditTicket,
        result: EncodedImage,
    },
    EditProducedNothing {
        ticket: EditTicket,
    },
    EditFailed {
        ticket: EditTicket,
        message: String,
    },
    Reset,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload(_) => "upload",
            Self::SetPrompt(_) => "set_prompt",
            Self::RequestEdit => "request_edit",
            Self::EditSucceeded { .. } => "edit_succeeded",
            Self::EditProducedNothing { .. } => "edit_produced_nothing",
            Self::EditFailed { .. } => "edit_failed",
            Self::Reset => "reset",
        }
    }

    fn ticket(&self) -> Option<EditTicket> {
        match self {
            Self::EditSucceeded { ticket, .. }
            | Self::EditProducedNothing { ticket }
            | Self::EditFailed { ticket, .. } => Some(*ticket),
            _ => None,
        }
    }
}

/// What the driver has to do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    StartEdit(EditRequest),
    Rejected(StudioError),
    /// A completion arrived for a ticket that is no longer in flight.
    Ignored(EditTicket),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    original: Option<EncodedImage>,
    current: Option<EncodedImage>,
    last_result: Option<EncodedImage>,
    prompt: String,
    phase: Phase,
    error_message: Option<String>,
    in_flight: Option<EditTicket>,
    next_generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            original: None,
            current: None,
            last_result: None,
            prompt: String::new(),
            phase: Phase::Empty,
            error_message: None,
            in_flight: None,
            next_generation: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn original(&self) -> Option<&EncodedImage> {
        self.original.as_ref()
    }

    pub fn current(&self) -> Option<&EncodedImage> {
        self.current.as_ref()
    }

    pub fn last_result(&self) -> Option<&EncodedImage> {
        self.last_result.as_ref()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn in_flight(&self) -> Option<EditTicket> {
        self.in_flight
    }

    pub fn can_request_edit(&self) -> bool {
        matches!(self.phase, Phase::Ready | Phase::Error)
            && self.current.is_some()
            && !self.prompt.trim().is_empty()
    }

    /// A fresh empty session that keeps the ticket counter, so tickets issued
    /// before the reset never match tickets issued after it.
    fn cleared(&self) -> Self {
        Self {
            next_generation: self.next_generation,
            ..Self::new()
        }
    }
}

pub fn reduce(session: Session, action: Action) -> (Session, Effect) {
    if let Some(ticket) = action.ticket() {
        if session.phase != Phase::Editing || session.in_flight != Some(ticket) {
            return (session, Effect::Ignored(ticket));
        }
    }

    match action {
        Action::Upload(image) => upload(session, image),
        Action::SetPrompt(text) => set_prompt(session, text),
        Action::RequestEdit => request_edit(session),
        Action::EditSucceeded { result, .. } => {
            let mut next = session;
            next.current = Some(result.clone());
            next.last_result = Some(result);
            next.error_message = None;
            next.in_flight = None;
            next.phase = Phase::Ready;
            (next, Effect::None)
        }
        Action::EditProducedNothing { .. } => {
            let mut next = session;
            next.error_message = Some(NO_IMAGE_PRODUCED.to_string());
            next.in_flight = None;
            next.phase = Phase::Error;
            (next, Effect::None)
        }
        Action::EditFailed { message, .. } => {
            let mut next = session;
            next.error_message = Some(message);
            next.in_flight = None;
            next.phase = Phase::Error;
            (next, Effect::None)
        }
        Action::Reset => {
            let next = session.cleared();
            (next, Effect::None)
        }
    }
}

fn reject(session: Session, message: &str) -> (Session, Effect) {
    (
        session,
        Effect::Rejected(StudioError::validation(message.to_string())),
    )
}

fn upload(session: Session, image: EncodedImage) -> (Session, Effect) {
    if session.phase != Phase::Empty {
        return reject(session, "An image is already loaded; reset to start over.");
    }
    if !is_image_media_type(image.media_type()) || image.payload().trim().is_empty() {
        return reject(session, "Please upload a valid image file.");
    }
    let mut next = session;
    next.original = Some(image.clone());
    next.current = Some(image);
    next.last_result = None;
    next.prompt = String::new();
    next.error_message = None;
    next.phase = Phase::Ready;
    (next, Effect::None)
}

fn set_prompt(session: Session, text: String) -> (Session, Effect) {
    match session.phase {
        Phase::Ready | Phase::Error => {
            let mut next = session;
            next.prompt = text;
            (next, Effect::None)
        }
        Phase::Empty => reject(session, "Upload an image before writing a prompt."),
        Phase::Editing => reject(session, "An edit is already in progress."),
    }
}

fn request_edit(session: Session) -> (Session, Effect) {
    if session.phase == Phase::Editing {
        return reject(session, "An edit is already in progress.");
    }
    if !session.can_request_edit() {
        return reject(session, MISSING_INPUT_MESSAGE);
    }
    let Some(image) = session.current.clone() else {
        return reject(session, MISSING_INPUT_MESSAGE);
    };

    let mut next = session;
    let ticket = EditTicket {
        generation: next.next_generation,
    };
    next.next_generation += 1;
    next.in_flight = Some(ticket);
    next.error_message = None;
    next.phase = Phase::Editing;
    let request = EditRequest {
        ticket,
        image,
        instruction: next.prompt.clone(),
    };
    (next, Effect::StartEdit(request))
}

#[cfg(test)]
mod tests {
    use super::{reduce, Action, Effect, EditRequest, EditTicket, Phase, Session};
    use crate::error::StudioError;
    use crate::images::{encode, EncodedImage};

    fn image(tag: &[u8]) -> EncodedImage {
        encode(tag, "image/png")
    }

    fn apply(session: Session, action: Action) -> (Session, Effect) {
        reduce(session, action)
    }

    fn ready_with_prompt(prompt: &str) -> Session {
        let (session, _) = apply(Session::new(), Action::Upload(image(b"A")));
        let (session, _) = apply(session, Action::SetPrompt(prompt.to_string()));
        session
    }

    fn start_edit(session: Session) -> (Session, EditRequest) {
        match apply(session, Action::RequestEdit) {
            (session, Effect::StartEdit(request)) => (session, request),
            (_, effect) => panic!("expected StartEdit, got {effect:?}"),
        }
    }

    #[test]
    fn happy_path_replaces_current_and_keeps_original() {
        let a = image(b"A");
        let b = image(b"B");
        let (session, _) = apply(Session::new(), Action::Upload(a.clone()));
        assert_eq!(session.phase(), Phase::Ready);
        assert_eq!(session.prompt(), "");
        let (session, _) = apply(session, Action::SetPrompt("add a hat".to_string()));
        let (session, request) = start_edit(session);
        assert_eq!(session.phase(), Phase::Editing);
        assert_eq!(request.image, a);
        assert_eq!(request.instruction, "add a hat");

        let (session, effect) = apply(
            session,
            Action::EditSucceeded {
                ticket: request.ticket,
                result: b.clone(),
            },
        );
        assert_eq!(effect, Effect::None);
        assert_eq!(session.phase(), Phase::Ready);
        assert_eq!(session.current(), Some(&b));
        assert_eq!(session.last_result(), Some(&b));
        assert_eq!(session.original(), Some(&a));
        assert_eq!(session.error_message(), None);
        assert_eq!(session.in_flight(), None);
    }

    #[test]
    fn request_edit_requires_prompt_image_and_idle_phase() {
        let (empty, effect) = apply(Session::new(), Action::RequestEdit);
        assert_eq!(empty, Session::new());
        assert!(matches!(effect, Effect::Rejected(StudioError::Validation(_))));

        let blank = ready_with_prompt("   ");
        let (after, effect) = apply(blank.clone(), Action::RequestEdit);
        assert_eq!(after, blank);
        assert!(matches!(effect, Effect::Rejected(_)));

        let (editing, _) = start_edit(ready_with_prompt("add a hat"));
        let (after, effect) = apply(editing.clone(), Action::RequestEdit);
        assert_eq!(after, editing);
        assert!(matches!(effect, Effect::Rejected(_)));
    }

    #[test]
    fn reset_is_idempotent() {
        let (editing, _) = start_edit(ready_with_prompt("add a hat"));
        let (once, _) = apply(editing, Action::Reset);
        let (twice, _) = apply(once.clone(), Action::Reset);
        assert_eq!(once, twice);
        assert_eq!(once.phase(), Phase::Empty);
        assert!(once.original().is_none());
        assert!(once.current().is_none());
        assert!(once.last_result().is_none());
        assert_eq!(once.prompt(), "");
        assert!(once.error_message().is_none());
    }

    #[test]
    fn next_edit_chains_from_latest_result() {
        let b = image(b"B");
        let (session, request) = start_edit(ready_with_prompt("add a hat"));
        let (session, _) = apply(
            session,
            Action::EditSucceeded {
                ticket: request.ticket,
                result: b.clone(),
            },
        );
        let (session, _) = apply(session, Action::SetPrompt("make it red".to_string()));
        let (_, second) = start_edit(session);
        assert_eq!(second.image, b);
        assert_ne!(second.ticket, request.ticket);
    }

    #[test]
    fn empty_result_moves_to_error_without_touching_current() {
        let (session, request) = start_edit(ready_with_prompt("add a hat"));
        let (session, _) = apply(
            session,
            Action::EditProducedNothing {
                ticket: request.ticket,
            },
        );
        assert_eq!(session.phase(), Phase::Error);
        assert_eq!(session.error_message(), Some("no image produced"));
        assert_eq!(session.current(), Some(&image(b"A")));
        assert!(session.last_result().is_none());
    }

    #[test]
    fn failure_is_retryable_with_same_current() {
        let (session, request) = start_edit(ready_with_prompt("add a hat"));
        let (session, _) = apply(
            session,
            Action::EditFailed {
                ticket: request.ticket,
                message: "network timeout".to_string(),
            },
        );
        assert_eq!(session.phase(), Phase::Error);
        assert!(session
            .error_message()
            .unwrap_or_default()
            .contains("network timeout"));

        let (session, retry) = start_edit(session);
        assert_eq!(session.phase(), Phase::Editing);
        assert_eq!(retry.image, request.image);
        assert_eq!(session.error_message(), None);
    }

    #[test]
    fn late_completion_after_reset_is_ignored() {
        let (session, request) = start_edit(ready_with_prompt("add a hat"));
        let (session, _) = apply(session, Action::Reset);
        let (after, effect) = apply(
            session.clone(),
            Action::EditSucceeded {
                ticket: request.ticket,
                result: image(b"late"),
            },
        );
        assert_eq!(effect, Effect::Ignored(request.ticket));
        assert_eq!(after, session);
        assert_eq!(after.phase(), Phase::Empty);
    }

    #[test]
    fn stale_ticket_does_not_resolve_a_newer_edit() {
        let (session, first) = start_edit(ready_with_prompt("add a hat"));
        let (session, _) = apply(session, Action::Reset);
        let (session, _) = apply(session, Action::Upload(image(b"C")));
        let (session, _) = apply(session, Action::SetPrompt("blur".to_string()));
        let (session, second) = start_edit(session);
        assert_ne!(first.ticket, second.ticket);

        let (session, effect) = apply(
            session,
            Action::EditFailed {
                ticket: first.ticket,
                message: "late".to_string(),
            },
        );
        assert_eq!(effect, Effect::Ignored(first.ticket));
        assert_eq!(session.phase(), Phase::Editing);
        assert_eq!(session.in_flight(), Some(second.ticket));
    }

    #[test]
    fn completion_outside_editing_is_ignored() {
        let session = ready_with_prompt("add a hat");
        let ticket = EditTicket { generation: 1 };
        let (after, effect) = apply(session.clone(), Action::EditProducedNothing { ticket });
        assert_eq!(effect, Effect::Ignored(ticket));
        assert_eq!(after, session);
    }

    #[test]
    fn upload_is_only_accepted_once_and_must_be_an_image() {
        let (session, effect) = apply(Session::new(), Action::Upload(encode(b"x", "text/plain")));
        assert_eq!(session.phase(), Phase::Empty);
        assert!(matches!(effect, Effect::Rejected(_)));

        let (session, _) = apply(Session::new(), Action::Upload(image(b"A")));
        let (session, effect) = apply(session, Action::Upload(image(b"B")));
        assert!(matches!(effect, Effect::Rejected(_)));
        assert_eq!(session.original(), Some(&image(b"A")));
    }

    #[test]
    fn prompt_can_be_rewritten_after_an_error() {
        let (session, request) = start_edit(ready_with_prompt("add a hat"));
        let (session, effect) = apply(session, Action::SetPrompt("ignored".to_string()));
        assert!(matches!(effect, Effect::Rejected(_)));
        assert_eq!(session.prompt(), "add a hat");

        let (session, _) = apply(
            session,
            Action::EditProducedNothing {
                ticket: request.ticket,
            },
        );
        let (session, effect) = apply(session, Action::SetPrompt("add a scarf".to_string()));
        assert_eq!(effect, Effect::None);
        assert_eq!(session.phase(), Phase::Error);
        assert_eq!(session.prompt(), "add a scarf");
    }
}
