use std::collections::BTreeMap;
use std::sync::Arc;

use studio_contracts::{EncodedImage, StudioError};

pub mod acquire;
pub mod config;
pub mod dryrun;
pub mod gemini;
pub mod studio;

pub use config::GeminiConfig;
pub use dryrun::DryrunClient;
pub use gemini::GeminiClient;
pub use studio::EditStudio;

/// Appended to every instruction before it is sent.
pub const QUALITY_SUFFIX: &str = ", high quality, detailed";

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    Image(EncodedImage),
    /// The service answered but returned no image part. `note` carries any
    /// text or block reason the service gave instead.
    NoImageProduced { note: Option<String> },
}

/// One image plus one instruction in, one edited image (or none) out.
///
/// Implementations make a single call per `edit` and never retry.
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, image: &EncodedImage, instruction: &str) -> Result<EditOutcome, StudioError>;
}

pub fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}

pub fn enhance_instruction(instruction: &str) -> String {
    format!("{}{QUALITY_SUFFIX}", instruction.trim())
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn InferenceClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: InferenceClient + 'static>(&mut self, client: C) {
        self.clients
            .insert(client.name().to_string(), Arc::new(client));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceClient>> {
        self.clients.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

/// `dryrun` is always available; `gemini` only when it has a configuration.
pub fn default_client_registry(gemini: Option<GeminiConfig>) -> Result<ClientRegistry, StudioError> {
    let mut clients = ClientRegistry::new();
    clients.register(DryrunClient::new());
    if let Some(config) = gemini {
        clients.register(GeminiClient::new(config)?);
    }
    Ok(clients)
}
