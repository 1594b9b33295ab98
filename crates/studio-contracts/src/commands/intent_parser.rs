use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, PATH_COMMANDS, TEXT_COMMANDS};

/// One parsed line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    /// Instruction text for `set_prompt` / `edit`, path for `upload` /
    /// `download`, unknown command name for `unknown`.
    pub arg: Option<String>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            arg: None,
        }
    }

    fn with_arg(mut self, arg: &str) -> Self {
        if !arg.is_empty() {
            self.arg = Some(arg.to_string());
        }
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, PATH_COMMANDS) {
                return Intent::new(action, text).with_arg(&parse_single_path_arg(arg));
            }

            if let Some(action) = find_action(&command, TEXT_COMMANDS) {
                return Intent::new(action, text).with_arg(arg);
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            return Intent::new("unknown", text).with_arg(&command);
        }
    }

    Intent::new("edit", text).with_arg(raw_trimmed)
}
