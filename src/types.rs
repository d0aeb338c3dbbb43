use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

/// Names of the commands accepted over the control channel.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CommandName {
    /// Bring the loaded app up in the background.
    StartApp,
    /// Tear the loaded app down, removing orphaned containers.
    StopApp,
    /// Return the loaded app's metadata document.
    GetApp,
    /// Replace the loaded app with one fetched from the store.
    LoadApp,
    /// Check whether a container with the given name is running.
    IsRunning,
}

impl CommandName {
    /// Whether the command must be followed by an argument frame.
    pub fn takes_argument(self) -> bool {
        matches!(self, CommandName::LoadApp | CommandName::IsRunning)
    }
}

/// A fully formed command, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartApp,
    StopApp,
    GetApp,
    /// Name of the app in the store.
    LoadApp(String),
    /// Container name to look for.
    IsRunning(String),
}

impl Command {
    /// Build a command that takes no argument. Returns `None` for commands
    /// that require one.
    pub fn without_argument(name: CommandName) -> Option<Self> {
        match name {
            CommandName::StartApp => Some(Command::StartApp),
            CommandName::StopApp => Some(Command::StopApp),
            CommandName::GetApp => Some(Command::GetApp),
            CommandName::LoadApp | CommandName::IsRunning => None,
        }
    }

    /// Build a command from its name and argument. The argument is ignored
    /// for commands that do not take one.
    pub fn with_argument(name: CommandName, argument: String) -> Self {
        match name {
            CommandName::LoadApp => Command::LoadApp(argument),
            CommandName::IsRunning => Command::IsRunning(argument),
            CommandName::StartApp => Command::StartApp,
            CommandName::StopApp => Command::StopApp,
            CommandName::GetApp => Command::GetApp,
        }
    }

    pub fn name(&self) -> CommandName {
        match self {
            Command::StartApp => CommandName::StartApp,
            Command::StopApp => CommandName::StopApp,
            Command::GetApp => CommandName::GetApp,
            Command::LoadApp(_) => CommandName::LoadApp,
            Command::IsRunning(_) => CommandName::IsRunning,
        }
    }
}

/// Lines of text returned to the caller for a single command. Each line is
/// sent as its own frame; an empty result sends nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult(Vec<String>);

impl CommandResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Captured process output, one line per frame. Trailing whitespace is
    /// dropped so a final newline does not produce a blank frame.
    pub fn from_output(output: &str) -> Self {
        Self(output.trim_end().lines().map(str::to_string).collect())
    }

    /// Exit-code style sentinel: `"0"` on success, `"1"` on failure.
    pub fn status(ok: bool) -> Self {
        Self(vec![if ok { "0" } else { "1" }.to_string()])
    }

    /// Boolean answer: `"1"` for true, `"0"` for false.
    pub fn flag(value: bool) -> Self {
        Self(vec![if value { "1" } else { "0" }.to_string()])
    }

    /// A document passed through verbatim as one frame. Empty documents
    /// produce an empty result.
    pub fn document(content: String) -> Self {
        if content.is_empty() {
            Self::empty()
        } else {
            Self(vec![content])
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub fn into_lines(self) -> Vec<String> {
        self.0
    }
}

/// Published port binding of a container, as reported by `ps --format json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Publisher {
    #[serde(rename = "URL")]
    pub url: String,
    pub target_port: u16,
    pub published_port: u16,
    pub protocol: String,
}

/// One live container reported by the orchestration tool. Rebuilt on every
/// status query, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerStatus {
    #[serde(rename = "ID")]
    pub id: String,
    /// Display name, matched exactly by running-state queries.
    pub name: String,
    pub command: String,
    pub project: String,
    pub service: String,
    pub state: String,
    pub health: String,
    pub exit_code: i64,
    #[serde(deserialize_with = "null_as_empty")]
    pub publishers: Vec<Publisher>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Kinds of auxiliary containers this process starts next to the app.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "kebab-case")]
pub enum AuxKind {
    /// Design gallery viewer.
    Gallery,
    /// Containerized browser pointed at the UI.
    Browser,
}

impl AuxKind {
    pub const ALL: [AuxKind; 2] = [AuxKind::Gallery, AuxKind::Browser];
}
