use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dialflow_core::dispatch::DialRequest;
use dialflow_core::flows::SpokenAction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallerInput {
    Utterance(String),
    /// The listen timeout passed without speech.
    Silence,
    HungUp,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("caller disconnected")]
    Disconnected,
    #[error("audio transport failed: {0}")]
    Transport(String),
}

/// Audio leg of one connected call, already reduced to text in both directions.
#[async_trait]
pub trait CallerChannel: Send {
    async fn speak(&mut self, line: &SpokenAction) -> Result<(), ChannelError>;
    async fn listen(&mut self, timeout: Duration) -> Result<CallerInput, ChannelError>;
    async fn hang_up(&mut self) -> Result<(), ChannelError>;
}

/// Connects the audio leg for a dispatched call.
#[async_trait]
pub trait CallConnector: Send + Sync {
    async fn connect(&self, request: &DialRequest) -> Result<Box<dyn CallerChannel>, ChannelError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ScriptedTurn {
    Say(String),
    Silence,
    HangUp,
}

impl ScriptedTurn {
    pub fn say(text: impl Into<String>) -> Self {
        Self::Say(text.into())
    }
}

/// Lines spoken by the agent, shared with whoever created the channel.
#[derive(Clone, Debug, Default)]
pub struct SpokenLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl SpokenLog {
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

/// Plays back a fixed caller script. Hangs up once the script runs out.
#[derive(Debug)]
pub struct ScriptedChannel {
    turns: VecDeque<ScriptedTurn>,
    spoken: SpokenLog,
    hung_up: bool,
}

impl ScriptedChannel {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self { turns: turns.into_iter().collect(), spoken: SpokenLog::default(), hung_up: false }
    }

    pub fn with_log(mut self, spoken: SpokenLog) -> Self {
        self.spoken = spoken;
        self
    }

    pub fn spoken(&self) -> SpokenLog {
        self.spoken.clone()
    }
}

#[async_trait]
impl CallerChannel for ScriptedChannel {
    async fn speak(&mut self, line: &SpokenAction) -> Result<(), ChannelError> {
        if self.hung_up {
            return Err(ChannelError::Disconnected);
        }
        self.spoken.push(&line.text);
        Ok(())
    }

    async fn listen(&mut self, _timeout: Duration) -> Result<CallerInput, ChannelError> {
        if self.hung_up {
            return Err(ChannelError::Disconnected);
        }
        match self.turns.pop_front() {
            Some(ScriptedTurn::Say(text)) => Ok(CallerInput::Utterance(text)),
            Some(ScriptedTurn::Silence) => Ok(CallerInput::Silence),
            Some(ScriptedTurn::HangUp) | None => {
                self.hung_up = true;
                Ok(CallerInput::HungUp)
            }
        }
    }

    async fn hang_up(&mut self) -> Result<(), ChannelError> {
        self.hung_up = true;
        Ok(())
    }
}

/// Hands every call a [`ScriptedChannel`], picked by lead phone with a shared fallback.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    scripts: HashMap<String, Vec<ScriptedTurn>>,
    fallback: Vec<ScriptedTurn>,
    logs: Arc<Mutex<HashMap<String, SpokenLog>>>,
}

impl ScriptedConnector {
    pub fn new(fallback: Vec<ScriptedTurn>) -> Self {
        Self { fallback, ..Self::default() }
    }

    pub fn with_script(mut self, phone: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        self.scripts.insert(phone.into(), turns);
        self
    }

    /// Agent lines spoken on the call to `phone`, if it was connected.
    pub fn spoken_to(&self, phone: &str) -> Option<Vec<String>> {
        let logs = match self.logs.lock() {
            Ok(logs) => logs,
            Err(poisoned) => poisoned.into_inner(),
        };
        logs.get(phone).map(SpokenLog::lines)
    }
}

#[async_trait]
impl CallConnector for ScriptedConnector {
    async fn connect(&self, request: &DialRequest) -> Result<Box<dyn CallerChannel>, ChannelError> {
        let turns = self.scripts.get(&request.lead.phone).unwrap_or(&self.fallback).clone();
        let log = SpokenLog::default();
        match self.logs.lock() {
            Ok(mut logs) => logs.insert(request.lead.phone.clone(), log.clone()),
            Err(poisoned) => poisoned.into_inner().insert(request.lead.phone.clone(), log.clone()),
        };
        Ok(Box::new(ScriptedChannel::new(turns).with_log(log)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dialflow_core::flows::SpokenAction;

    use super::{CallerChannel, CallerInput, ChannelError, ScriptedChannel, ScriptedTurn};

    #[tokio::test]
    async fn scripted_channel_hangs_up_when_script_runs_out() {
        let mut channel =
            ScriptedChannel::new([ScriptedTurn::say("hello"), ScriptedTurn::Silence]);
        let timeout = Duration::from_secs(1);

        assert_eq!(
            channel.listen(timeout).await,
            Ok(CallerInput::Utterance("hello".to_string()))
        );
        assert_eq!(channel.listen(timeout).await, Ok(CallerInput::Silence));
        assert_eq!(channel.listen(timeout).await, Ok(CallerInput::HungUp));
        assert_eq!(
            channel.speak(&SpokenAction::say("still there?")).await,
            Err(ChannelError::Disconnected)
        );
    }

    #[tokio::test]
    async fn spoken_lines_are_logged() {
        let mut channel = ScriptedChannel::new([]);
        let log = channel.spoken();

        channel.speak(&SpokenAction::say("Hi there")).await.expect("speak");

        assert_eq!(log.lines(), vec!["Hi there".to_string()]);
    }
}
