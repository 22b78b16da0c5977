//! Turn and Transcript domain types.
//!
//! These are the value objects that flow through the whole system:
//! user types a message → it becomes a `Turn` → the pipeline answers with
//! another `Turn` → both are appended to the `Transcript` and persisted.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Who produced a turn.
///
/// The persisted literals are `"You"` and `"Bot"`; they are part of the
/// on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    /// The person chatting
    #[serde(rename = "You")]
    User,
    /// The generation backend
    #[serde(rename = "Bot")]
    Bot,
}

impl Sender {
    /// Speaker label used when a turn is rendered into a prompt.
    pub fn prompt_label(self) -> &'static str {
        match self {
            Sender::User => "User",
            Sender::Bot => "Assistant",
        }
    }
}

/// One utterance in the conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTurn")]
pub struct Turn {
    sender: Sender,
    text: String,
}

/// Unvalidated wire form of a [`Turn`].
#[derive(Deserialize)]
struct RawTurn {
    sender: Sender,
    text: String,
}

impl TryFrom<RawTurn> for Turn {
    type Error = Error;

    fn try_from(raw: RawTurn) -> Result<Self, Self::Error> {
        Turn::new(raw.sender, raw.text)
    }
}

impl Turn {
    /// Create a turn, rejecting empty text. Whitespace is kept as given.
    pub fn new(sender: Sender, text: impl Into<String>) -> Result<Self, Error> {
        let text = text.into();
        if text.is_empty() {
            return Err(Error::EmptyTurn);
        }
        Ok(Self { sender, text })
    }

    /// Create a user turn.
    pub fn user(text: impl Into<String>) -> Result<Self, Error> {
        Self::new(Sender::User, text)
    }

    /// Create a bot turn.
    pub fn bot(text: impl Into<String>) -> Result<Self, Error> {
        Self::new(Sender::Bot, text)
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// The full ordered history of a conversation. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn at the end; existing turns are never reordered.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

impl From<Vec<Turn>> for Transcript {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

impl FromIterator<Turn> for Transcript {
    fn from_iter<I: IntoIterator<Item = Turn>>(iter: I) -> Self {
        Self {
            turns: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("Hello!").unwrap();
        assert_eq!(turn.sender(), Sender::User);
        assert_eq!(turn.text(), "Hello!");
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(Turn::bot(""), Err(Error::EmptyTurn)));
        assert!(matches!(Turn::user(String::new()), Err(Error::EmptyTurn)));
    }

    #[test]
    fn whitespace_only_text_is_kept() {
        let turn = Turn::user("  \n\t").unwrap();
        assert_eq!(turn.text(), "  \n\t");

        let turn: Turn = serde_json::from_str(r#"{"sender":"You","text":"  "}"#).unwrap();
        assert_eq!(turn.text(), "  ");
    }

    #[test]
    fn sender_uses_persisted_literals() {
        let json = serde_json::to_string(&Turn::user("hi").unwrap()).unwrap();
        assert_eq!(json, r#"{"sender":"You","text":"hi"}"#);

        let json = serde_json::to_string(&Turn::bot("hello").unwrap()).unwrap();
        assert_eq!(json, r#"{"sender":"Bot","text":"hello"}"#);
    }

    #[test]
    fn deserialization_validates_text() {
        let err = serde_json::from_str::<Turn>(r#"{"sender":"Bot","text":""}"#);
        assert!(err.is_err());

        let err = serde_json::from_str::<Turn>(r#"{"sender":"Assistant","text":"x"}"#);
        assert!(err.is_err());

        let err = serde_json::from_str::<Turn>(r#"{"sender":"You"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn transcript_preserves_insertion_order() {
        let mut transcript = Transcript::new();
        transcript.push(Turn::user("first").unwrap());
        transcript.push(Turn::bot("second").unwrap());
        transcript.push(Turn::user("third").unwrap());

        let texts: Vec<&str> = transcript.iter().map(Turn::text).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(transcript.last().map(Turn::sender), Some(Sender::User));
    }

    #[test]
    fn transcript_serializes_as_plain_array() {
        let transcript: Transcript = vec![Turn::user("a").unwrap(), Turn::bot("b").unwrap()].into();
        let json = serde_json::to_string(&transcript).unwrap();
        assert_eq!(
            json,
            r#"[{"sender":"You","text":"a"},{"sender":"Bot","text":"b"}]"#
        );
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(back, transcript);
    }

    #[test]
    fn prompt_labels() {
        assert_eq!(Sender::User.prompt_label(), "User");
        assert_eq!(Sender::Bot.prompt_label(), "Assistant");
    }
}
