//! `parley history`: Print the stored conversation.

use parley_core::store::TranscriptStore;
use parley_core::turn::{Sender, Transcript};
use parley_store::JsonFileStore;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let store = JsonFileStore::new(&config.history.path);
    let transcript = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&transcript)?);
    } else if transcript.is_empty() {
        println!("No conversation yet ({}).", store.path().display());
    } else {
        print!("{}", render(&transcript));
    }

    Ok(())
}

fn render(transcript: &Transcript) -> String {
    transcript
        .iter()
        .map(|turn| {
            let who = match turn.sender() {
                Sender::User => "You",
                Sender::Bot => "Bot",
            };
            format!("{who} > {}\n", turn.text())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::turn::Turn;

    #[test]
    fn renders_one_line_per_turn() {
        let transcript: Transcript =
            vec![Turn::user("hi").unwrap(), Turn::bot("hello").unwrap()].into();
        assert_eq!(render(&transcript), "You > hi\nBot > hello\n");
    }
}
