//! `parley chat`: Interactive or single-message chat mode.

use parley_core::store::TranscriptStore;
use parley_pipeline::Orchestrator;
use parley_store::JsonFileStore;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    let engine = parley_engine::build_engine(&config.engine)?;
    let store: Arc<dyn TranscriptStore> = Arc::new(JsonFileStore::new(&config.history.path));
    let orchestrator = Orchestrator::from_config(&config, engine, store);

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = orchestrator.handle_message(&msg).await;
        eprint!("\r              \r");
        let reply = result?;
        println!("{}", reply.response);
        if !reply.persisted {
            eprintln!("  [Warning] reply was not saved to {}", config.history.path.display());
        }
        return Ok(());
    }

    println!();
    println!("  Parley: interactive mode");
    println!();
    println!("  Engine:   {}", orchestrator.engine_name());
    println!("  History:  {}", config.history.path.display());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let stdin = BufReader::new(tokio::io::stdin());
    repl(&orchestrator, stdin, &mut std::io::stdout()).await?;

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

/// Read one message per line from `input` until EOF or an exit command,
/// writing each reply (or error) to `out`.
async fn repl<R, W>(orchestrator: &Orchestrator, input: R, out: &mut W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    write!(out, "  You > ")?;
    out.flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
            break;
        }

        if !line.is_empty() {
            match orchestrator.handle_message(line).await {
                Ok(reply) => {
                    writeln!(out)?;
                    for text in reply.response.lines() {
                        writeln!(out, "  Bot > {text}")?;
                    }
                    if !reply.persisted {
                        writeln!(out, "  [Warning] reply was not saved")?;
                    }
                    writeln!(out)?;
                }
                Err(e) => {
                    writeln!(out, "  [Error] {e}")?;
                    writeln!(out)?;
                }
            }
        }

        write!(out, "  You > ")?;
        out.flush()?;
    }

    Ok(())
}
