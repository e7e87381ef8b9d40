//! Red Flag or Green Flag? Five relationship flags, answered on stdin.
//!
//! Flags come from the chat-completions API when `DATEMATE__GENERATION__API_KEY`
//! is set, else from the built-in list.

use datemate_core::{DateConfig, FlagColor, FlagGame};
use datemate_voice::{build_pool, ChatCompletionsGenerator, FlagSource, GeneratedFlags, ScriptedGenerator};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = DateConfig::load()?;
    let source = match ChatCompletionsGenerator::from_settings(&config.generation) {
        Ok(g) => GeneratedFlags::new(Arc::new(g)),
        Err(e) => {
            info!("Flags: built-in ({})", e);
            GeneratedFlags::new(Arc::new(ScriptedGenerator::default()))
        }
    };

    let mut pool = build_pool(&source).await;
    let mut game = FlagGame::deal(&mut pool, &mut rand::thread_rng());

    println!("🚩 Red Flag or Green Flag? 💚\n");
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    while let Some((n, flag)) = game.current() {
        println!("Flag {}: {}", n, flag.description);
        let guess = loop {
            print!("Red or green? ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next() else {
                return Ok(());
            };
            match line?.parse::<FlagColor>() {
                Ok(color) => break color,
                Err(_) => println!("Please type 'red' or 'green'."),
            }
        };
        let outcome = game.answer(guess)?;
        if outcome.correct {
            println!("Correct!\n");
        } else {
            println!("Not quite, that one is a {} flag.\n", outcome.actual);
        }
    }

    let score = game.score();
    println!("Game over! You got {} correct.", score);
    if let Ok(feedback) = source.feedback(score).await {
        if !feedback.is_empty() {
            println!("{}", feedback);
        }
    }
    Ok(())
}
