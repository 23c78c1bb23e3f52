//! CLI transport for direct terminal interaction

use crate::config::{Config, Credentials};
use crate::inference::{ImageReference, InferenceClient, Role};
use crate::operation::Operation;
use crate::services::{ChatSession, GenerationPipeline};
use crate::typing::{self, CharMark, Leaderboard, TypingStats};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

/// Client built from the on-disk config and the environment credentials
fn build_client() -> Result<Arc<InferenceClient>> {
    let config = Config::load().context("Failed to load configuration")?;
    let credentials = Arc::new(Credentials::from_env());
    tracing::debug!("Loaded credentials: {:?}", credentials);
    Ok(Arc::new(InferenceClient::from_config(config, credentials)))
}

/// Turn a finished operation into its result, or an error carrying the user message
fn finish<T>(operation: Operation<T>) -> Result<T> {
    match operation.into_result() {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => {
            tracing::debug!("Operation failed: {}", err);
            anyhow::bail!("{}", err.user_message())
        }
        None => anyhow::bail!("Operation did not finish"),
    }
}

/// Generate an image, print its reference and description, optionally save it
pub async fn run_image(prompt: &str, output: Option<PathBuf>, describe: bool) -> Result<()> {
    let client = build_client()?;
    let pipeline = GenerationPipeline::new(client).with_auto_describe(describe);

    println!("{}", "Generating image...".yellow());
    let artifact = finish(pipeline.generate(prompt).await?)?;
    println!("{} {}", "Image:".bold(), artifact.image);

    if let Some(path) = output {
        save_image(&artifact.image, &path).await?;
        println!("{} {}", "✓".green(), format!("Saved to {}", path.display()));
    }

    if describe {
        println!("{}", "Describing...".yellow());
        pipeline.settle().await;
        let description = pipeline
            .current_artifact()
            .await
            .and_then(|a| a.description().map(str::to_string));
        println!("\n{}", "Image Description".bold().cyan());
        println!("{}", render_description(description.as_deref()));
    }

    Ok(())
}

/// Describe an image given as URL, data URL or local file
pub async fn run_describe(source: &str) -> Result<()> {
    let image = image_from_source(source)?;
    let client = build_client()?;
    let pipeline = GenerationPipeline::new(client);

    println!("{}", "Analyzing image...".yellow());
    let description = finish(pipeline.describe_uploaded(image).await?)?;
    println!("\n{}", "Image Description".bold().cyan());
    println!("{}", render_description(Some(&description)));
    Ok(())
}

/// Blank and missing descriptions render the same way
fn render_description(description: Option<&str>) -> String {
    match description.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => text.to_string(),
        None => "No description available.".dimmed().to_string(),
    }
}

/// Run interactive chat mode
pub async fn run_chat(initial_message: Option<String>) -> Result<()> {
    let client = build_client()?;
    let greeting = client.config().chat.greeting.clone();
    if client.chat_is_demo() {
        println!(
            "{}",
            "No API key set: chat replies are demo placeholders.".yellow()
        );
    }
    let session = ChatSession::with_greeting(client, &greeting);

    println!("prism chat mode");
    println!("Type 'exit' or 'quit' to exit, 'clear' to clear history\n");
    if !greeting.trim().is_empty() {
        println!("{} {}\n", "Bot:".bold().cyan(), greeting);
    }

    if let Some(msg) = initial_message {
        println!("> {}\n", msg);
        send_and_print(&session, &msg).await;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("Goodbye!");
                break;
            }
            "clear" => {
                session.clear().await;
                println!("Conversation cleared.\n");
                continue;
            }
            _ => {}
        }

        send_and_print(&session, input).await;
    }

    Ok(())
}

async fn send_and_print(session: &ChatSession, text: &str) {
    if session.send(text).await.is_none() {
        return;
    }
    // Success or failure, the reply is the last transcript entry
    if let Some(reply) = session
        .transcript()
        .await
        .last()
        .filter(|m| m.role == Role::Assistant)
    {
        println!("\n{} {}\n", "Bot:".bold().cyan(), reply.content);
    }
}

/// Run one round of the typing test
pub async fn run_typing(text_index: usize, name: Option<String>) -> Result<()> {
    let target = typing::SAMPLE_TEXTS[text_index % typing::SAMPLE_TEXTS.len()];

    println!("{}", "Typing Speed Test".bold().cyan());
    println!("Type the text below and press Enter:\n");
    println!("  {}\n", target.bold());
    print!("> ");
    io::stdout().flush()?;

    let started = std::time::Instant::now();
    let mut typed = String::new();
    io::stdin().lock().read_line(&mut typed)?;
    let typed = typed.trim_end_matches(['\r', '\n']);
    let stats = TypingStats::compute(target, typed, started.elapsed());

    println!("\n  {}\n", render_marks(target, typed));
    println!(
        "WPM: {}   Accuracy: {}%{}",
        stats.wpm.to_string().bold(),
        stats.accuracy.to_string().bold(),
        if stats.complete {
            format!("   {}", "Complete!".green())
        } else {
            String::new()
        }
    );

    if let Some(name) = name {
        let mut board = Leaderboard::load(Leaderboard::default_path());
        match board.submit(&name, stats, chrono::Utc::now()) {
            Some(rank) => {
                board.save()?;
                println!("{} Ranked #{} on the leaderboard", "✓".green(), rank);
            }
            None => println!("Result not recorded on the leaderboard."),
        }
    }

    Ok(())
}

fn render_marks(target: &str, typed: &str) -> String {
    typing::char_marks(target, typed)
        .into_iter()
        .map(|(c, mark)| {
            let s = c.to_string();
            match mark {
                CharMark::Untyped => s.dimmed().to_string(),
                CharMark::Correct => s.green().to_string(),
                CharMark::Incorrect => s.red().underline().to_string(),
            }
        })
        .collect()
}

/// Show or clear the local leaderboard
pub async fn run_leaderboard(clear: bool) -> Result<()> {
    let mut board = Leaderboard::load(Leaderboard::default_path());

    if clear {
        board.clear()?;
        println!("{} Leaderboard cleared", "✓".green());
        return Ok(());
    }

    println!("\n{}", "=== LEADERBOARD (LOCAL) ===".bold().cyan());
    if board.entries().is_empty() {
        println!("No entries yet. Run `prism typing --name <you>` to add one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "#")]
        rank: usize,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "WPM")]
        wpm: u32,
        #[tabled(rename = "Accuracy")]
        accuracy: String,
        #[tabled(rename = "When")]
        when: String,
    }

    let rows: Vec<Row> = board
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| Row {
            rank: i + 1,
            name: e.name.clone(),
            wpm: e.wpm,
            accuracy: format!("{}%", e.accuracy),
            when: e
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
    Ok(())
}

/// Interpret a CLI argument as an image reference
pub fn image_from_source(source: &str) -> Result<ImageReference> {
    if source.starts_with("data:") {
        return ImageReference::from_data_url(source)
            .context("Invalid data URL: expected data:<type>;base64,<payload>");
    }
    if let Ok(url) = url::Url::parse(source) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(ImageReference::url(source));
        }
    }

    let path = Path::new(source);
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(ImageReference::inline(STANDARD.encode(bytes)).with_media_type(media_type_for(path)))
}

fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

async fn save_image(image: &ImageReference, path: &Path) -> Result<()> {
    let bytes = match image {
        ImageReference::Url(url) => reqwest::get(url)
            .await
            .context("Failed to download image")?
            .error_for_status()
            .context("Image download failed")?
            .bytes()
            .await?
            .to_vec(),
        ImageReference::Inline { data, .. } => STANDARD
            .decode(data)
            .context("Inline image is not valid base64")?,
    };
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
