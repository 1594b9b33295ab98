use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use studio_contracts::commands::{parse_intent, CHAT_HELP_COMMANDS};
use studio_contracts::events::SessionLog;
use studio_contracts::session::{Action, Effect, Phase, Session, NO_IMAGE_PRODUCED};
use studio_engine::config::load_dotenv;
use studio_engine::studio::image_label;
use studio_engine::{
    default_client_registry, new_session_id, EditStudio, GeminiConfig, InferenceClient,
};

#[derive(Debug, Parser)]
#[command(
    name = "photo-studio",
    version,
    about = "Edit photos with natural-language instructions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: upload, describe edits, refine, download.
    Chat(ChatArgs),
    /// Apply one or more instructions to an image in sequence and save the result.
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long, default_value = "photo-studio-out")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// `gemini` or `dryrun`.
    #[arg(long, default_value = "gemini")]
    client: String,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Image to load before the first prompt.
    #[arg(long)]
    image: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    image: PathBuf,
    /// Repeat to chain edits; each one starts from the previous result.
    #[arg(long = "prompt", required = true)]
    prompts: Vec<String>,
}

const INPUT_POLL: Duration = Duration::from_millis(100);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("photo-studio error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    load_dotenv(Path::new(".env")).context("failed loading .env")?;
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Edit(args) => run_edit(args),
    }
}

fn build_client(name: &str, model: Option<String>) -> Result<Arc<dyn InferenceClient>> {
    let gemini = if name.trim() == "gemini" {
        Some(
            GeminiConfig::from_env()
                .context("the gemini client needs an API key")?
                .with_model(model),
        )
    } else {
        None
    };
    let registry = default_client_registry(gemini)?;
    registry.get(name).with_context(|| {
        format!(
            "unknown client '{name}' (available: {})",
            registry.names().join(", ")
        )
    })
}

fn open_studio(args: &SessionArgs) -> Result<EditStudio> {
    let client = build_client(&args.client, args.model.clone())?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    EditStudio::new(client, SessionLog::new(events_path, new_session_id()))
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let mut studio = open_studio(&args.session)?;
    if let Effect::Rejected(err) = studio.upload_file(&args.image)? {
        studio.finish()?;
        bail!("{}: {err}", args.image.display());
    }

    for prompt in args.prompts {
        match studio.submit(Some(prompt.clone()))? {
            Effect::StartEdit(_) => println!("Generating: {prompt}"),
            Effect::Rejected(err) => {
                println!("{err}");
                studio.finish()?;
                return Ok(1);
            }
            _ => {}
        }
        studio.wait_for_edit(None)?;
        if studio.session().phase() == Phase::Error {
            println!("{}", error_banner(studio.session()));
            studio.finish()?;
            return Ok(1);
        }
        println!("Edited: {}", image_label(studio.session().current()));
    }

    let saved = studio.download(&args.session.out)?;
    println!("Saved {}", saved.display());
    studio.finish()?;
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut studio = open_studio(&args.session)?;
    println!(
        "Photo studio ready ({} client). Type /help for commands.",
        studio.client_name()
    );
    if let Some(path) = args.image.as_deref() {
        report_upload(&studio.upload_file(path)?, &studio);
    }

    let lines = spawn_stdin_reader()?;
    prompt_marker()?;

    loop {
        let mut redraw = false;
        for effect in studio.pump()? {
            report_completion(&effect, &studio);
            redraw = true;
        }
        if redraw {
            prompt_marker()?;
        }

        let line = match lines.recv_timeout(INPUT_POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let intent = parse_intent(&line);
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join("  ")),
            "quit" => break,
            "upload" => match intent.arg.as_deref() {
                Some(path) => report_upload(&studio.upload_file(Path::new(path))?, &studio),
                None => println!("/upload requires a path"),
            },
            "set_prompt" => {
                let text = intent.arg.unwrap_or_default();
                if let Effect::Rejected(err) = studio.dispatch(Action::SetPrompt(text))? {
                    println!("{err}");
                } else {
                    println!("Prompt set.");
                }
            }
            "edit" => match studio.submit(intent.arg)? {
                Effect::StartEdit(request) => println!("Generating... ({})", request.instruction),
                Effect::Rejected(err) => println!("{err}"),
                _ => {}
            },
            "wait" => {
                studio.wait_for_edit(None)?;
                print_status(studio.session());
            }
            "status" => print_status(studio.session()),
            "download" => {
                let dir = intent
                    .arg
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.session.out.clone());
                match studio.download(&dir) {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(err) => println!("Download failed: {err:#}"),
                }
            }
            "reset" => {
                studio.reset()?;
                println!("Started over. Upload an image to begin.");
            }
            _ => println!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg.unwrap_or_default()
            ),
        }
        prompt_marker()?;
    }

    studio.finish()?;
    Ok(())
}

/// Stdin is read on its own thread so edit results can be shown while the
/// user is typing.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("studio-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("stdin reader spawn failed")?;
    Ok(rx)
}

fn prompt_marker() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

fn report_upload(effect: &Effect, studio: &EditStudio) {
    match effect {
        Effect::Rejected(err) => println!("{err}"),
        _ => println!(
            "Loaded {}. Describe your edits, e.g. 'add a majestic castle in the background'.",
            image_label(studio.session().original())
        ),
    }
}

fn report_completion(effect: &Effect, studio: &EditStudio) {
    match effect {
        Effect::Ignored(ticket) => {
            println!("\nDiscarded a late result (edit #{}).", ticket.generation)
        }
        _ => match studio.session().phase() {
            Phase::Ready => println!(
                "\nEdit complete: {}",
                image_label(studio.session().current())
            ),
            Phase::Error => println!("\n{}", error_banner(studio.session())),
            _ => {}
        },
    }
}

fn error_banner(session: &Session) -> String {
    match session.error_message() {
        Some(message) if message == NO_IMAGE_PRODUCED => {
            "The AI could not generate an image. Please try a different prompt.".to_string()
        }
        Some(message) => format!(
            "Failed to edit image: {message}. Please check your API key and try again."
        ),
        None => String::new(),
    }
}

/// Original and edited side by side; the edited pane shows the original as a
/// placeholder until an edit exists.
fn print_status(session: &Session) {
    let original = image_label(session.original());
    let edited = match session.last_result() {
        Some(_) => image_label(session.last_result()),
        None if session.original().is_some() => format!("({original}, not edited yet)"),
        None => image_label(None),
    };
    let width = original.chars().count().max("Original".len());
    println!("{:<width$} | Edited", "Original");
    println!("{original:<width$} | {edited}");
    println!("Phase: {}", session.phase().as_str());
    if !session.prompt().is_empty() {
        println!("Prompt: {}", session.prompt());
    }
    if session.phase() == Phase::Error {
        println!("Error: {}", error_banner(session));
    }
}
