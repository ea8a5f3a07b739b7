use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lumen_catalog::FieldCatalog;
use lumen_core::{ConversationSession, Settings, SubmitOutcome};
use lumen_host::{HostPlatform, InMemoryHost};
use lumen_types::{FieldType, Message};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[derive(Parser)]
#[command(name = "lumen", about = "Ask questions about a dataset through a chat model")]
struct Cli {
    /// Widget settings (YAML). LUMEN_API_KEY / LUMEN_MODEL_ENDPOINT override it.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Dataset served as the host data model (YAML or JSON).
    #[arg(long, global = true, default_value = "./dataset.yaml")]
    dataset: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the fields the catalog knows and their inferred types.
    Fields,
    /// Ask a single question.
    Ask { question: String },
    /// Interactive chat on stdin. Empty line or EOF quits.
    Chat,
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };
    Ok(settings.apply_env())
}

fn type_label(t: FieldType) -> &'static str {
    match t {
        FieldType::Numeric => "numeric",
        FieldType::Date => "date",
        FieldType::String => "string",
    }
}

fn print_reply(message: &Message) {
    println!("bot> {}", message.text);
    if let Some(chart) = &message.chart {
        println!(
            "     [{} chart rendered into #{}]",
            chart.spec.chart_type, chart.target_id
        );
    }
}

/// Next chat question. `None` on EOF or an empty line.
async fn next_question<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> io::Result<Option<String>> {
    Ok(lines.next_line().await?.filter(|line| !line.trim().is_empty()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let host: Arc<dyn HostPlatform> = Arc::new(InMemoryHost::from_path(&cli.dataset)?);

    match cli.command {
        Command::Fields => {
            let settings = load_settings(cli.settings.as_ref())?;
            let mut catalog = FieldCatalog::new(settings.sample_cap);
            catalog.initialize_from_host(host.as_ref()).await;
            for field in catalog.fields() {
                println!("{:<24} {:<8} {} sampled", field.name, type_label(field.field_type), field.sample.len());
            }
        }
        Command::Ask { question } => {
            let settings = load_settings(cli.settings.as_ref())?;
            let session = ConversationSession::connect(&settings, host).await?;
            match session.submit(&question).await {
                SubmitOutcome::Replied(reply) => print_reply(&reply),
                SubmitOutcome::Ignored => anyhow::bail!("question is empty"),
                SubmitOutcome::Busy => anyhow::bail!("session busy"),
            }
        }
        Command::Chat => {
            let settings = load_settings(cli.settings.as_ref())?;
            let session = ConversationSession::connect(&settings, host).await?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("you> ");
                io::stdout().flush()?;
                let Some(line) = next_question(&mut lines).await? else {
                    break;
                };
                if let SubmitOutcome::Replied(reply) = session.submit(&line).await {
                    print_reply(&reply);
                }
            }
            tracing::info!(messages = session.transcript().await.len(), "chat ended");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn questions_stop_at_blank_line_or_eof() {
        let mut lines = BufReader::new(&b"total Sales?\nby Region\n\nignored\n"[..]).lines();
        assert_eq!(next_question(&mut lines).await.unwrap().as_deref(), Some("total Sales?"));
        assert_eq!(next_question(&mut lines).await.unwrap().as_deref(), Some("by Region"));
        assert_eq!(next_question(&mut lines).await.unwrap(), None);

        let mut empty = BufReader::new(&b""[..]).lines();
        assert_eq!(next_question(&mut empty).await.unwrap(), None);
    }
}
