//! DataSmith chat CLI - terminal client for a conversational-AI app.
//!
//! This is the entry point for the `datasmith-chat` binary.

mod printer;

use std::io;

use anyhow::Context;
use clap::Parser;
use datasmith_chat::{
    ChatConfig, ChatSession, Inputs, ThoughtSeedPolicy, TurnEvent, TurnOutcome, DEFAULT_USER,
};
use datasmith_core::ConversationId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use printer::Printer;

/// Number of turns shown by `/history`.
const HISTORY_LIMIT: u32 = 20;

/// DataSmith chat CLI - talk to a conversational-AI app from the terminal.
#[derive(Parser, Debug)]
#[command(name = "datasmith-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// API base URL.
    #[arg(long, env = "DIFY_BASE_URL", default_value = "https://api.dify.ai/v1")]
    base_url: String,

    /// App API key.
    #[arg(long, env = "DIFY_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Same-origin proxy endpoint to route requests through.
    #[arg(long, env = "DIFY_PROXY_URL")]
    proxy: Option<String>,

    /// End-user identifier.
    #[arg(long, env = "DIFY_USER", default_value = DEFAULT_USER)]
    user: String,

    /// Continue an existing conversation.
    #[arg(long)]
    conversation: Option<String>,

    /// Fetch suggested follow-up questions after each reply.
    #[arg(long, default_value = "false")]
    suggestions: bool,

    /// Never use the first agent thought as the reply text.
    #[arg(long, default_value = "false")]
    no_thought_seed: bool,

    /// Print agent thoughts as they arrive.
    #[arg(long, default_value = "false")]
    show_thoughts: bool,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl Args {
    fn config(&self) -> ChatConfig {
        let mut config = ChatConfig::new(&self.base_url, &self.api_key);
        config.proxy_endpoint.clone_from(&self.proxy);
        config.user.clone_from(&self.user);
        if self.no_thought_seed {
            config.thought_seed = ThoughtSeedPolicy::Never;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter("datasmith_chat=debug,datasmith_cli=debug,warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let mut session = ChatSession::new(args.config()).context("invalid chat configuration")?;
    if let Some(conversation) = &args.conversation {
        let id: ConversationId = conversation.parse().context("invalid conversation id")?;
        session = session.with_conversation(id);
    }

    let mut printer = Printer::new(io::stdout(), args.show_thoughts);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("Type a message, /new to start over, /history to show past turns, /quit to exit.");
    eprintln!("Press Ctrl-C while a reply streams to stop it.");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session.reset();
                eprintln!("(new conversation)");
            }
            "/history" => match session.conversation_history(HISTORY_LIMIT).await {
                Ok(page) => printer.history(&page)?,
                Err(e) => eprintln!("error: {e}"),
            },
            query => {
                let outcome = run_turn(&session, query, &mut printer).await?;
                if args.suggestions && outcome.is_completed() {
                    if let Some(message_id) = &outcome.message_id {
                        let questions = session
                            .fetch_suggested_questions_with_retry(
                                message_id,
                                session.config().suggestion_retry,
                            )
                            .await;
                        printer.suggestions(&questions)?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Run one turn, printing updates as they arrive.
///
/// Ctrl-C stops the generation; the turn then ends as stopped.
async fn run_turn(
    session: &ChatSession,
    query: &str,
    printer: &mut Printer<io::Stdout>,
) -> anyhow::Result<TurnOutcome> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let mut handler = events_tx;
    let send = session.send(query, Inputs::new(), &mut handler);
    tokio::pin!(send);

    let mut stopping = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome,
            Some(event) = events_rx.recv() => printer.handle(&event)?,
            result = tokio::signal::ctrl_c(), if !stopping => {
                result?;
                stopping = true;
                session.stop().await;
            }
        }
    };

    while let Ok(event) = events_rx.try_recv() {
        printer.handle(&event)?;
    }
    Ok(outcome)
}
