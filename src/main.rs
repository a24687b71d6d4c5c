use std::io::{self, Read, Write};

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sse_chat::cli::{write_completions, Args, Command};
use sse_chat::protocol::{ConversationList, FeedbackRating};
use sse_chat::{
    render_with, ChatClient, ChatConfig, ChatController, ClientBuilder, ControllerOptions, MessageRecord,
    RenderOptions, RenderSink, Role, SubmitOutcome, Transcript,
};

// ---------------------------------------------------------------------------
// Terminal sink
// ---------------------------------------------------------------------------

/// Echoes bubbles to stdout as they stream; keeps the records in a
/// [`Transcript`] so feedback can find them.
struct TerminalSink {
    transcript: Transcript,
    /// Print user records too (history replay).
    echo_users: bool,
    /// Print nothing while streaming.
    quiet: bool,
    /// Bubble currently being written to and the text printed so far.
    open: Option<(String, String)>,
    typing: bool,
}

impl TerminalSink {
    fn new(quiet: bool) -> Self {
        Self {
            transcript: Transcript::new(),
            echo_users: false,
            quiet,
            open: None,
            typing: false,
        }
    }

    fn close_line(&mut self) {
        if self.open.take().is_some() {
            println!();
        }
    }

    fn last_rateable(&self) -> Option<String> {
        self.transcript
            .records()
            .iter()
            .rev()
            .find(|r| r.is_rateable())
            .map(|r| r.id.clone())
    }
}

impl RenderSink for TerminalSink {
    fn show_typing(&mut self) {
        self.typing = true;
        if !self.quiet {
            eprint!("{}", "...".dimmed());
            let _ = io::stderr().flush();
        }
    }

    fn remove_typing(&mut self) {
        if self.typing && !self.quiet {
            eprint!("\r   \r");
        }
        self.typing = false;
    }

    fn push(&mut self, record: MessageRecord) -> String {
        self.close_line();
        if !self.quiet {
            match record.role {
                Role::User if self.echo_users => {
                    println!("{} {}", "you>".bright_yellow().bold(), record.display_text);
                }
                Role::User => {}
                Role::Bot => {
                    print!("{} {}", "bot>".bright_cyan().bold(), record.display_text);
                    let _ = io::stdout().flush();
                    self.open = Some((record.id.clone(), record.display_text.clone()));
                }
            }
        }
        self.transcript.push(record)
    }

    fn update(&mut self, id: &str, text: &str, markup: &str) {
        self.transcript.update(id, text, markup);
        let Some((open_id, printed)) = self.open.as_mut() else {
            return;
        };
        if open_id.as_str() != id {
            return;
        }
        match text.strip_prefix(printed.as_str()) {
            Some(suffix) => print!("{suffix}"),
            // answer was replaced rather than extended
            None => print!("\n{} {}", "bot>".bright_cyan().bold(), text),
        }
        *printed = text.to_string();
        let _ = io::stdout().flush();
    }

    fn complete(&mut self, _id: &str) {
        self.close_line();
    }

    fn set_source_message_id(&mut self, id: &str, source_message_id: &str) {
        self.transcript.set_source_message_id(id, source_message_id);
    }

    fn set_feedback(&mut self, id: &str, feedback: Option<FeedbackRating>) {
        self.transcript.set_feedback(id, feedback);
    }

    fn clear(&mut self) {
        self.close_line();
        self.transcript.clear();
    }

    fn records(&self) -> &[MessageRecord] {
        self.transcript.records()
    }
}

type Controller = ChatController<ChatClient, TerminalSink>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default = if verbose { "sse_chat=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_conversations(list: &ConversationList) {
    if list.data.is_empty() {
        println!("{}", "No conversations yet.".dimmed());
        return;
    }
    for conversation in &list.data {
        let name = if conversation.name.is_empty() {
            "(untitled)"
        } else {
            conversation.name.as_str()
        };
        println!("{}  {}", conversation.id.bright_blue(), name);
    }
    if list.has_more {
        println!("{}", "...".dimmed());
    }
}

async fn rate_last(controller: &mut Controller, rating: FeedbackRating) {
    let Some(record_id) = controller.sink().last_rateable() else {
        println!("{}", "Nothing to rate yet.".bright_red());
        return;
    };
    match controller.rate(&record_id, rating).await {
        Ok(Some(r)) => println!("{} {}", "rated".bright_green(), r),
        Ok(None) => println!("{}", "rating removed".bright_green()),
        Err(e) => println!("{} {}", "feedback failed:".bright_red(), e),
    }
}

async fn load_into_view(controller: &mut Controller, conversation_id: &str) {
    controller.sink_mut().echo_users = true;
    match controller.load_conversation(conversation_id).await {
        Ok(0) => println!("{}", "Conversation is empty.".dimmed()),
        Ok(_) => {}
        Err(e) => println!("{} {}", "could not load conversation:".bright_red(), e),
    }
    let sink = controller.sink_mut();
    sink.close_line();
    sink.echo_users = false;
}

fn print_help() {
    println!("{}", "Commands:".bright_yellow());
    println!("  /new            start a new conversation");
    println!("  /history        list recent conversations");
    println!("  /switch <id>    continue a stored conversation");
    println!("  /delete <id>    delete a stored conversation");
    println!("  /like /dislike  rate the last answer (repeat to retract)");
    println!("  /quit           exit");
    println!("  Ctrl-C stops the answer that is streaming");
}

/// Interactive loop. Returns on `/quit` or end of input.
async fn repl(controller: &mut Controller) -> Result<(), Box<dyn std::error::Error>> {
    let stop = controller.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !stop.stop() {
                std::process::exit(130);
            }
        }
    });

    println!("{}", "sse-chat".bright_cyan().bold());
    println!("{}", "Type a message, or /help for commands.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".bright_yellow());
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/new" => match controller.new_conversation() {
                Ok(()) => println!("{}", "New conversation.".bright_green()),
                Err(e) => println!("{} {}", "error:".bright_red(), e),
            },
            "/history" => match controller.list_conversations().await {
                Ok(list) => print_conversations(&list),
                Err(e) => println!("{} {}", "error:".bright_red(), e),
            },
            "/switch" if !rest.is_empty() => load_into_view(controller, rest).await,
            "/delete" if !rest.is_empty() => match controller.delete_conversation(rest).await {
                Ok(true) => println!("{}", "Deleted; started a new conversation.".bright_green()),
                Ok(false) => println!("{}", "Deleted.".bright_green()),
                Err(e) => println!("{} {}", "error:".bright_red(), e),
            },
            "/like" => rate_last(controller, FeedbackRating::Like).await,
            "/dislike" => rate_last(controller, FeedbackRating::Dislike).await,
            c if c.starts_with('/') => println!("{} {}", "unknown command".bright_red(), c),
            _ => {
                let outcome = controller.submit(line).await;
                controller.sink_mut().close_line();
                if outcome == SubmitOutcome::Busy {
                    println!("{}", "Still answering; press Ctrl-C to stop.".bright_red());
                }
            }
        }
    }
    Ok(())
}

async fn ask(controller: &mut Controller, query: &str, html: bool) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = controller.submit(query).await;
    controller.sink_mut().close_line();
    if html {
        if let Some(record) = outcome.record_id().and_then(|id| controller.sink().record(id)) {
            println!("{}", record.markup);
        }
    }
    match outcome {
        SubmitOutcome::Failed { error, .. } => Err(error.into()),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let command = args.subcommand();
    match &command {
        Command::Completions { shell } => {
            write_completions(*shell, &mut io::stdout());
            return Ok(());
        }
        Command::Render => {
            let mut input = String::new();
            io::stdin().read_to_string(&mut input)?;
            let options = RenderOptions {
                bold_figures: !args.no_bold_figures,
            };
            println!("{}", render_with(&input, &options));
            return Ok(());
        }
        _ => {}
    }

    let mut config = ChatConfig::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;
    let generated = config.user_id.is_none();
    let user_id = config.ensure_user_id().to_string();
    if generated {
        if command.reads_history() {
            warn!(user = %user_id, "no user id configured; a fresh id has no stored conversations");
        }
        eprintln!(
            "{} {} {}",
            "user id:".dimmed(),
            user_id.bright_blue(),
            "(pass --user or set CHAT_USER_ID to keep history)".dimmed()
        );
    }

    let client = ClientBuilder::from_config(&config).build();
    let quiet = matches!(command, Command::Ask { html: true, .. });
    let mut controller = ChatController::new(
        client,
        TerminalSink::new(quiet),
        user_id,
        ControllerOptions::from(&config),
    );

    match command {
        Command::Chat => repl(&mut controller).await?,
        Command::Ask {
            query,
            conversation,
            html,
        } => {
            if let Some(id) = conversation {
                controller.sink_mut().quiet = true;
                controller.load_conversation(&id).await?;
                controller.sink_mut().quiet = quiet;
            }
            ask(&mut controller, &query, html).await?;
        }
        Command::History { .. } => print_conversations(&controller.list_conversations().await?),
        Command::Show { conversation_id } => load_into_view(&mut controller, &conversation_id).await,
        Command::Delete { conversation_id } => {
            controller.delete_conversation(&conversation_id).await?;
            println!("{} {}", "deleted".bright_green(), conversation_id);
        }
        Command::Feedback {
            message_id,
            rating,
            comment,
        } => {
            controller
                .send_feedback(&message_id, rating.rating(), &comment)
                .await?;
            println!("{}", "feedback sent".bright_green());
        }
        Command::Render | Command::Completions { .. } => {}
    }

    Ok(())
}
