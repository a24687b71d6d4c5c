use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::config::ChatConfig;
use crate::protocol::{FeedbackRating, ProtocolVariant};

#[derive(Parser, Debug)]
#[command(name = "sse-chat")]
#[command(version)]
#[command(about = "Streaming chat client: answers stream in as they are generated")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// TOML config file (defaults to $CHAT_CONFIG or ./sse-chat.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, e.g. http://127.0.0.1:8000
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// User id sent with every request
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Backend app flavour
    #[arg(long, global = true, value_enum)]
    pub protocol: Option<ProtocolVariant>,

    /// Do not highlight figures in rendered answers
    #[arg(long, global = true)]
    pub no_bold_figures: bool,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Interactive chat (default)
    Chat,

    /// Ask one question and print the answer
    Ask {
        query: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Print rendered markup instead of the raw answer
        #[arg(long)]
        html: bool,
    },

    /// List recent conversations
    History {
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Print the messages of a conversation
    Show { conversation_id: String },

    /// Delete a conversation
    Delete { conversation_id: String },

    /// Rate an answer by its backend message id
    Feedback {
        message_id: String,

        #[arg(value_enum)]
        rating: RatingChoice,

        /// Free-text detail sent with the rating
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Render Markdown from stdin to markup on stdout
    Render,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// Commands that act on conversations already stored for the user.
    pub fn reads_history(&self) -> bool {
        match self {
            Command::History { .. } | Command::Show { .. } | Command::Delete { .. } => true,
            Command::Ask { conversation, .. } => conversation.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RatingChoice {
    Like,
    Dislike,
    /// Retract an earlier rating
    None,
}

impl RatingChoice {
    pub fn rating(self) -> Option<FeedbackRating> {
        match self {
            RatingChoice::Like => Some(FeedbackRating::Like),
            RatingChoice::Dislike => Some(FeedbackRating::Dislike),
            RatingChoice::None => None,
        }
    }
}

impl Args {
    /// Flags win over file and environment values.
    pub fn apply_to(&self, config: &mut ChatConfig) {
        if let Some(url) = &self.api_url {
            config.base_url = url.clone();
        }
        if let Some(user) = &self.user {
            config.user_id = Some(user.clone());
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if self.no_bold_figures {
            config.bold_figures = false;
        }
        if let Some(Command::History { limit: Some(limit) }) = &self.command {
            config.history_limit = *limit;
        }
    }

    /// The chosen subcommand; bare `sse-chat` opens the interactive chat.
    pub fn subcommand(&self) -> Command {
        self.command.clone().unwrap_or(Command::Chat)
    }
}

/// Write a completion script for `shell`.
pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, out);
}
