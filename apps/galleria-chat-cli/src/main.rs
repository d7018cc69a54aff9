use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use galleria_chat::{
    has_unread, unread_count_for, ChatConfig, ChatController, Conversation,
    ConversationRepository, ConversationService, ConversationSummary, ListStatus, Message,
    NotificationSink, ParticipantDirectory, StaticDirectory, StaticIdentity, StoreRepository,
};
use galleria_store::{ConversationStore, StoreConfig};
use tracing::{debug, info, instrument};
use tracing_subscriber::EnvFilter;

/// Galleria Chat - conversations between gallery users from the terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(long, global = true, default_value = "galleria-chat.db")]
    db: PathBuf,

    /// JSON array of users: [{"id", "name", "email", "role"}]
    #[arg(long, global = true, default_value = "users.json")]
    users: PathBuf,

    /// Optional JSON chat configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// User id to act as
    #[arg(long, global = true)]
    me: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the user directory
    Users,
    /// Start a conversation, or resume the existing one
    Start {
        /// The other participant
        #[arg(long = "with")]
        with: String,
        /// Welcome text (defaults to the configured one)
        #[arg(long)]
        text: Option<String>,
        /// Post the welcome message as this participant
        #[arg(long = "as")]
        as_user: Option<String>,
    },
    /// Send a message
    Send {
        #[arg(long)]
        conversation: String,
        text: String,
    },
    /// List conversations, most recent first
    List,
    /// Print the messages of a conversation
    History {
        #[arg(long)]
        conversation: String,
    },
    /// Mark every message of a conversation read
    Read {
        #[arg(long)]
        conversation: String,
    },
    /// Follow the conversation list until Ctrl+C
    Watch,
}

/// Prints new-message alerts to the terminal
struct ConsoleNotifications;

impl NotificationSink for ConsoleNotifications {
    fn on_new_unread_message(&self, summary: ConversationSummary) {
        let from = summary
            .from_name
            .or(summary.from_id)
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "🔔 {}: {} ({} unread)",
            from,
            summary.last_message.unwrap_or_default(),
            summary.unread_count
        );
    }
}

struct App {
    service: Arc<ConversationService<StoreRepository>>,
    directory: Arc<StaticDirectory>,
    config: ChatConfig,
    me: Option<String>,
}

impl App {
    async fn open(args: &Args) -> Result<Self> {
        let config = match &args.config {
            Some(path) => {
                let json = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                ChatConfig::from_json(&json).context("Invalid chat config")?
            }
            None => ChatConfig::default(),
        };

        let directory = Arc::new(load_directory(&args.users).await?);

        info!("Opening store at {}", args.db.display());
        let store = ConversationStore::with_config(StoreConfig {
            db_path: args.db.clone(),
            ..Default::default()
        })
        .await
        .context("Failed to open conversation store")?;

        let repository =
            StoreRepository::new(Arc::new(store)).with_feed_capacity(config.feed_capacity);
        let service = Arc::new(ConversationService::new(
            Arc::new(repository),
            directory.clone(),
        ));

        Ok(Self {
            service,
            directory,
            config,
            me: args.me.clone(),
        })
    }

    fn me(&self) -> Result<&str> {
        match self.me.as_deref() {
            Some(me) => Ok(me),
            None => bail!("--me <user-id> is required for this command"),
        }
    }

    async fn names(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .directory
            .list_users()
            .await?
            .into_iter()
            .map(|user| (user.id, user.name))
            .collect())
    }
}

async fn load_directory(path: &Path) -> Result<StaticDirectory> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read users file {}", path.display()))?;
    StaticDirectory::from_json(&json)
        .with_context(|| format!("Invalid users file {}", path.display()))
}

fn print_conversations(me: &str, conversations: &[Conversation], names: &HashMap<String, String>) {
    if conversations.is_empty() {
        println!("No conversations yet.");
        return;
    }

    for conversation in conversations {
        let other = conversation.other_participant(me).unwrap_or("?");
        let marker = if has_unread(me, conversation) { "●" } else { " " };
        println!(
            "{} {:<20} {}  {}  [{}]",
            marker,
            names.get(other).map(String::as_str).unwrap_or(other),
            conversation.last_updated.format("%Y-%m-%d %H:%M"),
            conversation.last_message.as_deref().unwrap_or("-"),
            conversation.id
        );
    }
    println!("{} unread", unread_count_for(me, conversations));
}

fn print_message(message: &Message, names: &HashMap<String, String>) {
    let sender = names
        .get(&message.sender_id)
        .map(String::as_str)
        .unwrap_or(&message.sender_id);
    println!(
        "[{}] {}: {}  (read by {})",
        message.timestamp.format("%H:%M:%S"),
        sender,
        message.text,
        message.read_by.join(", ")
    );
}

#[instrument(skip(app))]
async fn start(app: &App, with: &str, text: Option<&str>, as_user: Option<&str>) -> Result<()> {
    let me = app.me()?;

    let welcome_sender = match as_user {
        Some(sender) => Some(sender.to_string()),
        None if app.config.welcome_from_admin => {
            app.service.admin_welcome_sender(me, with).await?
        }
        None => None,
    };
    let text = text.unwrap_or(app.config.welcome_text.as_str());

    let started = app
        .service
        .start_conversation(me, with, text, welcome_sender.as_deref(), &[])
        .await?;

    if started.created {
        println!("✅ Started conversation {}", started.conversation_id);
        if let Some(welcome) = started.welcome {
            print_message(&welcome, &app.names().await?);
        }
    } else {
        println!("↩️  Resumed conversation {}", started.conversation_id);
    }
    Ok(())
}

async fn watch(app: &App) -> Result<()> {
    let me = app.me()?.to_string();
    let names = app.names().await?;

    let mut controller = ChatController::new(
        app.service.clone(),
        Arc::new(StaticIdentity::signed_in(me.clone())),
        Arc::new(ConsoleNotifications),
        app.config.clone(),
    );
    let mut state = controller.watch();
    controller.start().await?;

    println!("👀 Watching conversations of {} (Ctrl+C to stop)", me);
    let mut printed_revision = 0;

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                match snapshot.list_status {
                    ListStatus::Live if snapshot.conversations_revision != printed_revision => {
                        printed_revision = snapshot.conversations_revision;
                        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
                        print_conversations(&me, &snapshot.conversations, &names);
                    }
                    ListStatus::Failed => {
                        if let Some(err) = &snapshot.last_error {
                            eprintln!("✗ Conversation list unavailable: {}", err);
                        }
                    }
                    _ => debug!("State changed: {:?}", snapshot.list_status),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
        }
    }

    controller.stop().await;
    println!("\n👋 Goodbye!");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();

    if let Command::Users = args.command {
        let directory = load_directory(&args.users).await?;
        for user in directory.list_users().await? {
            println!("{:<12} {:<24} {:<28} {}", user.id, user.name, user.email, user.role.as_str());
        }
        return Ok(());
    }

    let app = App::open(&args).await?;

    match &args.command {
        Command::Users => {}
        Command::Start {
            with,
            text,
            as_user,
        } => start(&app, with, text.as_deref(), as_user.as_deref()).await?,
        Command::Send { conversation, text } => {
            let me = app.me()?;
            let message = app.service.send_message(conversation, me, text).await?;
            print_message(&message, &app.names().await?);
        }
        Command::List => {
            let me = app.me()?;
            let conversations = app.service.repository().conversations_for(me).await?;
            print_conversations(me, &conversations, &app.names().await?);
        }
        Command::History { conversation } => {
            let names = app.names().await?;
            for message in app.service.repository().messages(conversation).await? {
                print_message(&message, &names);
            }
        }
        Command::Read { conversation } => {
            let me = app.me()?;
            let mut marked = 0;
            for message in app.service.repository().messages(conversation).await? {
                if !message.is_read_by(me) {
                    app.service.mark_read(conversation, &message.id, me).await?;
                    marked += 1;
                }
            }
            println!("✓ Marked {} messages read", marked);
        }
        Command::Watch => watch(&app).await?,
    }

    Ok(())
}
