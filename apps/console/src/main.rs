mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use casa_chats::{
    ChatError, ChatSession, InMemoryBackend, LocalBroker, MessageDraft, PendingSend, Profile, StoreUpdate,
    View,
};
use casa_config::load as load_config;
use casa_runtime::{telemetry, ClientServices};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "casa-console")]
#[command(about = "Casa marketplace chat console")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat as a user against the configured backend
    Run {
        /// Id of the logged-in user
        #[arg(long)]
        user: String,
    },
    /// Walk through a scripted session against an in-process backend
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command {
        Commands::Run { user } => run_console(&user).await,
        Commands::Demo => run_demo().await,
    }
}

async fn run_console(user_id: &str) -> anyhow::Result<()> {
    info!(user_id, "starting interactive console");

    let config = load_config().context("failed to load configuration")?;
    let services = ClientServices::initialise(&config)?;
    let session = services.connect(user_id).await?;

    println!("Casa Chat Console");
    println!("Type '/help' for commands; Ctrl+C or '/quit' to exit");
    println!("---");
    render::snapshot(&session.snapshot());
    spawn_unread_notifier(&session);

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout())?;

        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            _ = casa_runtime::shutdown_signal() => break,
        };
        if bytes_read == 0 {
            break; // EOF
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, argument) = match input.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (input, ""),
        };

        let result = match command {
            "/quit" | "/exit" | "/q" => break,
            "/help" | "/h" => {
                print_help();
                Ok(())
            }
            "/list" | "/l" => {
                let snapshot = session.snapshot();
                render::directory(&snapshot.conversations, snapshot.total_unread);
                Ok(())
            }
            "/open" | "/o" => open(&session, argument),
            "/new" | "/n" => new_conversation(&session, argument).await,
            "/back" | "/b" => back(&session),
            "/send" | "/s" => send(&session, argument),
            "/retry" | "/r" => retry(&session, argument),
            other => {
                println!("Unknown command: {}", other);
                Ok(())
            }
        };

        if let Err(error) = result {
            println!("{}", error.to_string().red());
        }
    }

    session.logout();
    println!("Goodbye!");
    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!("  /list, /l          - List conversations");
    println!("  /open, /o <id>     - Open a conversation");
    println!("  /new, /n <user>    - Start or resume a conversation with a user");
    println!("  /back, /b          - Return to the list");
    println!("  /send, /s <text>   - Send to the open conversation");
    println!("  /retry, /r <id>    - Retry a failed message");
    println!("  /quit, /exit, /q   - Exit console");
}

fn open(session: &ChatSession, conversation_id: &str) -> Result<(), ChatError> {
    if conversation_id.is_empty() {
        return Err(ChatError::validation("Usage: /open <conversation id>"));
    }
    session.open_conversation(conversation_id)?;
    render::snapshot(&session.snapshot());
    Ok(())
}

async fn new_conversation(session: &ChatSession, target_user_id: &str) -> Result<(), ChatError> {
    if session.view() != View::Search {
        session.start_new_conversation()?;
    }

    match session.select_contact(target_user_id).await {
        Ok(conversation_id) => {
            println!("Conversation {}", conversation_id.green());
            render::snapshot(&session.snapshot());
            Ok(())
        }
        Err(error) => {
            let _ = session.cancel_search();
            Err(error)
        }
    }
}

fn back(session: &ChatSession) -> Result<(), ChatError> {
    match session.view() {
        View::Search => session.cancel_search()?,
        _ => session.back()?,
    }
    render::snapshot(&session.snapshot());
    Ok(())
}

fn send(session: &ChatSession, text: &str) -> Result<(), ChatError> {
    session.set_composer(text)?;
    let pending = session.send_composer()?;
    render::message(pending.message(), session.user_id());
    report_outcome(pending);
    Ok(())
}

fn retry(session: &ChatSession, message_id: &str) -> Result<(), ChatError> {
    let View::Chat { conversation_id } = session.view() else {
        return Err(ChatError::validation("Open the conversation first"));
    };
    let pending = session.retry(&conversation_id, message_id)?;
    report_outcome(pending);
    Ok(())
}

fn report_outcome(pending: PendingSend) {
    let temporary_id = pending.message_id().to_string();
    tokio::spawn(async move {
        match pending.wait().await {
            Ok(message) => println!("{} {}", "sent".green(), message.id),
            Err(error) => println!("{} {} (/retry {})", "failed:".red(), error, temporary_id),
        }
    });
}

fn spawn_unread_notifier(session: &ChatSession) {
    let mut updates = session.subscribe_updates();
    tokio::spawn(async move {
        let mut last_total = None;
        loop {
            match updates.recv().await {
                Ok(StoreUpdate::DirectoryChanged { total_unread }) => {
                    if last_total.is_some_and(|last| total_unread > last) {
                        println!("{} ({} unread)", "new message".yellow(), total_unread);
                    }
                    last_total = Some(total_unread);
                }
                Ok(StoreUpdate::SessionEnded { .. }) => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

const BUYER: &str = "u-ana";
const AGENT: &str = "u-bruno";
const OWNER: &str = "u-carla";

async fn run_demo() -> anyhow::Result<()> {
    info!("starting scripted demo");

    let broker = LocalBroker::default();
    let backend = Arc::new(InMemoryBackend::with_broker(broker.clone()));
    backend.add_user(Profile::new(BUYER, "Ana"));
    backend.add_user(Profile::new(AGENT, "Bruno (corretor)"));
    backend.add_user(Profile::new(OWNER, "Carla (proprietária)"));

    let agent_thread = backend.seed_conversation(BUYER, AGENT);
    backend.post_as(AGENT, &agent_thread, "Olá! O apartamento da Rua Augusta continua disponível.")?;

    let session = ChatSession::builder(BUYER, backend.clone(), Arc::new(broker))
        .uploader(backend.clone())
        .connect()
        .await?;

    step("Directory after login");
    render::snapshot(&session.snapshot());

    step("Opening the agent conversation marks it read");
    session.open_conversation(&agent_thread)?;
    session.settle().await;
    render::snapshot(&session.snapshot());

    step("Optimistic send");
    let pending = session.send_message(&agent_thread, MessageDraft::text("Ótimo, posso visitar amanhã?"))?;
    render::snapshot(&session.snapshot());
    pending.wait().await?;
    render::snapshot(&session.snapshot());

    step("A reply arrives while the list is shown");
    session.back()?;
    backend.post_as(AGENT, &agent_thread, "Claro, às 10h?")?;
    wait_for_unread(&session).await?;
    render::snapshot(&session.snapshot());

    step("A send fails and is retried");
    session.open_conversation(&agent_thread)?;
    backend.fail_next_sends(1, ChatError::network("connection reset"));
    let pending = session.send_message(&agent_thread, MessageDraft::text("Combinado!"))?;
    let failed_id = pending.message_id().to_string();
    if pending.wait().await.is_ok() {
        bail!("the injected failure was not applied");
    }
    render::snapshot(&session.snapshot());
    session.retry(&agent_thread, &failed_id)?.wait().await?;
    render::snapshot(&session.snapshot());

    step("Starting a conversation with the owner");
    session.back()?;
    session.start_new_conversation()?;
    let owner_thread = session.select_contact(OWNER).await?;
    session
        .send_attachment(&owner_thread, "planta.pdf", b"%PDF-1.4".to_vec(), Some("Planta do imóvel".into()))
        .await?
        .wait()
        .await?;
    session.settle().await;
    render::snapshot(&session.snapshot());

    step("Logout");
    session.logout();
    println!("Session state: {:?}", session.lifecycle());
    Ok(())
}

fn step(title: &str) {
    println!();
    println!("{}", format!("== {} ==", title).bold());
}

async fn wait_for_unread(session: &ChatSession) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.total_unread() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("reply was not delivered")
}
