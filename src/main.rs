use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use querious_cli::{
    confirm, display_banner, document_line, handle_input_with_history, limits_lines, print_help,
    print_upload_report, prompt_line, prompt_secret, session_line, sources_line, StreamPrinter,
};
use querious_client::{upload_paths, ChatUpdate, ClientConfig, Conversation, QueriousClient};
use querious_core::{QueriousApi, QueryEventRequest, Scope, StreamingState, DEFAULT_TOP_K};

/// Model the background job path answers with
const BACKGROUND_MODEL: &str = "deepseek";

#[derive(Parser)]
#[command(name = "querious")]
#[command(about = "Ask questions about your documents from the terminal", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and show the account
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Send the email verification link again
    ResendVerification { email: String },
    /// End the session
    Logout {
        /// Sign out every device, not just this one
        #[arg(long)]
        all: bool,
    },
    /// List signed-in sessions, or revoke one
    Sessions {
        #[arg(long, value_name = "ID")]
        revoke: Option<String>,
    },
    /// Change the account password
    Password,
    /// Show the logged-in user
    Me,
    /// List projects, or create one
    Projects {
        #[arg(long, value_name = "NAME")]
        create: Option<String>,
    },
    /// List chats, or create one
    Chats {
        /// Chats of this project instead of standalone chats
        #[arg(long)]
        project: Option<String>,
        #[arg(long, value_name = "TITLE")]
        create: Option<String>,
    },
    /// Rename or pin a chat
    UpdateChat {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        pin: bool,
        #[arg(long, conflicts_with = "pin")]
        unpin: bool,
    },
    /// Delete a chat and its messages
    DeleteChat {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a project
    DeleteProject {
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// List documents in a chat or project
    Docs(ScopeArgs),
    /// Show the ingestion status of a document
    DocStatus { id: String },
    /// Delete a document, or unlink it from one chat or project
    DeleteDoc {
        id: String,
        #[command(flatten)]
        scope: OptionalScopeArgs,
        #[arg(short, long)]
        yes: bool,
    },
    /// Show upload limits and usage
    Limits(ScopeArgs),
    /// Upload PDF files
    Upload {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ask one question and stream the answer
    Ask {
        chat_id: String,
        question: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
        /// Queue the question as a background job and wait for the result
        #[arg(long)]
        background: bool,
    },
    /// Interactive chat
    Chat {
        chat_id: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
    },
    /// Wait for a background job and print its output
    Poll { event_id: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ScopeArgs {
    #[arg(long)]
    chat: Option<String>,
    #[arg(long)]
    project: Option<String>,
}

#[derive(Args)]
#[group(required = false, multiple = false)]
struct OptionalScopeArgs {
    #[arg(long)]
    chat: Option<String>,
    #[arg(long)]
    project: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> Result<Scope> {
        match (&self.chat, &self.project) {
            (Some(chat), None) => Ok(Scope::chat(chat)),
            (None, Some(project)) => Ok(Scope::project(project)),
            _ => bail!("pass exactly one of --chat or --project"),
        }
    }
}

impl OptionalScopeArgs {
    fn scope(&self) -> Option<Scope> {
        match (&self.chat, &self.project) {
            (Some(chat), _) => Some(Scope::chat(chat)),
            (None, Some(project)) => Some(Scope::project(project)),
            (None, None) => None,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "querious=debug,querious_client=debug,querious_core=debug"
    } else {
        "querious=warn,querious_client=warn,querious_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ClientConfig::from_env()?;
    debug!(api_url = %config.api_url, jobs_url = %config.jobs_url, "client configured");
    let client = QueriousClient::new(config)?;

    let anonymous = matches!(
        cli.command,
        Command::Login { .. }
            | Command::Logout { all: false }
            | Command::Register { .. }
            | Command::ResendVerification { .. }
    );
    if !anonymous {
        ensure_session(&client).await?;
    }
    run(&client, cli.command).await
}

/// Log in with configured credentials, if any; otherwise rely on a later refresh
async fn ensure_session(client: &QueriousClient) -> Result<()> {
    let config = client.config();
    if config.email.is_some() && config.password.is_some() {
        client.login_from_config().await?;
    }
    Ok(())
}

async fn login(client: &QueriousClient, email: Option<String>, password: Option<String>) -> Result<()> {
    let config = client.config();
    let email = match email.or_else(|| config.email.clone()) {
        Some(email) => email,
        None => prompt_line("Email")?,
    };
    let password = match password.or_else(|| config.password.clone()) {
        Some(password) => password,
        None => prompt_secret("Password")?,
    };

    let envelope = client.login(&email, &password).await?;
    println!(
        "{} Logged in as {} ({} plan)",
        "✅".green(),
        envelope.user.email.bold(),
        envelope.user.plan
    );
    Ok(())
}

async fn register(client: &QueriousClient, email: Option<String>, name: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_line("Email")?,
    };
    let name = match name {
        Some(name) => name,
        None => prompt_line("Name")?,
    };
    let password = prompt_secret("Password")?;
    if prompt_secret("Repeat password")? != password {
        bail!("passwords do not match");
    }

    let outcome = client.register(&email, &password, &name).await?;
    println!("{} {}", "✅".green(), outcome.message);
    Ok(())
}

async fn change_password(client: &QueriousClient) -> Result<()> {
    let current = prompt_secret("Current password")?;
    let new = prompt_secret("New password")?;
    if prompt_secret("Repeat new password")? != new {
        bail!("passwords do not match");
    }

    client.change_password(&current, &new).await?;
    println!("{} Password changed. Other devices must log in again.", "✅".green());
    Ok(())
}

async fn run(client: &QueriousClient, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => login(client, email, password).await?,
        Command::Register { email, name } => register(client, email, name).await?,
        Command::ResendVerification { email } => {
            let message = client.resend_verification(&email).await?;
            println!("{} {}", "📧".cyan(), message);
        }
        Command::Logout { all: false } => {
            client.logout().await?;
            println!("{} Logged out", "✅".green());
        }
        Command::Logout { all: true } => {
            client.logout_all().await?;
            println!("{} Logged out of every session", "✅".green());
        }
        Command::Sessions { revoke: Some(id) } => {
            client.revoke_session(&id).await?;
            println!("{} Revoked session {}", "✅".green(), id);
        }
        Command::Sessions { revoke: None } => {
            for session in client.sessions().await? {
                println!("{}", session_line(&session));
            }
        }
        Command::Password => change_password(client).await?,
        Command::Me => {
            let envelope = client.me().await?;
            let user = envelope.user;
            println!("{} <{}>", user.name.bold(), user.email);
            println!("Plan: {}", user.plan);
            let tokens_left = user.plan_limits().tokens_remaining(user.tokens_used);
            println!("Tokens used: {} ({} left)", user.tokens_used, tokens_left);
            println!("Active documents: {}", user.active_documents_count);
            if !envelope.providers.is_empty() {
                println!("Sign-in methods: {}", envelope.providers.join(", "));
            }
        }
        Command::Projects { create: Some(name) } => {
            let project = client.create_project(&name).await?;
            println!("{} Created project {} ({})", "✅".green(), project.name.bold(), project.id);
        }
        Command::Projects { create: None } => {
            for project in client.list_projects().await? {
                println!("{}  {}", project.id, project.name);
            }
        }
        Command::Chats { project, create: Some(title) } => {
            let chat = client.create_chat(project.as_deref(), &title).await?;
            println!("{} Created chat {} ({})", "✅".green(), chat.title.bold(), chat.id);
        }
        Command::Chats { project, create: None } => {
            for chat in client.list_chats(project.as_deref()).await? {
                let pin = if chat.is_pinned { "📌 " } else { "" };
                println!("{}  {}{}", chat.id, pin, chat.title);
            }
        }
        Command::UpdateChat { id, title, pin, unpin } => {
            let is_pinned = match (pin, unpin) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let update = ChatUpdate {
                title,
                is_pinned,
                ..ChatUpdate::default()
            };
            let chat = client.update_chat(&id, &update).await?;
            println!("{} Updated chat {} ({})", "✅".green(), chat.title.bold(), chat.id);
        }
        Command::DeleteChat { id, yes } => {
            if !yes && !confirm(&format!("Delete chat {} and its messages?", id))? {
                return Ok(());
            }
            client.delete_chat(&id).await?;
            println!("{} Deleted chat {}", "✅".green(), id);
        }
        Command::DeleteProject { id, yes } => {
            if !yes && !confirm(&format!("Delete project {}?", id))? {
                return Ok(());
            }
            client.delete_project(&id).await?;
            println!("{} Deleted project {}", "✅".green(), id);
        }
        Command::DocStatus { id } => {
            let info = client.document_status(&id).await?;
            println!("{}  {}  {:?}", info.document_id, info.filename, info.status);
        }
        Command::Docs(scope) => {
            let documents = client.list_documents(&scope.scope()?).await?;
            if documents.is_empty() {
                println!("{}", "No documents yet".dimmed());
            }
            for doc in documents {
                println!("{}", document_line(&doc));
            }
        }
        Command::DeleteDoc { id, scope, yes } => {
            let question = match scope.scope() {
                Some(scope) => format!("Remove document {} from {}?", id, scope),
                None => format!("Delete document {} everywhere?", id),
            };
            if !yes && !confirm(&question)? {
                return Ok(());
            }
            let outcome = client.delete_document(&id, scope.scope().as_ref()).await?;
            let message = outcome.message.unwrap_or_else(|| outcome.status.clone());
            println!("{} {}", "✅".green(), message);
        }
        Command::Limits(scope) => {
            let scope = scope.scope()?;
            let (limits, user) = tokio::join!(client.upload_limits(&scope), client.current_user());
            for line in limits_lines(&limits?, &user?) {
                println!("{}", line);
            }
        }
        Command::Upload { scope, files } => {
            let report = upload_paths(client, &scope.scope()?, &files).await?;
            print_upload_report(&report);
            if !report.failed.is_empty() {
                bail!("{} of {} uploads failed", report.failed.len(), files.len());
            }
        }
        Command::Ask { chat_id, question, top_k, background: true } => {
            let chat = client.get_chat(&chat_id).await?;
            let scope = match chat.project_id {
                Some(project_id) => Scope::project(project_id),
                None => Scope::chat(&chat_id),
            };
            let request = QueryEventRequest {
                question,
                chat_id,
                scope_type: scope.scope_type,
                scope_id: scope.scope_id,
                model: BACKGROUND_MODEL.to_string(),
                top_k,
                history: Vec::new(),
            };
            println!("{}", "… Waiting for the answer".dimmed());
            let result = client.ask_in_background(&request).await?;
            println!("{}", result.answer);
            if let Some(line) = sources_line(&result.sources, &[]) {
                println!("{}", line.dimmed());
            }
            println!("{}", format!("{} tokens", result.tokens_used).dimmed());
        }
        Command::Ask { chat_id, question, top_k, background: false } => {
            let mut conversation = Conversation::new(client, chat_id).with_top_k(top_k);
            let mut printer = StreamPrinter::new();
            let outcome = conversation.send(&question, |s| printer.update(s)).await;
            query_outcome(outcome)?;
        }
        Command::Chat { chat_id, top_k } => chat(client, &chat_id, top_k).await?,
        Command::Poll { event_id } => {
            let output = client.poll_job_output(&event_id).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Exit status of a one-shot question; the printer has already shown any error
fn query_outcome(outcome: querious_core::Result<StreamingState>) -> Result<()> {
    match outcome {
        Ok(state) if state.error.is_none() => Ok(()),
        Err(e) if e.requires_login() => Err(e.into()),
        _ => bail!("query failed"),
    }
}

async fn chat(client: &QueriousClient, chat_id: &str, top_k: u32) -> Result<()> {
    let title = client
        .get_chat(chat_id)
        .await
        .map(|c| c.title)
        .unwrap_or_else(|_| chat_id.to_string());
    let mut conversation = Conversation::resume(client, chat_id).await?.with_top_k(top_k);

    display_banner(&title);
    let mut history = Vec::new();

    while let Some(input) = handle_input_with_history(&mut history)? {
        match input.as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "/help" => print_help(),
            "/clear" => {
                conversation.clear();
                println!("{}", "History cleared".dimmed());
            }
            "/history" => {
                for turn in conversation.turns() {
                    println!("{}: {}", format!("{:?}", turn.role).bold(), turn.content);
                }
            }
            question => {
                let mut printer = StreamPrinter::new();
                match conversation.send(question, |s| printer.update(s)).await {
                    Ok(_) => {}
                    Err(e) if e.requires_login() => {
                        println!("{} {}", "🔒".yellow(), e);
                        break;
                    }
                    // Already rendered by the printer
                    Err(_) => {}
                }
                conversation.reset();
            }
        }
    }

    println!("{}", "👋 Goodbye!".green());
    Ok(())
}
