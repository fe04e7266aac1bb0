use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tempmail_client_rs::download::{DownloadManager, DownloadPrompt};
use tempmail_client_rs::links::LinkConfirmation;
use tempmail_client_rs::render::{MessageBody, MessageRow, MessageView};
use tempmail_client_rs::sanitize::fragment_text;
use tempmail_client_rs::toast::{Toast, ToastLevel, ToastQueue};
use tempmail_client_rs::username::{validate_change, UsernameChange};
use tempmail_client_rs::{
    generate_random_username, Command, Config, Error, InboxSession, InboxView, TempMailClient,
    Theme, DEFAULT_BASE_URL,
};

#[derive(Parser, Debug)]
#[command(
    name = "tempmail",
    about = "Use a temporary mailbox from the terminal",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, env = "TEMPMAIL_BASE_URL", default_value = DEFAULT_BASE_URL, help = "Server root URL")]
    base_url: String,

    #[arg(long, env = "TEMPMAIL_SESSION", help = "Session id to resume (printed by `address`)")]
    session: Option<String>,

    #[arg(long, help = "Proxy URL (optional)")]
    proxy: Option<String>,

    #[arg(long, default_value = ".", help = "Where downloads are saved")]
    download_dir: PathBuf,

    #[arg(long, default_value_t = 5, help = "Poll interval in seconds (4-10)")]
    poll_secs: u64,

    #[arg(short = 'y', long, help = "Do not ask before downloading or opening links")]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current address and session id
    Address,
    /// Replace the address with a random one
    Reset,
    /// Change the username, keeping the domain
    Rename {
        name: Option<String>,
        #[arg(long, help = "Pick a random username")]
        random: bool,
    },
    /// Previously used addresses
    History,
    /// List messages in the inbox
    List {
        #[arg(long)]
        details: bool,
    },
    /// Show one message
    Read { id: u64 },
    /// Save a message as .eml
    Download { id: u64 },
    /// Save an attachment
    Attachment { id: u64, attachment: String },
    /// Keep the inbox open and print new mail as it arrives
    Watch,
    /// Clear the server's domain cache (admin)
    ClearDomainCache,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli);
    let client = TempMailClient::with_session(Some(config.clone()), cli.session.as_deref())?;

    match cli.command {
        Commands::Address => {
            let session = client.current_email().await?;
            println!("{}", session.email);
            println!("Expires in: {}", format_remaining(session.expires_in));
            print_session(&client);
        }
        Commands::Reset => {
            let session = client.reset_email().await?;
            println!("{}", session.email);
            print_session(&client);
        }
        Commands::Rename { name, random } => {
            let current = client.current_email().await?;
            let input = match (name, random) {
                (Some(name), false) => name,
                (None, true) => generate_random_username(10),
                _ => {
                    eprintln!("Give a name or --random.");
                    return Ok(());
                }
            };
            match validate_change(&input, &current.email)? {
                UsernameChange::Unchanged => {
                    println!("{} (unchanged)", current.email);
                }
                UsernameChange::Changed(address) => {
                    let session = client.change_email(&address).await?;
                    println!("{}", session.email);
                    print_session(&client);
                }
            }
        }
        Commands::History => {
            let entries = client.email_history().await?;
            if entries.is_empty() {
                println!("No previous addresses.");
            }
            for entry in entries {
                let status = if entry.in_cooldown {
                    "cooldown"
                } else if entry.is_reusable() {
                    "available"
                } else {
                    "taken"
                };
                println!("{} [{}]", entry.address, status);
            }
        }
        Commands::List { details } => {
            let messages = client.list_messages().await?;
            if messages.is_empty() {
                println!("No messages found.");
            } else {
                println!("Found {} message(s):", messages.len());
                for row in messages.iter().map(MessageRow::from_summary) {
                    print_row(&row, details);
                }
            }
        }
        Commands::Read { id } => {
            let detail = client.get_message(id).await?;
            print_message(&MessageView::build(&detail, Theme::default()), &detail.text);
        }
        Commands::Download { id } => {
            let detail = client.get_message(id).await?;
            let manager = DownloadManager::new(&client, &config.download_dir);
            let confirm = |prompt: &DownloadPrompt| cli.yes || ask(&download_question(prompt));
            if let Some(path) = manager.download_message(id, &detail.subject, &confirm).await? {
                println!("Saved {}", path.display());
            }
        }
        Commands::Attachment { id, attachment } => {
            let detail = client.get_message(id).await?;
            let Some(att) = detail.attachments.iter().find(|a| a.id == attachment) else {
                eprintln!("Message {id} has no attachment {attachment}.");
                return Ok(());
            };
            let manager = DownloadManager::new(&client, &config.download_dir);
            let confirm = |prompt: &DownloadPrompt| cli.yes || ask(&download_question(prompt));
            if let Some(path) = manager.download_attachment(id, att, &confirm).await? {
                println!("Saved {}", path.display());
            }
        }
        Commands::Watch => watch(client, config, cli.yes).await,
        Commands::ClearDomainCache => {
            let result = client.clear_domain_cache().await?;
            if result.success {
                println!("{}", result.message.unwrap_or_else(|| "Domain cache cleared.".into()));
            } else {
                eprintln!("{}", result.error.unwrap_or_else(|| "Could not clear the cache.".into()));
            }
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Config {
    Config {
        base_url: cli.base_url.clone(),
        proxy_url: cli.proxy.clone(),
        download_dir: cli.download_dir.clone(),
        poll_interval: Duration::from_secs(cli.poll_secs),
        ..Config::default()
    }
}

fn print_session(client: &TempMailClient) {
    if let Some(id) = client.session_id() {
        println!("Session: {id}");
    }
}

fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn print_row(row: &MessageRow, details: bool) {
    let unread = if row.unread { "*" } else { " " };
    let clip = if row.has_attachments { " [att]" } else { "" };
    println!("{unread} {:>6}  {}  {}{clip}", row.id, row.sender, row.subject);
    if details && !row.preview.is_empty() {
        println!("          {}", row.preview);
    }
}

fn print_message(view: &MessageView, text: &str) {
    println!("From: {} <{}>", view.sender, view.sender_address);
    println!("Subject: {}", view.subject);
    if !view.date.is_empty() {
        println!("Date: {}", view.date);
    }
    println!();
    match &view.body {
        MessageBody::Plain(_) => println!("{}", text.trim()),
        MessageBody::Frame(doc) => {
            println!("{}", fragment_text(&doc.html).trim());
            if !doc.inline_images.is_empty() {
                println!("\n({} inline image(s) not shown)", doc.inline_images.len());
            }
        }
        MessageBody::Empty => println!("(empty message)"),
    }
    if !view.attachments.is_empty() {
        println!("\nAttachments:");
        for att in &view.attachments {
            println!("  {} {}  {}  [{}]", att.icon, att.filename, att.size, att.id);
        }
    }
}

fn download_question(prompt: &DownloadPrompt) -> String {
    match &prompt.size {
        Some(size) => format!("Download {} ({size})?", prompt.filename),
        None => format!("Download {}?", prompt.filename),
    }
}

fn ask(question: &str) -> bool {
    print!("{question} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// Terminal rendering of the inbox for `watch`.
struct TerminalView {
    assume_yes: bool,
    toasts: ToastQueue,
}

impl TerminalView {
    fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            toasts: ToastQueue::new(),
        }
    }

    /// Toasts whose turn has come; the rest wait for a later countdown tick.
    fn due_toasts(&mut self, now: Instant) -> Vec<Toast> {
        let mut due = Vec::new();
        while let Some(toast) = self.toasts.advance(now) {
            due.push(toast.clone());
        }
        due
    }

    fn print_due_toasts(&mut self) {
        for toast in self.due_toasts(Instant::now()) {
            match toast.level {
                ToastLevel::Error => warn!("{}", toast.message),
                _ => println!("{}", toast.message),
            }
        }
    }
}

impl InboxView for TerminalView {
    fn show_address(&mut self, email: Option<&str>) {
        match email {
            Some(email) => println!("Address: {email}"),
            None => println!("Requesting a new address..."),
        }
    }

    fn show_countdown(&mut self, seconds_remaining: u64) {
        self.print_due_toasts();
        if seconds_remaining % 60 == 0 || seconds_remaining <= 10 {
            info!(remaining = %format_remaining(seconds_remaining), "countdown");
        }
    }

    fn show_expired(&mut self) {
        println!("Address expired. Type `n` for a new one.");
    }

    fn render_list(&mut self, rows: &[MessageRow]) {
        println!("--- {} message(s) ---", rows.len());
        for row in rows {
            print_row(row, false);
        }
    }

    fn show_message(&mut self, message: &MessageView) {
        let text = match &message.body {
            MessageBody::Plain(html) => fragment_text(html),
            _ => String::new(),
        };
        print_message(message, &text);
    }

    fn set_title(&mut self, title: &str) {
        info!(title, "title");
    }

    fn toast(&mut self, toast: Toast) {
        self.toasts.push(toast);
        self.print_due_toasts();
    }

    fn confirm_link(&mut self, link: &LinkConfirmation) -> bool {
        if let Some(warning) = link.warning() {
            println!("{warning}");
        }
        self.assume_yes
    }

    fn confirm_download(&self, _prompt: &DownloadPrompt) -> bool {
        self.assume_yes
    }
}

/// Parse one line of interactive input.
fn parse_command(line: &str) -> Option<Command> {
    let (word, rest) = line.trim().split_once(' ').unwrap_or((line.trim(), ""));
    let rest = rest.trim();
    match word {
        "r" | "refresh" => Some(Command::Refresh),
        "o" | "open" => rest.parse().ok().map(Command::OpenMessage),
        "b" | "back" => Some(Command::BackToList),
        "n" | "new" => Some(Command::Reset),
        "u" | "rename" if !rest.is_empty() => Some(Command::Rename(rest.to_string())),
        "t" | "theme" => Some(Command::ToggleTheme),
        "d" | "download" if rest.is_empty() => Some(Command::DownloadMessage),
        "d" | "download" => Some(Command::DownloadAttachment(rest.to_string())),
        "q" | "quit" => Some(Command::Shutdown),
        _ => None,
    }
}

async fn watch(client: TempMailClient, config: Config, assume_yes: bool) {
    println!("Commands: r(efresh) o(pen) <id> b(ack) n(ew) u <name> t(heme) d [attachment] q(uit)");
    let (tx, rx) = mpsc::channel(16);

    let ctrl_c = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c.send(Command::Shutdown).await;
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(cmd) => {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("Unknown command: {}", line.trim()),
            }
        }
    });

    let session = InboxSession::new(Arc::new(client), TerminalView::new(assume_yes), config);
    let session = session.run(rx).await;
    if let Some(email) = session.state().email() {
        info!(email, "watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_toasts_take_turns_and_collapse_repeats() {
        let mut view = TerminalView::new(false);
        let t0 = Instant::now();
        view.toasts.push(Toast::error("Could not reach the server."));
        view.toasts.push(Toast::error("Could not reach the server."));
        view.toasts.push(Toast::success("New address ready."));

        let first = view.due_toasts(t0);
        assert_eq!(first, vec![Toast::error("Could not reach the server.")]);
        assert!(view.due_toasts(t0 + Duration::from_secs(2)).is_empty());
        let second = view.due_toasts(t0 + Duration::from_secs(5));
        assert_eq!(second, vec![Toast::success("New address ready.")]);
        assert!(view.toasts.visible().is_some());
    }

    #[test]
    fn parses_interactive_commands() {
        assert_eq!(parse_command("o 12"), Some(Command::OpenMessage(12)));
        assert_eq!(parse_command("d"), Some(Command::DownloadMessage));
        assert_eq!(parse_command("d att1"), Some(Command::DownloadAttachment("att1".into())));
        assert_eq!(parse_command("u"), None);
        assert_eq!(parse_command("bogus"), None);
    }
}
