// Line-oriented chat client for the streaming endpoint.
// Each stdin line is sent as a query; `/reconnect` resets the connection and
// `/quit` exits.

use std::collections::BTreeSet;
use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use community_chat_rs::client::{ChatSession, ChatState, ClientConfig};
use community_chat_rs::models::message::MessageRole;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "chat_client")]
#[command(about = "Send queries to the community chat server and print the streamed replies")]
struct Args {
    /// Base url of the server
    #[arg(long, env = "CHAT_SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Seconds to wait for the TCP connection
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Log level for client diagnostics
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    let mut session = ChatSession::new(ClientConfig {
        server_url: args.server.clone(),
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        ..ClientConfig::default()
    })
    .context("failed to create chat session")?;

    println!("Connected to {} (type /reconnect or /quit)", args.server);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reconnect" => {
                session.reconnect();
                println!("connection reset");
            }
            text => {
                if session.send_query(text) {
                    stream_reply(&mut session).await?;
                }
            }
        }
    }

    Ok(())
}

async fn stream_reply(session: &mut ChatSession) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut printed = 0usize;
    let mut tools: BTreeSet<String> = BTreeSet::new();

    while let Some(state) = session.next_update().await {
        for tool in state.active_tools.difference(&tools) {
            write!(stdout, "[{tool}...] ")?;
        }
        tools.clone_from(&state.active_tools);
        if let Some(message) = state.current_message() {
            if let Some(delta) = message.content.get(printed..) {
                write!(stdout, "{delta}")?;
                printed = message.content.len();
            }
        }
        stdout.flush()?;
    }
    writeln!(stdout)?;

    render_summary(session.state(), &mut stdout)?;
    Ok(())
}

fn render_summary(state: &ChatState, out: &mut impl Write) -> anyhow::Result<()> {
    // Only the reply to the latest query; older replies were already shown.
    let latest_turn = state
        .messages
        .iter()
        .rposition(|m| m.role == MessageRole::User)
        .map_or(0, |i| i + 1);
    if let Some(message) = state.messages[latest_turn..]
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
    {
        for activity in &message.activities {
            writeln!(out, "  * {} ({})", activity.name, activity.category)?;
        }
        if !message.images.is_empty() {
            writeln!(out, "  {} images", message.images.len())?;
        }
    }
    if let Some(err) = &state.error {
        writeln!(out, "error: {err}")?;
        if err.is_retryable() {
            writeln!(out, "type /reconnect, then send the query again")?;
        }
    }
    Ok(())
}
