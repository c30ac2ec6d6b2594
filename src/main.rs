// Claude relay: console front end and permission helper
//
// Without arguments this runs an interactive console over one conversation.
// With `--mcp-server` it runs the permission RPC helper that Claude Code
// spawns through the generated MCP config.

use anyhow::{Context, Result};
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use kodegen_claude_relay::permission::MCP_SERVER_FLAG;
use kodegen_claude_relay::session::silent_command_confirmation;
use kodegen_claude_relay::types::options::{default_sessions_path, home_dir};
use kodegen_claude_relay::{
    BridgeConfig, CallbackClient, CallbackServer, ClaudeError, ConversationKey, ExchangeOutcome,
    PermissionBroker, PermissionDecision, PermissionDenial, PermissionPrompt, PermissionPrompter,
    PermissionRpcServer, RelayOptions, ResponseHandler, SessionDiscovery, SessionRegistry,
    SessionStore, Todo, ToolError, ToolUse, format_time_ago,
};

const CONSOLE_KEY: &str = "console";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::args().skip(1).any(|arg| arg == MCP_SERVER_FLAG) {
        return run_permission_helper().await;
    }
    run_console().await
}

/// Stdio JSON-RPC helper; stdout carries the protocol, logs go to stderr
async fn run_permission_helper() -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    match CallbackClient::from_env() {
        Ok(client) => {
            log::info!("Permission helper for conversation {}", client.key());
            PermissionRpcServer::new(client).serve(stdin, stdout).await?;
        }
        Err(e) => {
            log::warn!("Permission callback unavailable, denying all requests: {}", e);
            PermissionRpcServer::<CallbackClient>::unconfigured()
                .serve(stdin, stdout)
                .await?;
        }
    }
    Ok(())
}

// ============================================================================
// CONSOLE
// ============================================================================

#[derive(Default)]
struct ConsolePrinter {
    printed_text: bool,
}

impl ResponseHandler for ConsolePrinter {
    fn on_text(&mut self, text: &str, _is_final: bool) {
        self.printed_text = true;
        println!("{text}");
    }

    fn on_tool_use(&mut self, tool: &ToolUse) {
        println!("  > {}", tool.name);
    }

    fn on_tool_error(&mut self, error: &ToolError) {
        let name = error.tool_name.as_deref().unwrap_or(&error.tool_id);
        println!("  ! {name}: {}", error.message);
    }

    fn on_todo_update(&mut self, todos: &[Todo]) {
        for todo in todos {
            match todo.status.as_str() {
                "completed" => println!("  [x] {}", todo.content),
                "in_progress" => println!("  [~] {}", todo.active_form),
                _ => println!("  [ ] {}", todo.content),
            }
        }
    }

    fn on_input_request(&mut self, tool_use_id: &str) {
        println!("  ? waiting for your answer ({tool_use_id})");
    }

    fn on_permission_denial(&mut self, denials: &[PermissionDenial]) {
        for denial in denials {
            println!("  - {} was denied", denial.tool_name());
        }
    }
}

struct RunningExchange {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

struct Console {
    key: ConversationKey,
    registry: Arc<SessionRegistry>,
    broker: Arc<PermissionBroker>,
    discovery: SessionDiscovery,
    running: Option<RunningExchange>,
}

async fn run_console() -> Result<()> {
    let options = RelayOptions::from_env();
    let store_path = default_sessions_path()?;
    let store = Arc::new(
        SessionStore::load(&store_path)
            .with_context(|| format!("loading session store {}", store_path.display()))?,
    );

    let broker = Arc::new(PermissionBroker::new(options.permission_timeout));
    let (prompt_tx, mut prompts) = mpsc::unbounded_channel::<PermissionPrompt>();
    let prompter: PermissionPrompter = Arc::new(move |prompt: PermissionPrompt| {
        let tx = prompt_tx.clone();
        async move {
            tx.send(prompt)
                .map_err(|_| ClaudeError::permission("console is gone"))
        }
        .boxed()
    });
    broker.set_prompter(prompter);

    let callback = CallbackServer::start(Arc::clone(&broker)).await?;

    let mut registry = SessionRegistry::new(options.clone(), store);
    if !options.skip_permissions {
        let program = std::env::current_exe().context("locating relay binary")?;
        let bridge = BridgeConfig::new(program, callback.port())?;
        registry = registry.with_bridge(Arc::new(bridge));
    }

    let home = home_dir()?;
    let mut console = Console {
        key: ConversationKey::from(CONSOLE_KEY),
        registry: Arc::new(registry),
        broker,
        discovery: SessionDiscovery::new(home.join(".claude")),
        running: None,
    };

    println!(
        "Claude relay {} - /reset, /cd <dir>, /sessions, /resume <id>, /cancel, /quit",
        kodegen_claude_relay::VERSION
    );

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            Some(prompt) = prompts.recv() => {
                println!(
                    "Permission requested: {} {}\n  answer allow, always or deny",
                    prompt.tool_name, prompt.input
                );
            }
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if !console.handle_line(line.trim()).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Console input error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    if let Some(running) = console.running.take() {
        running.cancel.cancel();
        let _ = running.task.await;
    }
    console.registry.shutdown().await;
    callback.shutdown().await;
    Ok(())
}

impl Console {
    /// Returns `false` when the console should exit
    async fn handle_line(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }

        if self.broker.pending(&self.key).is_some() {
            self.answer_permission(line);
            return true;
        }

        if self.running.as_ref().is_some_and(|r| r.task.is_finished()) {
            self.running = None;
        }

        let (command, arg) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(c, a)| (c, a.trim()));

        match command {
            "/quit" | "/exit" => return false,
            "/cancel" => {
                if let Some(running) = &self.running {
                    running.cancel.cancel();
                }
            }
            _ if self.running.is_some() => {
                println!("Still working on the previous message (/cancel to stop it)");
            }
            "/reset" => {
                self.registry.reset(&self.key).await;
                println!("Started a fresh conversation");
            }
            "/cd" if !arg.is_empty() => {
                self.registry.set_working_directory(&self.key, arg).await;
                println!("Working directory: {arg}");
            }
            "/sessions" => self.list_sessions(),
            "/resume" if !arg.is_empty() => self.resume(arg).await,
            _ => self.start_exchange(line.to_string()),
        }
        true
    }

    fn answer_permission(&self, line: &str) {
        let decision = match line.to_ascii_lowercase().as_str() {
            "allow" | "a" | "y" | "yes" => PermissionDecision::allow(),
            "always" => PermissionDecision::allow_always(),
            "deny" | "d" | "n" | "no" => PermissionDecision::deny("Denied by user"),
            _ => {
                println!("Answer allow, always or deny");
                return;
            }
        };
        if !self.broker.respond(&self.key, decision) {
            println!("That request is no longer waiting");
        }
    }

    fn list_sessions(&self) {
        match self.discovery.discover(10) {
            Ok(sessions) if sessions.is_empty() => println!("No sessions found"),
            Ok(sessions) => {
                let now = chrono::Utc::now();
                for s in sessions {
                    println!(
                        "{}  {:<20} {:>4}  {}",
                        s.short_id,
                        s.project_name,
                        format_time_ago(s.last_active, now),
                        s.summary
                    );
                }
            }
            Err(e) => println!("Could not list sessions: {e}"),
        }
    }

    async fn resume(&self, short_id: &str) {
        let Some(info) = self.discovery.lookup_short_id(short_id) else {
            println!("Unknown session {short_id} (run /sessions first)");
            return;
        };

        self.registry
            .set_working_directory(&self.key, &info.project_path)
            .await;
        match self
            .registry
            .get_or_create_with_session(&self.key, info.id.clone())
            .await
        {
            Ok(_) => {
                println!("Resumed {} in {}", info.short_id, info.project_name);
                if let Some(last) = self.discovery.last_assistant_message(&info.id) {
                    println!("{last}");
                }
            }
            Err(e) => println!("Could not resume {}: {e}", info.short_id),
        }
    }

    fn start_exchange(&mut self, message: String) {
        let registry = Arc::clone(&self.registry);
        let key = self.key.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut printer = ConsolePrinter::default();
            match registry.send(&key, &message, &mut printer, &token).await {
                Ok(ExchangeOutcome::Completed) => {
                    if !printer.printed_text
                        && let Some(confirmation) = silent_command_confirmation(&message)
                    {
                        println!("{confirmation}");
                    }
                }
                Ok(ExchangeOutcome::AwaitingInput { .. }) => {}
                Err(e) if e.is_cancelled() => println!("(cancelled)"),
                Err(e) => {
                    log::error!("[{}] Exchange failed: {}", key, e);
                    println!("Something went wrong, please try again.");
                }
            }
        });

        self.running = Some(RunningExchange { task, cancel });
    }
}
