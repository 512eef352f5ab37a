//! Line-oriented chat frontend

use std::io::Write;

use hermes_core::{
    Agent, AgentEvent, ConversationStore, HermesConfig, OpenAiGateway, TurnError, TurnOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Interactive session. `/reset` clears the history, `/quit` leaves, Ctrl-C
/// cancels the turn in flight.
pub async fn run(agent: &Agent<OpenAiGateway>, config: &HermesConfig) -> anyhow::Result<()> {
    println!("Hermes ({} / {})", config.provider, config.model);
    println!("/reset clears the conversation, /quit exits, Ctrl-C cancels a running turn");
    println!();

    let mut store = ConversationStore::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                store.clear();
                println!("Conversation cleared.");
                continue;
            }
            input => {
                let cancel = CancellationToken::new();
                let watcher = {
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            cancel.cancel();
                        }
                    })
                };

                let result = agent.send(&mut store, input, &cancel, print_event).await;
                watcher.abort();
                report(result);
            }
        }
    }

    Ok(())
}

/// One question, reply on stdout.
pub async fn ask(agent: &Agent<OpenAiGateway>, prompt: &str) -> anyhow::Result<()> {
    let mut store = ConversationStore::new();
    let outcome = agent
        .send(&mut store, prompt, &CancellationToken::new(), |event| {
            if !matches!(event, AgentEvent::Response(_)) {
                print_event(event);
            }
        })
        .await?;

    match outcome {
        TurnOutcome::Done { reply, .. } => {
            println!("{}", reply);
            Ok(())
        }
        TurnOutcome::BudgetExceeded { rounds } => {
            anyhow::bail!("no final answer after {} tool rounds", rounds)
        }
        TurnOutcome::Cancelled => anyhow::bail!("cancelled"),
    }
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::Thinking => eprintln!("… thinking"),
        AgentEvent::Narration(text) => println!("{}", text),
        AgentEvent::ToolCall { name, preview } => eprintln!("🔧 {}: {}", name, preview),
        AgentEvent::Observation { line, .. } => eprintln!("│ {}", line),
        AgentEvent::ToolResult { name, ok, preview } => {
            let mark = if ok { "✓" } else { "✗" };
            eprintln!("{} {}: {}", mark, name, preview);
        }
        AgentEvent::Response(text) => {
            println!();
            println!("{}", text);
            println!();
        }
    }
}

fn report(result: Result<TurnOutcome, TurnError>) {
    match result {
        Ok(TurnOutcome::Done { .. }) => {}
        Ok(TurnOutcome::BudgetExceeded { rounds }) => {
            println!("⚠️  Stopped after {} tool rounds without a final answer.", rounds);
        }
        Ok(TurnOutcome::Cancelled) => println!("Cancelled."),
        Err(TurnError::Transport(e)) => eprintln!("❌ Model call failed: {}", e),
        Err(e) => eprintln!("❌ {}", e),
    }
}
