use std::io::{self, BufRead, Write};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use opsrag_agent::{Session, TurnOutcome};
use opsrag_cli::{bootstrap, build_orchestrator, open_engine};

#[derive(Parser, Debug)]
#[command(name = "opsrag", about = "Kubernetes operations assistant over a local knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hybrid search without the agent.
    Search {
        query: String,
        #[arg(short, default_value_t = 5)]
        n: usize,
        #[arg(long)]
        rerank: bool,
    },
    /// Answer one question.
    Ask { question: String },
    /// Interactive session; `exit`, `quit` or `q` ends it.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = bootstrap()?;

    match cli.command {
        Command::Search { query, n, rerank } => {
            let engine = open_engine(&settings, false).await?;
            let results = engine.search(&query, n, rerank).await;
            println!("🔍 {} results for \"{}\"", results.len(), query);
            for (i, r) in results.iter().enumerate() {
                println!(
                    "\n  {}. score={:.4}  via={}  source={}  section={}",
                    i + 1,
                    r.score,
                    r.origin,
                    r.metadata.source,
                    r.metadata.heading
                );
                println!("     {}", r.text.replace('\n', "\n     "));
            }
        }
        Command::Ask { question } => {
            let agent = build_orchestrator(&settings).await?;
            let out = agent.run_turn(&mut Session::new(), &question).await;
            print_outcome(&out);
        }
        Command::Chat => {
            let agent = build_orchestrator(&settings).await?;
            let mut session = Session::new();
            println!("Kubernetes ops assistant. Type 'exit', 'quit' or 'q' to end the session.");
            if !agent.has_llm() {
                println!("(retrieval-only mode: no LLM API key found)");
            }

            let stdin = io::stdin();
            loop {
                print!("\nYou: ");
                io::stdout().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                    break;
                }

                // Ctrl-C abandons the current turn, not the session.
                let cancel = CancellationToken::new();
                let trigger = cancel.clone();
                let watcher = tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        trigger.cancel();
                    }
                });
                let out = agent.run_turn_cancellable(&mut session, input, &cancel).await;
                watcher.abort();
                print_outcome(&out);
            }
            println!("Goodbye!");
        }
    }
    Ok(())
}

fn print_outcome(out: &TurnOutcome) {
    println!("\nAssistant: {}", out.answer);
    if !out.exchanges.is_empty() {
        let tools: Vec<&str> = out.exchanges.iter().map(|e| e.request.tool.as_str()).collect();
        println!("\n[tools: {}]", tools.join(", "));
    }
}
