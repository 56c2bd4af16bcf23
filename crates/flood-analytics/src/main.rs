// flood-analytics/crates/flood-analytics/src/main.rs

#[cfg(feature = "cli")]
mod cli {
    use anyhow::{Context, Result};
    use clap::Parser;
    use std::io::{self, BufRead, Write};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tracing::{info, warn};

    use flood_analytics::{
        telemetry, Config, ContextStore, CsvLoader, InMemoryContextStore, OrchestratorConfig, QueryOrchestrator,
        SqliteContextStore,
    };

    #[derive(Parser)]
    #[command(name = "flood-analytics")]
    #[command(about = "Ask questions about flood control projects, with context kept per session")]
    struct Args {
        /// Project CSV (overrides FLOOD_DATA_CSV)
        #[arg(short = 'd', long)]
        data: Option<PathBuf>,

        /// Directory of the context database (overrides CONTEXT_DB_DIR)
        #[arg(long)]
        db_dir: Option<PathBuf>,

        /// Keep context in memory only
        #[arg(long)]
        in_memory: bool,

        /// Session to continue; a new one is created when omitted
        #[arg(short = 's', long)]
        session: Option<String>,

        /// Answer one question and exit
        #[arg(short = 'q', long)]
        question: Option<String>,

        /// Remove sessions idle for longer than SESSION_RETENTION_DAYS before starting
        #[arg(long)]
        cleanup: bool,
    }

    pub fn run() -> Result<()> {
        telemetry::init_tracing();
        let args = Args::parse();

        let mut config = Config::from_env()?;
        if let Some(data) = args.data {
            config.data_csv = data;
        }
        if let Some(dir) = args.db_dir {
            config.db_dir = dir;
        }
        config.print_config();

        let dataset = CsvLoader::from_path(&config.data_csv)
            .with_context(|| format!("Failed to load project data from {}", config.data_csv.display()))?;

        let store: Arc<dyn ContextStore> = if args.in_memory {
            Arc::new(InMemoryContextStore::new())
        } else {
            match SqliteContextStore::open(&config.db_path()) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("Context database unavailable ({}), keeping context in memory", e);
                    Arc::new(InMemoryContextStore::new())
                }
            }
        };

        let orchestrator = QueryOrchestrator::new(store, Arc::new(dataset), OrchestratorConfig::from(&config));
        if args.cleanup {
            orchestrator.cleanup_old_sessions(config.session_retention_days)?;
        }

        let session_id = match args.session {
            Some(id) => id,
            None => orchestrator.new_session()?,
        };

        if let Some(question) = args.question {
            let (answer, summary) = orchestrator.answer(&question, &session_id);
            println!("{}\n\n[{}]", answer, summary);
            return Ok(());
        }

        info!("Session {}", session_id);
        repl(&orchestrator, &session_id, config.history_limit)
    }

    fn repl(orchestrator: &QueryOrchestrator, session_id: &str, history_limit: usize) -> Result<()> {
        println!("Session {}. Type :help for commands, :quit to exit.", session_id);
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("> ");
            stdout.flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match line {
                ":quit" | ":q" | ":exit" => break,
                ":help" => {
                    println!(":context  show the remembered filters");
                    println!(":clear    forget the remembered filters");
                    println!(":history  show recent questions and answers");
                    println!(":quit     exit");
                }
                ":context" => {
                    let slots = orchestrator.get_context(session_id)?;
                    println!("{}", serde_json::to_string_pretty(&slots)?);
                }
                ":clear" => {
                    orchestrator.clear_context(session_id, None)?;
                    println!("Context cleared.");
                }
                ":history" => {
                    for turn in orchestrator.get_history(session_id, Some(history_limit))? {
                        println!("[{}] Q: {}", turn.timestamp.to_rfc3339(), turn.question);
                        println!("A: {}\n", turn.answer);
                    }
                }
                question => {
                    let reply = orchestrator.respond(question, session_id, None);
                    println!("{}\n\n[{}]", reply.text, reply.context_summary);
                    if !reply.persisted {
                        println!("(context could not be saved for this turn)");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    cli::run()
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
