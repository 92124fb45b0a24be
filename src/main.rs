//! # Companion CLI (`companion`)
//!
//! The `companion` binary manages the personal knowledge base, rebuilds
//! the vector index, answers questions from the command line, and starts
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! companion --config ./config/companion.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `companion init` | Create the data directory and an empty knowledge base |
//! | `companion profile set` | Set name, role, and profile summary |
//! | `companion skill add <category> <skills>...` | Add skills to a category |
//! | `companion skill remove <category>` | Remove a skill category |
//! | `companion project add` | Add a project record |
//! | `companion project remove <index>` | Remove a project by position |
//! | `companion activity add` | Add an activity record |
//! | `companion activity remove <index>` | Remove an activity by position |
//! | `companion reindex` | Chunk and embed the knowledge base |
//! | `companion ask "<question>"` | Ask a question against the knowledge base |
//! | `companion history clear` | Clear a session's history on the running server |
//! | `companion stats` | Show knowledge and index statistics |
//! | `companion serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use companion::cache::ResponseCache;
use companion::config::{self, Config};
use companion::error::CompanionError;
use companion::guardrails::Guardrails;
use companion::index::VectorIndex;
use companion::models::{ActivityRecord, ProjectRecord, UserProfile};
use companion::session::SessionContext;
use companion::store::{self, KnowledgeStore};
use companion::{agent, server, stats};

/// Companion CLI — a local-first personal knowledge base with
/// retrieval-augmented Q&A.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/companion.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "companion",
    about = "Companion — a local-first personal knowledge base with retrieval-augmented Q&A",
    version,
    long_about = "Companion keeps your profile, skills, projects, and activities in a single \
    JSON document, builds a small vector index over them, and answers questions about your own \
    record through a guarded agent backed by a local LLM."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/companion.toml`. Data location, chunking,
    /// retrieval, embedding, LLM, and guardrail settings are read from
    /// this file.
    #[arg(long, global = true, default_value = "./config/companion.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and an empty knowledge base.
    ///
    /// Idempotent — an existing knowledge base is left untouched.
    Init,

    /// Manage the user profile.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Manage technical skills.
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },

    /// Manage project records.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage other-activity records.
    Activity {
        #[command(subcommand)]
        action: ActivityAction,
    },

    /// Rebuild the vector index from the knowledge base.
    ///
    /// Flattens every section into text, chunks it, embeds the chunks
    /// with the configured provider, and writes the index artifacts next
    /// to the knowledge file.
    Reindex,

    /// Ask a question against the knowledge base.
    ///
    /// Rebuilds the index first if it is missing or stale, retrieves
    /// relevant chunks, and sends them with the question to the
    /// configured LLM. Guardrails (PII masking, topic denylist, rate
    /// limiting) apply exactly as they do on the HTTP surface.
    Ask {
        /// The question to answer.
        question: String,

        /// Print the retrieved context chunks along with the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Manage conversation history on the running server.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Show knowledge base and index statistics.
    Stats,

    /// Start the HTTP server.
    ///
    /// Exposes the knowledge CRUD operations and the ask pipeline as a
    /// JSON API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Set the user profile. Name is required; other fields optional.
    Set {
        /// Full name.
        #[arg(long)]
        name: String,

        /// Current role or title.
        #[arg(long, default_value = "")]
        role: String,

        /// Free-text profile summary.
        #[arg(long, default_value = "")]
        summary: String,
    },
}

#[derive(Subcommand)]
enum SkillAction {
    /// Add skills to a category (created if missing, duplicates ignored).
    Add {
        /// Category name, e.g. "Languages" or "Infrastructure".
        category: String,

        /// One or more skill names.
        #[arg(required = true)]
        skills: Vec<String>,
    },

    /// Remove an entire skill category.
    Remove {
        /// Category name.
        category: String,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Add a project record.
    Add {
        /// Project domain or name.
        #[arg(long)]
        domain: String,

        /// Your role on the project.
        #[arg(long, default_value = "")]
        role: String,

        /// What the project is and does.
        #[arg(long)]
        description: String,

        /// A responsibility you held (repeatable).
        #[arg(long = "responsibility")]
        responsibilities: Vec<String>,

        /// A related skill (repeatable).
        #[arg(long = "skill")]
        related_skills: Vec<String>,

        /// A free-form tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Remove a project by its position in `companion stats` order.
    Remove {
        /// Zero-based project index.
        index: usize,
    },
}

#[derive(Subcommand)]
enum ActivityAction {
    /// Add an other-activity record (open source, writing, mentoring...).
    Add {
        /// Activity domain or name.
        #[arg(long)]
        domain: String,

        /// Your role in the activity.
        #[arg(long, default_value = "")]
        role: String,

        /// What the activity is.
        #[arg(long)]
        description: String,

        /// A responsibility you held (repeatable).
        #[arg(long = "responsibility")]
        responsibilities: Vec<String>,

        /// A related skill (repeatable).
        #[arg(long = "skill")]
        related_skills: Vec<String>,

        /// A free-form tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Remove an activity by its position in `companion stats` order.
    Remove {
        /// Zero-based activity index.
        index: usize,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Clear a session's conversation history and rate-limit window.
    Clear {
        /// Session to clear (defaults to the server's default session).
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&cfg.data.dir)?;
            let store = KnowledgeStore::new(cfg.data.knowledge_path());
            if cfg.data.knowledge_path().exists() {
                println!(
                    "Knowledge base already exists at {}",
                    cfg.data.knowledge_path().display()
                );
            } else {
                store.save(&Default::default())?;
                println!(
                    "Created empty knowledge base at {}",
                    cfg.data.knowledge_path().display()
                );
            }
        }

        Commands::Profile {
            action: ProfileAction::Set {
                name,
                role,
                summary,
            },
        } => {
            mutate(&cfg, |kb| {
                store::set_profile(
                    kb,
                    UserProfile {
                        name,
                        current_role: role,
                        profile_summary: summary,
                        ..Default::default()
                    },
                )
            })?;
            println!("Profile updated.");
        }

        Commands::Skill { action } => match action {
            SkillAction::Add { category, skills } => {
                mutate(&cfg, |kb| store::add_skills(kb, &category, skills))?;
                println!("Skills added to '{}'.", category);
            }
            SkillAction::Remove { category } => {
                mutate(&cfg, |kb| store::remove_skill_category(kb, &category))?;
                println!("Removed skill category '{}'.", category);
            }
        },

        Commands::Project { action } => match action {
            ProjectAction::Add {
                domain,
                role,
                description,
                responsibilities,
                related_skills,
                tags,
            } => {
                mutate(&cfg, |kb| {
                    store::add_project(
                        kb,
                        ProjectRecord {
                            domain,
                            role,
                            description,
                            responsibilities,
                            related_skills,
                            tags,
                            ..Default::default()
                        },
                    )
                })?;
                println!("Project added.");
            }
            ProjectAction::Remove { index } => {
                let mut removed = None;
                mutate(&cfg, |kb| {
                    removed = Some(store::remove_project(kb, index)?);
                    Ok(())
                })?;
                if let Some(project) = removed {
                    println!("Removed project '{}'.", project.domain);
                }
            }
        },

        Commands::Activity { action } => match action {
            ActivityAction::Add {
                domain,
                role,
                description,
                responsibilities,
                related_skills,
                tags,
            } => {
                mutate(&cfg, |kb| {
                    store::add_activity(
                        kb,
                        ActivityRecord {
                            domain,
                            role,
                            description,
                            responsibilities,
                            related_skills,
                            tags,
                        },
                    )
                })?;
                println!("Activity added.");
            }
            ActivityAction::Remove { index } => {
                let mut removed = None;
                mutate(&cfg, |kb| {
                    removed = Some(store::remove_activity(kb, index)?);
                    Ok(())
                })?;
                if let Some(activity) = removed {
                    println!("Removed activity '{}'.", activity.domain);
                }
            }
        },

        Commands::Reindex => {
            let store = KnowledgeStore::new(cfg.data.knowledge_path());
            let kb = store.load()?;
            let mut index = VectorIndex::default();
            let chunks = index.rebuild(&cfg.embedding, &cfg.chunking, &kb).await?;
            index.save(&cfg.data.dir)?;
            println!("Indexed {} chunks with model '{}'.", chunks, index.model());
        }

        Commands::Ask {
            question,
            show_context,
        } => {
            run_ask(&cfg, &question, show_context).await?;
        }

        Commands::History {
            action: HistoryAction::Clear { session },
        } => {
            let url = format!("http://{}/history/clear", cfg.server.bind);
            let body = serde_json::json!({ "session_id": session });
            let resp = reqwest::Client::new().post(&url).json(&body).send().await;
            match resp {
                Ok(r) if r.status().is_success() => println!("History cleared."),
                Ok(r) => anyhow::bail!("server returned {}", r.status()),
                Err(e) => anyhow::bail!(
                    "could not reach the server at {} ({}); is `companion serve` running?",
                    cfg.server.bind,
                    e
                ),
            }
        }

        Commands::Stats => {
            let store = KnowledgeStore::new(cfg.data.knowledge_path());
            let kb = store.load()?;
            let index = VectorIndex::load(&cfg.data.dir)?.unwrap_or_default();
            stats::print_stats(&stats::collect(&kb, &index));
        }

        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Load, mutate, and atomically save the knowledge document.
fn mutate(cfg: &Config, f: impl FnOnce(&mut companion::models::KnowledgeBase) -> anyhow::Result<()>) -> anyhow::Result<()> {
    let store = KnowledgeStore::new(cfg.data.knowledge_path());
    let mut kb = store.load()?;
    f(&mut kb)?;
    store.save(&kb)
}

/// One-shot ask from the CLI: fresh session, same guardrails and
/// pipeline as the HTTP surface.
async fn run_ask(cfg: &Config, question: &str, show_context: bool) -> anyhow::Result<()> {
    let store = KnowledgeStore::new(cfg.data.knowledge_path());
    let kb = store.load()?;

    let mut index = VectorIndex::load(&cfg.data.dir)?.unwrap_or_default();
    let hash = store::content_hash(&kb);
    if index.is_empty() || index.is_stale(&hash) {
        let chunks = index.rebuild(&cfg.embedding, &cfg.chunking, &kb).await?;
        index.save(&cfg.data.dir)?;
        println!("(index was stale; rebuilt {} chunks)", chunks);
    }

    let mut session = SessionContext::new(cfg.agent.max_history);
    let mut guardrails = Guardrails::new(&cfg.guardrails);
    let mut cache = ResponseCache::new(&cfg.cache);

    let outcome =
        match agent::ask(cfg, "cli", &mut session, &mut guardrails, &mut cache, &index, question)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(CompanionError::LlmUnavailable(_)) =
                    err.downcast_ref::<CompanionError>()
                {
                    eprintln!("{}", companion::error::LLM_FAILURE_MESSAGE);
                    std::process::exit(1);
                }
                return Err(err);
            }
        };

    if show_context {
        println!("Plan: {}", outcome.plan);
        println!("Context:");
        for (i, chunk) in outcome.context.iter().enumerate() {
            println!("  {}. [{}] ({:.3}) {}", i + 1, chunk.section, chunk.score, chunk.text);
        }
        println!();
    }
    println!("{}", outcome.answer);
    Ok(())
}
