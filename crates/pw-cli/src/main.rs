mod session;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use pw_core::{
    Achievement, ChapterController, ChapterRecord, Filter, Lesson, PageKind, Profile,
    ProgressStatus, Record, SyncStatus, UserProgress,
};
use pw_store::{
    Backend, Config, ContentStore, HttpBackend, LiveCollection, ProgressUpdate, Snapshot,
    award_achievements, update_progress,
};

use crate::session::ReaderSession;

#[derive(Parser)]
#[command(name = "pw", about = "Pagewise lesson reader and live data CLI")]
struct Cli {
    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a lesson catalog (JSON array of lessons)
    Import {
        /// Path to the catalog file
        path: PathBuf,
    },

    /// Export every stored lesson as a catalog
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// List stored lessons
    Lessons,

    /// Show the pages of a chapter
    Chapter {
        lesson: String,
        chapter: u32,
    },

    /// Read a chapter, driven by commands from a script or stdin
    Read {
        lesson: String,
        chapter: u32,

        /// 1-based page to start on
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Read inputs from this file instead of stdin
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Follow a backend table live, printing a snapshot per change
    Watch {
        /// lessons, chapters, achievements, profiles or user_progress
        table: String,

        /// Row filter, `column=op.value` (repeatable)
        #[arg(long = "filter")]
        filters: Vec<Filter>,

        /// Fill achievement `earned_at` from this user's awards
        #[arg(long)]
        user: Option<Uuid>,

        /// Exit after the first live snapshot
        #[arg(long)]
        once: bool,
    },

    /// Record lesson progress for a user
    Progress {
        user: Uuid,
        lesson: Uuid,

        /// not_started, in_progress or completed
        #[arg(long, value_parser = parse_status)]
        status: Option<ProgressStatus>,

        #[arg(long)]
        score: Option<u32>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Award every achievement the user now qualifies for
    Award {
        user: Uuid,
    },
}

fn parse_status(s: &str) -> std::result::Result<ProgressStatus, String> {
    serde_json::from_value(json!(s)).map_err(|_| format!("unknown progress status `{s}`"))
}

fn open_store() -> Result<ContentStore> {
    let dir = pw_store::data_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    ContentStore::open(&Config::content_db_path(&dir)).context("failed to open content store")
}

fn load_config() -> Result<Config> {
    Config::load(&pw_store::data_dir()).context("failed to load config")
}

fn open_backend(config: &Config) -> Result<HttpBackend> {
    HttpBackend::from_config(&config.backend).context("failed to set up backend")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Import { path } => cmd_import(&path),
        Commands::Export { path } => cmd_export(&path),
        Commands::Lessons => cmd_lessons(),
        Commands::Chapter { lesson, chapter } => cmd_chapter(&lesson, chapter),
        Commands::Read {
            lesson,
            chapter,
            page,
            script,
        } => cmd_read(&lesson, chapter, page, script.as_deref()).await,
        Commands::Watch {
            table,
            filters,
            user,
            once,
        } => cmd_watch(&table, filters, user, once).await,
        Commands::Progress {
            user,
            lesson,
            status,
            score,
            notes,
        } => {
            let update = ProgressUpdate {
                status,
                score,
                notes,
            };
            cmd_progress(user, lesson, &update).await
        }
        Commands::Award { user } => cmd_award(user).await,
    }
}

fn cmd_import(path: &Path) -> Result<()> {
    let store = open_store()?;
    let count = store
        .import_catalog_file(path)
        .context("failed to import catalog")?;
    println!("imported {count} lessons from {}", path.display());
    Ok(())
}

fn cmd_export(path: &Path) -> Result<()> {
    let store = open_store()?;
    store
        .export_catalog_file(path)
        .context("failed to export catalog")?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_lessons() -> Result<()> {
    let store = open_store()?;
    let lessons = store.list_lessons().context("failed to list lessons")?;
    if lessons.is_empty() {
        println!("no lessons imported");
        return Ok(());
    }
    for lesson in lessons {
        println!(
            "{}\t{}\t{} chapters, {} pages",
            lesson.id, lesson.title, lesson.chapters, lesson.pages
        );
    }
    Ok(())
}

fn cmd_chapter(lesson_id: &str, chapter_id: u32) -> Result<()> {
    let store = open_store()?;
    let Some(chapter) = store
        .load_chapter(lesson_id, chapter_id)
        .context("failed to load chapter")?
    else {
        bail!("chapter {chapter_id} not found in lesson {lesson_id}");
    };

    println!(
        "{} (chapter {} of {})",
        chapter.title, chapter.id, chapter.total_chapters
    );
    for (i, page) in chapter.pages.iter().enumerate() {
        let mut marks = Vec::new();
        if page.kind == PageKind::Quiz {
            marks.push(format!("quiz, {} questions", page.questions.len()));
        }
        if page.fast_mode_content.is_some() {
            marks.push("fast".to_string());
        }
        if page.slow_mode_content.is_some() {
            marks.push("slow".to_string());
        }
        if marks.is_empty() {
            println!("  {}. {}", i + 1, page.title);
        } else {
            println!("  {}. {} [{}]", i + 1, page.title, marks.join(", "));
        }
    }
    Ok(())
}

async fn cmd_read(
    lesson_id: &str,
    chapter_id: u32,
    page: usize,
    script: Option<&Path>,
) -> Result<()> {
    if page == 0 {
        bail!("pages are numbered from 1");
    }
    let config = load_config()?;
    let store = open_store()?;
    let controller = ChapterController::open_at(&store, lesson_id, chapter_id, page - 1)
        .with_context(|| format!("cannot open chapter {chapter_id} of lesson {lesson_id}"))?
        .with_mode_reset(config.reader.mode_reset_ms);

    let mut session = ReaderSession::new(&store, controller, config.gesture);
    let mut out = std::io::stdout();
    println!("{}", session.frame());

    let exit = match script {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read script {}", path.display()))?;
            session.run(text.as_bytes(), &mut out).await?
        }
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            session.run(stdin, &mut out).await?
        }
    };

    if exit.is_none() {
        let position = session.controller().position();
        println!(
            "stopped at chapter {} page {} ({:.0}% of chapter)",
            position.chapter_id,
            position.page_index + 1,
            position.progress() * 100.0
        );
    }
    Ok(())
}

async fn cmd_watch(table: &str, filters: Vec<Filter>, user: Option<Uuid>, once: bool) -> Result<()> {
    let config = load_config()?;
    let backend = open_backend(&config)?;
    let limit = config.reader.pending_event_limit;

    match table {
        "lessons" => follow(spawn::<Lesson>(backend, filters, limit), once).await,
        "chapters" => follow(spawn::<ChapterRecord>(backend, filters, limit), once).await,
        "profiles" => follow(spawn::<Profile>(backend, filters, limit), once).await,
        "user_progress" => follow(spawn::<UserProgress>(backend, filters, limit), once).await,
        "achievements" => match user {
            Some(user_id) => {
                follow(LiveCollection::achievements(backend, user_id, filters), once).await
            }
            None => follow(spawn::<Achievement>(backend, filters, limit), once).await,
        },
        other => bail!(
            "unknown table `{other}` (expected lessons, chapters, achievements, profiles or user_progress)"
        ),
    }
}

fn spawn<T: Record>(backend: HttpBackend, filters: Vec<Filter>, limit: usize) -> LiveCollection<T> {
    LiveCollection::spawn_with(backend, filters, None, limit)
}

/// Print snapshots until interrupted, the collection fails, or (with
/// `once`) the first live snapshot.
async fn follow<T: Record>(live: LiveCollection<T>, once: bool) -> Result<()> {
    let mut rx = live.watch();
    let outcome = loop {
        let snapshot = rx.borrow_and_update().clone();
        print_snapshot(&snapshot)?;
        match &snapshot.status {
            SyncStatus::Failed(reason) => {
                break Err(anyhow::anyhow!("{} feed failed: {reason}", T::TABLE));
            }
            SyncStatus::Live if once => break Ok(()),
            _ => {}
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };
    live.stop().await;
    outcome
}

fn print_snapshot<T: Record>(snapshot: &Snapshot<T>) -> Result<()> {
    let status = match &snapshot.status {
        SyncStatus::Loading => "loading",
        SyncStatus::Live => "live",
        SyncStatus::Failed(_) => "failed",
    };
    let line = json!({
        "table": T::TABLE,
        "status": status,
        "rows": snapshot.items,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn cmd_progress(user_id: Uuid, lesson_id: Uuid, update: &ProgressUpdate) -> Result<()> {
    let config = load_config()?;
    let backend = open_backend(&config)?;
    let row = update_progress(&backend, user_id, lesson_id, update)
        .await
        .context("failed to update progress")?;
    println!("{}", serde_json::to_string(&row)?);
    award(&backend, user_id).await
}

async fn cmd_award(user_id: Uuid) -> Result<()> {
    let config = load_config()?;
    let backend = open_backend(&config)?;
    award(&backend, user_id).await
}

async fn award<B: Backend>(backend: &B, user_id: Uuid) -> Result<()> {
    let awarded = award_achievements(backend, user_id)
        .await
        .context("failed to evaluate achievements")?;
    for achievement in &awarded {
        println!("earned: {} (+{} points)", achievement.title, achievement.points);
    }
    Ok(())
}
