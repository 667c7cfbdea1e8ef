use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use media_vault::database::repo::DEFAULT_PAGE_SIZE;
use media_vault::database::tags::DEFAULT_TAG_LIMIT;
use media_vault::ingest::scanner;
use media_vault::utils::config::DEFAULT_STATE_FILE;
use media_vault::{
    AiSuggestion, ImportControl, ImportOutcome, Library, MediaResource, MediaServer, MetaPatch,
    SearchParams, Session, SmartFolderPatch, TagSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Library directory. Defaults to the last one opened.
    #[arg(short, long, global = true)]
    library: Option<PathBuf>,

    /// Where the last opened library is remembered.
    #[arg(long, global = true, default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a library directory and make it the current one
    Create { dir: PathBuf },
    /// Make an existing library the current one
    Open { dir: PathBuf },
    /// Show which library is open
    Status,
    /// Import files and directories
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List media, newest first
    List {
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Show one media item with its tags and sources
    Show { id: String },
    Search {
        /// Substring of title or note
        #[arg(long)]
        text: Option<String>,
        /// Exact tag name
        #[arg(long)]
        tag: Option<String>,
        /// e.g. `image` or `video/mp4`
        #[arg(long)]
        mime: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Update title, note or rating; omitted fields are left alone
    SetMeta {
        id: String,
        #[arg(long, conflicts_with = "clear_title")]
        title: Option<String>,
        #[arg(long)]
        clear_title: bool,
        #[arg(long, conflicts_with = "clear_note")]
        note: Option<String>,
        #[arg(long)]
        clear_note: bool,
        #[arg(long)]
        rating: Option<u8>,
    },
    /// List tags, optionally filtered by a substring
    Tags {
        query: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TAG_LIMIT)]
        limit: u32,
    },
    TagAdd {
        id: String,
        #[arg(required = true)]
        names: Vec<String>,
    },
    TagRemove { id: String, tag_id: i64 },
    /// Rename a tag; renaming onto an existing name merges the two
    TagRename { tag_id: i64, name: String },
    TagDelete { tag_id: i64 },
    FolderCreate { name: String, rule: String },
    FolderList,
    FolderUpdate {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        rule: Option<String>,
    },
    FolderDelete { id: i64 },
    FolderMedia {
        id: i64,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Media seen at more than one source path
    Duplicates {
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    SettingGet { key: String },
    /// Store a JSON value under a key
    SettingSet { key: String, value: String },
    /// Image reference for the captioning service
    AiInput { id: String },
    /// Apply a `{"title": ..., "tags": [...]}` suggestion
    AiApply { id: String, suggestion: String },
    /// Serve a stored resource the way the media protocol would
    Fetch {
        #[arg(value_enum)]
        resource: Resource,
        id: String,
        /// e.g. `bytes=0-99`
        #[arg(long)]
        range: Option<String>,
        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Resource {
    Thumb,
    Orig,
}

impl From<Resource> for MediaResource {
    fn from(resource: Resource) -> Self {
        match resource {
            Resource::Thumb => MediaResource::Thumbnail,
            Resource::Orig => MediaResource::Original,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();
    let mut session = Session::new();

    match args.command {
        Command::Create { ref dir } => {
            Library::create(dir)
                .with_context(|| format!("Failed to create library at {}", dir.display()))?;
            session.open(dir)?;
            session.remember(&args.state_file)?;
            print_json(&session.status())
        }
        Command::Open { ref dir } => {
            session
                .open(dir)
                .with_context(|| format!("Failed to open library at {}", dir.display()))?;
            session.remember(&args.state_file)?;
            print_json(&session.status())
        }
        Command::Status => {
            if let Some(dir) = &args.library {
                session.open(dir)?;
            } else {
                session.restore(&args.state_file);
            }
            print_json(&session.status())
        }
        command => {
            open_current(&mut session, args.library.as_deref(), &args.state_file)?;
            run(&mut session, command)
        }
    }
}

fn open_current(session: &mut Session, explicit: Option<&Path>, state_file: &Path) -> Result<()> {
    match explicit {
        Some(dir) => {
            session
                .open(dir)
                .with_context(|| format!("Failed to open library at {}", dir.display()))?;
        }
        None => {
            if session.restore(state_file).is_none() {
                bail!("No library is open; run `create` or `open`, or pass --library");
            }
        }
    }
    Ok(())
}

fn run(session: &mut Session, command: Command) -> Result<()> {
    let library = session.library_mut()?;

    match command {
        Command::Import { paths } => {
            let summary = import(library, &paths)?;
            print_json(&summary)
        }
        Command::List { limit, offset } => print_json(&library.metadata().list_media(limit, offset)?),
        Command::Show { id } => {
            let details = library
                .metadata()
                .media_details(&id)?
                .ok_or_else(|| anyhow!("No media with id {}", id))?;
            print_json(&details)
        }
        Command::Search {
            text,
            tag,
            mime,
            limit,
            offset,
        } => {
            let params = SearchParams {
                text,
                tag,
                mime_prefix: mime,
            };
            print_json(&library.metadata().search(&params, limit, offset)?)
        }
        Command::SetMeta {
            id,
            title,
            clear_title,
            note,
            clear_note,
            rating,
        } => {
            let patch = MetaPatch {
                title: if clear_title { Some(None) } else { title.map(Some) },
                note: if clear_note { Some(None) } else { note.map(Some) },
                rating,
            };
            if patch.is_empty() {
                bail!("Nothing to update; pass --title, --note, --rating or a --clear flag");
            }
            library.metadata_mut().set_meta(&id, &patch)?;
            print_json(&library.metadata().media_details(&id)?)
        }
        Command::Tags { query, limit } => {
            print_json(&library.metadata().list_tags(query.as_deref(), limit)?)
        }
        Command::TagAdd { id, names } => {
            library
                .metadata_mut()
                .add_tags(&id, &names, TagSource::Manual, None)?;
            print_json(&library.metadata().media_details(&id)?)
        }
        Command::TagRemove { id, tag_id } => {
            library.metadata().remove_tag(&id, tag_id)?;
            print_json(&library.metadata().media_details(&id)?)
        }
        Command::TagRename { tag_id, name } => {
            print_json(&library.metadata_mut().rename_tag(tag_id, &name)?)
        }
        Command::TagDelete { tag_id } => {
            library.metadata().delete_tag(tag_id)?;
            info!("Deleted tag {}", tag_id);
            Ok(())
        }
        Command::FolderCreate { name, rule } => {
            print_json(&library.metadata().create_smart_folder(&name, &rule)?)
        }
        Command::FolderList => print_json(&library.metadata().list_smart_folders()?),
        Command::FolderUpdate { id, name, rule } => {
            let patch = SmartFolderPatch {
                name,
                rule_json: rule,
            };
            print_json(&library.metadata().update_smart_folder(id, &patch)?)
        }
        Command::FolderDelete { id } => {
            library.metadata().delete_smart_folder(id)?;
            Ok(())
        }
        Command::FolderMedia { id, limit, offset } => print_json(
            &library
                .metadata_mut()
                .list_smart_folder_media(id, limit, offset)?,
        ),
        Command::Duplicates { limit, offset } => {
            print_json(&library.metadata().list_duplicate_groups(limit, offset)?)
        }
        Command::SettingGet { key } => print_json(&library.metadata().get_setting(&key)?),
        Command::SettingSet { key, value } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("Setting value must be JSON")?;
            library.metadata().set_setting(&key, &value)?;
            Ok(())
        }
        Command::AiInput { id } => print_json(&library.ai_input(&id)?),
        Command::AiApply { id, suggestion } => {
            let suggestion: AiSuggestion = serde_json::from_str(&suggestion)
                .context("Suggestion must be a JSON object with title and tags")?;
            print_json(&library.apply_ai_suggestion(&id, &suggestion)?)
        }
        Command::Fetch {
            resource,
            id,
            range,
            output,
        } => fetch(library, resource.into(), &id, range.as_deref(), output.as_deref()),
        Command::Create { .. } | Command::Open { .. } | Command::Status => Ok(()),
    }
}

/// Runs the import on a worker thread and drives a progress bar from its events.
fn import(library: &mut Library, paths: &[PathBuf]) -> Result<media_vault::ImportSummary> {
    let files = scanner::expand_inputs(paths);
    info!("Importing {} file(s)", files.len());

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {wide_msg}")?,
    );

    let (tx, rx) = unbounded();
    let control = ImportControl::with_events(tx);
    let files = &files;

    let summary = thread::scope(|s| {
        let worker = s.spawn(move || library.import_with(files, &control));

        for event in rx {
            bar.inc(1);
            bar.set_message(event.path.display().to_string());
            if let ImportOutcome::Failed { error } = &event.outcome {
                bar.println(format!("failed: {}: {}", event.path.display(), error));
            }
        }
        worker.join()
    })
    .map_err(|_| anyhow!("Import worker panicked"))?;

    bar.finish_and_clear();
    Ok(summary)
}

fn fetch(
    library: &Library,
    resource: MediaResource,
    id: &str,
    range: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let server = MediaServer::new(library);
    let response = server.serve(resource, id, range);

    eprintln!("{:?} {}", response.version(), response.status());
    for (name, value) in response.headers() {
        eprintln!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }

    let mut body = response.into_body();
    match output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            io::copy(&mut body, &mut file)?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut body, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
