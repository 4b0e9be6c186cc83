use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use recall_core::models::{ChangeOperation, EntityKind, StudyDirection};

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Study flashcards offline and sync progress when back online", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the local study database
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Path to the client config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Record study activity as if the device were offline
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a study session over a set
    Start {
        /// Set identifier
        set_id: String,
        /// Display name of the set (defaults to the cached name)
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, value_enum, default_value_t = DirectionArg::FrontToBack)]
        direction: DirectionArg,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record an answer in a running session
    Answer {
        /// Session ID (full UUID)
        session_id: String,
        /// Card identifier
        card_id: String,
        /// The answer was wrong
        #[arg(long)]
        wrong: bool,
        /// Seconds taken to answer
        #[arg(short, long, default_value = "5")]
        seconds: f64,
        /// Self-reported confidence, 1 to 5
        #[arg(short, long)]
        confidence: Option<u8>,
        /// Also queue a spaced repetition review for this profile
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Finish a session and queue it for sync
    Finish {
        /// Session ID (full UUID)
        session_id: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show work waiting to be synced
    Queue {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue an entity change for the next sync
    Change {
        #[arg(value_enum)]
        operation: OperationArg,
        #[arg(value_enum)]
        entity: EntityArg,
        /// Entity identifier
        entity_id: String,
        /// JSON payload sent with create and update
        #[arg(long)]
        payload: Option<String>,
    },
    /// Push queued sessions and changes to the server
    Sync,
    /// Show cards due for review
    Due {
        /// Profile identifier
        profile_id: String,
        /// Offset from UTC in minutes (defaults to the local offset)
        #[arg(long, allow_hyphen_values = true)]
        tz_offset_minutes: Option<i32>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Preview the next interval for each answer quality
    Preview {
        /// Successful reviews in a row
        #[arg(long, default_value = "0")]
        stage: u32,
        #[arg(long, default_value = "2.5")]
        ease: f64,
        /// Current interval in days
        #[arg(long, default_value = "0")]
        interval: f64,
    },
    /// List or import sets cached for offline study
    OfflineSets {
        /// Cache a set from a JSON file
        #[arg(long, value_name = "PATH")]
        import: Option<PathBuf>,
        /// Remove a cached set
        #[arg(long, value_name = "SET_ID", conflicts_with = "import")]
        remove: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Write script to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum DirectionArg {
    FrontToBack,
    BackToFront,
}

impl From<DirectionArg> for StudyDirection {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::FrontToBack => Self::FrontToBack,
            DirectionArg::BackToFront => Self::BackToFront,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationArg {
    Create,
    Update,
    Delete,
}

impl From<OperationArg> for ChangeOperation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Self::Create,
            OperationArg::Update => Self::Update,
            OperationArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntityArg {
    Set,
    Card,
    Folder,
}

impl From<EntityArg> for EntityKind {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::Set => Self::StudySet,
            EntityArg::Card => Self::Flashcard,
            EntityArg::Folder => Self::Folder,
        }
    }
}
