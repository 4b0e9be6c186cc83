//! recall - study flashcards offline and sync progress from the terminal

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_context;
use crate::commands::completions::run_completions;
use crate::commands::due::run_due;
use crate::commands::offline_sets::run_offline_sets;
use crate::commands::preview::run_preview;
use crate::commands::queue::{run_change, run_queue};
use crate::commands::session::{run_answer, run_finish, run_start, AnswerInput};
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = match "recall=info".parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that never touch local state
    match &cli.command {
        None => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        Some(Commands::Completions { shell, output }) => {
            return run_completions(*shell, output.as_deref());
        }
        Some(Commands::Preview {
            stage,
            ease,
            interval,
        }) => return run_preview(*stage, *ease, *interval),
        Some(_) => {}
    }

    let context = resolve_context(cli.db_path, cli.config, cli.offline, |name| {
        std::env::var(name).ok()
    })?;

    match cli.command {
        Some(Commands::Start {
            set_id,
            name,
            direction,
            json,
        }) => run_start(&context, &set_id, name.as_deref(), direction.into(), json).await?,
        Some(Commands::Answer {
            session_id,
            card_id,
            wrong,
            seconds,
            confidence,
            profile,
        }) => {
            let input = AnswerInput {
                session_id: &session_id,
                card_id: &card_id,
                correct: !wrong,
                seconds,
                confidence,
                profile_id: profile.as_deref(),
            };
            run_answer(&context, &input).await?;
        }
        Some(Commands::Finish { session_id, json }) => {
            run_finish(&context, &session_id, json).await?;
        }
        Some(Commands::Queue { json }) => run_queue(&context, json).await?,
        Some(Commands::Change {
            operation,
            entity,
            entity_id,
            payload,
        }) => {
            run_change(
                &context,
                operation.into(),
                entity.into(),
                &entity_id,
                payload.as_deref(),
            )
            .await?;
        }
        Some(Commands::Sync) => run_sync(&context).await?,
        Some(Commands::Due {
            profile_id,
            tz_offset_minutes,
            json,
        }) => run_due(&context, &profile_id, tz_offset_minutes, json).await?,
        Some(Commands::OfflineSets {
            import,
            remove,
            json,
        }) => run_offline_sets(&context, import.as_deref(), remove.as_deref(), json).await?,
        Some(Commands::Completions { .. } | Commands::Preview { .. }) | None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Commands};
    use crate::cli::{DirectionArg, EntityArg, OperationArg};

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn answer_defaults_to_correct() {
        let cli = Cli::parse_from(["recall", "answer", "session", "card-1"]);
        match cli.command {
            Some(Commands::Answer {
                wrong,
                seconds,
                profile,
                ..
            }) => {
                assert!(!wrong);
                assert!((seconds - 5.0).abs() < f64::EPSILON);
                assert!(profile.is_none());
            }
            _ => panic!("expected answer command"),
        }
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::parse_from([
            "recall",
            "start",
            "set-1",
            "--direction",
            "back-to-front",
            "--offline",
            "--db-path",
            "/tmp/recall.db",
        ]);
        assert!(cli.offline);
        assert_eq!(
            cli.db_path.as_deref(),
            Some(std::path::Path::new("/tmp/recall.db"))
        );
        assert!(matches!(
            cli.command,
            Some(Commands::Start {
                direction: DirectionArg::BackToFront,
                ..
            })
        ));
    }

    #[test]
    fn change_parses_operation_and_entity() {
        let cli = Cli::parse_from([
            "recall", "change", "update", "set", "set-1", "--payload", r#"{"name":"x"}"#,
        ]);
        assert!(matches!(
            cli.command,
            Some(Commands::Change {
                operation: OperationArg::Update,
                entity: EntityArg::Set,
                ..
            })
        ));
    }

    #[test]
    fn due_accepts_negative_offsets() {
        let cli = Cli::parse_from(["recall", "due", "profile-1", "--tz-offset-minutes", "-300"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Due {
                tz_offset_minutes: Some(-300),
                ..
            })
        ));
    }
}
