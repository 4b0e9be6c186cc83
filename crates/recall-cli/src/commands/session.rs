use recall_core::models::{Confidence, ReviewSubmission, StudyDirection};
use recall_core::{CardResult, StudySessionSummary};

use crate::commands::common::{format_accuracy, parse_session_id, Context};
use crate::error::CliError;

pub struct AnswerInput<'a> {
    pub session_id: &'a str,
    pub card_id: &'a str,
    pub correct: bool,
    pub seconds: f64,
    pub confidence: Option<u8>,
    pub profile_id: Option<&'a str>,
}

pub async fn start_session(
    context: &Context,
    set_id: &str,
    name: Option<&str>,
    direction: StudyDirection,
) -> Result<StudySessionSummary, CliError> {
    let (recorder, store) = context.recorder().await?;
    let set_name = match name {
        Some(name) => name.to_string(),
        None => store
            .offline_set(set_id.trim())
            .await
            .map_or_else(|| set_id.trim().to_string(), |set| set.name),
    };
    Ok(recorder.start_session(set_id, &set_name, direction).await?)
}

pub async fn run_start(
    context: &Context,
    set_id: &str,
    name: Option<&str>,
    direction: StudyDirection,
    as_json: bool,
) -> Result<(), CliError> {
    let session = start_session(context, set_id, name, direction).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("Started session {}", session.id);
    if session.total_cards > 0 {
        println!("  {} ({} cards)", session.set_name, session.total_cards);
    } else {
        println!("  {}", session.set_name);
    }
    if session.is_offline {
        println!("  offline: answers are queued on this device");
    }
    Ok(())
}

/// Record one answer. Returns the stored result and the queued review, if any.
pub async fn record_answer(
    context: &Context,
    input: &AnswerInput<'_>,
) -> Result<(CardResult, Option<ReviewSubmission>), CliError> {
    let session_id = parse_session_id(input.session_id)?;
    let confidence = input.confidence.map(Confidence::new).transpose()?;
    let (recorder, store) = context.recorder().await?;

    let result = recorder
        .record_answer(
            &session_id,
            input.card_id,
            input.correct,
            input.seconds,
            confidence,
        )
        .await
        .map_err(|error| match error {
            recall_core::Error::NotFound(_) => CliError::SessionNotFound(session_id.to_string()),
            other => CliError::Core(other),
        })?;

    let review = match input.profile_id {
        Some(profile_id) => {
            let session = store
                .session(&session_id)
                .await
                .ok_or_else(|| CliError::SessionNotFound(session_id.to_string()))?;
            let review = ReviewSubmission::new(
                profile_id,
                &session.set_id,
                input.card_id,
                input.correct,
                input.seconds,
            )?;
            recorder.queue_review(&review).await?;
            Some(review)
        }
        None => None,
    };

    Ok((result, review))
}

pub async fn run_answer(context: &Context, input: &AnswerInput<'_>) -> Result<(), CliError> {
    let (result, review) = record_answer(context, input).await?;
    println!(
        "Recorded {} answer for {} ({:.1}s)",
        if result.is_correct { "correct" } else { "wrong" },
        result.card_id,
        result.time_to_answer_secs
    );
    if let Some(review) = review {
        println!("Queued review {} ({})", review.review_id, review.outcome().quality.as_str());
    }
    Ok(())
}

pub async fn finish_session(
    context: &Context,
    session_id: &str,
) -> Result<StudySessionSummary, CliError> {
    let session_id = parse_session_id(session_id)?;
    let (recorder, _store) = context.recorder().await?;
    recorder
        .finish_session(&session_id)
        .await
        .map_err(|error| match error {
            recall_core::Error::NotFound(_) => CliError::SessionNotFound(session_id.to_string()),
            other => CliError::Core(other),
        })
}

pub async fn run_finish(context: &Context, session_id: &str, as_json: bool) -> Result<(), CliError> {
    let session = finish_session(context, session_id).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("Finished session {}", session.id);
    println!(
        "  {}",
        format_accuracy(session.correct_count, session.completed_cards)
    );
    println!("  queued for sync");
    Ok(())
}
