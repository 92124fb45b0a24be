//! Keyword-classified planner and the guarded ask pipeline.
//!
//! A query is classified into one of two plan variants by fixed trigger
//! keywords — a tagged enum with an explicit classifier, not nested
//! dispatch, so adding a plan variant never touches existing branches.
//!
//! - [`Plan::SingleStep`]: one retrieval, one prompt/response round
//!   trip.
//! - [`Plan::MultiStep`]: retrieval, an intermediate prompt asking the
//!   model to outline sub-questions, a second retrieval keyed on that
//!   outline, and a final answer over the concatenated context.
//!
//! There is no backtracking, no cost model, and no re-planning; a failed
//! model call propagates as [`CompanionError::LlmUnavailable`] for the
//! boundary to surface as a fixed message.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::guardrails::Guardrails;
use crate::index::VectorIndex;
use crate::llm::{self, ChatMessage, CONTEXT_HEADER};
use crate::models::{Role, ScoredChunk};
use crate::retrieve;
use crate::session::SessionContext;

const SYSTEM_PROMPT: &str = "You are a personal knowledge companion. Answer the user's question \
    using their own profile, skills, projects, and activities. Be concrete and concise; if the \
    provided context does not cover the question, say so instead of inventing details.";

const OUTLINE_PROMPT: &str = "Before answering, break the user's question into two or three \
    focused sub-questions, one per line. Reply with the sub-questions only.";

/// Keywords that select the multi-step plan.
const MULTI_STEP_TRIGGERS: &[&str] = &[
    "analyze", "compare", "recommend", "suggest", "improve", "insight",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    SingleStep,
    MultiStep,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Plan::SingleStep => "single_step",
            Plan::MultiStep => "multi_step",
        })
    }
}

/// Select a plan by testing for fixed trigger keywords.
pub fn classify(question: &str) -> Plan {
    let lower = question.to_lowercase();
    if MULTI_STEP_TRIGGERS.iter().any(|t| lower.contains(t)) {
        Plan::MultiStep
    } else {
        Plan::SingleStep
    }
}

#[derive(Debug, Serialize)]
pub struct AskOutcome {
    pub answer: String,
    pub plan: Plan,
    /// The chunks that backed the final answer.
    pub context: Vec<ScoredChunk>,
}

/// The full guarded pipeline for one user question: input guardrails,
/// plan selection, retrieval, model round trip(s), output guardrails,
/// history bookkeeping.
pub async fn ask(
    config: &Config,
    session_id: &str,
    session: &mut SessionContext,
    guardrails: &mut Guardrails,
    cache: &mut ResponseCache,
    index: &VectorIndex,
    question: &str,
) -> Result<AskOutcome> {
    let cleaned = guardrails.check_input(session_id, question)?;

    // A cached exchange skips retrieval and the model round trip but
    // still counts against the rate limit and lands in history.
    if let Some(hit) = cache.get(&cleaned, index.stamp()) {
        info!(session = session_id, "answering from response cache");
        session.push_turn(Role::User, cleaned);
        session.push_turn(Role::Assistant, hit.answer.clone());
        session.record_plan();
        return Ok(AskOutcome {
            answer: hit.answer,
            plan: hit.plan,
            context: hit.context,
        });
    }

    let plan = classify(&cleaned);
    info!(session = session_id, %plan, "executing plan");

    let (answer, context) = match plan {
        Plan::SingleStep => run_single_step(config, session, index, &cleaned).await?,
        Plan::MultiStep => run_multi_step(config, session, index, &cleaned).await?,
    };

    let answer = guardrails.filter_output(&answer);
    cache.put(&cleaned, index.stamp(), &answer, plan, &context);

    session.push_turn(Role::User, cleaned);
    session.push_turn(Role::Assistant, answer.clone());
    session.record_plan();

    Ok(AskOutcome {
        answer,
        plan,
        context,
    })
}

async fn run_single_step(
    config: &Config,
    session: &SessionContext,
    index: &VectorIndex,
    question: &str,
) -> Result<(String, Vec<ScoredChunk>)> {
    let context = retrieve::hybrid_search(index, &config.embedding, &config.retrieval, question)
        .await?;
    let messages = build_messages(
        SYSTEM_PROMPT,
        &context,
        session,
        question,
        config.agent.context_budget_chars,
    );
    let answer = llm::chat(&config.llm, &messages).await?;
    Ok((answer, context))
}

async fn run_multi_step(
    config: &Config,
    session: &SessionContext,
    index: &VectorIndex,
    question: &str,
) -> Result<(String, Vec<ScoredChunk>)> {
    // Round one: retrieve on the raw question and ask for an outline.
    let first = retrieve::hybrid_search(index, &config.embedding, &config.retrieval, question)
        .await?;
    let budget = config.agent.context_budget_chars;
    let outline_messages = build_messages(OUTLINE_PROMPT, &first, session, question, budget);
    let outline = llm::chat(&config.llm, &outline_messages).await?;

    // Round two: retrieve again keyed on the outline and answer over the
    // concatenated context.
    let second = retrieve::hybrid_search(index, &config.embedding, &config.retrieval, &outline)
        .await?;
    let combined = concat_context(first, second, config.retrieval.top_k);

    let final_question = format!("{}\n\nSub-questions to cover:\n{}", question, outline);
    let messages = build_messages(SYSTEM_PROMPT, &combined, session, &final_question, budget);
    let answer = llm::chat(&config.llm, &messages).await?;
    Ok((answer, combined))
}

/// System instructions, retrieved-context block, bounded history, then
/// the new user turn. The context block is capped at `budget_chars`,
/// dropping lowest-ranked chunks first; the top chunk is always kept.
fn build_messages(
    system_prompt: &str,
    context: &[ScoredChunk],
    session: &SessionContext,
    question: &str,
    budget_chars: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new(Role::System, system_prompt)];

    if !context.is_empty() {
        let mut block = String::from(CONTEXT_HEADER);
        let mut used = 0usize;
        for (i, chunk) in context.iter().enumerate() {
            let line = format!("\n{}. [{}] {}", i + 1, chunk.section, chunk.text);
            let line_chars = line.chars().count();
            if i > 0 && used + line_chars > budget_chars {
                break;
            }
            block.push_str(&line);
            used += line_chars;
        }
        messages.push(ChatMessage::new(Role::System, block));
    }

    for turn in session.history() {
        messages.push(ChatMessage::new(turn.role, turn.content.clone()));
    }

    messages.push(ChatMessage::new(Role::User, question));
    messages
}

/// Merge two retrieval rounds, deduplicated by chunk identity, keeping
/// first-round order first.
fn concat_context(
    first: Vec<ScoredChunk>,
    second: Vec<ScoredChunk>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut combined = first;
    for chunk in second {
        if !combined
            .iter()
            .any(|c| c.section == chunk.section && c.text == chunk.text)
        {
            combined.push(chunk);
        }
    }
    combined.truncate(limit.max(1) * 2);
    combined
}
