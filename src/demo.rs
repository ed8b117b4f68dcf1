//! The research graph used by `keyflow run`.
//!
//! ```text
//! prompt ─► filter ─► filtered_prompt ─┬─► search ──────► search_results ─┐
//!                                      ├─► code_search ─► code_results ───┼─► generate ─► final_response
//!                                      └──────────────────────────────────┘
//! ```
//!
//! The stages stand in for model and search calls; each answers with a
//! canned record so the run is deterministic.

use std::time::Duration;

use keyflow_core::error::{FlowError, Result};
use keyflow_core::types::Record;
use keyflow_engine::Node;

pub const PROMPT: &str = "prompt";
pub const FINAL_RESPONSE: &str = "final_response";

/// All stages of the research graph, in registration order.
pub fn research_graph() -> Vec<Node> {
    vec![
        Node::from_sync_fn(vec![PROMPT.into()], "filtered_prompt", filter).with_name("filter"),
        Node::from_fn(vec!["filtered_prompt".into()], "search_results", search)
            .with_name("search"),
        Node::from_fn(vec!["filtered_prompt".into()], "code_results", code_search)
            .with_name("code_search"),
        Node::from_sync_fn(
            vec![
                "code_results".into(),
                "search_results".into(),
                "filtered_prompt".into(),
            ],
            FINAL_RESPONSE,
            generate,
        )
        .with_name("generate"),
    ]
}

fn filter(inputs: Vec<Record>) -> Result<Vec<Record>> {
    let prompt = inputs
        .iter()
        .filter_map(Record::as_text)
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return Err(FlowError::processing("prompt is empty"));
    }
    Ok(vec![Record::text(cleaned).with_author("filter")])
}

async fn search(inputs: Vec<Record>) -> Result<Vec<Record>> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    let topic = inputs.first().and_then(Record::as_text).unwrap_or_default();
    Ok(vec![Record::text(format!(
        "Here are the search results for \"{}\".",
        topic
    ))
    .with_author("search")])
}

async fn code_search(_inputs: Vec<Record>) -> Result<Vec<Record>> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(vec![Record::text("Here is the generated code...").with_author("code_search")])
}

fn generate(inputs: Vec<Record>) -> Result<Vec<Record>> {
    let context = inputs
        .iter()
        .filter_map(|r| Some(format!("[{}] {}", r.author.as_deref()?, r.as_text()?)))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(vec![Record::text(format!(
        "Let me explain in summary what I know:\n{}",
        context
    ))
    .with_author("generate")])
}
