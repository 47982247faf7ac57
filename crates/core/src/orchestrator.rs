//! Bounded tool-calling loop that lets the generation backend consult
//! manual content mid-answer. The iteration budget, not a wall clock, is
//! the guard against a backend that never stops asking for lookups.

use crate::error::RagError;
use crate::models::{ManualKind, ManualSearchResult};
use crate::searcher::ManualSearcher;
use crate::traits::{BlobStore, ChatTurn, EmbeddingBackend, FunctionCall, TextGenerator, ToolSpec};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_TOOL_ITERATION_BUDGET: usize = 5;

const CONTINUATION_PROMPT: &str =
    "Use the search results above to continue your answer in character.";

#[derive(Debug, Clone)]
pub struct RagOutcome {
    pub final_response: String,
    pub search_results: Vec<ManualSearchResult>,
    pub function_calls_used: Vec<FunctionCall>,
}

pub struct RagOrchestrator<B, E, G>
where
    B: BlobStore,
    E: EmbeddingBackend,
    G: TextGenerator,
{
    searcher: ManualSearcher<B, E, G>,
    generator: Arc<G>,
    iteration_budget: usize,
}

impl<B, E, G> RagOrchestrator<B, E, G>
where
    B: BlobStore + Send + Sync,
    E: EmbeddingBackend + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    pub fn new(searcher: ManualSearcher<B, E, G>, generator: Arc<G>) -> Self {
        Self {
            searcher,
            generator,
            iteration_budget: DEFAULT_TOOL_ITERATION_BUDGET,
        }
    }

    pub fn with_iteration_budget(mut self, budget: usize) -> Self {
        self.iteration_budget = budget;
        self
    }

    /// Drive the backend until it answers without requesting a tool, or the
    /// iteration budget runs out. Exhaustion is an error, not a truncated
    /// answer: a loop that never converges means a misbehaving backend or a
    /// pathological query, and masking that helps nobody.
    pub async fn generate_with_rag(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<RagOutcome, RagError> {
        let tools = manual_tool_specs();
        let mut history: Vec<ChatTurn> = history.to_vec();
        let mut prompt = prompt.to_string();
        let mut search_results = Vec::new();
        let mut function_calls_used = Vec::new();
        let mut remaining = self.iteration_budget;

        loop {
            if remaining == 0 {
                return Err(RagError::Exhausted {
                    budget: self.iteration_budget,
                });
            }

            // A backend failure here is fatal: the model's reply is on the
            // critical path of producing any answer at all.
            let outcome = self
                .generator
                .generate_with_tools(&prompt, &tools, &history, system)
                .await?;

            if outcome.function_calls.is_empty() {
                return Ok(RagOutcome {
                    final_response: outcome.response,
                    search_results,
                    function_calls_used,
                });
            }

            // Tool calls run sequentially in request order so the history
            // stays deterministic for a deterministic backend.
            let mut blocks = Vec::new();
            for call in outcome.function_calls {
                debug!(tool = %call.name, "executing requested tool call");
                let block = match self.execute_tool(&call).await {
                    Ok((result, formatted)) => {
                        search_results.push(result);
                        formatted
                    }
                    Err(message) => {
                        warn!(tool = %call.name, %message, "tool call failed");
                        message
                    }
                };
                blocks.push(format!("[called {}] {}", call.name, block));
                function_calls_used.push(call);
            }

            history.push(ChatTurn::user(prompt));
            history.push(ChatTurn::assistant(blocks.join("\n\n")));
            prompt = CONTINUATION_PROMPT.to_string();
            remaining -= 1;
        }
    }

    /// A failed tool call is reported back to the model as text instead of
    /// aborting the loop, so it can recover or apologize in character.
    async fn execute_tool(
        &self,
        call: &FunctionCall,
    ) -> Result<(ManualSearchResult, String), String> {
        let kind = ManualKind::from_tool_name(&call.name)
            .ok_or_else(|| format!("Function {} failed: unknown tool", call.name))?;

        let query = call
            .string_argument("searchQuery")
            .ok_or_else(|| format!("Function {} failed: missing searchQuery argument", call.name))?;

        match self.searcher.search(query, kind).await {
            Ok(result) => {
                let formatted = format_search_result(&result);
                Ok((result, formatted))
            }
            Err(error) => Err(format!("Function {} failed: {error}", call.name)),
        }
    }
}

pub fn manual_tool_specs() -> Vec<ToolSpec> {
    [ManualKind::Player, ManualKind::Gm]
        .into_iter()
        .map(|kind| ToolSpec {
            name: kind.tool_name().to_string(),
            description: format!(
                "Search the {} for rules, tables, or lore relevant to a query.",
                kind.label()
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "searchQuery": {
                        "type": "string",
                        "description": "Natural-language description of the rule or topic to look up."
                    }
                },
                "required": ["searchQuery"]
            }),
        })
        .collect()
}

/// Human-readable block fed back into the conversation after a search.
pub fn format_search_result(result: &ManualSearchResult) -> String {
    let mut out = if result.chunks.is_empty() {
        format!(
            "No matches found for \"{}\" in the {}.",
            result.search_query,
            result.manual_type.label()
        )
    } else {
        format!(
            "Found {} match(es) for \"{}\" in the {}:\n",
            result.total_matches,
            result.search_query,
            result.manual_type.label()
        )
    };

    for chunk in &result.chunks {
        out.push_str(&format!(
            "\n## {}\nPath: {}\nPages: {}-{}\n\n{}\n\n---\n",
            chunk.title,
            chunk.path_display(),
            chunk.start_page,
            chunk.end_page,
            chunk.content
        ));
    }

    out
}
