use std::collections::BTreeMap;
use std::sync::Arc;

use ragloop_agent::{GraphExecutor, NodeId, RunContext};
use ragloop_core::config::{AgentConfig, ModelConfig};
use ragloop_core::error::RagError;
use ragloop_core::traits::{EmbeddingProvider, LlmClient};
use ragloop_core::types::{GradeDecision, Role};
use ragloop_index::{ingest_sources, RecursiveCharacterSplitter};
use ragloop_test_utils::{
    reward_hacking_passages, KeywordEmbedder, Reply, ScriptedLlm, StaticRetriever, QUESTION,
};
use ragloop_tools::{RetrieverTool, ToolRegistry};

const ANSWER: &str = "Lilian Weng splits reward hacking into two types. \
    The first is environment or goal misspecification. \
    The second is reward tampering.";

fn context(llm: &ScriptedLlm, registry: ToolRegistry) -> RunContext {
    RunContext::new(
        Arc::new(llm.clone()) as Arc<dyn LlmClient>,
        ModelConfig::default(),
        AgentConfig::default(),
        Arc::new(registry),
    )
}

fn blog_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(StaticRetriever::new(reward_hacking_passages()));
    registry
}

#[tokio::test]
async fn scenario_a_relevant_retrieval_is_answered() {
    let llm = ScriptedLlm::new(vec![
        Reply::retrieve("call_1", "reward hacking"),
        Reply::text("yes"),
        Reply::text(ANSWER),
    ]);
    let result = GraphExecutor::agentic_rag()
        .run(QUESTION, &context(&llm, blog_registry()))
        .await
        .unwrap();

    assert_eq!(
        result.path(),
        vec![NodeId::Router, NodeId::Retrieve, NodeId::Grade, NodeId::Generate]
    );

    let turns = result.state.turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].content, QUESTION);
    assert_eq!(turns[1].tool_calls[0].query(), Some("reward hacking"));
    assert_eq!(turns[2].role, Role::Tool);
    assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
    assert!(turns[2].content.contains("reward tampering"));
    assert_eq!(result.answer(), Some(ANSWER));

    // The grader saw the original question and the retrieved passages.
    let grader_prompt = &llm.calls()[1].turns[0].content;
    assert!(grader_prompt.contains(QUESTION));
    assert!(grader_prompt.contains("reward tampering"));
}

#[tokio::test]
async fn scenario_b_irrelevant_retrieval_loops_through_rewrite() {
    let rewritten = "What categories of reward hacking does Lilian Weng describe?";
    let llm = ScriptedLlm::new(vec![
        Reply::retrieve("call_1", "reward hacking"),
        Reply::text("no"),
        Reply::text(rewritten),
        Reply::retrieve("call_2", "categories of reward hacking"),
        Reply::text("Yes."),
        Reply::text(ANSWER),
    ]);
    let result = GraphExecutor::agentic_rag()
        .run(QUESTION, &context(&llm, blog_registry()))
        .await
        .unwrap();

    use NodeId::*;
    assert_eq!(
        result.path(),
        vec![Router, Retrieve, Grade, Rewrite, Router, Retrieve, Grade, Generate]
    );
    assert_eq!(result.iterations, 1);
    assert_eq!(
        result.node_results[2].grade,
        Some(GradeDecision::Irrelevant)
    );

    // The second router call sees the rewritten question as the latest turn.
    let second_router = &llm.calls()[3];
    let latest = second_router.turns.last().unwrap();
    assert_eq!(latest.role, Role::User);
    assert_eq!(latest.content, rewritten);
    assert_eq!(second_router.turns.len(), 4);

    // History only grows: the first pass is still there untouched.
    let turns = result.state.turns();
    assert_eq!(turns[0].content, QUESTION);
    assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(turns.len(), 7);
    assert_eq!(result.answer(), Some(ANSWER));
}

#[tokio::test]
async fn scenario_c_direct_answer_skips_retrieval() {
    let llm = ScriptedLlm::new(vec![Reply::text("Hello! How can I help you today?")]);
    let registry = blog_registry();
    let result = GraphExecutor::agentic_rag()
        .run("hello!", &context(&llm, registry))
        .await
        .unwrap();

    assert_eq!(result.node_results.len(), 1);
    assert_eq!(result.path(), vec![NodeId::Router]);
    assert_eq!(result.answer(), Some("Hello! How can I help you today?"));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn endless_irrelevance_hits_iteration_bound() {
    let mut replies = Vec::new();
    for i in 0..10 {
        replies.push(Reply::retrieve(&format!("call_{}", i), "reward hacking"));
        replies.push(Reply::text("no"));
        replies.push(Reply::text("rephrased"));
    }
    let llm = ScriptedLlm::new(replies);
    let err = GraphExecutor::agentic_rag()
        .run(QUESTION, &context(&llm, blog_registry()))
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        RagError::MaxIterationsExceeded(n) if *n == AgentConfig::default().max_iterations
    ));
    assert_eq!(err.node(), Some("rewrite"));
}

#[tokio::test]
async fn unknown_tool_aborts_run() {
    let llm = ScriptedLlm::new(vec![Reply::ToolCalls(vec![ragloop_core::types::ToolCall::new(
        "call_1",
        "web_search",
        serde_json::json!({"query": "reward hacking"}),
    )])]);
    let err = GraphExecutor::agentic_rag()
        .run(QUESTION, &context(&llm, blog_registry()))
        .await
        .unwrap_err();

    assert_eq!(err.node(), Some("retrieve"));
    assert!(matches!(err.root(), RagError::UnknownTool(name) if name == "web_search"));
}

#[tokio::test]
async fn retrieval_failure_aborts_run_without_answer() {
    let llm = ScriptedLlm::new(vec![Reply::retrieve("call_1", "q"), Reply::text("unused")]);
    let mut registry = ToolRegistry::new();
    registry.register(StaticRetriever::failing("index offline"));

    let err = GraphExecutor::agentic_rag()
        .run(QUESTION, &context(&llm, registry))
        .await
        .unwrap_err();
    assert!(matches!(err.root(), RagError::Retrieval { .. }));
    assert_eq!(llm.remaining(), 1);
}

#[tokio::test]
async fn retrieves_from_a_real_index() {
    let mut sources = BTreeMap::new();
    sources.insert(
        "https://lilianweng.github.io/posts/2024-11-28-reward-hacking/".to_string(),
        "Reward hacking can be categorized into environment misspecification and reward tampering."
            .to_string(),
    );
    sources.insert(
        "https://lilianweng.github.io/posts/2023-03-15-prompt-engineering/".to_string(),
        "Prompt engineering steers model behavior without updating weights.".to_string(),
    );

    let embedder = Arc::new(KeywordEmbedder::new(&["reward", "prompt"]));
    let index = ingest_sources(
        sources,
        &RecursiveCharacterSplitter::default(),
        embedder.as_ref(),
        8,
    )
    .await
    .unwrap();

    let tool = RetrieverTool::new(
        "retrieve_blog_posts",
        "Search Lilian Weng blog posts.",
        Arc::new(index),
        embedder.clone() as Arc<dyn EmbeddingProvider>,
    )
    .with_top_k(1);
    let mut registry = ToolRegistry::new();
    registry.register(tool);

    let llm = ScriptedLlm::new(vec![
        Reply::retrieve("call_1", "reward hacking"),
        Reply::text("yes"),
        Reply::text(ANSWER),
    ]);
    let result = GraphExecutor::agentic_rag()
        .run(QUESTION, &context(&llm, registry))
        .await
        .unwrap();

    let tool_turn = &result.state.turns()[2];
    assert!(tool_turn.content.contains("reward tampering"));
    assert!(!tool_turn.content.contains("Prompt engineering"));
}
