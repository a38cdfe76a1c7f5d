use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use ragloop_core::error::{RagError, Result};
use ragloop_core::state::ConversationState;
use ragloop_core::types::{GradeDecision, RunEvent, RunId, Turn};

use super::edge::{Edge, EdgeCondition};
use super::node::{Node, NodeId};
use crate::context::RunContext;
use crate::nodes::{GenerateNode, GradeNode, RetrieveNode, RewriteNode, RouterNode};

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node: NodeId,
    /// Turns the node appended.
    pub turns: Vec<Turn>,
    pub grade: Option<GradeDecision>,
    pub elapsed_ms: u64,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// Per-node results in execution order. `Start` is not included.
    pub node_results: Vec<NodeResult>,
    /// Full history at termination.
    pub state: ConversationState,
    /// Number of times the rewrite loop was entered.
    pub iterations: usize,
    pub total_elapsed_ms: u64,
}

impl ExecutionResult {
    /// The final assistant answer, if any.
    pub fn answer(&self) -> Option<&str> {
        self.state.answer()
    }

    /// Node sequence in execution order.
    pub fn path(&self) -> Vec<NodeId> {
        self.node_results.iter().map(|r| r.node).collect()
    }
}

/// Drives the state machine one node at a time.
///
/// Starting from `Start`, it runs the current node against the latest state,
/// appends the returned turns, evaluates the outgoing edges of that node in
/// table order, and follows the first one that matches. The run ends on
/// `End` or on the first node failure.
pub struct GraphExecutor {
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    edges: Vec<Edge>,
}

impl GraphExecutor {
    pub fn new(nodes: Vec<Arc<dyn Node>>, edges: Vec<Edge>) -> Self {
        let nodes = nodes.into_iter().map(|n| (n.id(), n)).collect();
        Self { nodes, edges }
    }

    /// The agentic RAG graph:
    ///
    /// ```text
    /// Start -> Router
    /// Router -(tool calls)-> Retrieve | Router -(no tool calls)-> End
    /// Retrieve -> Grade
    /// Grade -(relevant)-> Generate | Grade -(irrelevant)-> Rewrite
    /// Rewrite -> Router
    /// Generate -> End
    /// ```
    pub fn agentic_rag() -> Self {
        use EdgeCondition::*;
        use NodeId::*;

        Self::new(
            vec![
                Arc::new(RouterNode),
                Arc::new(RetrieveNode),
                Arc::new(GradeNode),
                Arc::new(RewriteNode),
                Arc::new(GenerateNode),
            ],
            vec![
                Edge::always(Start, Router),
                Edge::when(Router, Retrieve, ToolCallsPresent),
                Edge::when(Router, End, NoToolCalls),
                Edge::always(Retrieve, Grade),
                Edge::when(Grade, Generate, Relevant),
                Edge::when(Grade, Rewrite, Irrelevant),
                Edge::always(Rewrite, Router),
                Edge::always(Generate, End),
            ],
        )
    }

    /// Check the edge table against the registered nodes.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            if edge.from == NodeId::End {
                return Err(RagError::GraphConfiguration(format!(
                    "edge leaves terminal state: {} -> {}",
                    edge.from, edge.to
                )));
            }
            if edge.to == NodeId::Start {
                return Err(RagError::GraphConfiguration(format!(
                    "edge enters initial state: {} -> {}",
                    edge.from, edge.to
                )));
            }
            for end in [edge.from, edge.to] {
                if !end.is_pseudo() && !self.nodes.contains_key(&end) {
                    return Err(RagError::GraphConfiguration(format!(
                        "edge {} -> {} references unregistered node '{}'",
                        edge.from, edge.to, end
                    )));
                }
            }
        }

        let start_edges: Vec<&Edge> = self.outgoing(NodeId::Start).collect();
        if start_edges.len() != 1 || start_edges[0].condition != EdgeCondition::Always {
            return Err(RagError::GraphConfiguration(
                "start must have exactly one unconditional edge".into(),
            ));
        }

        for id in self.nodes.keys() {
            if self.outgoing(*id).next().is_none() {
                return Err(RagError::GraphConfiguration(format!(
                    "node '{}' has no outgoing edge",
                    id
                )));
            }
        }

        Ok(())
    }

    /// Run from a single question.
    pub async fn run(&self, question: impl Into<String>, ctx: &RunContext) -> Result<ExecutionResult> {
        self.execute(ConversationState::new(question), ctx).await
    }

    /// Run from an initial state, normally just the user's question.
    pub async fn execute(
        &self,
        initial: ConversationState,
        ctx: &RunContext,
    ) -> Result<ExecutionResult> {
        self.validate()?;

        let start = Instant::now();
        let deadline = start + ctx.agent.max_duration();
        let run_id = RunId::new();
        let mut state = initial;
        let mut node_results: Vec<NodeResult> = Vec::new();
        let mut iterations = 0usize;

        let question = state.question().unwrap_or_default().to_string();
        info!(run_id = %run_id, question = %question, "Run started");
        ctx.event_bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            question,
        });

        let fail = |node: NodeId, e: RagError| -> RagError {
            error!(run_id = %run_id, node = %node, error = %e, "Run failed");
            ctx.event_bus.publish(RunEvent::RunFailed {
                run_id: run_id.clone(),
                node: node.to_string(),
                error: e.to_string(),
            });
            RagError::at_node(node.as_str(), e)
        };

        let mut current = match self.next(NodeId::Start, &state, None) {
            Ok(next) => next,
            Err(e) => return Err(fail(NodeId::Start, e)),
        };

        while current != NodeId::End {
            if ctx.cancel.is_cancelled() {
                return Err(fail(current, RagError::Cancelled));
            }

            if current == NodeId::Rewrite {
                if iterations >= ctx.agent.max_iterations {
                    warn!(run_id = %run_id, iterations, "Rewrite loop bound reached");
                    return Err(fail(
                        current,
                        RagError::MaxIterationsExceeded(ctx.agent.max_iterations),
                    ));
                }
                iterations += 1;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(fail(
                    current,
                    RagError::MaxDurationExceeded(ctx.agent.max_duration_secs),
                ));
            }

            let node = match self.nodes.get(&current) {
                Some(n) => n,
                None => {
                    return Err(fail(
                        current,
                        RagError::GraphConfiguration(format!(
                            "node '{}' not registered",
                            current
                        )),
                    ));
                }
            };

            debug!(run_id = %run_id, node = %current, "Executing node");
            ctx.event_bus.publish(RunEvent::NodeStarted {
                run_id: run_id.clone(),
                node: current.to_string(),
            });

            let node_start = Instant::now();
            let result = tokio::select! {
                r = tokio::time::timeout(remaining, node.run(&state, ctx)) => match r {
                    Ok(r) => r,
                    Err(_) => Err(RagError::MaxDurationExceeded(ctx.agent.max_duration_secs)),
                },
                _ = ctx.cancel.cancelled() => Err(RagError::Cancelled),
            };
            let output = match result {
                Ok(output) => output,
                Err(e) => return Err(fail(current, e)),
            };
            let elapsed_ms = node_start.elapsed().as_millis() as u64;

            state.append(output.turns.iter().cloned());
            info!(
                run_id = %run_id,
                node = %current,
                turns = output.turns.len(),
                grade = ?output.grade,
                elapsed_ms,
                "Node complete"
            );
            ctx.event_bus.publish(RunEvent::NodeOutput {
                run_id: run_id.clone(),
                node: current.to_string(),
                turns: output.turns.clone(),
                grade: output.grade,
            });
            node_results.push(NodeResult {
                node: current,
                turns: output.turns,
                grade: output.grade,
                elapsed_ms,
            });

            current = match self.next(current, &state, output.grade) {
                Ok(next) => next,
                Err(e) => return Err(fail(current, e)),
            };
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            nodes = node_results.len(),
            iterations,
            elapsed_ms = total_elapsed_ms,
            "Run complete"
        );
        ctx.event_bus.publish(RunEvent::RunComplete {
            run_id: run_id.clone(),
            nodes_executed: node_results.len(),
            elapsed_ms: total_elapsed_ms,
        });

        Ok(ExecutionResult {
            run_id,
            node_results,
            state,
            iterations,
            total_elapsed_ms,
        })
    }

    fn outgoing(&self, from: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == from)
    }

    /// First matching outgoing edge wins.
    fn next(
        &self,
        from: NodeId,
        state: &ConversationState,
        grade: Option<GradeDecision>,
    ) -> Result<NodeId> {
        let edge = self
            .outgoing(from)
            .find(|e| e.condition.matches(state, grade))
            .ok_or_else(|| {
                RagError::GraphConfiguration(format!("no edge out of '{}' matched", from))
            })?;

        if !edge.to.is_pseudo() && !self.nodes.contains_key(&edge.to) {
            return Err(RagError::GraphConfiguration(format!(
                "route from '{}' targets unregistered node '{}'",
                from, edge.to
            )));
        }

        debug!(from = %from, to = %edge.to, condition = ?edge.condition, "Transition");
        Ok(edge.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ragloop_core::types::Role;
    use ragloop_test_utils::{Reply, ScriptedLlm, QUESTION};

    use crate::nodes::testing::context;

    #[test]
    fn test_default_graph_is_valid() {
        GraphExecutor::agentic_rag().validate().unwrap();
    }

    #[test]
    fn test_edge_to_unregistered_node() {
        let executor = GraphExecutor::new(
            vec![Arc::new(RouterNode)],
            vec![
                Edge::always(NodeId::Start, NodeId::Router),
                Edge::when(NodeId::Router, NodeId::Retrieve, EdgeCondition::ToolCallsPresent),
                Edge::when(NodeId::Router, NodeId::End, EdgeCondition::NoToolCalls),
            ],
        );
        let err = executor.validate().unwrap_err();
        assert!(matches!(err, RagError::GraphConfiguration(msg) if msg.contains("retrieve")));
    }

    #[test]
    fn test_start_needs_one_unconditional_edge() {
        let executor = GraphExecutor::new(
            vec![Arc::new(GenerateNode)],
            vec![
                Edge::when(NodeId::Start, NodeId::Generate, EdgeCondition::Relevant),
                Edge::always(NodeId::Generate, NodeId::End),
            ],
        );
        assert!(matches!(
            executor.validate(),
            Err(RagError::GraphConfiguration(_))
        ));
    }

    #[test]
    fn test_dead_end_node_rejected() {
        let executor = GraphExecutor::new(
            vec![Arc::new(RouterNode), Arc::new(GenerateNode)],
            vec![Edge::always(NodeId::Start, NodeId::Router), Edge::always(NodeId::Router, NodeId::End)],
        );
        let err = executor.validate().unwrap_err();
        assert!(matches!(err, RagError::GraphConfiguration(msg) if msg.contains("generate")));
    }

    #[tokio::test]
    async fn test_direct_answer_path() {
        let llm = ScriptedLlm::new(vec![Reply::text("Hello!")]);
        let result = GraphExecutor::agentic_rag()
            .run("hello!", &context(&llm))
            .await
            .unwrap();

        assert_eq!(result.path(), vec![NodeId::Router]);
        assert_eq!(result.state.len(), 2);
        assert_eq!(result.answer(), Some("Hello!"));
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn test_relevant_path() {
        let llm = ScriptedLlm::new(vec![
            Reply::retrieve("1", "reward hacking"),
            Reply::text("yes"),
            Reply::text("There are two types."),
        ]);
        let result = GraphExecutor::agentic_rag()
            .run(QUESTION, &context(&llm))
            .await
            .unwrap();

        assert_eq!(
            result.path(),
            vec![NodeId::Router, NodeId::Retrieve, NodeId::Grade, NodeId::Generate]
        );
        let roles: Vec<Role> = result.state.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(result.node_results[2].grade, Some(GradeDecision::Relevant));
        assert_eq!(result.answer(), Some("There are two types."));
    }

    #[tokio::test]
    async fn test_rewrite_loop_is_deterministic() {
        let script = || {
            vec![
                Reply::retrieve("1", "reward hacking"),
                Reply::text("no"),
                Reply::text("What kinds of reward hacking exist?"),
                Reply::retrieve("2", "kinds of reward hacking"),
                Reply::text("yes"),
                Reply::text("Two kinds."),
            ]
        };

        let first = GraphExecutor::agentic_rag()
            .run(QUESTION, &context(&ScriptedLlm::new(script())))
            .await
            .unwrap();
        let second = GraphExecutor::agentic_rag()
            .run(QUESTION, &context(&ScriptedLlm::new(script())))
            .await
            .unwrap();

        use NodeId::*;
        let expected = vec![Router, Retrieve, Grade, Rewrite, Router, Retrieve, Grade, Generate];
        assert_eq!(first.path(), expected);
        assert_eq!(second.path(), expected);
        assert_eq!(first.iterations, 1);

        let contents = |r: &ExecutionResult| -> Vec<String> {
            r.state.turns().iter().map(|t| t.content.clone()).collect()
        };
        assert_eq!(contents(&first), contents(&second));
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let mut replies = Vec::new();
        for i in 0..3 {
            replies.push(Reply::retrieve(&i.to_string(), "q"));
            replies.push(Reply::text("no"));
            replies.push(Reply::text("rephrased"));
        }
        let llm = ScriptedLlm::new(replies);
        let mut ctx = context(&llm);
        ctx.agent.max_iterations = 2;

        let err = GraphExecutor::agentic_rag()
            .run(QUESTION, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.node(), Some("rewrite"));
        assert!(matches!(err.root(), RagError::MaxIterationsExceeded(2)));
        // Router, grade and rewrite twice, then router and grade once more.
        assert_eq!(llm.call_count(), 8);
    }

    #[tokio::test]
    async fn test_zero_iterations_fails_on_first_rewrite() {
        let llm = ScriptedLlm::new(vec![Reply::retrieve("1", "q"), Reply::text("no")]);
        let mut ctx = context(&llm);
        ctx.agent.max_iterations = 0;

        let err = GraphExecutor::agentic_rag()
            .run(QUESTION, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), RagError::MaxIterationsExceeded(0)));
    }

    #[tokio::test]
    async fn test_node_failure_carries_state_name() {
        let llm = ScriptedLlm::new(vec![Reply::retrieve("1", "q"), Reply::Fail("boom".into())]);
        let err = GraphExecutor::agentic_rag()
            .run(QUESTION, &context(&llm))
            .await
            .unwrap_err();
        assert_eq!(err.node(), Some("grade_documents"));
        assert!(matches!(err.root(), RagError::ModelInvocation(_)));
    }

    #[tokio::test]
    async fn test_no_matching_edge() {
        let executor = GraphExecutor::new(
            vec![Arc::new(RouterNode), Arc::new(RetrieveNode)],
            vec![
                Edge::always(NodeId::Start, NodeId::Router),
                Edge::when(NodeId::Router, NodeId::Retrieve, EdgeCondition::ToolCallsPresent),
                Edge::always(NodeId::Retrieve, NodeId::End),
            ],
        );
        let llm = ScriptedLlm::new(vec![Reply::text("direct")]);
        let err = executor.run(QUESTION, &context(&llm)).await.unwrap_err();
        assert_eq!(err.node(), Some("generate_query_or_respond"));
        assert!(matches!(err.root(), RagError::GraphConfiguration(_)));
    }

    #[tokio::test]
    async fn test_invalid_graph_fails_before_any_model_call() {
        let executor = GraphExecutor::new(vec![Arc::new(RouterNode)], vec![]);
        let llm = ScriptedLlm::new(vec![Reply::text("never")]);
        let err = executor.run(QUESTION, &context(&llm)).await.unwrap_err();
        assert!(matches!(err, RagError::GraphConfiguration(_)));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline() {
        let llm = ScriptedLlm::new(vec![Reply::Delayed(
            Duration::from_secs(5),
            Box::new(Reply::text("late")),
        )]);
        let mut ctx = context(&llm);
        ctx.agent.max_duration_secs = 1;

        let err = GraphExecutor::agentic_rag()
            .run(QUESTION, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), RagError::MaxDurationExceeded(1)));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let llm = ScriptedLlm::new(vec![Reply::text("unused")]);
        let ctx = context(&llm);
        ctx.cancel_token().cancel();

        let err = GraphExecutor::agentic_rag()
            .run(QUESTION, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), RagError::Cancelled));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let llm = ScriptedLlm::new(vec![
            Reply::retrieve("1", "reward hacking"),
            Reply::text("yes"),
            Reply::text("Answer."),
        ]);
        let ctx = context(&llm);
        let mut rx = ctx.event_bus.subscribe();

        GraphExecutor::agentic_rag().run(QUESTION, &ctx).await.unwrap();

        let mut outputs = Vec::new();
        let mut started = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                RunEvent::RunStarted { question, .. } => {
                    assert_eq!(question, QUESTION);
                    started += 1;
                }
                RunEvent::NodeOutput { node, grade, .. } => outputs.push((node, grade)),
                RunEvent::RunComplete { nodes_executed, .. } => {
                    assert_eq!(nodes_executed, 4);
                    completed = true;
                }
                RunEvent::NodeStarted { .. } => {}
                RunEvent::RunFailed { .. } => panic!("run should not fail"),
            }
        }
        assert_eq!(started, 1);
        assert!(completed);
        assert_eq!(
            outputs,
            vec![
                ("generate_query_or_respond".to_string(), None),
                ("retrieve".to_string(), None),
                ("grade_documents".to_string(), Some(GradeDecision::Relevant)),
                ("generate".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_event_published() {
        let llm = ScriptedLlm::new(vec![Reply::Fail("down".into())]);
        let ctx = context(&llm);
        let mut rx = ctx.event_bus.subscribe();

        let _ = GraphExecutor::agentic_rag().run(QUESTION, &ctx).await;

        let mut failed_at = None;
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::RunFailed { node, .. } = event {
                failed_at = Some(node);
            }
        }
        assert_eq!(failed_at.as_deref(), Some("generate_query_or_respond"));
    }
}
