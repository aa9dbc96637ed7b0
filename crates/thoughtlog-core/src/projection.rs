//! Event log -> canvas graph.
//!
//! `project` walks events strictly in log order and emits nodes, edges and
//! branch groups. Edges are only ever found by looking back at nodes that
//! were already emitted; a link whose target shows up later in the log is
//! never backfilled. Output depends only on the input sequence.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::events::{
    DiffStats, EventPayload, TaskState, ThoughtEvent,
};
use crate::git::DEFAULT_BRANCH;

const CURSOR_START: f64 = 100.0;
const NODE_SPACING: f64 = 150.0;
const GROUP_SPACING: f64 = 500.0;

const INTENT_LANE: Lane = Lane { x: 100.0, width: 200.0, height: 80.0 };
const AI_LANE: Lane = Lane { x: 350.0, width: 250.0, height: 120.0 };
const DECISION_LANE: Lane = Lane { x: 650.0, width: 180.0, height: 60.0 };
const FILE_LANE: Lane = Lane { x: 100.0, width: 200.0, height: 50.0 };
const COMMIT_LANE: Lane = Lane { x: 100.0, width: 300.0, height: 70.0 };
const BRANCH_LANE: Lane = Lane { x: 100.0, width: 200.0, height: 50.0 };

const GROUP_X: f64 = 100.0;
const GROUP_WIDTH: f64 = 800.0;
const GROUP_HEIGHT: f64 = 400.0;
const GROUP_INSET: f64 = 50.0;

#[derive(Debug, Clone, Copy)]
struct Lane {
    x: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Intent,
    AiThought,
    Decision,
    File,
    Commit,
    Branch,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Causality,
    Hierarchy,
    Reference,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileActivity {
    Created,
    Modified,
    Reverted,
}

/// Display data carried by a node, shaped by node type.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum NodeData {
    Intent {
        intent_id: String,
        text: String,
    },
    AiThought {
        ai_session_id: String,
        model: String,
        prompt: String,
        response: String,
    },
    Decision {
        ai_session_id: String,
        accepted: bool,
        excerpt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TaskState {
        intent_id: String,
        from: TaskState,
        to: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    File {
        path: String,
        branch: String,
        activity: FileActivity,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff_stats: Option<DiffStats>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Commit {
        message: String,
        commit: Option<String>,
        files: Vec<String>,
    },
    Branch {
        branch: String,
        abandoned: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub data: NodeData,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BranchGroup {
    pub id: String,
    pub branch: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub abandoned: bool,
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Projection {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub groups: Vec<BranchGroup>,
}

impl Projection {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

pub fn node_id(event_id: &str) -> String {
    format!("node_{}", event_id)
}

pub fn project<'a, I>(events: I) -> Projection
where
    I: IntoIterator<Item = &'a ThoughtEvent>,
{
    let mut projector = Projector::new();
    for event in events {
        projector.apply(event);
    }
    projector.finish()
}

/// Events that signal rejection, reversal or abandonment.
pub fn is_failure_event(event: &ThoughtEvent) -> bool {
    match &event.payload {
        EventPayload::HypothesisRejected(_)
        | EventPayload::ChangeReverted(_)
        | EventPayload::BranchAbandoned(_) => true,
        EventPayload::TaskStateChanged(payload) => {
            matches!(payload.to, TaskState::Frozen | TaskState::Cancelled)
        }
        _ => false,
    }
}

/// Projection of the failure events alone. Links whose source is not a
/// failure event are absent here even when the full projection has them.
pub fn project_failure_lens<'a, I>(events: I) -> Projection
where
    I: IntoIterator<Item = &'a ThoughtEvent>,
{
    project(events.into_iter().filter(|event| is_failure_event(event)))
}

struct Projector {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    groups: Vec<BranchGroup>,
    open_groups: BTreeMap<String, usize>,
    cursor: f64,
}

impl Projector {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            open_groups: BTreeMap::new(),
            cursor: CURSOR_START,
        }
    }

    fn finish(self) -> Projection {
        Projection {
            nodes: self.nodes,
            edges: self.edges,
            groups: self.groups,
        }
    }

    fn apply(&mut self, event: &ThoughtEvent) {
        match &event.payload {
            EventPayload::IntentDeclared(payload) => {
                self.push_node(
                    event,
                    NodeType::Intent,
                    INTENT_LANE,
                    NodeData::Intent {
                        intent_id: payload.intent_id.clone(),
                        text: payload.text.clone(),
                    },
                );
            }
            EventPayload::AiResponseReceived(payload) => {
                let source = payload
                    .linked_intent
                    .as_deref()
                    .and_then(|intent_id| self.find_intent(intent_id));
                self.push_node(
                    event,
                    NodeType::AiThought,
                    AI_LANE,
                    NodeData::AiThought {
                        ai_session_id: payload.ai_session_id.clone(),
                        model: payload.model.clone(),
                        prompt: payload.prompt.clone(),
                        response: payload.response.clone(),
                    },
                );
                if let Some(from) = source {
                    self.push_edge(event, "intent", from, EdgeType::Causality);
                }
            }
            EventPayload::HypothesisAccepted(payload) => {
                let source = self.find_ai_session(&payload.ai_session_id);
                self.push_node(
                    event,
                    NodeType::Decision,
                    DECISION_LANE,
                    NodeData::Decision {
                        ai_session_id: payload.ai_session_id.clone(),
                        accepted: true,
                        excerpt: payload.excerpt.clone(),
                        reason: payload.reason.clone(),
                    },
                );
                if let Some(from) = source {
                    self.push_edge(event, "ai", from, EdgeType::Causality);
                }
            }
            EventPayload::HypothesisRejected(payload) => {
                let source = self.find_ai_session(&payload.ai_session_id);
                self.push_node(
                    event,
                    NodeType::Decision,
                    DECISION_LANE,
                    NodeData::Decision {
                        ai_session_id: payload.ai_session_id.clone(),
                        accepted: false,
                        excerpt: payload.excerpt.clone(),
                        reason: Some(payload.reason.clone()),
                    },
                );
                if let Some(from) = source {
                    self.push_edge(event, "ai", from, EdgeType::Causality);
                }
            }
            EventPayload::TaskStateChanged(payload) => {
                let source = self.find_intent(&payload.intent_id);
                self.push_node(
                    event,
                    NodeType::Decision,
                    DECISION_LANE,
                    NodeData::TaskState {
                        intent_id: payload.intent_id.clone(),
                        from: payload.from,
                        to: payload.to,
                        reason: payload.reason.clone(),
                    },
                );
                if let Some(from) = source {
                    self.push_edge(event, "intent", from, EdgeType::Hierarchy);
                }
            }
            EventPayload::BranchCreated(payload) => self.open_group(&payload.branch),
            EventPayload::FileCreated(payload) => {
                self.push_file_node(event, &payload.path, FileActivity::Created, None, None);
            }
            EventPayload::FileModified(payload) => {
                self.push_file_node(
                    event,
                    &payload.path,
                    FileActivity::Modified,
                    Some(payload.diff_stats),
                    None,
                );
            }
            EventPayload::ChangeReverted(payload) => {
                self.push_file_node(
                    event,
                    &payload.path,
                    FileActivity::Reverted,
                    None,
                    Some(payload.reason.clone()),
                );
            }
            EventPayload::CommitCreated(payload) => {
                let branch = event_branch(event);
                let id = self.push_node(
                    event,
                    NodeType::Commit,
                    COMMIT_LANE,
                    NodeData::Commit {
                        message: payload.message.clone(),
                        commit: event.context.git_commit.clone(),
                        files: payload.files.clone(),
                    },
                );
                self.join_group(&branch, id);
            }
            EventPayload::BranchAbandoned(payload) => {
                self.push_node(
                    event,
                    NodeType::Branch,
                    BRANCH_LANE,
                    NodeData::Branch {
                        branch: payload.branch.clone(),
                        abandoned: true,
                        reason: payload.reason.clone(),
                    },
                );
                if let Some(index) = self.open_groups.remove(&payload.branch) {
                    self.groups[index].abandoned = true;
                }
            }
            EventPayload::Unknown { .. } => {}
        }
    }

    /// Emits a node at the cursor and advances it. Returns the node id.
    fn push_node(&mut self, event: &ThoughtEvent, node_type: NodeType, lane: Lane, data: NodeData) -> String {
        self.push_node_at(event, node_type, lane, lane.x, data)
    }

    fn push_node_at(
        &mut self,
        event: &ThoughtEvent,
        node_type: NodeType,
        lane: Lane,
        x: f64,
        data: NodeData,
    ) -> String {
        let id = node_id(&event.id);
        self.nodes.push(Node {
            id: id.clone(),
            node_type,
            x,
            y: self.cursor,
            width: lane.width,
            height: lane.height,
            data,
            event_id: event.id.clone(),
        });
        self.cursor += NODE_SPACING;
        id
    }

    fn push_file_node(
        &mut self,
        event: &ThoughtEvent,
        path: &str,
        activity: FileActivity,
        diff_stats: Option<DiffStats>,
        reason: Option<String>,
    ) {
        let branch = event_branch(event);
        let previous = match activity {
            FileActivity::Created => None,
            FileActivity::Modified | FileActivity::Reverted => self.find_latest_file(path),
        };
        let x = self
            .open_groups
            .get(&branch)
            .map(|index| self.groups[*index].x + GROUP_INSET)
            .unwrap_or(FILE_LANE.x);
        let id = self.push_node_at(
            event,
            NodeType::File,
            FILE_LANE,
            x,
            NodeData::File {
                path: path.to_string(),
                branch: branch.clone(),
                activity,
                diff_stats,
                reason,
            },
        );
        if let Some(from) = previous {
            self.push_edge(event, "prev", from, EdgeType::Reference);
        }
        self.join_group(&branch, id);
    }

    fn push_edge(&mut self, event: &ThoughtEvent, suffix: &str, from: String, edge_type: EdgeType) {
        self.edges.push(Edge {
            id: format!("edge_{}_{}", event.id, suffix),
            from,
            to: node_id(&event.id),
            edge_type,
        });
    }

    fn open_group(&mut self, branch: &str) {
        if self.open_groups.contains_key(branch) {
            return;
        }
        let reopened = self.groups.iter().filter(|group| group.branch == branch).count();
        let id = if reopened == 0 {
            format!("branch_{}", branch)
        } else {
            format!("branch_{}_{}", branch, reopened + 1)
        };
        self.open_groups.insert(branch.to_string(), self.groups.len());
        self.groups.push(BranchGroup {
            id,
            branch: branch.to_string(),
            x: GROUP_X,
            y: self.cursor,
            width: GROUP_WIDTH,
            height: GROUP_HEIGHT,
            abandoned: false,
            nodes: Vec::new(),
        });
        self.cursor += GROUP_SPACING;
    }

    fn join_group(&mut self, branch: &str, node_id: String) {
        if let Some(index) = self.open_groups.get(branch) {
            self.groups[*index].nodes.push(node_id);
        }
    }

    fn find_intent(&self, intent_id: &str) -> Option<String> {
        self.nodes
            .iter()
            .find(|node| {
                matches!(&node.data, NodeData::Intent { intent_id: id, .. } if id == intent_id)
            })
            .map(|node| node.id.clone())
    }

    fn find_ai_session(&self, session_id: &str) -> Option<String> {
        self.nodes
            .iter()
            .find(|node| {
                matches!(&node.data, NodeData::AiThought { ai_session_id, .. } if ai_session_id == session_id)
            })
            .map(|node| node.id.clone())
    }

    fn find_latest_file(&self, path: &str) -> Option<String> {
        self.nodes
            .iter()
            .rev()
            .find(|node| matches!(&node.data, NodeData::File { path: p, .. } if p == path))
            .map(|node| node.id.clone())
    }
}

fn event_branch(event: &ThoughtEvent) -> String {
    event
        .context
        .git_branch
        .clone()
        .filter(|branch| !branch.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        Actor, AiResponseReceived, BranchAbandoned, BranchCreated, ChangeReverted, CommitCreated,
        EventContext, FileCreated, FileModified, HypothesisAccepted, HypothesisRejected,
        IntentDeclared, IntentSource, TaskStateChanged,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event(id: &str, payload: EventPayload) -> ThoughtEvent {
        ThoughtEvent::new(Actor::Human, EventContext::for_project("demo"), payload)
            .with_id(id)
            .with_timestamp("2026-01-01T00:00:00.000Z")
    }

    fn on_branch(id: &str, branch: &str, payload: EventPayload) -> ThoughtEvent {
        let mut event = event(id, payload);
        event.context.git_branch = Some(branch.to_string());
        event
    }

    fn intent(id: &str, intent_id: &str) -> ThoughtEvent {
        event(
            id,
            EventPayload::IntentDeclared(IntentDeclared {
                intent_id: intent_id.to_string(),
                text: "make it fast".to_string(),
                source: IntentSource::Canvas,
            }),
        )
    }

    fn ai(id: &str, linked: Option<&str>, session: &str) -> ThoughtEvent {
        event(
            id,
            EventPayload::AiResponseReceived(AiResponseReceived {
                ai_session_id: session.to_string(),
                model: "m".to_string(),
                prompt: "p".to_string(),
                response: "r".to_string(),
                linked_intent: linked.map(str::to_string),
            }),
        )
    }

    fn accepted(id: &str, session: &str) -> ThoughtEvent {
        event(
            id,
            EventPayload::HypothesisAccepted(HypothesisAccepted {
                ai_session_id: session.to_string(),
                excerpt: "use a cache".to_string(),
                reason: None,
            }),
        )
    }

    fn rejected(id: &str, session: &str) -> ThoughtEvent {
        event(
            id,
            EventPayload::HypothesisRejected(HypothesisRejected {
                ai_session_id: session.to_string(),
                excerpt: "rewrite in asm".to_string(),
                reason: "too risky".to_string(),
            }),
        )
    }

    fn file_created(id: &str, branch: &str, path: &str) -> ThoughtEvent {
        on_branch(
            id,
            branch,
            EventPayload::FileCreated(FileCreated {
                path: path.to_string(),
                linked_ai_session: None,
            }),
        )
    }

    fn branch_created(id: &str, branch: &str) -> ThoughtEvent {
        event(
            id,
            EventPayload::BranchCreated(BranchCreated {
                branch: branch.to_string(),
                from: "main".to_string(),
                linked_intent: None,
            }),
        )
    }

    fn task_state(id: &str, intent_id: &str, to: TaskState) -> ThoughtEvent {
        event(
            id,
            EventPayload::TaskStateChanged(TaskStateChanged {
                intent_id: intent_id.to_string(),
                from: TaskState::Active,
                to,
                reason: None,
            }),
        )
    }

    fn edge_pairs(projection: &Projection) -> Vec<(String, String, EdgeType)> {
        projection
            .edges
            .iter()
            .map(|edge| (edge.from.clone(), edge.to.clone(), edge.edge_type))
            .collect()
    }

    #[test]
    fn intent_ai_decision_chain() {
        let events = vec![intent("i1", "A"), ai("e2", Some("A"), "s1"), accepted("e3", "s1")];
        let projection = project(&events);

        let types: Vec<NodeType> = projection.nodes.iter().map(|node| node.node_type).collect();
        assert_eq!(types, vec![NodeType::Intent, NodeType::AiThought, NodeType::Decision]);
        assert_eq!(
            edge_pairs(&projection),
            vec![
                ("node_i1".to_string(), "node_e2".to_string(), EdgeType::Causality),
                ("node_e2".to_string(), "node_e3".to_string(), EdgeType::Causality),
            ]
        );
        assert_eq!(projection.edges[0].id, "edge_e2_intent");
        assert_eq!(projection.edges[1].id, "edge_e3_ai");

        let lens = project_failure_lens(&events);
        assert!(lens.nodes.is_empty());
        assert!(lens.edges.is_empty());
    }

    #[test]
    fn lanes_and_cursor_follow_fixed_layout() {
        let events = vec![intent("i1", "A"), ai("e2", None, "s1"), accepted("e3", "s1")];
        let projection = project(&events);
        let placed: Vec<(f64, f64, f64, f64)> = projection
            .nodes
            .iter()
            .map(|node| (node.x, node.y, node.width, node.height))
            .collect();
        assert_eq!(
            placed,
            vec![
                (100.0, 100.0, 200.0, 80.0),
                (350.0, 250.0, 250.0, 120.0),
                (650.0, 400.0, 180.0, 60.0),
            ]
        );
    }

    #[test]
    fn linkage_only_looks_backwards() {
        let forward = vec![ai("e1", Some("X"), "s"), intent("i2", "X")];
        assert!(project(&forward).edges.is_empty());

        let backward = vec![intent("i2", "X"), ai("e1", Some("X"), "s")];
        assert_eq!(project(&backward).edges.len(), 1);
    }

    #[test]
    fn decision_links_to_first_ai_node_of_session() {
        let events = vec![ai("a1", None, "s1"), ai("a2", None, "s1"), rejected("d1", "s1")];
        let projection = project(&events);
        assert_eq!(
            edge_pairs(&projection),
            vec![("node_a1".to_string(), "node_d1".to_string(), EdgeType::Causality)]
        );
    }

    #[test]
    fn unknown_kinds_are_skipped_without_moving_cursor() {
        let unknown: ThoughtEvent = serde_json::from_value(json!({
            "id": "u1",
            "type": "UNKNOWN",
            "timestamp": "t",
            "actor": "system",
            "payload": {}
        }))
        .expect("unknown event");
        let events = vec![unknown, intent("i1", "A")];
        let projection = project(&events);
        assert_eq!(projection.nodes.len(), 1);
        assert_eq!(projection.nodes[0].y, CURSOR_START);
    }

    #[test]
    fn branch_group_collects_files_and_commits_until_abandoned() {
        let commit = on_branch(
            "c1",
            "feature",
            EventPayload::CommitCreated(CommitCreated {
                message: "wip".to_string(),
                linked_intents: Vec::new(),
                files: vec!["a.rs".to_string()],
            }),
        );
        let abandoned = event(
            "x1",
            EventPayload::BranchAbandoned(BranchAbandoned {
                branch: "feature".to_string(),
                reason: Some("dead end".to_string()),
            }),
        );
        let events = vec![
            file_created("f0", "feature", "early.rs"),
            branch_created("b1", "feature"),
            file_created("f1", "feature", "a.rs"),
            file_created("f2", "main", "b.rs"),
            commit,
            abandoned,
            file_created("f3", "feature", "late.rs"),
        ];
        let projection = project(&events);

        assert_eq!(projection.groups.len(), 1);
        let group = &projection.groups[0];
        assert_eq!(group.id, "branch_feature");
        assert_eq!(group.y, 250.0);
        assert!(group.abandoned);
        assert_eq!(group.nodes, vec!["node_f1".to_string(), "node_c1".to_string()]);

        let f1 = projection.node("node_f1").expect("f1");
        assert_eq!(f1.x, GROUP_X + GROUP_INSET);
        assert_eq!(f1.y, 750.0);
        let f2 = projection.node("node_f2").expect("f2");
        assert_eq!(f2.x, FILE_LANE.x);
        assert_eq!(projection.node("node_x1").map(|node| node.node_type), Some(NodeType::Branch));
    }

    #[test]
    fn duplicate_branch_creation_keeps_one_open_group() {
        let events = vec![
            branch_created("b1", "feature"),
            branch_created("b2", "feature"),
            file_created("f1", "feature", "a.rs"),
        ];
        let projection = project(&events);
        assert_eq!(projection.groups.len(), 1);
        assert_eq!(projection.groups[0].nodes, vec!["node_f1".to_string()]);
    }

    #[test]
    fn file_history_is_linked_by_reference_edges() {
        let modified = on_branch(
            "m1",
            "main",
            EventPayload::FileModified(FileModified {
                path: "a.rs".to_string(),
                diff_stats: DiffStats { added: 3, removed: 1 },
            }),
        );
        let reverted = on_branch(
            "r1",
            "main",
            EventPayload::ChangeReverted(ChangeReverted {
                path: "a.rs".to_string(),
                reason: "File deleted".to_string(),
            }),
        );
        let events = vec![file_created("f1", "main", "a.rs"), modified, reverted];
        let projection = project(&events);
        assert_eq!(
            edge_pairs(&projection),
            vec![
                ("node_f1".to_string(), "node_m1".to_string(), EdgeType::Reference),
                ("node_m1".to_string(), "node_r1".to_string(), EdgeType::Reference),
            ]
        );
    }

    #[test]
    fn task_state_links_to_intent_by_hierarchy() {
        let events = vec![intent("i1", "A"), task_state("t1", "A", TaskState::Frozen)];
        let projection = project(&events);
        assert_eq!(
            edge_pairs(&projection),
            vec![("node_i1".to_string(), "node_t1".to_string(), EdgeType::Hierarchy)]
        );
    }

    #[test]
    fn failure_lens_keeps_only_failure_kinds() {
        let reverted = event(
            "r1",
            EventPayload::ChangeReverted(ChangeReverted {
                path: "a.rs".to_string(),
                reason: "nope".to_string(),
            }),
        );
        let events = vec![
            intent("i1", "A"),
            ai("a1", Some("A"), "s1"),
            rejected("d1", "s1"),
            accepted("d2", "s1"),
            file_created("f1", "main", "a.rs"),
            reverted,
            task_state("t1", "A", TaskState::Completed),
            task_state("t2", "A", TaskState::Cancelled),
        ];
        let lens = project_failure_lens(&events);
        let ids: Vec<&str> = lens.nodes.iter().map(|node| node.event_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "r1", "t2"]);
        assert!(lens.edges.is_empty());
        for node in &lens.nodes {
            let source = events
                .iter()
                .find(|event| event.id == node.event_id)
                .expect("source event");
            assert!(is_failure_event(source));
        }
    }

    #[test]
    fn projection_is_deterministic() {
        let events = vec![
            intent("i1", "A"),
            ai("e2", Some("A"), "s1"),
            branch_created("b1", "feature"),
            file_created("f1", "feature", "a.rs"),
            accepted("e3", "s1"),
        ];
        let first = serde_json::to_string(&project(&events)).expect("serialize");
        let second = serde_json::to_string(&project(&events)).expect("serialize");
        assert_eq!(first, second);
    }
}
