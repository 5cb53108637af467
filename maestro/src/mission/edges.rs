//! Edge layout construction from a pattern type and an agent team.

use crate::model::{EdgeDef, EdgeKind, PatternType};

/// Build the edge list for a phase's pattern from its team.
///
/// `leader` picks the manager/dispatcher/judge node; defaults depend on
/// the pattern. `ranks` supplies each agent's hierarchy rank (aligned
/// with `agent_ids`), used to tell workers apart in hierarchical teams.
#[must_use]
pub fn build_edges(
    pattern_type: PatternType,
    agent_ids: &[String],
    leader: Option<&str>,
    ranks: &[u8],
) -> Vec<EdgeDef> {
    if agent_ids.len() < 2 {
        return Vec::new();
    }
    let leader_id = leader
        .filter(|l| agent_ids.iter().any(|a| a == l))
        .unwrap_or(&agent_ids[0]);
    let followers: Vec<&String> = agent_ids.iter().filter(|a| *a != leader_id).collect();

    let mut edges = Vec::new();
    match pattern_type {
        PatternType::Sequential => {
            for pair in agent_ids.windows(2) {
                edges.push(EdgeDef::new(&pair[0], &pair[1], EdgeKind::Sequential));
            }
            if agent_ids.len() >= 3 {
                edges.push(EdgeDef::new(
                    &agent_ids[agent_ids.len() - 1],
                    &agent_ids[0],
                    EdgeKind::Feedback,
                ));
            }
        }
        PatternType::Network => {
            for follower in &followers {
                edges.push(EdgeDef::new(leader_id, *follower, EdgeKind::Delegate));
            }
            all_pairs(&followers, &mut edges);
            for follower in &followers {
                edges.push(EdgeDef::new(*follower, leader_id, EdgeKind::Report));
            }
        }
        PatternType::Hierarchical => {
            for follower in &followers {
                edges.push(EdgeDef::new(leader_id, *follower, EdgeKind::Delegate));
            }
            // Peer channel among workers only (rank >= 40).
            let workers: Vec<&String> = agent_ids
                .iter()
                .zip(ranks)
                .filter(|(id, rank)| *id != leader_id && **rank >= 40)
                .map(|(id, _)| id)
                .collect();
            all_pairs(&workers, &mut edges);
            for follower in &followers {
                edges.push(EdgeDef::new(*follower, leader_id, EdgeKind::Report));
            }
        }
        PatternType::Aggregator => {
            let aggregator = leader
                .filter(|l| agent_ids.iter().any(|a| a == l))
                .unwrap_or(&agent_ids[agent_ids.len() - 1]);
            let contributors: Vec<&String> =
                agent_ids.iter().filter(|a| *a != aggregator).collect();
            for contributor in &contributors {
                edges.push(EdgeDef::new(*contributor, aggregator, EdgeKind::Aggregate));
            }
            all_pairs(&contributors, &mut edges);
        }
        PatternType::Router => {
            for follower in &followers {
                edges.push(EdgeDef::new(leader_id, *follower, EdgeKind::Route));
                edges.push(EdgeDef::new(*follower, leader_id, EdgeKind::Report));
            }
        }
        PatternType::Parallel => {
            for follower in &followers {
                edges.push(EdgeDef::new(leader_id, *follower, EdgeKind::Parallel));
                edges.push(EdgeDef::new(*follower, leader_id, EdgeKind::Report));
            }
        }
        PatternType::Loop => {
            edges.push(EdgeDef::new(&agent_ids[0], &agent_ids[1], EdgeKind::Sequential));
            edges.push(EdgeDef::new(&agent_ids[1], &agent_ids[0], EdgeKind::Feedback));
        }
        PatternType::HumanInTheLoop => {
            for follower in &followers {
                edges.push(EdgeDef::new(*follower, leader_id, EdgeKind::Report));
            }
            all_pairs(&followers, &mut edges);
        }
        PatternType::Solo | PatternType::Wave => {}
    }
    edges
}

fn all_pairs(nodes: &[&String], edges: &mut Vec<EdgeDef>) {
    for (i, a) in nodes.iter().enumerate() {
        for b in nodes.iter().skip(i + 1) {
            edges.push(EdgeDef::new(*a, *b, EdgeKind::Bidirectional));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn sequential_chains_with_feedback() {
        let edges = build_edges(PatternType::Sequential, &ids(&["a", "b", "c"]), None, &[50, 50, 50]);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0], EdgeDef::new("a", "b", EdgeKind::Sequential));
        assert_eq!(edges[2], EdgeDef::new("c", "a", EdgeKind::Feedback));
    }

    #[test]
    fn two_node_sequential_has_no_feedback() {
        let edges = build_edges(PatternType::Sequential, &ids(&["a", "b"]), None, &[50, 50]);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn hierarchical_peers_only_among_workers() {
        let edges = build_edges(
            PatternType::Hierarchical,
            &ids(&["lead", "dev1", "dev2", "qa"]),
            Some("lead"),
            &[10, 60, 60, 30],
        );
        // delegate x3 + 1 worker pair (dev1-dev2) + report x3
        let bidir: Vec<_> = edges.iter().filter(|e| e.kind == EdgeKind::Bidirectional).collect();
        assert_eq!(bidir.len(), 1);
        assert_eq!(bidir[0].from, "dev1");
        assert_eq!(bidir[0].to, "dev2");
        assert_eq!(edges.iter().filter(|e| e.kind == EdgeKind::Delegate).count(), 3);
        assert_eq!(edges.iter().filter(|e| e.kind == EdgeKind::Report).count(), 3);
    }

    #[test]
    fn loop_is_forward_plus_feedback() {
        let edges = build_edges(PatternType::Loop, &ids(&["dev", "qa"]), None, &[60, 30]);
        assert_eq!(edges, vec![
            EdgeDef::new("dev", "qa", EdgeKind::Sequential),
            EdgeDef::new("qa", "dev", EdgeKind::Feedback),
        ]);
    }

    #[test]
    fn aggregator_defaults_to_last() {
        let edges = build_edges(PatternType::Aggregator, &ids(&["a", "b", "agg"]), None, &[50, 50, 50]);
        assert!(edges.iter().any(|e| e.kind == EdgeKind::Aggregate && e.to == "agg"));
    }

    #[test]
    fn single_agent_has_no_edges() {
        assert!(build_edges(PatternType::Sequential, &ids(&["solo"]), None, &[50]).is_empty());
    }
}
