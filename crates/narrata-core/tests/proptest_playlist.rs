//! Property-based tests for playlist validation and navigation.
//!
//! Random block trees are flattened into indentation-annotated command
//! lists; navigation over the flat list must match a preorder walk of the
//! tree.

use std::collections::HashMap;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use narrata_core::command::{Command, CommandKind, Lane};
use narrata_core::error::StructuralError;
use narrata_core::expr::{Expr, Value};
use narrata_core::hosts::{Loop, NavContext};
use narrata_core::playlist::Playlist;
use narrata_core::variables::AssignOp;

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf,
    /// `group` block: body always plays.
    Group(Vec<Node>),
    /// `while false` block: body never plays.
    Skipped(Vec<Node>),
}

fn arb_tree() -> impl Strategy<Value = Vec<Node>> {
    let leaf = Just(Node::Leaf);
    let node = leaf.prop_recursive(4, 48, 5, |inner| {
        prop_oneof![
            2 => Just(Node::Leaf),
            2 => prop::collection::vec(inner.clone(), 1..5).prop_map(Node::Group),
            1 => prop::collection::vec(inner, 1..5).prop_map(Node::Skipped),
        ]
    });
    prop::collection::vec(node, 1..8)
}

/// Flatten `nodes` and record the indices a walk should visit.
fn flatten(nodes: &[Node], indent: u16, visible: bool, out: &mut Vec<Command>, expected: &mut Vec<usize>) {
    for node in nodes {
        let index = out.len();
        let line = index as u32;
        if visible {
            expected.push(index);
        }
        match node {
            Node::Leaf => {
                out.push(Command::new(
                    "p",
                    line,
                    indent,
                    CommandKind::set("x", AssignOp::Add, Expr::num(1.0)),
                ));
            }
            Node::Group(children) => {
                out.push(Command::new("p", line, indent, CommandKind::Group));
                flatten(children, indent + 1, visible, out, expected);
            }
            Node::Skipped(children) => {
                out.push(Command::new(
                    "p",
                    line,
                    indent,
                    CommandKind::While(Loop {
                        cond: Expr::boolean(false),
                    }),
                ));
                flatten(children, indent + 1, false, out, expected);
            }
        }
    }
}

fn build(nodes: &[Node]) -> (Vec<Command>, Vec<usize>) {
    let mut commands = Vec::new();
    let mut expected = Vec::new();
    flatten(nodes, 0, true, &mut commands, &mut expected);
    (commands, expected)
}

fn walk(playlist: &Playlist) -> Vec<usize> {
    let scope: HashMap<String, Value> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(11);
    let mut nav = NavContext::new(&scope, &mut rng, Lane::Main);
    let mut visited = Vec::new();
    let mut index = 0;
    while index < playlist.len() && visited.len() <= playlist.len() {
        visited.push(index);
        index = playlist.move_at(index, &mut nav).unwrap();
    }
    visited
}

// =============================================================================
// Validation
// =============================================================================

proptest! {
    #[test]
    fn well_formed_trees_validate(tree in arb_tree()) {
        let (commands, _) = build(&tree);
        prop_assert!(Playlist::new("p", commands).is_ok());
    }

    #[test]
    fn indent_jumps_are_rejected(tree in arb_tree()) {
        let (mut commands, _) = build(&tree);
        let last = commands.last().map_or(0, |c| c.indent);
        let line = commands.len() as u32;
        commands.push(Command::new("p", line, last + 2, CommandKind::Stop));
        let err = Playlist::new("p", commands).unwrap_err();
        prop_assert!(matches!(err, StructuralError::IndentJump { .. }), "got {err:?}");
    }

    #[test]
    fn host_of_every_nested_command_is_shallower(tree in arb_tree()) {
        let (commands, _) = build(&tree);
        let playlist = Playlist::new("p", commands).unwrap();
        for index in 0..playlist.len() {
            let indent = playlist.indent_at(index);
            if indent == 0 {
                prop_assert!(playlist.host_index_of(index, None).is_err());
                continue;
            }
            let host = playlist.host_index_of(index, None).unwrap();
            prop_assert!(host < index);
            prop_assert_eq!(playlist.indent_at(host) + 1, indent);
            prop_assert!(playlist.command_at(host).unwrap().is_host());
        }
    }
}

// =============================================================================
// Navigation
// =============================================================================

proptest! {
    #[test]
    fn walk_matches_preorder_of_visible_nodes(tree in arb_tree()) {
        let (commands, expected) = build(&tree);
        let playlist = Playlist::new("p", commands).unwrap();
        prop_assert_eq!(walk(&playlist), expected);
    }

    #[test]
    fn children_are_exactly_one_level_deeper(tree in arb_tree()) {
        let (commands, _) = build(&tree);
        let playlist = Playlist::new("p", commands).unwrap();
        for host in 0..playlist.len() {
            for child in playlist.children_of(host) {
                prop_assert_eq!(playlist.indent_at(child), playlist.indent_at(host) + 1);
                prop_assert_eq!(playlist.host_index_of(child, None).unwrap(), host);
            }
        }
    }

    #[test]
    fn lookups_by_spot_round_trip(tree in arb_tree()) {
        let (commands, _) = build(&tree);
        let playlist = Playlist::new("p", commands).unwrap();
        for (index, command) in playlist.commands().iter().enumerate() {
            prop_assert_eq!(playlist.index_of(&command.spot), Some(index));
            prop_assert_eq!(playlist.first_index_at_or_after_line(command.spot.line), Some(index));
        }
    }
}
