use proptest::prelude::*;
use tm_model::{AttackEdge, AttackNode, AttackNodeKind, AttackTree, ModelError};

const CHILD_KINDS: [AttackNodeKind; 4] = [
    AttackNodeKind::AndGate,
    AttackNodeKind::OrGate,
    AttackNodeKind::AttackVector,
    AttackNodeKind::Countermeasure,
];

fn may_parent(parent: AttackNodeKind, child: AttackNodeKind) -> bool {
    parent.is_capability()
        || (parent == AttackNodeKind::AttackVector && child == AttackNodeKind::Countermeasure)
}

/// Well-formed trees: one root, every other node hung off an eligible parent
fn well_formed_tree() -> impl Strategy<Value = AttackTree> {
    prop::collection::vec((0..CHILD_KINDS.len(), any::<usize>(), -500.0..500.0f64), 0..24)
        .prop_map(|specs| {
            let mut tree = AttackTree::new().with_node(AttackNode::new(
                "n0",
                AttackNodeKind::RootGoal,
                "Objective",
            ));
            for (i, (kind, parent_pick, x)) in specs.into_iter().enumerate() {
                let kind = CHILD_KINDS[kind];
                let parents: Vec<String> = tree
                    .nodes
                    .iter()
                    .filter(|n| may_parent(n.kind, kind))
                    .map(|n| n.id.clone())
                    .collect();
                let parent = parents[parent_pick % parents.len()].clone();
                let id = format!("n{}", i + 1);
                tree = tree
                    .with_node(AttackNode::new(id.as_str(), kind, format!("step {}", i + 1)).at(x, 0.0))
                    .with_edge(AttackEdge::new(format!("e{}", i + 1), parent, id));
            }
            tree
        })
}

proptest! {
    #[test]
    fn prop_well_formed_trees_validate(tree in well_formed_tree()) {
        prop_assert_eq!(tree.validate(), Ok(()));
    }

    #[test]
    fn prop_persisted_form_still_validates(tree in well_formed_tree()) {
        let reloaded = AttackTree::from(tree.to_persisted());

        prop_assert_eq!(reloaded.validate(), Ok(()));
        prop_assert_eq!(reloaded.to_persisted(), tree.to_persisted());
    }

    #[test]
    fn prop_edge_to_missing_node_is_dangling(tree in well_formed_tree()) {
        let tree = tree.with_edge(AttackEdge::new("stray", "n0", "missing"));

        prop_assert_eq!(
            tree.validate(),
            Err(ModelError::DanglingEdge {
                edge: "stray".to_string(),
                node: "missing".to_string(),
            })
        );
    }
}
