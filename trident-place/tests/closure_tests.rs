//! Closure index integration tests

mod helpers;

use helpers::*;
use trident_common::db::{MemberId, Position};
use trident_place::PlacementEngine;

#[tokio::test]
async fn test_child_count_and_occupied_positions() {
    let (_temp, gateway) = create_test_gateway().await;
    let engine = PlacementEngine::new(gateway.clone());
    let closure = engine.closure();
    let root = add_root(&*gateway, "wallet-root", 1).await;

    assert_eq!(closure.child_count(root).await.unwrap(), 0);
    assert!(closure.occupied_positions(root).await.unwrap().is_empty());

    add_and_place(&engine, &*gateway, root, "wallet-a", 2).await;
    add_and_place(&engine, &*gateway, root, "wallet-b", 3).await;

    assert_eq!(closure.child_count(root).await.unwrap(), 2);
    let occupied = closure.occupied_positions(root).await.unwrap();
    assert_eq!(occupied, vec![Position::new(1).unwrap(), Position::new(2).unwrap()]);
}

#[tokio::test]
async fn test_frontier_excludes_full_nodes_and_orders_by_depth() {
    let (_temp, gateway) = create_test_gateway().await;
    let engine = PlacementEngine::new(gateway.clone());
    let closure = engine.closure();
    let root = add_root(&*gateway, "wallet-root", 1).await;

    // Root alone is its own frontier
    let frontier = closure.subtree_frontier(root).await.unwrap();
    assert_eq!(frontier.len(), 1);
    assert_eq!(frontier[0].node_id, root);
    assert_eq!(frontier[0].depth, 0);

    let mut placed = Vec::new();
    for n in 1..=4 {
        let (id, _) = add_and_place(&engine, &*gateway, root, &format!("wallet-{n}"), n + 1).await;
        placed.push(id);
    }

    // Root is full; its three children are free, the first with one child
    let frontier = closure.subtree_frontier(root).await.unwrap();
    let nodes: Vec<(MemberId, i64, i64)> = frontier.iter().map(|n| (n.node_id, n.depth, n.child_count)).collect();
    assert_eq!(
        nodes,
        vec![
            (placed[0], 1, 1),
            (placed[1], 1, 0),
            (placed[2], 1, 0),
            (placed[3], 2, 0),
        ]
    );

    let next = closure.next_free_node(root).await.unwrap().unwrap();
    assert_eq!(next.node_id, placed[0]);

    // Scoped to a subtree, depths are relative to its root
    let sub = closure.subtree_frontier(placed[0]).await.unwrap();
    let nodes: Vec<(MemberId, i64)> = sub.iter().map(|n| (n.node_id, n.depth)).collect();
    assert_eq!(nodes, vec![(placed[0], 0), (placed[3], 1)]);
}

#[tokio::test]
async fn test_unknown_node_has_no_frontier() {
    let (_temp, gateway) = create_test_gateway().await;
    let engine = PlacementEngine::new(gateway.clone());

    assert!(engine.closure().next_free_node(MemberId(42)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_verify_detects_tampered_index() {
    let (_temp, gateway) = create_test_gateway().await;
    let engine = PlacementEngine::new(gateway.clone());
    let root = add_root(&*gateway, "wallet-root", 1).await;
    let (a, _) = add_and_place(&engine, &*gateway, root, "wallet-a", 2).await;
    let (b, _) = add_and_place(&engine, &*gateway, a, "wallet-b", 3).await;

    assert!(engine.closure().verify().await.unwrap().is_consistent());

    sqlx::query("DELETE FROM member_closure WHERE ancestor_id = ? AND descendant_id = ?")
        .bind(root.0)
        .bind(b.0)
        .execute(gateway.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE member_closure SET depth = 5 WHERE ancestor_id = ? AND descendant_id = ?")
        .bind(a.0)
        .bind(b.0)
        .execute(gateway.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO member_closure (ancestor_id, descendant_id, depth) VALUES (?, ?, 1)")
        .bind(b.0)
        .bind(a.0)
        .execute(gateway.pool())
        .await
        .unwrap();

    let report = engine.closure().verify().await.unwrap();
    assert!(!report.is_consistent());
    assert!(report.missing.iter().any(|e| e.ancestor_id == root && e.descendant_id == b && e.depth == 2));
    assert!(report.unexpected.iter().any(|e| e.ancestor_id == b && e.descendant_id == a));
    assert!(report
        .wrong_depth
        .iter()
        .any(|m| m.ancestor_id == a && m.descendant_id == b && m.expected == 1 && m.actual == 5));
}
