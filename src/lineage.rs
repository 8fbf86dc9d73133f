//! Strategy lineage resolution.
//!
//! Strategies form a parent-pointer tree: each row carries at most one
//! `parent_id`, children are whoever points back. The schema does not
//! structurally forbid cycles, so the upward walk carries a visited set and
//! a depth bound and fails with `CycleDetected` instead of hanging on a
//! corrupted tree.

use std::collections::HashSet;

use serde::Serialize;

use crate::db::{Database, Strategy, StrategyRef};
use crate::error::AppError;

/// Hard bound on ancestry length. Real evolution chains are a handful of
/// generations deep; anything past this is treated as corruption.
pub const MAX_LINEAGE_DEPTH: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct StrategyLineage {
    /// Root first, immediate parent last.
    pub ancestors: Vec<StrategyRef>,
    pub current: Strategy,
    /// Direct children only, creation order.
    pub children: Vec<StrategyRef>,
}

/// Resolve a strategy's ancestry path and direct children.
pub fn resolve(db: &Database, strategy_id: i64) -> Result<StrategyLineage, AppError> {
    let current = db
        .get_strategy(strategy_id)?
        .ok_or_else(|| AppError::not_found(format!("Strategy {} not found", strategy_id)))?;

    let mut ancestors: Vec<StrategyRef> = Vec::new();
    let mut visited: HashSet<i64> = HashSet::new();
    visited.insert(strategy_id);

    let mut next = current.parent_id;
    while let Some(pid) = next {
        if !visited.insert(pid) || ancestors.len() >= MAX_LINEAGE_DEPTH {
            return Err(AppError::CycleDetected(pid));
        }
        match db.get_strategy(pid)? {
            Some(anc) => {
                next = anc.parent_id;
                ancestors.insert(
                    0,
                    StrategyRef {
                        id: anc.id,
                        name: anc.name,
                        code_hash: anc.code_hash,
                        created_at: anc.created_at,
                    },
                );
            }
            // Dangling parent pointer: the path simply ends here
            None => break,
        }
    }

    let children = db.get_strategy_children(strategy_id)?;
    Ok(StrategyLineage { ancestors, current, children })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewStrategy;

    fn strategy(name: &str, parent_id: Option<i64>) -> NewStrategy {
        NewStrategy {
            name: Some(name.to_string()),
            code_hash: None,
            model: None,
            params: None,
            source_code: Some(format!("fn {}() {{}}", name)),
            summary: None,
            parent_id,
        }
    }

    #[test]
    fn test_chain_resolves_root_to_parent() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_strategy(&strategy("a", None)).unwrap();
        let b = db.insert_strategy(&strategy("b", Some(a.id))).unwrap();
        let c = db.insert_strategy(&strategy("c", Some(b.id))).unwrap();
        let d = db.insert_strategy(&strategy("d", Some(c.id))).unwrap();

        let lineage = resolve(&db, d.id).unwrap();
        let names: Vec<_> = lineage
            .ancestors
            .iter()
            .map(|s| s.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(lineage.current.id, d.id);
        assert!(lineage.children.is_empty());
    }

    #[test]
    fn test_children_direct_only_in_creation_order() {
        let db = Database::in_memory().unwrap();
        let root = db.insert_strategy(&strategy("root", None)).unwrap();
        let kid1 = db.insert_strategy(&strategy("kid1", Some(root.id))).unwrap();
        let kid2 = db.insert_strategy(&strategy("kid2", Some(root.id))).unwrap();
        // Grandchild must not show up under root
        db.insert_strategy(&strategy("grandkid", Some(kid1.id))).unwrap();

        let lineage = resolve(&db, root.id).unwrap();
        let ids: Vec<_> = lineage.children.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![kid1.id, kid2.id]);
    }

    #[test]
    fn test_cycle_detected() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_strategy(&strategy("a", None)).unwrap();
        let b = db.insert_strategy(&strategy("b", Some(a.id))).unwrap();
        db.set_strategy_parent(a.id, Some(b.id)).unwrap();

        let err = resolve(&db, a.id);
        assert!(matches!(err, Err(AppError::CycleDetected(_))));
    }

    #[test]
    fn test_self_parent_detected() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_strategy(&strategy("a", None)).unwrap();
        db.set_strategy_parent(a.id, Some(a.id)).unwrap();

        let err = resolve(&db, a.id);
        assert!(matches!(err, Err(AppError::CycleDetected(_))));
    }

    #[test]
    fn test_missing_strategy_is_not_found() {
        let db = Database::in_memory().unwrap();
        let err = resolve(&db, 999);
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_dangling_parent_ends_path() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_strategy(&strategy("a", None)).unwrap();
        db.set_strategy_parent(a.id, Some(4242)).unwrap();

        let lineage = resolve(&db, a.id).unwrap();
        assert!(lineage.ancestors.is_empty());
    }
}
