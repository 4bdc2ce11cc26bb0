//! Pose composition over the agent tree.
//!
//! Every agent's pose is stored relative to its parent.  [`global_pose`]
//! walks the parent chain up to the root and composes the poses on the way
//! back down, so the result is always derived from the current tree and never
//! cached.
//!
//! Each intermediate composition is checked: a non-finite component is
//! reported as [`SimError::NonFinitePose`] instead of being handed to the
//! spatial index.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use arena_spatial::transform::{Frame, FrameTree, global_pose};
//! use arena_types::{AgentId, Pose};
//!
//! struct Tree(HashMap<AgentId, Frame>);
//!
//! impl FrameTree for Tree {
//!     fn frame(&self, id: AgentId) -> Option<Frame> {
//!         self.0.get(&id).copied()
//!     }
//! }
//!
//! let robot = AgentId::new(0, 0);
//! let laser = AgentId::new(1, 0);
//! let mut frames = HashMap::new();
//! frames.insert(robot, Frame { parent: None, pose: Pose::new(1.0, 0.0, 0.0) });
//! frames.insert(laser, Frame { parent: Some(robot), pose: Pose::new(0.5, 0.0, 0.0) });
//!
//! let g = global_pose(&Tree(frames), laser).unwrap();
//! assert!((g.x - 1.5).abs() < 1e-9);
//! ```

use arena_types::{AgentId, Pose, SimError};
use tracing::warn;

/// Parent chains deeper than this are treated as cyclic.
const MAX_DEPTH: usize = 256;

// ────────────────────────────────────────────────────────────────────────────
// FrameTree
// ────────────────────────────────────────────────────────────────────────────

/// One node of the agent tree: a pose relative to `parent` (or the world
/// root when `parent` is `None`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub parent: Option<AgentId>,
    pub pose: Pose,
}

/// Anything that can resolve an agent handle to its [`Frame`].
pub trait FrameTree {
    /// Return the frame of `id`, or `None` when `id` is not a live agent.
    fn frame(&self, id: AgentId) -> Option<Frame>;
}

// ────────────────────────────────────────────────────────────────────────────
// Composition
// ────────────────────────────────────────────────────────────────────────────

/// Compute the pose of `id` in the world frame:
/// `global_pose(parent) ⊕ local_pose`, with the root at identity.
///
/// # Errors
///
/// - [`SimError::UnknownAgent`] when `id` or an ancestor cannot be resolved.
/// - [`SimError::NonFinitePose`] when any composition step yields NaN/∞.
/// - [`SimError::InvalidConfig`] when the parent chain loops.
pub fn global_pose<T: FrameTree + ?Sized>(tree: &T, id: AgentId) -> Result<Pose, SimError> {
    compose_up(tree, id, MAX_DEPTH)
}

fn compose_up<T: FrameTree + ?Sized>(
    tree: &T,
    id: AgentId,
    depth: usize,
) -> Result<Pose, SimError> {
    if depth == 0 {
        return Err(SimError::InvalidConfig(format!(
            "parent chain of {id} is cyclic or deeper than {MAX_DEPTH}"
        )));
    }
    let frame = tree.frame(id).ok_or(SimError::UnknownAgent(id))?;
    let origin = match frame.parent {
        Some(parent) => compose_up(tree, parent, depth - 1)?,
        None => Pose::identity(),
    };
    checked_compose(origin, frame.pose, &id.to_string())
}

/// `origin ⊕ local`, rejecting a non-finite result.
pub fn checked_compose(origin: Pose, local: Pose, context: &str) -> Result<Pose, SimError> {
    let composed = origin.compose(local);
    if composed.is_finite() {
        Ok(composed)
    } else {
        warn!(context, ?origin, ?local, "pose composition produced a non-finite pose");
        Err(SimError::NonFinitePose {
            context: context.to_string(),
            x: composed.x,
            y: composed.y,
            a: composed.a,
        })
    }
}

/// World pose of something mounted at `mount` on agent `id` (e.g. a sensor).
pub fn mounted_pose<T: FrameTree + ?Sized>(
    tree: &T,
    id: AgentId,
    mount: Pose,
) -> Result<Pose, SimError> {
    let base = global_pose(tree, id)?;
    checked_compose(base, mount, &id.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Tree relations
// ────────────────────────────────────────────────────────────────────────────

/// True when `ancestor` appears on the parent chain of `id` (excluding `id`
/// itself).  Unknown handles have no ancestors.
pub fn is_ancestor<T: FrameTree + ?Sized>(tree: &T, ancestor: AgentId, id: AgentId) -> bool {
    let mut current = tree.frame(id).and_then(|f| f.parent);
    let mut depth = 0;
    while let Some(p) = current {
        if p == ancestor {
            return true;
        }
        depth += 1;
        if depth >= MAX_DEPTH {
            return false;
        }
        current = tree.frame(p).and_then(|f| f.parent);
    }
    false
}

/// True when `a` and `b` are the same agent, or one is an ancestor of the
/// other.  Ray casts never report a related agent as a hit.
pub fn is_related<T: FrameTree + ?Sized>(tree: &T, a: AgentId, b: AgentId) -> bool {
    a == b || is_ancestor(tree, a, b) || is_ancestor(tree, b, a)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[derive(Default)]
    struct TestTree(HashMap<AgentId, Frame>);

    impl TestTree {
        fn add(&mut self, index: u32, parent: Option<u32>, pose: Pose) -> AgentId {
            let id = AgentId::new(index, 0);
            self.0.insert(
                id,
                Frame {
                    parent: parent.map(|p| AgentId::new(p, 0)),
                    pose,
                },
            );
            id
        }
    }

    impl FrameTree for TestTree {
        fn frame(&self, id: AgentId) -> Option<Frame> {
            self.0.get(&id).copied()
        }
    }

    // ── global_pose ─────────────────────────────────────────────────────────

    #[test]
    fn root_global_pose_is_its_local_pose() {
        let mut tree = TestTree::default();
        let root = tree.add(0, None, Pose::new(2.0, 3.0, 0.5));
        let g = global_pose(&tree, root).unwrap();
        assert!((g.x - 2.0).abs() < 1e-9);
        assert!((g.y - 3.0).abs() < 1e-9);
        assert!((g.a - 0.5).abs() < 1e-9);
    }

    #[test]
    fn chain_respects_parent_heading() {
        // base at origin facing +y; arm 1 m forward of base; gripper 1 m
        // forward of arm and turned a further 90°.
        let mut tree = TestTree::default();
        tree.add(0, None, Pose::new(0.0, 0.0, FRAC_PI_2));
        tree.add(1, Some(0), Pose::new(1.0, 0.0, 0.0));
        let gripper = tree.add(2, Some(1), Pose::new(1.0, 0.0, FRAC_PI_2));

        let g = global_pose(&tree, gripper).unwrap();
        assert!(g.x.abs() < 1e-9, "x={}", g.x);
        assert!((g.y - 2.0).abs() < 1e-9, "y={}", g.y);
        assert!((g.a - PI).abs() < 1e-9, "a={}", g.a);
    }

    #[test]
    fn heading_is_normalized() {
        let mut tree = TestTree::default();
        tree.add(0, None, Pose::new(0.0, 0.0, 3.0));
        let child = tree.add(1, Some(0), Pose::new(0.0, 0.0, 3.0));
        let g = global_pose(&tree, child).unwrap();
        assert!(g.a > -PI && g.a <= PI, "a={}", g.a);
        assert!((g.a - (6.0 - 2.0 * PI)).abs() < 1e-9);
    }

    #[test]
    fn unknown_agent_is_an_error() {
        let tree = TestTree::default();
        let err = global_pose(&tree, AgentId::new(9, 0)).unwrap_err();
        assert_eq!(err, SimError::UnknownAgent(AgentId::new(9, 0)));
    }

    #[test]
    fn non_finite_pose_is_rejected() {
        let mut tree = TestTree::default();
        tree.add(0, None, Pose::new(f64::INFINITY, 0.0, 0.0));
        let child = tree.add(1, Some(0), Pose::new(1.0, 0.0, 0.0));
        assert!(matches!(
            global_pose(&tree, child),
            Err(SimError::NonFinitePose { .. })
        ));
    }

    #[test]
    fn cyclic_chain_terminates_with_error() {
        let mut tree = TestTree::default();
        let a = tree.add(0, Some(1), Pose::identity());
        tree.add(1, Some(0), Pose::identity());
        assert!(matches!(
            global_pose(&tree, a),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn mounted_pose_offsets_from_owner() {
        let mut tree = TestTree::default();
        let robot = tree.add(0, None, Pose::new(1.0, 1.0, FRAC_PI_2));
        let g = mounted_pose(&tree, robot, Pose::new(0.2, 0.0, 0.0)).unwrap();
        assert!((g.x - 1.0).abs() < 1e-9);
        assert!((g.y - 1.2).abs() < 1e-9);
    }

    // ── relations ───────────────────────────────────────────────────────────

    #[test]
    fn relations_cover_self_ancestors_and_descendants() {
        let mut tree = TestTree::default();
        let root = tree.add(0, None, Pose::identity());
        let child = tree.add(1, Some(0), Pose::identity());
        let grandchild = tree.add(2, Some(1), Pose::identity());
        let stranger = tree.add(3, None, Pose::identity());

        assert!(is_ancestor(&tree, root, grandchild));
        assert!(!is_ancestor(&tree, grandchild, root));
        assert!(is_related(&tree, child, child));
        assert!(is_related(&tree, root, grandchild));
        assert!(is_related(&tree, grandchild, root));
        assert!(!is_related(&tree, stranger, child));
    }
}
