//! The built-in partitioner: an alternating N-then-M branch selector (§4.6).
//!
//! A partitioner sends the first `n` packets it sees down branch 0, the next `m` down branch 1,
//! then repeats. It is a node like any other [`crate::segment::FuncNode`] — the alternation lives
//! entirely in its [`PartitionContext`], so cloning the owning segment for a new scheduler worker
//! just clones this context, and the new clone starts its own independent N/M cycle.

use crate::segment::ScalarFn;
use std::sync::Arc;

/// Per-instance state for a partitioner node. `Clone` makes it eligible for
/// [`crate::context::CloneableContext`] through the blanket impl.
#[derive(Debug, Clone, Copy)]
pub struct PartitionContext {
    n: u32,
    m: u32,
    on_first_branch: bool,
    remaining_in_run: u32,
}

impl PartitionContext {
    /// Builds a context that alternates `n` packets to branch 0 and `m` to branch 1.
    ///
    /// `n == 0` or `m == 0` is accepted (one branch is simply starved forever) but logged, since
    /// it is almost always a configuration mistake rather than an intentional one-way filter.
    pub fn new(n: u32, m: u32) -> Self {
        if n == 0 || m == 0 {
            log::warn!("partitioner built with n={n} m={m}; one branch will never receive packets");
        }
        let on_first_branch = n > 0;
        PartitionContext {
            n,
            m,
            on_first_branch,
            remaining_in_run: n,
        }
    }

    /// Advances the alternation by one packet and returns which branch it belongs to (0 or 1).
    fn advance(&mut self) -> usize {
        if self.n == 0 {
            return 1;
        }
        if self.m == 0 {
            return 0;
        }

        if self.remaining_in_run == 0 {
            self.on_first_branch = !self.on_first_branch;
            self.remaining_in_run = if self.on_first_branch { self.n } else { self.m };
        }
        self.remaining_in_run -= 1;
        if self.on_first_branch {
            0
        } else {
            1
        }
    }
}

/// Builds the scalar callable a partitioner node installs: downcasts its context back to
/// [`PartitionContext`] and advances it.
pub fn scalar_partition_fn() -> ScalarFn {
    Arc::new(|_mbuf, ctx| {
        let ctx = ctx.expect("partitioner node requires a PartitionContext");
        let partition = ctx
            .as_any_mut()
            .downcast_mut::<PartitionContext>()
            .expect("partitioner node context must be a PartitionContext");
        partition.advance()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates_in_configured_ratio() {
        let mut ctx = PartitionContext::new(3, 7);
        let mut branch0 = 0;
        let mut branch1 = 0;
        for _ in 0..100 {
            if ctx.advance() == 0 {
                branch0 += 1;
            } else {
                branch1 += 1;
            }
        }
        // 10 full cycles of 3:7 plus whatever partial cycle the 100th packet lands in.
        assert_eq!(branch0, 30);
        assert_eq!(branch1, 70);
    }

    #[test]
    fn zero_n_starves_branch_zero() {
        let mut ctx = PartitionContext::new(0, 5);
        for _ in 0..20 {
            assert_eq!(ctx.advance(), 1);
        }
    }

    #[test]
    fn zero_m_starves_branch_one() {
        let mut ctx = PartitionContext::new(5, 0);
        for _ in 0..20 {
            assert_eq!(ctx.advance(), 0);
        }
    }

    #[test]
    fn clone_keeps_its_own_state_independent_of_the_original() {
        let mut original = PartitionContext::new(2, 2);
        assert_eq!(original.advance(), 0);
        let mut cloned = original.clone();

        // Drive `original` through the rest of its cycle; `cloned` must not see any of it.
        assert_eq!(original.advance(), 0);
        assert_eq!(original.advance(), 1);
        assert_eq!(original.advance(), 1);
        assert_eq!(original.advance(), 0);

        // `cloned` resumes from the point it was copied, not from `original`'s current state.
        assert_eq!(cloned.advance(), 0);
    }
}
