//! C6: the per-CPU logical metadata log and its dependency-closure walk.
//!
//! Grounded in the `mfs_operation_*` family and `mfs_interface`'s
//! dependency tracking in `scalefs.hh` (worked from spec.md §4.3/§4.6,
//! since `scalefs.hh` was not part of the retrieved source). Real TSC
//! (`rdtsc`) ordering is replaced by a single global monotonic counter —
//! [`Clock`] — since this crate has no per-core hardware timestamp and no
//! scheduler pinning threads to cores; a global counter gives the same
//! "every op carries a totally-ordered stamp" guarantee spec.md §3 asks
//! for without synchronized per-core clocks.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::lock::Spinlock;
use crate::mnode::InumberType;
use crate::param::NCPU;

/// Mints the totally-ordered stamps `LogicalOp`s are pushed with.
#[derive(Default)]
pub struct Clock(AtomicU64);

impl Clock {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }
}

/// One pending metadata operation, stamped with the TSC at push time
/// (spec.md §4.6).
#[derive(Clone)]
pub enum LogicalOp {
    Create {
        tsc: u64,
        mnode: u64,
        parent: u64,
        name: alloc::string::String,
        mnode_type: InumberType,
    },
    Link {
        tsc: u64,
        mnode: u64,
        parent: u64,
        name: alloc::string::String,
        mnode_type: InumberType,
    },
    Unlink {
        tsc: u64,
        mnode: u64,
        parent: u64,
        name: alloc::string::String,
    },
    Delete {
        tsc: u64,
        mnode: u64,
    },
    Rename {
        tsc: u64,
        mnode: u64,
        parent: u64,
        name: alloc::string::String,
        new_parent: u64,
        newname: alloc::string::String,
        mnode_type: InumberType,
    },
}

impl LogicalOp {
    pub fn tsc(&self) -> u64 {
        match self {
            LogicalOp::Create { tsc, .. }
            | LogicalOp::Link { tsc, .. }
            | LogicalOp::Unlink { tsc, .. }
            | LogicalOp::Delete { tsc, .. }
            | LogicalOp::Rename { tsc, .. } => *tsc,
        }
    }

    /// The mnode this op is principally about.
    pub fn target(&self) -> u64 {
        match self {
            LogicalOp::Create { mnode, .. }
            | LogicalOp::Link { mnode, .. }
            | LogicalOp::Unlink { mnode, .. }
            | LogicalOp::Delete { mnode, .. }
            | LogicalOp::Rename { mnode, .. } => *mnode,
        }
    }

    /// Other mnodes this op touches (directories it adds/removes a name
    /// from or to).
    pub fn related(&self) -> Vec<u64> {
        match self {
            LogicalOp::Create { parent, .. } | LogicalOp::Link { parent, .. } | LogicalOp::Unlink { parent, .. } => {
                alloc::vec![*parent]
            }
            LogicalOp::Delete { .. } => Vec::new(),
            LogicalOp::Rename {
                parent, new_parent, ..
            } => alloc::vec![*parent, *new_parent],
        }
    }

    /// `check_dependency`/`check_parent_dependency` (spec.md §4.3) folded
    /// into one predicate: does this op belong in the closure given the
    /// mnodes already known to be in it? If so, which new mnodes does
    /// including it pull in?
    fn relevant_additions(&self, seed: &alloc::collections::BTreeSet<u64>) -> Option<Vec<u64>> {
        let target_in = seed.contains(&self.target());
        let related = self.related();
        let parent_in = related.iter().any(|m| seed.contains(m));
        if target_in || parent_in {
            let mut additions = related;
            additions.push(self.target());
            Some(additions)
        } else {
            None
        }
    }
}

/// Per-CPU append-only logs of pending metadata operations.
pub struct LogicalLog {
    logs: [Spinlock<Vec<LogicalOp>>; NCPU],
    clock: Clock,
}

impl LogicalLog {
    pub fn new() -> Self {
        Self {
            logs: core::array::from_fn(|_| Spinlock::new("logical_log.cpu", Vec::new())),
            clock: Clock::new(),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn push(&self, cpu: usize, op: LogicalOp) {
        self.logs[cpu].lock().push(op);
    }

    /// Computes the transitive closure of ops (timestamp `<= t_fsync`)
    /// that must be applied to make `inum` durable, following spec.md
    /// §4.3's fixed-point walk, then removes exactly those ops from the
    /// per-CPU logs they came from and returns them in timestamp order.
    pub fn drain_dependency_closure(&self, inum: u64, t_fsync: u64) -> Vec<LogicalOp> {
        let mut all_ops: BTreeMap<u64, LogicalOp> = BTreeMap::new();
        for log in self.logs.iter() {
            let guard = log.lock();
            for op in guard.iter() {
                if op.tsc() <= t_fsync {
                    all_ops.insert(op.tsc(), op.clone());
                }
            }
        }

        let mut seed: alloc::collections::BTreeSet<u64> = alloc::collections::BTreeSet::new();
        seed.insert(inum);
        let mut included: alloc::collections::BTreeSet<u64> = alloc::collections::BTreeSet::new();

        loop {
            let mut changed = false;
            for (&tsc, op) in all_ops.iter() {
                if included.contains(&tsc) {
                    continue;
                }
                if let Some(additions) = op.relevant_additions(&seed) {
                    included.insert(tsc);
                    for m in additions {
                        if seed.insert(m) {
                            changed = true;
                        }
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for log in self.logs.iter() {
            let mut guard = log.lock();
            guard.retain(|op| !included.contains(&op.tsc()));
        }

        let mut result: Vec<LogicalOp> = included
            .iter()
            .filter_map(|tsc| all_ops.get(tsc).cloned())
            .collect();
        result.sort_by_key(|op| op.tsc());
        result
    }

    /// Drains every op with timestamp `<= max_ts` regardless of
    /// dependency, for `sync_all()`.
    pub fn drain_all_up_to(&self, max_ts: u64) -> Vec<LogicalOp> {
        let mut all: Vec<LogicalOp> = Vec::new();
        for log in self.logs.iter() {
            let mut guard = log.lock();
            let (keep, drained): (Vec<_>, Vec<_>) = guard.drain(..).partition(|op| op.tsc() > max_ts);
            *guard = keep;
            all.extend(drained);
        }
        all.sort_by_key(|op| op.tsc());
        all
    }
}

impl Default for LogicalLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Absorbs cancelling op pairs before a closure is applied: a `Delete`
/// that follows a matching `Create` for the same mnode, or a `Link`
/// followed by `Unlink` under the same parent (spec.md §4.3). Indexed by
/// `mnode -> last {create, link} index`, mirroring `prune_trans_log`.
pub fn prune(ops: &mut Vec<LogicalOp>) {
    let mut create_idx: BTreeMap<u64, usize> = BTreeMap::new();
    let mut link_idx: BTreeMap<(u64, u64), usize> = BTreeMap::new();
    let mut remove = alloc::vec![false; ops.len()];

    for (i, op) in ops.iter().enumerate() {
        match op {
            LogicalOp::Create { mnode, .. } => {
                create_idx.insert(*mnode, i);
            }
            LogicalOp::Delete { mnode } => {
                if let Some(ci) = create_idx.remove(mnode) {
                    remove[ci] = true;
                    remove[i] = true;
                }
            }
            LogicalOp::Link { mnode, parent, .. } => {
                link_idx.insert((*mnode, *parent), i);
            }
            LogicalOp::Unlink { mnode, parent, .. } => {
                if let Some(li) = link_idx.remove(&(*mnode, *parent)) {
                    remove[li] = true;
                    remove[i] = true;
                }
            }
            LogicalOp::Rename { .. } => {}
        }
    }

    let mut kept = Vec::with_capacity(ops.len());
    for (i, op) in ops.drain(..).enumerate() {
        if !remove[i] {
            kept.push(op);
        }
    }
    *ops = kept;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(tsc: u64, mnode: u64, parent: u64) -> LogicalOp {
        LogicalOp::Create {
            tsc,
            mnode,
            parent,
            name: alloc::string::String::from("f"),
            mnode_type: InumberType::File,
        }
    }

    #[test]
    fn dependency_closure_pulls_in_parent_directory() {
        let log = LogicalLog::new();
        log.push(0, create(1, 100, 1));
        let closure = log.drain_dependency_closure(100, 1);
        assert_eq!(closure.len(), 1);
        assert_eq!(closure[0].target(), 100);
    }

    #[test]
    fn prune_absorbs_create_delete_pair() {
        let mut ops = alloc::vec![
            create(1, 100, 1),
            LogicalOp::Delete { tsc: 2, mnode: 100 },
        ];
        prune(&mut ops);
        assert!(ops.is_empty());
    }

    #[test]
    fn prune_absorbs_link_unlink_pair() {
        let mut ops = alloc::vec![
            LogicalOp::Link {
                tsc: 1,
                mnode: 100,
                parent: 1,
                name: alloc::string::String::from("x"),
                mnode_type: InumberType::File,
            },
            LogicalOp::Unlink {
                tsc: 2,
                mnode: 100,
                parent: 1,
                name: alloc::string::String::from("x"),
            },
        ];
        prune(&mut ops);
        assert!(ops.is_empty());
    }

    #[test]
    fn prune_leaves_unrelated_ops_alone() {
        let mut ops = alloc::vec![create(1, 100, 1), create(2, 200, 1)];
        prune(&mut ops);
        assert_eq!(ops.len(), 2);
    }
}
