//! Incremental authentication-path traversal (Buchmann-Dahmen-Szydlo).
//!
//! A naive Merkle authentication path is recomputed from scratch on every
//! signature, which costs `O(2^tree_height)` hash evaluations. BDS keeps a
//! small amount of state between signatures (a handful of `treehash`
//! instances plus a `retain` stack of already-computed siblings) so that
//! advancing from leaf `i` to leaf `i + 1` costs `O(tree_height)` amortized
//! instead.
//!
//! This state is a pure runtime acceleration structure: it is never part of
//! the persisted secret key, and is rebuilt (see [`BdsState::setup`] and
//! [`BdsState::fast_forward`]) whenever a signing key is loaded from raw
//! bytes rather than freshly generated.

use std::collections::BTreeMap;

use crate::error::XmssResult;
use crate::hash::thash_h;
use crate::hash_address::*;
use crate::params::XmssParams;
use crate::xmss_commons::gen_leaf_wots;

/// A single incremental treehash instance, responsible for precomputing the
/// node at a fixed height `level` that will be needed as an authentication
/// path element a number of leaves in the future.
#[derive(Clone, Debug)]
struct TreeHashInst {
    /// Index of the next leaf this instance needs to absorb.
    next_idx: u64,
    /// Number of entries on the shared stack belonging to this instance.
    stack_usage: u32,
    /// Whether `node` already holds the finished result.
    completed: bool,
    /// The finished node, once `completed` is set.
    node: Vec<u8>,
}

/// Runtime BDS traversal state for a single subtree of height `tree_height`.
#[derive(Clone, Debug)]
pub(crate) struct BdsState {
    n: usize,
    tree_height: u32,
    k: u32,
    /// Shared folding stack used by `treehash_update`, flattened as
    /// `n`-byte blocks; grown on demand.
    stack: Vec<u8>,
    stack_levels: Vec<u32>,
    stack_offset: usize,
    /// Authentication path for the leaf this state is currently "ready for".
    auth: Vec<u8>,
    /// One retained sibling per odd/even `tau` transition, keyed by `tau >> 1`.
    keep: Vec<u8>,
    treehash: Vec<TreeHashInst>,
    /// Nodes at heights `>= tree_height - k` that are kept around instead of
    /// being recomputed by a treehash instance. Indexed by the same
    /// `offset + rowidx` scheme as the reference BDS description; a map
    /// avoids having to replicate its tight (and easy to get subtly wrong)
    /// capacity formula.
    retain: BTreeMap<usize, Vec<u8>>,
    /// Root of the subtree this state belongs to (fixed until the next
    /// `setup`/tree transition).
    pub(crate) root: Vec<u8>,
}

impl BdsState {
    pub(crate) fn new(n: usize, tree_height: u32, k: u32) -> Self {
        let th_count = (tree_height - k) as usize;
        Self {
            n,
            tree_height,
            k,
            stack: vec![0u8; (tree_height as usize + 1) * n],
            stack_levels: vec![0u32; tree_height as usize + 1],
            stack_offset: 0,
            auth: vec![0u8; tree_height as usize * n],
            keep: vec![0u8; (tree_height as usize / 2 + 1) * n],
            treehash: (0..th_count)
                .map(|_| TreeHashInst {
                    next_idx: 0,
                    stack_usage: 0,
                    completed: true,
                    node: vec![0u8; n],
                })
                .collect(),
            retain: BTreeMap::new(),
            root: Vec::new(),
        }
    }

    /// Builds the whole subtree from leaf 0, filling in `auth`, `treehash`
    /// and `retain` so that the state is ready to hand out the
    /// authentication path for leaf 0, and returns the subtree root.
    ///
    /// `subtree_addr` only needs its layer/tree fields set; the type and
    /// per-call fields are derived here.
    pub(crate) fn setup(
        &mut self,
        params: &XmssParams,
        sk_seed: &[u8],
        pub_seed: &[u8],
        subtree_addr: &[u32; 8],
    ) -> XmssResult<Vec<u8>> {
        let n = self.n;
        let h = self.tree_height;
        let k = self.k;

        let mut ots_addr = [0u32; 8];
        let mut ltree_addr = [0u32; 8];
        let mut node_addr = [0u32; 8];
        copy_subtree_addr(&mut ots_addr, subtree_addr);
        copy_subtree_addr(&mut ltree_addr, subtree_addr);
        copy_subtree_addr(&mut node_addr, subtree_addr);
        set_type(&mut ots_addr, XMSS_ADDR_TYPE_OTS);
        set_type(&mut ltree_addr, XMSS_ADDR_TYPE_LTREE);
        set_type(&mut node_addr, XMSS_ADDR_TYPE_HASHTREE);

        let mut stack: Vec<Vec<u8>> = Vec::with_capacity(h as usize + 1);
        let mut stack_levels: Vec<u32> = Vec::with_capacity(h as usize + 1);

        let num_leaves: u64 = 1u64 << h;
        for idx in 0..num_leaves {
            #[allow(clippy::cast_possible_truncation)]
            let idx32 = idx as u32;
            set_ltree_addr(&mut ltree_addr, idx32);
            set_ots_addr(&mut ots_addr, idx32);

            let mut leaf = vec![0u8; n];
            gen_leaf_wots(
                params,
                &mut leaf,
                sk_seed,
                pub_seed,
                &mut ltree_addr,
                &mut ots_addr,
            )?;

            if h > k && idx == 3 {
                self.treehash[0].node.copy_from_slice(&leaf);
            }

            stack.push(leaf);
            stack_levels.push(0);

            while stack.len() >= 2 && stack_levels[stack.len() - 1] == stack_levels[stack.len() - 2]
            {
                let nodeh = stack_levels[stack.len() - 1];
                let top = stack[stack.len() - 1].clone();

                if (idx >> nodeh) == 1 {
                    self.auth[nodeh as usize * n..(nodeh as usize + 1) * n].copy_from_slice(&top);
                } else if nodeh < h - k && (idx >> nodeh) == 3 {
                    self.treehash[nodeh as usize].node.copy_from_slice(&top);
                } else if nodeh >= h - k {
                    let offset = (1i64 << (h - 1 - nodeh)) + i64::from(nodeh) - i64::from(h);
                    let rowidx = ((idx as i64 >> nodeh) - 3) >> 1;
                    self.retain.insert((offset + rowidx) as usize, top);
                }

                set_tree_height(&mut node_addr, nodeh);
                #[allow(clippy::cast_possible_truncation)]
                let tree_idx = (idx >> (nodeh + 1)) as u32;
                set_tree_index(&mut node_addr, tree_idx);

                let right = stack.pop().expect("stack has >= 2 entries");
                let left_idx = stack.len() - 1;
                let mut buf = vec![0u8; 2 * n];
                buf[..n].copy_from_slice(&stack[left_idx]);
                buf[n..].copy_from_slice(&right);

                let mut parent = vec![0u8; n];
                thash_h(params, &mut parent, &buf, pub_seed, &mut node_addr)?;
                stack[left_idx] = parent;
                stack_levels[left_idx] += 1;
                stack_levels.pop();
            }
        }

        for th in &mut self.treehash {
            th.completed = true;
            th.stack_usage = 0;
        }
        self.stack_offset = 0;
        self.keep.iter_mut().for_each(|b| *b = 0);
        self.retain.retain(|_, _| h > k);

        Ok(stack.into_iter().next().expect("one leaf builds a one-node tree"))
    }

    /// Returns the authentication path that was already computed for
    /// `leaf_idx`, and advances the internal state so it is ready for
    /// `leaf_idx + 1`.
    ///
    /// Mirrors `compute_authpath_wots_fast`.
    pub(crate) fn next_auth_path(
        &mut self,
        params: &XmssParams,
        sk_seed: &[u8],
        pub_seed: &[u8],
        subtree_addr: &[u32; 8],
        leaf_idx: u32,
    ) -> XmssResult<Vec<u8>> {
        let n = self.n;
        let h = self.tree_height;
        let k = self.k;

        let authpath = self.auth.clone();

        let mut ots_addr = [0u32; 8];
        let mut ltree_addr = [0u32; 8];
        let mut node_addr = [0u32; 8];
        copy_subtree_addr(&mut ots_addr, subtree_addr);
        copy_subtree_addr(&mut ltree_addr, subtree_addr);
        copy_subtree_addr(&mut node_addr, subtree_addr);
        set_type(&mut ots_addr, XMSS_ADDR_TYPE_OTS);
        set_type(&mut ltree_addr, XMSS_ADDR_TYPE_LTREE);
        set_type(&mut node_addr, XMSS_ADDR_TYPE_HASHTREE);

        let mut tau = h;
        for i in 0..h {
            if (leaf_idx >> i) & 1 == 0 {
                tau = i;
                break;
            }
        }

        // `tau == h` means `leaf_idx` was the last leaf of this subtree (all
        // bits set): there is no `leaf_idx + 1` to prepare an auth path for,
        // so the state is left untouched. The caller (`xmssmt_core_sign`)
        // only reaches this point for an exhausted subtree when a higher
        // XMSSMT layer is about to roll over to a freshly-set-up state.
        if tau < h {
            let mut buf = vec![0u8; 2 * n];
            if tau > 0 {
                buf[..n].copy_from_slice(&self.auth[(tau as usize - 1) * n..tau as usize * n]);
                let keep_off = ((tau as usize - 1) >> 1) * n;
                buf[n..].copy_from_slice(&self.keep[keep_off..keep_off + n]);
            }
            if tau < h.saturating_sub(1) && (leaf_idx >> (tau + 1)) & 1 == 0 {
                let dst = (tau as usize >> 1) * n;
                let src = tau as usize * n;
                self.keep[dst..dst + n].copy_from_slice(&self.auth[src..src + n]);
            }

            if tau == 0 {
                set_ltree_addr(&mut ltree_addr, leaf_idx);
                set_ots_addr(&mut ots_addr, leaf_idx);
                let mut leaf = vec![0u8; n];
                gen_leaf_wots(
                    params,
                    &mut leaf,
                    sk_seed,
                    pub_seed,
                    &mut ltree_addr,
                    &mut ots_addr,
                )?;
                self.auth[..n].copy_from_slice(&leaf);
            } else {
                set_tree_height(&mut node_addr, tau - 1);
                set_tree_index(&mut node_addr, leaf_idx >> tau);
                let mut parent = vec![0u8; n];
                thash_h(params, &mut parent, &buf, pub_seed, &mut node_addr)?;
                self.auth[tau as usize * n..(tau as usize + 1) * n].copy_from_slice(&parent);

                for i in 0..tau {
                    if i < h - k {
                        let node = self.treehash[i as usize].node.clone();
                        self.auth[i as usize * n..(i as usize + 1) * n].copy_from_slice(&node);
                    } else {
                        let offset = (1i64 << (h - 1 - i)) + i64::from(i) - i64::from(h);
                        let rowidx = ((i64::from(leaf_idx) >> i) - 1) >> 1;
                        let slot = (offset + rowidx) as usize;
                        let node = self
                            .retain
                            .get(&slot)
                            .cloned()
                            .unwrap_or_else(|| vec![0u8; n]);
                        self.auth[i as usize * n..(i as usize + 1) * n].copy_from_slice(&node);
                    }
                }

                let upper = if tau < h - k { tau } else { h - k };
                for i in 0..upper {
                    let start_idx = u64::from(leaf_idx) + 1 + 3 * (1u64 << i);
                    if start_idx < (1u64 << h) {
                        self.treehash[i as usize].next_idx = start_idx;
                        self.treehash[i as usize].completed = false;
                        self.treehash[i as usize].stack_usage = 0;
                    }
                }
            }
        }

        for _ in 0..((h - k) >> 1) {
            let mut l_min = h;
            let mut level = h - k;
            for j in 0..(h - k) {
                let inst = &self.treehash[j as usize];
                let low = if inst.completed {
                    h
                } else if inst.stack_usage == 0 {
                    j
                } else {
                    self.min_height_on_stack(j as usize)
                };
                if low < l_min {
                    level = j;
                    l_min = low;
                }
            }
            if level != h - k {
                self.treehash_update(level as usize, params, sk_seed, pub_seed, subtree_addr)?;
            }
        }

        Ok(authpath)
    }

    /// Replays the traversal from leaf 0 up to (but not including)
    /// `target_leaf`, discarding the intermediate authentication paths.
    ///
    /// Used once, when a signing key is loaded from raw bytes with a
    /// non-zero index: the BDS state is not part of the persisted secret
    /// key, so it must be walked back up to the current position before
    /// incremental signing can resume.
    pub(crate) fn fast_forward(
        &mut self,
        params: &XmssParams,
        sk_seed: &[u8],
        pub_seed: &[u8],
        subtree_addr: &[u32; 8],
        target_leaf: u32,
    ) -> XmssResult<()> {
        for leaf in 0..target_leaf {
            self.next_auth_path(params, sk_seed, pub_seed, subtree_addr, leaf)?;
        }
        Ok(())
    }

    fn min_height_on_stack(&self, level: usize) -> u32 {
        let mut r = self.tree_height;
        let usage = self.treehash[level].stack_usage as usize;
        for i in 0..usage {
            let v = self.stack_levels[self.stack_offset - i - 1];
            if v < r {
                r = v;
            }
        }
        r
    }

    fn treehash_update(
        &mut self,
        level: usize,
        params: &XmssParams,
        sk_seed: &[u8],
        pub_seed: &[u8],
        subtree_addr: &[u32; 8],
    ) -> XmssResult<()> {
        let n = self.n;

        let mut ots_addr = [0u32; 8];
        let mut ltree_addr = [0u32; 8];
        let mut node_addr = [0u32; 8];
        copy_subtree_addr(&mut ots_addr, subtree_addr);
        copy_subtree_addr(&mut ltree_addr, subtree_addr);
        copy_subtree_addr(&mut node_addr, subtree_addr);
        set_type(&mut ots_addr, XMSS_ADDR_TYPE_OTS);
        set_type(&mut ltree_addr, XMSS_ADDR_TYPE_LTREE);
        set_type(&mut node_addr, XMSS_ADDR_TYPE_HASHTREE);

        let next_idx = self.treehash[level].next_idx;
        #[allow(clippy::cast_possible_truncation)]
        let next_idx32 = next_idx as u32;
        set_ltree_addr(&mut ltree_addr, next_idx32);
        set_ots_addr(&mut ots_addr, next_idx32);

        let mut node = vec![0u8; n];
        gen_leaf_wots(
            params,
            &mut node,
            sk_seed,
            pub_seed,
            &mut ltree_addr,
            &mut ots_addr,
        )?;

        let mut node_height: u32 = 0;
        while self.treehash[level].stack_usage > 0
            && self.stack_levels[self.stack_offset - 1] == node_height
        {
            let mut buf = vec![0u8; 2 * n];
            buf[..n].copy_from_slice(&self.stack[(self.stack_offset - 1) * n..self.stack_offset * n]);
            buf[n..].copy_from_slice(&node);

            set_tree_height(&mut node_addr, node_height);
            #[allow(clippy::cast_possible_truncation)]
            let tree_idx = (next_idx >> (node_height + 1)) as u32;
            set_tree_index(&mut node_addr, tree_idx);

            let mut parent = vec![0u8; n];
            thash_h(params, &mut parent, &buf, pub_seed, &mut node_addr)?;
            node = parent;
            node_height += 1;
            self.treehash[level].stack_usage -= 1;
            self.stack_offset -= 1;
        }

        #[allow(clippy::cast_possible_truncation)]
        let level_height = level as u32;
        if node_height == level_height {
            self.treehash[level].node = node;
            self.treehash[level].completed = true;
        } else {
            let needed = (self.stack_offset + 1) * n;
            if self.stack.len() < needed {
                self.stack.resize(needed, 0);
            }
            if self.stack_levels.len() <= self.stack_offset {
                self.stack_levels.resize(self.stack_offset + 1, 0);
            }
            self.stack[self.stack_offset * n..(self.stack_offset + 1) * n].copy_from_slice(&node);
            self.stack_levels[self.stack_offset] = node_height;
            self.stack_offset += 1;
            self.treehash[level].stack_usage += 1;
            self.treehash[level].next_idx += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{XmssOid, XmssParams};

    fn small_params() -> XmssParams {
        let mut params = XmssParams::default();
        XmssOid::XmssSha2_10_256
            .initialize(&mut params)
            .expect("built-in parameter set must initialize");
        params
    }

    #[test]
    fn setup_fills_one_auth_entry_per_height() {
        let params = small_params();
        let n = params.n as usize;
        let mut state = BdsState::new(n, params.tree_height, params.bds_k);
        let sk_seed = vec![0x11u8; n];
        let pub_seed = vec![0x22u8; n];
        let subtree_addr = [0u32; 8];

        let root = state
            .setup(&params, &sk_seed, &pub_seed, &subtree_addr)
            .unwrap();

        assert_eq!(root.len(), n);
        assert_eq!(state.auth.len(), params.tree_height as usize * n);
    }

    #[test]
    fn next_auth_path_walks_the_whole_tree_without_panicking() {
        let params = small_params();
        let n = params.n as usize;
        let mut state = BdsState::new(n, params.tree_height, params.bds_k);
        let sk_seed = vec![0x33u8; n];
        let pub_seed = vec![0x44u8; n];
        let subtree_addr = [0u32; 8];
        state
            .setup(&params, &sk_seed, &pub_seed, &subtree_addr)
            .unwrap();

        let num_leaves = 1u32 << params.tree_height;
        for leaf in 0..num_leaves - 1 {
            let path = state
                .next_auth_path(&params, &sk_seed, &pub_seed, &subtree_addr, leaf)
                .unwrap();
            assert_eq!(path.len(), params.tree_height as usize * n);
        }
    }

    /// The auth path BDS hands out for a given leaf must not depend on
    /// whether the state reached that leaf by signing through every leaf in
    /// between, or by fast-forwarding straight to it from a cold load.
    #[test]
    fn fast_forward_matches_sequential_replay() {
        let params = small_params();
        let n = params.n as usize;
        let sk_seed = vec![0x55u8; n];
        let pub_seed = vec![0x66u8; n];
        let subtree_addr = [0u32; 8];
        let target_leaf = 6u32;

        let mut sequential = BdsState::new(n, params.tree_height, params.bds_k);
        sequential
            .setup(&params, &sk_seed, &pub_seed, &subtree_addr)
            .unwrap();
        for leaf in 0..target_leaf {
            sequential
                .next_auth_path(&params, &sk_seed, &pub_seed, &subtree_addr, leaf)
                .unwrap();
        }
        let expected = sequential
            .next_auth_path(&params, &sk_seed, &pub_seed, &subtree_addr, target_leaf)
            .unwrap();

        let mut jumped = BdsState::new(n, params.tree_height, params.bds_k);
        jumped
            .setup(&params, &sk_seed, &pub_seed, &subtree_addr)
            .unwrap();
        jumped
            .fast_forward(&params, &sk_seed, &pub_seed, &subtree_addr, target_leaf)
            .unwrap();
        let got = jumped
            .next_auth_path(&params, &sk_seed, &pub_seed, &subtree_addr, target_leaf)
            .unwrap();

        assert_eq!(expected, got);
    }
}
