// This file is part of Substrate.

// Copyright (C) Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! A generic, fork-aware tree of blocks. Each node carries its own payload
//! `V`; the tree's job is purely the ancestry bookkeeping and pruning that
//! [`sc_consensus_grandpa`]'s authority-set manager (and anything else that
//! needs "the value that dominates this block's subtree") builds on.
//!
//! [`sc_consensus_grandpa`]: https://docs.rs/sc-consensus-grandpa

use std::fmt;

use codec::{Decode, Encode};

/// Error returned by tree operations. `E` is the error type of the
/// caller-supplied ancestry oracle.
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
	#[error("block is not a descendant of any known root")]
	UnknownAncestor,
	#[error("ancestry oracle failed: {0}")]
	Oracle(E),
}

/// A node in the tree: a block, its payload, and its children.
#[derive(Clone, Debug, Encode, Decode)]
pub struct Node<H, N, V> {
	pub hash: H,
	pub number: N,
	pub data: V,
	pub children: Vec<Node<H, N, V>>,
}

/// A forest of [`Node`]s (a tree may have more than one root before the
/// first finalization prunes it down to one). `Encode`/`Decode` let owners
/// (e.g. the authority-set manager) persist the whole forest under a fixed
/// key and reconstruct it on restart.
#[derive(Clone, Debug, Encode, Decode)]
pub struct ForkTree<H, N, V> {
	roots: Vec<Node<H, N, V>>,
}

impl<H, N, V> Default for ForkTree<H, N, V> {
	fn default() -> Self {
		Self { roots: Vec::new() }
	}
}

impl<H, N, V> ForkTree<H, N, V>
where
	H: PartialEq + Clone + fmt::Debug,
	N: Ord + Copy,
{
	pub fn new() -> Self {
		Self::default()
	}

	pub fn roots(&self) -> impl Iterator<Item = &Node<H, N, V>> {
		self.roots.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.roots.is_empty()
	}

	/// Import a new node as a child of the deepest existing node that is an
	/// ancestor of `hash`, per `is_descendant_of`. If the tree is empty, the
	/// new node becomes a root. Returns `Ok(true)` if a new node was
	/// inserted, `Ok(false)` if `hash` was already known.
	pub fn import<F, E>(&mut self, hash: H, number: N, data: V, is_descendant_of: &F) -> Result<bool, Error<E>>
	where
		F: Fn(&H, &H) -> Result<bool, E>,
	{
		if self.roots.is_empty() {
			self.roots.push(Node { hash, number, data, children: Vec::new() });
			return Ok(true);
		}

		if find_mut(&mut self.roots, &hash).is_some() {
			return Ok(false);
		}

		for root in self.roots.iter_mut() {
			if let Some(parent) = deepest_ancestor_mut(root, &hash, number, is_descendant_of)? {
				parent.children.push(Node { hash, number, data, children: Vec::new() });
				return Ok(true);
			}
		}

		Err(Error::UnknownAncestor)
	}

	/// Find the deepest node that is an ancestor-or-equal of `hash`,
	/// returning its payload. This is the lookup the authority-set
	/// manager's `authorities(B)` query is built on.
	pub fn find_node_where<F, E>(&self, hash: &H, is_descendant_of: &F) -> Result<Option<&Node<H, N, V>>, Error<E>>
	where
		F: Fn(&H, &H) -> Result<bool, E>,
	{
		for root in self.roots.iter() {
			if let Some(found) = deepest_ancestor(root, hash, is_descendant_of)? {
				return Ok(Some(found));
			}
		}
		Ok(None)
	}

	/// Advance the tree's root(s) to the node at `hash`, dropping every
	/// branch that does not descend from it (including sibling roots).
	/// `hash` must be equal to or a descendant of some known root; a
	/// finalization older than the current root is a caller-level no-op
	/// ([`sc_consensus`]'s `AuthoritySetManager::on_finalize`, not this
	/// type, enforces that).
	///
	/// [`sc_consensus`]: https://docs.rs/sc-consensus
	pub fn finalize<F, E>(&mut self, hash: &H, number: N, is_descendant_of: &F) -> Result<(), Error<E>>
	where
		F: Fn(&H, &H) -> Result<bool, E>,
		V: Clone,
	{
		// If `hash` is itself a current root, just drop the other roots.
		if let Some(idx) = self.roots.iter().position(|r| &r.hash == hash) {
			let node = self.roots.swap_remove(idx);
			self.roots = vec![node];
			return Ok(());
		}

		for i in 0..self.roots.len() {
			if is_descendant_of(&self.roots[i].hash, hash).map_err(Error::Oracle)? {
				let mut root = self.roots.swap_remove(i);
				if let Some(new_root) = take_descendant(&mut root, hash, number, is_descendant_of)? {
					self.roots = vec![new_root];
				} else {
					// hash is a descendant of this root by the oracle, but
					// we have no node for it yet (not yet imported) --
					// retain the whole subtree until it is.
					self.roots = vec![root];
				}
				return Ok(());
			}
		}

		Err(Error::UnknownAncestor)
	}
}

fn find_mut<'a, H: PartialEq, N, V>(nodes: &'a mut [Node<H, N, V>], hash: &H) -> Option<&'a mut Node<H, N, V>> {
	for node in nodes.iter_mut() {
		if &node.hash == hash {
			return Some(node);
		}
		if let Some(found) = find_mut(&mut node.children, hash) {
			return Some(found);
		}
	}
	None
}

/// Find the deepest node in the subtree rooted at `node` that is an
/// ancestor-or-equal of `hash`.
fn deepest_ancestor<'a, H, N, V, F, E>(node: &'a Node<H, N, V>, hash: &H, is_descendant_of: &F) -> Result<Option<&'a Node<H, N, V>>, Error<E>>
where
	H: PartialEq,
	F: Fn(&H, &H) -> Result<bool, E>,
{
	if &node.hash == hash {
		return Ok(Some(node));
	}
	if !is_descendant_of(&node.hash, hash).map_err(Error::Oracle)? {
		return Ok(None);
	}
	for child in node.children.iter() {
		if let Some(found) = deepest_ancestor(child, hash, is_descendant_of)? {
			return Ok(Some(found));
		}
	}
	Ok(Some(node))
}

fn deepest_ancestor_mut<'a, H, N, V, F, E>(
	node: &'a mut Node<H, N, V>,
	hash: &H,
	number: N,
	is_descendant_of: &F,
) -> Result<Option<&'a mut Node<H, N, V>>, Error<E>>
where
	H: PartialEq,
	N: Ord,
	F: Fn(&H, &H) -> Result<bool, E>,
{
	if &node.hash == hash {
		return Ok(None);
	}
	if node.number >= number || !is_descendant_of(&node.hash, hash).map_err(Error::Oracle)? {
		return Ok(None);
	}
	for child in node.children.iter_mut() {
		if let Some(found) = deepest_ancestor_mut(child, hash, number, is_descendant_of)? {
			return Ok(Some(found));
		}
	}
	Ok(Some(node))
}

/// Consume `node`, returning the descendant subtree rooted at `hash` if one
/// has been imported, discarding every sibling branch along the way.
fn take_descendant<H, N, V, F, E>(node: &mut Node<H, N, V>, hash: &H, _number: N, is_descendant_of: &F) -> Result<Option<Node<H, N, V>>, Error<E>>
where
	H: PartialEq + Clone,
	N: Ord + Copy,
	V: Clone,
	F: Fn(&H, &H) -> Result<bool, E>,
{
	if &node.hash == hash {
		return Ok(Some(node.clone()));
	}
	for child in node.children.iter_mut() {
		if let Some(found) = take_descendant(child, hash, _number, is_descendant_of)? {
			return Ok(Some(found));
		}
	}
	Ok(None)
}
