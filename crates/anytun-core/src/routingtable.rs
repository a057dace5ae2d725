// SPDX-License-Identifier: MIT

//! Longest-prefix-match routing, per address family: a flat ordered
//! map holds the authoritative prefix -> mux mapping; a byte-indexed
//! tree per family is rebuilt from it on every mutation and used for
//! the actual lookup.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Ethernet,
}

/// An address prefix: family, address bytes, and prefix length in bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPrefix {
    pub family: AddressFamily,
    pub address: Vec<u8>,
    pub prefix_length: u8,
}

impl NetworkPrefix {
    pub fn new(family: AddressFamily, address: Vec<u8>, prefix_length: u8) -> Result<Self> {
        let max_bits = match family {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
            AddressFamily::Ethernet => 48,
        };
        if prefix_length as u16 > max_bits {
            return Err(Error::Config(format!(
                "prefix length {prefix_length} exceeds {max_bits} bits for {family:?}"
            )));
        }
        Ok(Self {
            family,
            address,
            prefix_length,
        })
    }
}

/// Ordering key for the flat map: family, then address bytes
/// lexicographically, then prefix length as tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PrefixKey {
    family: AddressFamily,
    address: Vec<u8>,
    prefix_length: u8,
}

/// A byte-indexed trie node; each of the 256 children is `None`
/// (absent) or a boxed child. A node additionally records the mux of
/// the most specific terminal prefix ending there, if any.
#[derive(Default)]
struct TrieNode {
    children: Vec<Option<Box<TrieNode>>>,
    terminal_mux: Option<u16>,
}

impl TrieNode {
    fn new() -> Self {
        Self {
            children: (0..256).map(|_| None).collect(),
            terminal_mux: None,
        }
    }
}

struct FamilyTree {
    root: TrieNode,
}

impl FamilyTree {
    fn new() -> Self {
        Self { root: TrieNode::new() }
    }

    /// Rebuild from scratch by walking every prefix of this family in
    /// key order, inserting each one in turn.
    fn rebuild<'a>(prefixes: impl Iterator<Item = (&'a NetworkPrefix, u16)>) -> Self {
        let mut tree = Self::new();
        for (prefix, mux) in prefixes {
            tree.insert(prefix, mux);
        }
        tree
    }

    fn insert(&mut self, prefix: &NetworkPrefix, mux: u16) {
        let l = prefix.prefix_length as usize;
        let full_bytes = l / 8;
        let remainder = l % 8;

        let mut node = &mut self.root;
        for i in 0..full_bytes {
            let idx = *prefix.address.get(i).unwrap_or(&0) as usize;
            node = node.children[idx].get_or_insert_with(|| Box::new(TrieNode::new()));
        }

        if remainder > 0 {
            let next_byte = *prefix.address.get(full_bytes).unwrap_or(&0);
            let mask = 0xFFu8 >> remainder;
            let idx = next_byte;
            let lo = idx & !mask;
            for child_idx in lo..=(lo | mask) {
                let child = node.children[child_idx as usize].get_or_insert_with(|| Box::new(TrieNode::new()));
                child.terminal_mux = Some(mux);
                if child_idx == 0xFF {
                    break;
                }
            }
        } else {
            node.terminal_mux = Some(mux);
        }
    }

    /// Walk the tree along `address`, returning the most recently
    /// recorded terminal mux encountered.
    fn lookup(&self, address: &[u8]) -> Option<u16> {
        let mut node = &self.root;
        let mut best = node.terminal_mux;
        for &byte in address {
            match &node.children[byte as usize] {
                Some(child) => {
                    node = child;
                    if node.terminal_mux.is_some() {
                        best = node.terminal_mux;
                    }
                }
                None => break,
            }
        }
        best
    }
}

#[derive(Default)]
struct RoutingInner {
    flat: BTreeMap<PrefixKey, u16>,
    trees: std::collections::HashMap<AddressFamily, FamilyTree>,
}

impl RoutingInner {
    fn rebuild_family(&mut self, family: AddressFamily) {
        let prefixes: Vec<(NetworkPrefix, u16)> = self
            .flat
            .iter()
            .filter(|(k, _)| k.family == family)
            .map(|(k, &mux)| {
                (
                    NetworkPrefix {
                        family: k.family,
                        address: k.address.clone(),
                        prefix_length: k.prefix_length,
                    },
                    mux,
                )
            })
            .collect();
        let tree = FamilyTree::rebuild(prefixes.iter().map(|(p, m)| (p, *m)));
        self.trees.insert(family, tree);
    }
}

/// RW-lock guarded routing table: one flat ordered map plus one
/// lookup tree per address family.
#[derive(Default)]
pub struct RoutingTable {
    inner: RwLock<RoutingInner>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RoutingInner::default()),
        }
    }

    /// Insert or update the flat map for `prefix`'s family, then
    /// rebuild that family's tree from the flat map in key order.
    pub fn add_route(&self, prefix: NetworkPrefix, mux: u16) {
        let family = prefix.family;
        let key = PrefixKey {
            family,
            address: prefix.address,
            prefix_length: prefix.prefix_length,
        };
        let mut inner = self.inner.write();
        inner.flat.insert(key, mux);
        inner.rebuild_family(family);
    }

    pub fn remove_route(&self, family: AddressFamily, address: Vec<u8>, prefix_length: u8) {
        let key = PrefixKey {
            family,
            address,
            prefix_length,
        };
        let mut inner = self.inner.write();
        inner.flat.remove(&key);
        inner.rebuild_family(family);
    }

    /// Longest-prefix-match lookup of `address` within `family`.
    pub fn get_route(&self, family: AddressFamily, address: &[u8]) -> Result<u16> {
        let inner = self.inner.read();
        inner
            .trees
            .get(&family)
            .and_then(|t| t.lookup(address))
            .ok_or(Error::RouteFailure)
    }

    pub fn len(&self) -> usize {
        self.inner.read().flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().flat.is_empty()
    }

    /// Full table snapshot in flat-map (key) order, used to seed a
    /// newly-connected sync peer.
    pub fn snapshot(&self) -> Vec<(NetworkPrefix, u16)> {
        self.inner
            .read()
            .flat
            .iter()
            .map(|(k, &mux)| {
                (
                    NetworkPrefix {
                        family: k.family,
                        address: k.address.clone(),
                        prefix_length: k.prefix_length,
                    },
                    mux,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_match() {
        let table = RoutingTable::new();
        table.add_route(
            NetworkPrefix::new(AddressFamily::Ipv4, vec![10, 0, 0, 0], 8).unwrap(),
            1,
        );
        table.add_route(
            NetworkPrefix::new(AddressFamily::Ipv4, vec![10, 0, 0, 0], 24).unwrap(),
            2,
        );
        assert_eq!(table.get_route(AddressFamily::Ipv4, &[10, 0, 0, 5]).unwrap(), 2);
        assert_eq!(table.get_route(AddressFamily::Ipv4, &[10, 1, 0, 5]).unwrap(), 1);
        assert!(table.get_route(AddressFamily::Ipv4, &[192, 168, 0, 1]).is_err());
    }

    #[test]
    fn exact_host_route_wins_over_supernet() {
        let table = RoutingTable::new();
        table.add_route(
            NetworkPrefix::new(AddressFamily::Ipv4, vec![192, 168, 0, 0], 16).unwrap(),
            1,
        );
        table.add_route(
            NetworkPrefix::new(AddressFamily::Ipv4, vec![192, 168, 1, 1], 32).unwrap(),
            9,
        );
        assert_eq!(
            table.get_route(AddressFamily::Ipv4, &[192, 168, 1, 1]).unwrap(),
            9
        );
        assert_eq!(
            table.get_route(AddressFamily::Ipv4, &[192, 168, 1, 2]).unwrap(),
            1
        );
    }

    #[test]
    fn route_update_replaces_mux() {
        let table = RoutingTable::new();
        let p = NetworkPrefix::new(AddressFamily::Ipv4, vec![10, 0, 0, 0], 24).unwrap();
        table.add_route(p.clone(), 1);
        table.add_route(p, 2);
        assert_eq!(table.get_route(AddressFamily::Ipv4, &[10, 0, 0, 1]).unwrap(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn prefix_length_rejected_over_family_max() {
        assert!(NetworkPrefix::new(AddressFamily::Ipv4, vec![0, 0, 0, 0], 33).is_err());
        assert!(NetworkPrefix::new(AddressFamily::Ethernet, vec![0; 6], 49).is_err());
    }

    #[test]
    fn snapshot_reflects_current_routes() {
        let table = RoutingTable::new();
        table.add_route(NetworkPrefix::new(AddressFamily::Ipv4, vec![10, 0, 0, 0], 8).unwrap(), 1);
        let snap = table.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].1, 1);
    }

    #[test]
    fn ethernet_exact_match() {
        let table = RoutingTable::new();
        table.add_route(
            NetworkPrefix::new(AddressFamily::Ethernet, vec![1, 2, 3, 4, 5, 6], 48).unwrap(),
            7,
        );
        assert_eq!(
            table
                .get_route(AddressFamily::Ethernet, &[1, 2, 3, 4, 5, 6])
                .unwrap(),
            7
        );
    }
}
