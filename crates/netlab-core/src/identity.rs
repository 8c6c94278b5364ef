//! Server identities handed out to nodes.
//!
//! A local test network needs one identity per node. The first node ever
//! assigned receives the bootstrap identity, the one the network's genesis
//! is signed with; every later node receives the next identity from a fixed
//! pool. Identities are never recycled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Identity of a server: its identity chain and signing key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity chain id (hex).
    pub chain_id: String,
    /// Server private key (hex).
    pub private_key: String,
    /// Server public key (hex).
    pub public_key: String,
}

impl Identity {
    /// Creates an identity from its three hex components.
    pub fn new(
        chain_id: impl Into<String>,
        private_key: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            private_key: private_key.into(),
            public_key: public_key.into(),
        }
    }

    /// Returns the first 12 characters of the chain id.
    pub fn short_chain_id(&self) -> &str {
        self.chain_id.get(..12).unwrap_or(&self.chain_id)
    }
}

const BOOTSTRAP: (&str, &str, &str) = (
    "38bab1455b7bd7e5efd15c53c777c79d0c988e9210f1da49a99d95b3a6417be9",
    "4c38c72fc5cdad68f13b74674d3ffb1f3d63a112710868c9b08946553448d26d",
    "cc1985cdfae4e32b5a454dfda8ce5e1361558482684f3367649c3ad852c8e31a",
);

const POOL: [(&str, &str, &str); 9] = [
    (
        "8888881570f89283f3a516b6e5ed240f43f5ad7cb05132378c4a006abe7c2b93",
        "3838383838383135373066383932383366336135313662366535656432343066",
        "803b318b23ec15de43db470200c1afb5d1b6156184e247ed035a8f0b6879155b",
    ),
    (
        "8888888da6ed14ec63e623cab6917c66b954b361d530770b3f5f5188f87f1738",
        "3838383838383864613665643134656336336536323363616236393137633636",
        "11cae6d21e92d9ac0ee83e00f89a3aabde7e3c6f90824339281cfeb93c1377cd",
    ),
    (
        "888888aeaac80d825ac9675cf3a6591916883bd9947e16ab752d39164d80a608",
        "3838383838386165616163383064383235616339363735636633613635393139",
        "15688e940b854d71411dd8dead29843932fc79c9c99cfb69ca6888b29cd13237",
    ),
    (
        "888888f0b7e308974afc34b2c7f703f25ed2699cb05f818e84e8745644896c55",
        "3838383838386630623765333038393734616663333462326337663730336632",
        "67bb9fba9c9bab4cc532d9684001ae8bdb70ece551414ff25521d3647370f1c6",
    ),
    (
        "888888d2bc4ed232378c59a85e6c462bcc5495146f3a931a3a1ca42e3397f475",
        "3838383838386432626334656432333233373863353961383565366334363262",
        "d4013c2379a725741534b8f636ada753274722aefa44b91963a104eb9c766b48",
    ),
    (
        "88888867ee42e8b221343da237e08c0b35f50585854c5c05380837da5d55a098",
        "3838383838383637656534326538623232313334336461323337653038633062",
        "4fb6de25a67608a66c221191f216e0613b21665dc056024f1b4a3cb0b818880a",
    ),
    (
        "888888a5b59731c10c1867474ce26935336ca0269f75a43a903fa4cfeb1aaa98",
        "3838383838386135623539373331633130633138363734373463653236393335",
        "63ac650e55149eedd01c4df5f74ea74682c6f82a85bedf26adf8b0406a2488bc",
    ),
    (
        "8888887f03e531e68922a71a15bdda9d0430cb5aaaf7ab9f338ba7b5c82d240b",
        "3838383838383766303365353331653638393232613731613135626464613964",
        "e4ab02eb263fad36e2768cf0cb9b50ebcaf779c37b27fef81a24cbb9b1f98424",
    ),
    (
        "888888c0bc99166c1419f86911833a0a1c0b491e79037eeb917ceeabe38232cd",
        "3838383838386330626339393136366331343139663836393131383333613061",
        "7eef4c8fac8907ad4f34a27c612a417344eb3c2fc1ec9b840693a2b4f90f0204",
    ),
];

/// Finite pool of identities with a distinguished bootstrap identity.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    bootstrap: Identity,
    pool: Vec<Identity>,
    next: usize,
    assigned: HashMap<String, Identity>,
    bootstrap_holder: Option<String>,
}

impl IdentityPool {
    /// Creates a pool from a bootstrap identity and the ordered identities
    /// handed to later nodes.
    pub fn new(bootstrap: Identity, pool: Vec<Identity>) -> Self {
        Self {
            bootstrap,
            pool,
            next: 0,
            assigned: HashMap::new(),
            bootstrap_holder: None,
        }
    }

    /// The well-known identities of a local test network.
    pub fn builtin() -> Self {
        let (chain, private, public) = BOOTSTRAP;
        Self::new(
            Identity::new(chain, private, public),
            POOL.iter()
                .map(|(chain, private, public)| Identity::new(*chain, *private, *public))
                .collect(),
        )
    }

    /// Assigns an identity to `name`, or returns the one it already holds.
    pub fn assign(&mut self, name: &str) -> Result<Identity> {
        if let Some(identity) = self.assigned.get(name) {
            return Ok(identity.clone());
        }

        let identity = if self.bootstrap_holder.is_none() {
            self.bootstrap_holder = Some(name.to_string());
            self.bootstrap.clone()
        } else {
            let identity = self
                .pool
                .get(self.next)
                .cloned()
                .ok_or(CoreError::IdentityPoolExhausted {
                    capacity: self.capacity(),
                })?;
            self.next += 1;
            identity
        };

        debug!(name = %name, chain_id = %identity.short_chain_id(), "Assigned identity");
        self.assigned.insert(name.to_string(), identity.clone());
        Ok(identity)
    }

    /// Returns true if `name` holds the bootstrap identity.
    pub fn is_bootstrap(&self, name: &str) -> bool {
        self.bootstrap_holder.as_deref() == Some(name)
    }

    /// Total number of identities, bootstrap included.
    pub fn capacity(&self) -> usize {
        self.pool.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_name_gets_bootstrap() {
        let mut pool = IdentityPool::builtin();
        let first = pool.assign("node-a").unwrap();
        let second = pool.assign("node-b").unwrap();

        assert_eq!(first.chain_id, BOOTSTRAP.0);
        assert!(pool.is_bootstrap("node-a"));
        assert!(!pool.is_bootstrap("node-b"));
        assert_eq!(second.chain_id, POOL[0].0);
        assert_ne!(first, second);
    }

    #[test]
    fn test_assignment_is_stable() {
        let mut pool = IdentityPool::builtin();
        let a = pool.assign("node-a").unwrap();
        pool.assign("node-b").unwrap();
        assert_eq!(pool.assign("node-a").unwrap(), a);
    }

    #[test]
    fn test_builtin_identities_distinct() {
        let mut pool = IdentityPool::builtin();
        let mut chains = std::collections::HashSet::new();
        for i in 0..pool.capacity() {
            let identity = pool.assign(&format!("n{}", i)).unwrap();
            assert_eq!(identity.chain_id.len(), 64);
            assert!(chains.insert(identity.chain_id));
        }
        assert_eq!(chains.len(), 10);
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = IdentityPool::new(
            Identity::new("boot", "k0", "p0"),
            vec![Identity::new("c1", "k1", "p1")],
        );
        pool.assign("a").unwrap();
        pool.assign("b").unwrap();
        let err = pool.assign("c").unwrap_err();
        assert!(matches!(err, CoreError::IdentityPoolExhausted { capacity: 2 }));
    }

    #[test]
    fn test_short_chain_id() {
        let identity = Identity::new(BOOTSTRAP.0, BOOTSTRAP.1, BOOTSTRAP.2);
        assert_eq!(identity.short_chain_id(), "38bab1455b7b");
        assert_eq!(Identity::new("abc", "", "").short_chain_id(), "abc");
    }
}
