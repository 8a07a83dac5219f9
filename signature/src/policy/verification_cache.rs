// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Memoized verification mechanisms, one per distinct key source.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, warn};

use crate::mechanism::{MechanismFactory, SigningMechanism};
use crate::{Error, Result};

/// A mechanism trusting exactly the keys of one key source, and the
/// identities of those keys.
pub(crate) struct VerificationCache {
    mech: Mutex<Box<dyn SigningMechanism>>,
    trusted_identities: Vec<String>,
}

impl VerificationCache {
    fn new(factory: &dyn MechanismFactory, key_data: &[u8]) -> Result<Self> {
        let (mech, trusted_identities) = factory.new_ephemeral(key_data)?;
        Ok(VerificationCache {
            mech: Mutex::new(mech),
            trusted_identities,
        })
    }

    pub(crate) fn trusted_identities(&self) -> &[String] {
        &self.trusted_identities
    }

    /// Locks the mechanism; uses of one mechanism are serialized.
    pub(crate) fn mechanism(&self) -> Result<MutexGuard<'_, Box<dyn SigningMechanism>>> {
        self.mech
            .lock()
            .map_err(|_| Error::Internal("verification mechanism lock poisoned".into()))
    }

    fn close(&self) -> Result<()> {
        let mut mech = self.mech.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        mech.close()
    }
}

// Each key owns a slot, locked while its cache is created, so a slow key
// import only blocks lookups of the same key.
type Slot = Arc<Mutex<Option<Arc<VerificationCache>>>>;
type CacheMap<K> = RwLock<HashMap<K, Slot>>;

/// The verification caches owned by a policy context, keyed by exact key
/// bytes or by exact key file path.
pub(crate) struct VerificationCaches {
    factory: Arc<dyn MechanismFactory>,
    by_key_data: CacheMap<Vec<u8>>,
    by_key_path: CacheMap<String>,
}

impl VerificationCaches {
    pub(crate) fn new(factory: Arc<dyn MechanismFactory>) -> Self {
        VerificationCaches {
            factory,
            by_key_data: RwLock::new(HashMap::new()),
            by_key_path: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn for_key_data(&self, key_data: &[u8]) -> Result<Arc<VerificationCache>> {
        get_or_try_insert(&self.by_key_data, key_data, || {
            debug!("Creating verification cache for {} bytes of key data", key_data.len());
            VerificationCache::new(self.factory.as_ref(), key_data)
        })
    }

    pub(crate) fn for_key_path(&self, key_path: &str) -> Result<Arc<VerificationCache>> {
        get_or_try_insert(&self.by_key_path, key_path, || {
            debug!("Creating verification cache for key file {key_path}");
            let key_data = fs::read(key_path)
                .map_err(|e| Error::resource(format!("reading key file {key_path}"), e))?;
            VerificationCache::new(self.factory.as_ref(), &key_data)
        })
    }

    /// Closes and forgets every cached mechanism. Returns the first error,
    /// after trying to close all of them.
    pub(crate) fn close_all(&self) -> Result<()> {
        let mut caches: Vec<Arc<VerificationCache>> = Vec::new();
        caches.extend(drain(&self.by_key_data));
        caches.extend(drain(&self.by_key_path));

        let mut result = Ok(());
        for cache in caches {
            if let Err(e) = cache.close() {
                warn!("Failed to close verification mechanism: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("verification cache lock poisoned".into())
}

fn drain<K>(map: &CacheMap<K>) -> Vec<Arc<VerificationCache>> {
    let mut map = map.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut caches = Vec::new();
    for (_, slot) in map.drain() {
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        caches.extend(slot.take());
    }
    caches
}

fn get_or_try_insert<K, Q, F>(map: &CacheMap<K>, key: &Q, create: F) -> Result<Arc<VerificationCache>>
where
    K: Eq + Hash + Borrow<Q>,
    Q: Eq + Hash + ToOwned<Owned = K> + ?Sized,
    F: FnOnce() -> Result<VerificationCache>,
{
    let existing = map.read().map_err(poisoned)?.get(key).cloned();
    let slot = match existing {
        Some(slot) => slot,
        None => map
            .write()
            .map_err(poisoned)?
            .entry(key.to_owned())
            .or_default()
            .clone(),
    };

    // Another thread may have filled the slot while we waited for it.
    let mut slot = slot.lock().map_err(poisoned)?;
    if let Some(cache) = slot.as_ref() {
        debug!("Reusing verification cache");
        return Ok(cache.clone());
    }
    // A failed creation leaves the slot empty, to be retried on next use.
    let cache = Arc::new(create()?);
    *slot = Some(cache.clone());
    Ok(cache)
}
