//! User draft index maintenance.
//!
//! The index is derived state: it must list exactly the drafts a user has.
//! Every mutation funnels through [`DraftCodec::update_index`], which is the
//! single place a cross-tab coordination scheme would need to hook into.
//! Today it is a plain read-modify-write and the last writer wins.

use formcache_types::{Millis, UserDraftIndex};
use tracing::{debug, warn};

use crate::codec::DraftCodec;
use crate::error::{Error, Result};

/// What to do when the user has no index yet.
#[derive(Debug, Clone)]
pub(crate) enum OnMissing {
    /// Leave it absent and skip the mutation.
    Skip,
    /// Create an empty index bound to this session.
    Create { session_id: String, now: Millis },
}

impl DraftCodec {
    pub fn read_index(&self, user_id: &str) -> Result<Option<UserDraftIndex>> {
        self.read(&self.layout().index_key(user_id))
    }

    pub fn write_index(&self, index: &UserDraftIndex) -> Result<()> {
        self.write(&self.layout().index_key(&index.user_id), index)
    }

    /// Read-modify-write a user's index.
    ///
    /// `mutate` returns whether it changed anything; unchanged indexes are
    /// not written back. Returns the index as persisted, or `None` when it
    /// was missing and `on_missing` is [`OnMissing::Skip`].
    pub(crate) fn update_index<F>(
        &self,
        user_id: &str,
        on_missing: OnMissing,
        mutate: F,
    ) -> Result<Option<UserDraftIndex>>
    where
        F: FnOnce(&mut UserDraftIndex) -> bool,
    {
        let existing = match self.read_index(user_id) {
            Ok(index) => index,
            Err(Error::Decode { key, source }) => match on_missing {
                OnMissing::Skip => return Err(Error::Decode { key, source }),
                OnMissing::Create { .. } => {
                    warn!(key = %key, error = %source, "Rebuilding undecodable draft index");
                    None
                }
            },
            Err(e) => return Err(e),
        };

        let (mut index, created) = match (existing, on_missing) {
            (Some(index), _) => (index, false),
            (None, OnMissing::Skip) => return Ok(None),
            (None, OnMissing::Create { session_id, now }) => {
                let mut index = UserDraftIndex::new(user_id, session_id, now);
                index.draft_keys = self.scan_user_drafts(user_id)?;
                (index, true)
            }
        };

        if mutate(&mut index) || created {
            self.write_index(&index)?;
        }
        Ok(Some(index))
    }

    /// Drop `draft_key` from its owner's index without counting as activity.
    ///
    /// Used by cleanup: a missing index or an unlisted key is a no-op.
    pub(crate) fn unlink_draft(&self, user_id: &str, draft_key: &str) {
        let result = self.update_index(user_id, OnMissing::Skip, |index| {
            index.remove_key(draft_key)
        });
        if let Err(e) = result {
            warn!(
                user_id = %user_id,
                key = %draft_key,
                error = %e,
                "Failed to remove draft key from index"
            );
        }
    }

    /// Find the drafts already stored for `user_id` by prefix scan.
    ///
    /// Keys alone are ambiguous (`u_a` + `b` vs `u` + `a_b`), so each
    /// candidate's metadata is checked for the owner.
    fn scan_user_drafts(&self, user_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{}{}_", self.layout().draft_key_prefix, user_id);
        let mut keys = Vec::new();
        for key in self.store().keys_with_prefix(&prefix)? {
            match self.read_metadata(&key) {
                Ok(Some(meta)) if meta.user_id == user_id => keys.push(key),
                Ok(_) => {}
                Err(e) => debug!(key = %key, error = %e, "Skipping undecodable draft during index rebuild"),
            }
        }
        Ok(keys)
    }
}
