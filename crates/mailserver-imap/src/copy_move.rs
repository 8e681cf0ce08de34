//! `COPY`/`MOVE` response-code assembly (RFC 4315 `UIDPLUS`).
//!
//! The repository-level duplication (allocate fresh UIDs, insert entries,
//! mark/remove source entries) is async and lives in `engine.rs`; this
//! module holds the one pure piece worth separating out and testing: pairing
//! up source and destination UIDs into the `[COPYUID]` response code.
//! `MOVE`'s additional `* n EXPUNGE` emission reuses [`crate::expunge`]
//! directly rather than duplicating it here.

use crate::types::{ResponseCode, Uid, UidValidity};

/// Builds the `[COPYUID uidvalidity source-uids dest-uids]` response code
/// sent on a successful `COPY`/`MOVE` (spec.md's UIDPLUS support).
///
/// # Panics
///
/// Panics if `source_uids` and `dest_uids` differ in length; callers pair
/// them up 1:1 while duplicating entries.
#[must_use]
pub fn copy_uid_code(uidvalidity: UidValidity, source_uids: Vec<Uid>, dest_uids: Vec<Uid>) -> ResponseCode {
    assert_eq!(source_uids.len(), dest_uids.len(), "COPYUID requires matching source/dest UID counts");
    ResponseCode::CopyUid { uidvalidity, source_uids, dest_uids }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_source_and_dest_uids() {
        let code = copy_uid_code(
            UidValidity::new(1).unwrap(),
            vec![Uid::new(10).unwrap(), Uid::new(11).unwrap()],
            vec![Uid::new(50).unwrap(), Uid::new(51).unwrap()],
        );
        match code {
            ResponseCode::CopyUid { uidvalidity, source_uids, dest_uids } => {
                assert_eq!(uidvalidity.get(), 1);
                assert_eq!(source_uids.len(), 2);
                assert_eq!(dest_uids[1].get(), 51);
            }
            other => panic!("expected CopyUid, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "matching source/dest UID counts")]
    fn panics_on_length_mismatch() {
        let _ = copy_uid_code(UidValidity::new(1).unwrap(), vec![Uid::new(1).unwrap()], vec![]);
    }
}
