//! Conversions between proto messages and domain types.

use blocksync_common::{FileRecord, WriteOutcome};
use blocksync_proto::common as pb;

/// Build the wire representation of a filename's record.
pub fn file_info(filename: &str, record: &FileRecord) -> pb::FileInfo {
    pb::FileInfo {
        filename: filename.to_string(),
        version: record.version,
        blocklist: record.blocks.clone(),
    }
}

/// Extract the record carried by a `FileInfo`.
pub fn record_from_info(info: &pb::FileInfo) -> FileRecord {
    FileRecord::new(info.version, info.blocklist.clone())
}

/// Encode a write decision.
pub fn write_result(outcome: &WriteOutcome) -> pb::WriteResult {
    use pb::write_result::Result as R;
    let (result, current_version, missing_blocks) = match outcome {
        WriteOutcome::Ok(v) => (R::Ok, *v, vec![]),
        WriteOutcome::OldVersion(v) => (R::OldVersion, *v, vec![]),
        WriteOutcome::MissingBlocks(missing) => (R::MissingBlocks, 0, missing.clone()),
        WriteOutcome::NotLeader => (R::NotLeader, 0, vec![]),
    };
    pb::WriteResult {
        result: result as i32,
        current_version,
        missing_blocks,
    }
}

/// Decode a write decision. An unknown discriminant (a newer peer) is
/// treated as `NotLeader`, the only variant that is safe to retry
/// elsewhere.
pub fn outcome_from_result(result: &pb::WriteResult) -> WriteOutcome {
    use pb::write_result::Result as R;
    match R::try_from(result.result) {
        Ok(R::Ok) => WriteOutcome::Ok(result.current_version),
        Ok(R::OldVersion) => WriteOutcome::OldVersion(result.current_version),
        Ok(R::MissingBlocks) => WriteOutcome::MissingBlocks(result.missing_blocks.clone()),
        Ok(R::NotLeader) | Err(_) => WriteOutcome::NotLeader,
    }
}
