//! The `checkpoint.txt` record format
//!
//! A checkpoint file is a sequence of node records in byte-wise path order,
//! followed by exactly one terminal marker record and end of file.
//!
//! ## Node records
//!
//! ```text
//! <path>\0\t<hash>\tBirth: -\tAccess: <date>\tModify: <date>\tChange: <date>\n
//! ```
//!
//! The path is terminated by NUL because it may contain tabs and newlines.
//! `<hash>` is one of 64 lowercase hex characters, `(directory)`,
//! `(sha256sum failed!)` or `(sha256sum not computed)`. When timestamps could
//! not be read the four timestamp fields are replaced by `(stat failed!)`, and
//! by `(stat not computed)` when reading was never attempted.
//!
//! ## Terminal marker
//!
//! The final record is a NUL-terminated sentinel in place of a path, either
//! [`COMPLETE_MARKER`] or [`INCOMPLETE_MARKER`]. Sentinels never collide with
//! node paths, which always start with `.`. A file without a marker was cut
//! short and is rejected; anything after the marker is rejected as well.

use crate::error::{CheckpointError, Result};
use crate::timestamps::{format_timestamp, parse_timestamp};
use crate::types::{Computed, Node, NodePath, Sha256, Timestamps};
use std::io::{BufRead, Write};
use tracing::trace;

/// Sentinel ending a checkpoint whose every node was processed
pub const COMPLETE_MARKER: &[u8] = b"This checkpoint is complete.\n";

/// Sentinel ending a checkpoint which can be resumed
pub const INCOMPLETE_MARKER: &[u8] = b"This checkpoint is INCOMPLETE but can be resumed.\n";

/// Hash field of directories
pub const HASH_DIRECTORY: &str = "(directory)";

/// Hash field of files which could not be hashed
pub const HASH_FAILED: &str = "(sha256sum failed!)";

/// Hash field of files which were never hashed
pub const HASH_NOT_COMPUTED: &str = "(sha256sum not computed)";

/// Timestamp fields of nodes whose timestamps could not be read
pub const STAT_FAILED: &str = "(stat failed!)";

/// Timestamp fields of nodes whose timestamps were never read
pub const STAT_NOT_COMPUTED: &str = "(stat not computed)";

const BIRTH_ABSENT: &str = "-";

/// Write `nodes` followed by the terminal marker
///
/// The caller is responsible for passing nodes in sort order.
pub fn write_checkpoint<'a, W, I>(writer: &mut W, nodes: I, complete: bool) -> Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a Node>,
{
    let mut record = Vec::with_capacity(256);
    for node in nodes {
        record.clear();
        encode_record(node, &mut record);
        writer.write_all(&record)?;
    }

    writer.write_all(if complete {
        COMPLETE_MARKER
    } else {
        INCOMPLETE_MARKER
    })?;
    writer.write_all(b"\0")?;
    Ok(())
}

/// Append the record of one node to `out`
pub fn encode_record(node: &Node, out: &mut Vec<u8>) {
    out.extend_from_slice(node.path().as_bytes());
    out.extend_from_slice(b"\0\t");

    let hash_field = if node.is_directory() {
        HASH_DIRECTORY.to_string()
    } else {
        match node.hash() {
            Computed::Value(digest) => digest.to_hex(),
            Computed::Failed => HASH_FAILED.to_string(),
            Computed::NotComputed => HASH_NOT_COMPUTED.to_string(),
        }
    };
    out.extend_from_slice(hash_field.as_bytes());
    out.push(b'\t');

    match node.timestamps() {
        Computed::Value(ts) => {
            let fields = format!(
                "Birth: {}\tAccess: {}\tModify: {}\tChange: {}",
                BIRTH_ABSENT,
                format_timestamp(&ts.accessed),
                format_timestamp(&ts.modified),
                format_timestamp(&ts.changed)
            );
            out.extend_from_slice(fields.as_bytes());
        }
        Computed::Failed => out.extend_from_slice(STAT_FAILED.as_bytes()),
        Computed::NotComputed => out.extend_from_slice(STAT_NOT_COMPUTED.as_bytes()),
    }
    out.push(b'\n');
}

/// Read a whole checkpoint file
///
/// # Returns
///
/// The nodes in file order and whether the marker declared the checkpoint
/// complete.
///
/// # Errors
///
/// - [`CheckpointError::Truncated`] if the input ends before a terminal marker
/// - [`CheckpointError::MalformedRecord`] for unparsable records, records out
///   of order, duplicate paths or data after the marker
/// - [`CheckpointError::Io`] if reading fails
pub fn read_checkpoint<R: BufRead>(reader: &mut R) -> Result<(Vec<Node>, bool)> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut path_buf = Vec::new();
    let mut rest_buf = Vec::new();

    loop {
        let record_no = nodes.len() + 1;

        path_buf.clear();
        let read = reader.read_until(b'\0', &mut path_buf)?;
        if read == 0 {
            return Err(CheckpointError::Truncated(format!(
                "no end marker after {} records",
                nodes.len()
            )));
        }
        if path_buf.pop() != Some(b'\0') {
            return Err(CheckpointError::Truncated(format!(
                "record #{} has no path terminator",
                record_no
            )));
        }

        if let Some(complete) = marker_kind(&path_buf) {
            if !reader.fill_buf()?.is_empty() {
                return Err(CheckpointError::malformed(
                    record_no,
                    "data after the end marker",
                ));
            }
            trace!("Read {} records, complete: {}", nodes.len(), complete);
            return Ok((nodes, complete));
        }

        rest_buf.clear();
        reader.read_until(b'\n', &mut rest_buf)?;
        if rest_buf.pop() != Some(b'\n') {
            return Err(CheckpointError::Truncated(format!(
                "record #{} is cut short",
                record_no
            )));
        }

        let node = decode_record(record_no, &path_buf, &rest_buf)?;
        if let Some(previous) = nodes.last() {
            if previous.path() >= node.path() {
                return Err(CheckpointError::malformed(
                    record_no,
                    format!(
                        "path {} does not sort after {}",
                        node.path(),
                        previous.path()
                    ),
                ));
            }
        }
        nodes.push(node);
    }
}

fn marker_kind(path: &[u8]) -> Option<bool> {
    if path == COMPLETE_MARKER {
        Some(true)
    } else if path == INCOMPLETE_MARKER {
        Some(false)
    } else {
        None
    }
}

/// Parse one node record from its path bytes and the text after the NUL
pub fn decode_record(record_no: usize, path: &[u8], fields: &[u8]) -> Result<Node> {
    let path = NodePath::new(path.to_vec())
        .map_err(|e| CheckpointError::malformed(record_no, e.to_string()))?;

    let fields = std::str::from_utf8(fields)
        .map_err(|_| CheckpointError::malformed(record_no, "fields are not UTF-8"))?;
    let fields = fields
        .strip_prefix('\t')
        .ok_or_else(|| CheckpointError::malformed(record_no, "missing tab after path"))?;

    let (hash_field, stat_fields) = fields
        .split_once('\t')
        .ok_or_else(|| CheckpointError::malformed(record_no, "missing timestamp fields"))?;

    let (is_directory, hash) = match hash_field {
        HASH_DIRECTORY => (true, Computed::NotComputed),
        HASH_FAILED => (false, Computed::Failed),
        HASH_NOT_COMPUTED => (false, Computed::NotComputed),
        hex => (false, Computed::Value(Sha256::from_hex(hex)?)),
    };

    let timestamps = match stat_fields {
        STAT_FAILED => Computed::Failed,
        STAT_NOT_COMPUTED => Computed::NotComputed,
        fields => Computed::Value(decode_timestamps(record_no, fields)?),
    };

    Node::with_data(path, is_directory, 0, hash, timestamps)
}

fn decode_timestamps(record_no: usize, fields: &str) -> Result<Timestamps> {
    let parts: Vec<&str> = fields.split('\t').collect();
    let [birth, access, modify, change] = parts.as_slice() else {
        return Err(CheckpointError::malformed(
            record_no,
            format!("expected 4 timestamp fields, found {}", parts.len()),
        ));
    };

    let field = |text: &str, label: &str| -> Result<String> {
        text.strip_prefix(label)
            .map(str::to_string)
            .ok_or_else(|| CheckpointError::malformed(record_no, format!("expected '{}'", label)))
    };

    let birth = field(*birth, "Birth: ")?;
    if birth != BIRTH_ABSENT {
        // Birth time is never used; only make sure it is a date
        parse_timestamp(&birth)?;
    }

    Ok(Timestamps::new(
        parse_timestamp(&field(*access, "Access: ")?)?,
        parse_timestamp(&field(*modify, "Modify: ")?)?,
        parse_timestamp(&field(*change, "Change: ")?)?,
    ))
}
