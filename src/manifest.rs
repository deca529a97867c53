//! Line-oriented gallery manifest.
//!
//! Each non-empty line that does not start with `#` holds one enrolled sample:
//!
//! ```text
//! partition|identity|label|hex-payload
//! right-index|1042|thumb|0a1b2c3d
//! right-index|1043|-|ff00ff00
//! ```
//!
//! A label of `-` means the sample origin is unspecified. Lines that fail to
//! parse are skipped with a warning; they never abort enumeration.

use crate::error::AfisError;
use crate::gallery::{EnrolledRecord, GallerySource};
use crate::template::IdentityKey;
use nom::bytes::complete::{is_not, take_while1};
use nom::character::complete::{char, space0};
use nom::combinator::{all_consuming, map, map_res};
use nom::sequence::preceded;
use nom::{IResult, Parser};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestLine {
    pub partition: String,
    pub record: EnrolledRecord,
}

fn field(input: &str) -> IResult<&str, &str> {
    map(is_not("|"), str::trim).parse(input)
}

fn hex_payload(input: &str) -> IResult<&str, Vec<u8>> {
    map_res(take_while1(|c: char| c.is_ascii_hexdigit()), hex::decode).parse(input)
}

fn parse_line(input: &str) -> IResult<&str, ManifestLine> {
    let (input, (partition, _, identity, _, label, _, payload)) =
        (field, char('|'), field, char('|'), field, char('|'), preceded(space0, hex_payload))
            .parse(input)?;

    let label = match label {
        "-" => None,
        other => Some(other.to_string()),
    };

    Ok((
        input,
        ManifestLine {
            partition: partition.to_string(),
            record: EnrolledRecord {
                identity: IdentityKey::from(identity),
                payload,
                label,
            },
        },
    ))
}

/// Parses a whole manifest, skipping comments, blank and malformed lines.
pub fn parse_manifest(text: &str) -> Vec<ManifestLine> {
    let mut lines = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match all_consuming(parse_line).parse(line) {
            Ok((_, parsed)) => {
                trace!(
                    "manifest line {}: {} in partition {}",
                    number + 1,
                    parsed.record.identity,
                    parsed.partition
                );
                lines.push(parsed);
            }
            Err(err) => {
                warn!("skip malformed manifest line {}: {}", number + 1, err);
            }
        }
    }

    lines
}

enum Backing {
    Text(String),
    File(PathBuf),
}

/// Gallery source backed by a manifest.
///
/// A file-backed source re-reads the file on every enumeration, so a cache
/// reload picks up edits.
pub struct ManifestSource {
    backing: Backing,
}

impl ManifestSource {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { backing: Backing::Text(text.into()) }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self { backing: Backing::File(path.as_ref().to_path_buf()) }
    }
}

impl GallerySource for ManifestSource {
    fn enumerate(&self, partition: &str) -> Result<Vec<EnrolledRecord>, AfisError> {
        let lines = match &self.backing {
            Backing::Text(text) => parse_manifest(text),
            Backing::File(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    AfisError::Source(format!("Failed to read manifest {}: {e}", path.display()))
                })?;
                parse_manifest(&text)
            }
        };

        Ok(lines
            .into_iter()
            .filter(|line| line.partition == partition)
            .map(|line| line.record)
            .collect())
    }
}
