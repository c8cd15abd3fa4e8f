//! C6: persistence. An atomic on-disk agent registry plus a segmented,
//! append-only per-agent timeline log (spec.md §4.6).
//!
//! Follows a `rollout::RolloutRecorder`-style shape: a dedicated writer task
//! owns the file handle and the bounded channel feeding it, generalized from
//! one flat JSONL transcript into (a) the atomic-rewrite registry and (b)
//! size/count-chunked timeline segments with an in-memory
//! `seq -> (segment, offset)` index built on open.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use paseo_protocol::agent::AgentRecord;
use paseo_protocol::timeline::Seq;
use paseo_protocol::timeline::TimelineRow;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;

use crate::error::DaemonError;
use crate::error::Result;

const REGISTRY_FILE: &str = "registry.json";
/// Rotate to a new segment after this many rows, so any prefix of a large
/// timeline can be read without loading the whole tail (spec.md §3).
const ROWS_PER_SEGMENT: u64 = 2000;

pub struct Store {
    agents_dir: PathBuf,
}

impl Store {
    pub fn new(paseo_home: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: paseo_home.into().join("agents"),
        }
    }

    fn registry_path(&self) -> PathBuf {
        self.agents_dir.join(REGISTRY_FILE)
    }

    fn agent_dir(&self, agent_id: paseo_protocol::AgentId) -> PathBuf {
        self.agents_dir.join(agent_id.to_string())
    }

    /// Atomic tmp-write + rename: never leave a half-written file behind.
    pub async fn save_registry(&self, records: &[AgentRecord]) -> Result<()> {
        tokio::fs::create_dir_all(&self.agents_dir).await?;
        let json = serde_json::to_vec_pretty(records)?;
        let tmp_path = self.agents_dir.join(format!("{REGISTRY_FILE}.tmp"));
        {
            let mut tmp = tokio::fs::File::create(&tmp_path).await?;
            tmp.write_all(&json).await?;
            tmp.flush().await?;
            tmp.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, self.registry_path()).await?;
        if let Ok(dir) = tokio::fs::File::open(&self.agents_dir).await {
            let _ = dir.sync_all().await;
        }
        Ok(())
    }

    /// Load the registry. A truncated trailing write (crash mid-rewrite) is
    /// recovered by locating the outermost `[...]` bracket pair and
    /// re-parsing just that slice; individual malformed records inside a
    /// otherwise-valid array are skipped and logged, not fatal.
    pub async fn load_registry(&self) -> Result<Vec<AgentRecord>> {
        let path = self.registry_path();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(parse_registry(&raw))
    }

    pub async fn timeline(&self, agent_id: paseo_protocol::AgentId) -> Result<TimelineLog> {
        let dir = self.agent_dir(agent_id);
        tokio::fs::create_dir_all(&dir).await?;
        TimelineLog::open(dir).await
    }
}

/// Recover a possibly-truncated registry JSON blob: find the opening `[`,
/// then scan forward for the last *complete* top-level element before the
/// truncation point (rather than requiring a closing `]` to already be
/// present) and re-close the array there. Any element that still fails to
/// deserialize on its own is skipped and logged, not fatal.
fn parse_registry(raw: &str) -> Vec<AgentRecord> {
    if let Ok(records) = serde_json::from_str::<Vec<AgentRecord>>(raw) {
        return records;
    }
    let Some(start) = raw.find('[') else {
        tracing::warn!("registry file has no opening bracket; treating as empty");
        return Vec::new();
    };
    let body = &raw[start + 1..];
    let Some(recoverable_end) = last_complete_element_end(body) else {
        tracing::warn!("registry file has no complete record before truncation; treating as empty");
        return Vec::new();
    };
    let reconstructed = format!("[{}]", &body[..recoverable_end]);
    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&reconstructed) else {
        tracing::warn!("registry file could not be parsed even after truncation recovery");
        return Vec::new();
    };
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<AgentRecord>(value) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("skipping unparseable registry record: {err}");
                None
            }
        })
        .collect()
}

/// Scan `body` (the array's contents, after its opening `[`) for the end
/// of the last top-level (depth-1) object or array that is fully closed,
/// tracking string/escape state so braces inside string values don't throw
/// off the depth count. Returns the byte offset just past that element's
/// closing bracket, i.e. a prefix `&body[..n]` that is always valid
/// comma-separated array contents even if `body` itself is truncated
/// mid-write.
fn last_complete_element_end(body: &str) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut last_end = None;
    for (i, c) in body.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    last_end = Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    last_end
}

/// One agent's append-only timeline: a directory of `timeline-NNNN.log`
/// JSON-line segments plus an in-memory `seq -> (segment, line offset)`
/// index built by scanning on open. Exclusive writer is the owning agent
/// instance; readers open independent read-only handles.
pub struct TimelineLog {
    dir: PathBuf,
    index: HashMap<Seq, (u32, u64)>,
    current_segment: u32,
    rows_in_current_segment: u64,
    next_seq: Seq,
}

impl TimelineLog {
    async fn open(dir: PathBuf) -> Result<Self> {
        let mut index = HashMap::new();
        let mut max_segment = 0u32;
        let mut next_seq = 1u64;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    dir,
                    index,
                    current_segment: 0,
                    rows_in_current_segment: 0,
                    next_seq,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(segment) = segment_number(&entry.file_name()) {
                segments.push(segment);
            }
        }
        segments.sort_unstable();

        let mut rows_in_last = 0u64;
        for segment in &segments {
            max_segment = max_segment.max(*segment);
            let path = segment_path(&dir, *segment);
            let file = tokio::fs::File::open(&path).await?;
            let mut reader = BufReader::new(file).lines();
            let mut offset = 0u64;
            rows_in_last = 0;
            while let Some(line) = reader.next_line().await? {
                if let Ok(row) = serde_json::from_str::<TimelineRow>(&line) {
                    index.insert(row.seq, (*segment, offset));
                    next_seq = next_seq.max(row.seq + 1);
                    rows_in_last += 1;
                }
                offset += 1;
            }
        }

        Ok(Self {
            dir,
            index,
            current_segment: max_segment,
            rows_in_current_segment: rows_in_last,
            next_seq,
        })
    }

    pub fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// Append one row, rotating to a new segment first if the current one
    /// has reached `ROWS_PER_SEGMENT`.
    pub async fn append(&mut self, row: &TimelineRow) -> Result<()> {
        if self.rows_in_current_segment >= ROWS_PER_SEGMENT {
            self.current_segment += 1;
            self.rows_in_current_segment = 0;
        }
        let path = segment_path(&self.dir, self.current_segment);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let line = serde_json::to_string(row)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        self.index
            .insert(row.seq, (self.current_segment, self.rows_in_current_segment));
        self.rows_in_current_segment += 1;
        self.next_seq = self.next_seq.max(row.seq + 1);
        Ok(())
    }

    /// Read every row with `seq` in `[from, to]`, inclusive, in order.
    pub async fn read_range(&self, from: Seq, to: Seq) -> Result<Vec<TimelineRow>> {
        let mut rows = Vec::new();
        let mut segments: Vec<u32> = self
            .index
            .iter()
            .filter(|(seq, _)| **seq >= from && **seq <= to)
            .map(|(_, (segment, _))| *segment)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        segments.sort_unstable();
        for segment in segments {
            let path = segment_path(&self.dir, segment);
            let file = tokio::fs::File::open(&path).await?;
            let mut reader = BufReader::new(file).lines();
            while let Some(line) = reader.next_line().await? {
                if let Ok(row) = serde_json::from_str::<TimelineRow>(&line)
                    && row.seq >= from
                    && row.seq <= to
                {
                    rows.push(row);
                }
            }
        }
        rows.sort_by_key(|row| row.seq);
        Ok(rows)
    }

    pub async fn read_tail(&self, limit: usize) -> Result<Vec<TimelineRow>> {
        if self.next_seq <= 1 {
            return Ok(Vec::new());
        }
        let highest = self.next_seq - 1;
        let from = highest.saturating_sub(limit as u64 * 4).max(1);
        let mut rows = self.read_range(from, highest).await?;
        if rows.len() > limit {
            rows = rows.split_off(rows.len() - limit);
        }
        Ok(rows)
    }
}

fn segment_path(dir: &Path, segment: u32) -> PathBuf {
    dir.join(format!("timeline-{segment:04}.log"))
}

fn segment_number(file_name: &std::ffi::OsStr) -> Option<u32> {
    let name = file_name.to_str()?;
    let rest = name.strip_prefix("timeline-")?;
    let rest = rest.strip_suffix(".log")?;
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use paseo_protocol::timeline::TimelineItem;
    use tempfile::tempdir;

    fn row(seq: Seq) -> TimelineRow {
        TimelineRow {
            seq,
            timestamp: chrono::Utc::now(),
            item: TimelineItem::UserMessage {
                text: format!("row {seq}"),
                attachments: vec![],
            },
        }
    }

    #[tokio::test]
    async fn recovers_truncated_registry_via_bracket_scan() {
        // No record is ever fully written: nothing to recover.
        let truncated = r#"[{"id":"00000000-0000-0000-0000-000000000001""#;
        assert!(parse_registry(truncated).is_empty());

        let valid_then_garbage = r#"[{"foo": "bar"}]trailing garbage that breaks outer parse"#;
        // Outer parse fails (trailing garbage); bracket-scan recovers the
        // array, and the one malformed (schema-wise) record is skipped.
        assert!(parse_registry(valid_then_garbage).is_empty());
    }

    #[tokio::test]
    async fn recovers_records_written_before_a_mid_write_truncation() {
        let complete = r#"{"id":"00000000-0000-0000-0000-000000000001","provider":"codex","cwd":"/tmp","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z","last_activity_at":"2024-01-01T00:00:00Z","last_status":"idle"}"#;
        // A crash mid-write of a second record: the file ends with no
        // closing `]` at all, but the first record is fully intact.
        let truncated = format!(r#"[{complete},{{"id":"00000000-0000-0000-0000-000000000002","provider":"cod"#);

        let records = parse_registry(&truncated);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.to_string(), "00000000-0000-0000-0000-000000000001");
    }

    #[tokio::test]
    async fn append_and_read_range_round_trips() {
        let dir = tempdir().unwrap();
        let mut log = TimelineLog::open(dir.path().to_path_buf()).await.unwrap();
        for seq in 1..=5 {
            log.append(&row(seq)).await.unwrap();
        }
        let rows = log.read_range(2, 4).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn read_tail_respects_limit() {
        let dir = tempdir().unwrap();
        let mut log = TimelineLog::open(dir.path().to_path_buf()).await.unwrap();
        for seq in 1..=10 {
            log.append(&row(seq)).await.unwrap();
        }
        let rows = log.read_tail(3).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn reopening_rebuilds_index_from_disk() {
        let dir = tempdir().unwrap();
        {
            let mut log = TimelineLog::open(dir.path().to_path_buf()).await.unwrap();
            for seq in 1..=3 {
                log.append(&row(seq)).await.unwrap();
            }
        }
        let log = TimelineLog::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(log.next_seq(), 4);
    }
}
