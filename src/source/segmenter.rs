use std::io::BufRead;

use tracing::{debug, trace};

use crate::constants::parsing::{FOOTER_SENTINEL, GROUP_KEY_SEPARATOR, HEADER_SENTINEL};
use crate::errors::SyncError;
use crate::parsing::parse_line;
use crate::source::{Block, LineGroup, RecordType};
use crate::types::GroupKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SegmenterState {
    AwaitingHeader,
    InBody,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RangeState {
    Before,
    Inside,
    After,
}

/// Streaming grouper for one extract.
///
/// Feed lines with [`LineSegmenter::push_line`] and close the stream with
/// [`LineSegmenter::finish`]. A group is handed to the `emit` callback only
/// once a different key (or the end of the stream) proves it complete.
#[derive(Debug)]
pub struct LineSegmenter {
    state: SegmenterState,
    range: RangeState,
    record_type: Option<RecordType>,
    start_key: Option<GroupKey>,
    end_key: Option<GroupKey>,
    current: Option<LineGroup>,
}

impl LineSegmenter {
    /// Segmenter that emits every group in the file.
    pub fn new() -> Self {
        Self::bounded(&Block::unbounded())
    }

    /// Segmenter that emits only the groups inside `block`, bounds inclusive.
    pub fn bounded(block: &Block) -> Self {
        let range = if block.start_key.is_some() {
            RangeState::Before
        } else {
            RangeState::Inside
        };
        Self {
            state: SegmenterState::AwaitingHeader,
            range,
            record_type: None,
            start_key: block.start_key.clone(),
            end_key: block.end_key.clone(),
            current: None,
        }
    }

    /// Record type named by the header, once seen.
    pub fn record_type(&self) -> Option<RecordType> {
        self.record_type
    }

    /// True once the end key group has been flushed; later lines are ignored.
    pub fn is_exhausted(&self) -> bool {
        self.range == RangeState::After
    }

    /// Feed one raw line.
    pub fn push_line<F>(&mut self, line: &str, emit: &mut F) -> Result<(), SyncError>
    where
        F: FnMut(LineGroup) -> Result<(), SyncError>,
    {
        if self.state == SegmenterState::Closed {
            return Err(SyncError::SegmenterClosed);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(());
        }
        let fields = parse_line(line, None);
        let first = fields.first().map(String::as_str).unwrap_or_default();
        if first == HEADER_SENTINEL {
            let name = fields.get(1).map(String::as_str).unwrap_or_default();
            let record_type = name.parse::<RecordType>()?;
            debug!(record_type = %record_type, "extract header");
            self.record_type = Some(record_type);
            self.state = SegmenterState::InBody;
            return Ok(());
        }
        if first == FOOTER_SENTINEL {
            trace!("footer line discarded");
            return Ok(());
        }
        let Some(record_type) = self.record_type else {
            return Err(SyncError::MissingHeader {
                line: line.to_string(),
            });
        };

        let key = group_key(record_type, &fields);
        if let Some(current) = &self.current
            && current.key != key
        {
            self.flush(emit)?;
        }
        if self.range == RangeState::Before && self.start_key.as_deref() == Some(key.as_str()) {
            self.range = RangeState::Inside;
        }
        if self.range != RangeState::Inside {
            return Ok(());
        }
        match &mut self.current {
            Some(current) => current.lines.push(line.to_string()),
            None => {
                self.current = Some(LineGroup {
                    key,
                    record_type,
                    lines: vec![line.to_string()],
                });
            }
        }
        Ok(())
    }

    /// Close the stream and flush the final group.
    pub fn finish<F>(&mut self, emit: &mut F) -> Result<(), SyncError>
    where
        F: FnMut(LineGroup) -> Result<(), SyncError>,
    {
        if self.state == SegmenterState::Closed {
            return Ok(());
        }
        self.flush(emit)?;
        self.state = SegmenterState::Closed;
        Ok(())
    }

    fn flush<F>(&mut self, emit: &mut F) -> Result<(), SyncError>
    where
        F: FnMut(LineGroup) -> Result<(), SyncError>,
    {
        let Some(group) = self.current.take() else {
            return Ok(());
        };
        if self.end_key.as_deref() == Some(group.key.as_str()) {
            self.range = RangeState::After;
        }
        emit(group)
    }
}

impl Default for LineSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

fn group_key(record_type: RecordType, fields: &[String]) -> GroupKey {
    let first = fields.first().map(String::as_str).unwrap_or_default();
    if record_type.uses_two_part_key() {
        let second = fields.get(1).map(String::as_str).unwrap_or_default();
        format!("{first}{GROUP_KEY_SEPARATOR}{second}")
    } else {
        first.to_string()
    }
}

/// Counts flushed groups and cuts a block every `block_size` groups.
#[derive(Debug)]
pub struct BlockSplitter {
    block_size: usize,
    groups_in_block: usize,
    block_start: Option<GroupKey>,
}

impl BlockSplitter {
    /// Splitter emitting blocks of `block_size` groups (at least one).
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            groups_in_block: 0,
            block_start: None,
        }
    }

    /// Record one flushed group key; returns a block when the count is reached.
    pub fn observe(&mut self, key: &str) -> Option<Block> {
        if self.block_start.is_none() {
            self.block_start = Some(key.to_string());
        }
        self.groups_in_block += 1;
        if self.groups_in_block < self.block_size {
            return None;
        }
        self.groups_in_block = 0;
        Some(Block {
            start_key: self.block_start.take(),
            end_key: Some(key.to_string()),
        })
    }

    /// Emit the trailing partial block, open-ended, if any groups remain.
    pub fn finish(&mut self) -> Option<Block> {
        self.groups_in_block = 0;
        self.block_start.take().map(|start| Block {
            start_key: Some(start),
            end_key: None,
        })
    }
}

/// Read every group inside `block` from `reader`.
///
/// Reading stops as soon as the end key group has been flushed.
pub fn collect_line_groups<R: BufRead>(
    reader: R,
    block: &Block,
) -> Result<(Option<RecordType>, Vec<LineGroup>), SyncError> {
    let mut segmenter = LineSegmenter::bounded(block);
    let mut groups = Vec::new();
    let mut emit = |group: LineGroup| {
        groups.push(group);
        Ok(())
    };
    for line in reader.lines() {
        segmenter.push_line(&line?, &mut emit)?;
        if segmenter.is_exhausted() {
            break;
        }
    }
    segmenter.finish(&mut emit)?;
    Ok((segmenter.record_type(), groups))
}

/// Scan a whole extract and cut it into blocks of `block_size` groups.
///
/// Only group keys are retained; line content is dropped as soon as a group
/// is flushed.
pub fn split_blocks<R: BufRead>(
    reader: R,
    block_size: usize,
) -> Result<(RecordType, Vec<Block>), SyncError> {
    let mut segmenter = LineSegmenter::new();
    let mut splitter = BlockSplitter::new(block_size);
    let mut blocks = Vec::new();
    let mut emit = |group: LineGroup| {
        if let Some(block) = splitter.observe(&group.key) {
            blocks.push(block);
        }
        Ok(())
    };
    for line in reader.lines() {
        segmenter.push_line(&line?, &mut emit)?;
    }
    segmenter.finish(&mut emit)?;
    let record_type = segmenter
        .record_type()
        .ok_or_else(|| SyncError::MissingHeader {
            line: String::new(),
        })?;
    if let Some(block) = splitter.finish() {
        blocks.push(block);
    }
    debug!(record_type = %record_type, blocks = blocks.len(), "extract split");
    Ok((record_type, blocks))
}
