use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use bstream::streambuf::{FileInBuf, FileOutBuf, OpenMode};
use bstream::{Decoder, Encode, Encoder, NumReader, NumWriter};

use crate::error::{Error, Result};
use crate::frame::{
    FilePosition, Frame, FrameKind, Index, ReplicantId, ReplicantState, StateMachineUpdate, Term,
};

/// Initial capacity of the reusable in-memory frame writer.
pub const FRAME_SIZE_HINT: usize = 4096;

/// A durable, append-only sequence of framed records.
///
/// Each frame is wrapped in an envelope of big-endian fields:
///
/// ```text
/// u32 frame_size | u32 kind | frame_size payload bytes | u32 checksum
/// ```
///
/// where the checksum is CRC32-IEEE over the payload bytes only. Every
/// append and every replicant-state write ends with a flush, and an entry
/// becomes visible in memory only after its envelope is durable. The
/// in-memory form holds the state machine updates; replicant-state frames
/// are folded into a single current value (the last one on disk wins).
pub struct Log {
    self_id: ReplicantId,
    state: ReplicantState,
    path: PathBuf,
    temp_path: PathBuf,
    writer: Option<NumWriter<FileOutBuf>>,
    entries: VecDeque<StateMachineUpdate>,
    frame_writer: Encoder<bstream::MemOutBuf>,
}

impl Log {
    /// Binds a log to its file pair. No I/O happens until
    /// [`Log::initialize`] or [`Log::restart`].
    pub fn new(
        self_id: ReplicantId,
        path: impl AsRef<Path>,
        temp_path: impl AsRef<Path>,
    ) -> Log {
        Log {
            self_id,
            state: ReplicantState::new(self_id, 1, 0),
            path: path.as_ref().to_path_buf(),
            temp_path: temp_path.as_ref().to_path_buf(),
            writer: None,
            entries: VecDeque::new(),
            frame_writer: Encoder::memory(FRAME_SIZE_HINT),
        }
    }

    /// Starts a fresh log: truncates the file and persists the given
    /// replicant state. Any existing content is discarded.
    pub fn initialize(
        &mut self,
        self_id: ReplicantId,
        term: Term,
        vote: ReplicantId,
    ) -> Result<()> {
        self.self_id = self_id;
        self.state = ReplicantState::new(self_id, term, vote);
        self.entries.clear();
        self.writer = None;
        self.remove_stale_temp()?;

        let file = FileOutBuf::open(&self.path, OpenMode::Truncate)?;
        self.writer = Some(NumWriter::new(file));
        self.write_state_frame()
    }

    /// Recovers the log from disk and reopens it for appending. A leftover
    /// temp file from an interrupted head-prune is discarded first. On
    /// success a fresh replicant-state frame for `self_id` is written.
    pub fn restart(&mut self, self_id: ReplicantId) -> Result<()> {
        self.self_id = self_id;
        self.state.clear(self_id);
        self.entries.clear();
        self.writer = None;
        self.remove_stale_temp()?;

        self.recover()?;

        let file = FileOutBuf::open(&self.path, OpenMode::Append)?;
        self.writer = Some(NumWriter::new(file));
        self.write_state_frame()?;
        // recovery marks the state dirty while folding frames in; the
        // write above just made it durable
        self.state.clean();
        Ok(())
    }

    /// Appends one state machine update. The entry's file position is
    /// stamped with the envelope's offset, the envelope is flushed, and
    /// only then does the entry become visible in memory.
    pub fn append(&mut self, mut entry: StateMachineUpdate) -> Result<()> {
        if let Some(back) = self.entries.back() {
            debug_assert_eq!(
                entry.index(),
                back.index() + 1,
                "append must keep indices contiguous"
            );
        }
        let writer = self.writer.as_mut().ok_or(Error::NotOpen)?;
        let pos = writer.position()?;
        entry.set_file_position(pos);
        Self::emit_frame(
            writer,
            &mut self.frame_writer,
            FrameKind::StateMachineUpdate,
            &entry,
            true,
        )?;
        self.entries.push_back(entry);
        Ok(())
    }

    /// Persists a new replicant state if it differs from the current one.
    /// A failed write leaves the state dirty so the next successful write
    /// carries the change through.
    pub fn update_replicant_state(&mut self, new_state: &ReplicantState) -> Result<()> {
        self.state.update_from(new_state)?;
        if self.state.is_dirty() {
            self.write_state_frame()?;
            self.state.clean();
        }
        Ok(())
    }

    pub fn update_replicant_state_parts(
        &mut self,
        self_id: ReplicantId,
        term: Term,
        vote: ReplicantId,
    ) -> Result<()> {
        self.update_replicant_state(&ReplicantState::new(self_id, term, vote))
    }

    pub fn current_replicant_state(&self) -> &ReplicantState {
        &self.state
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn first_index(&self) -> Option<Index> {
        self.entries.front().map(StateMachineUpdate::index)
    }

    pub fn last_index(&self) -> Option<Index> {
        self.entries.back().map(StateMachineUpdate::index)
    }

    pub fn front(&self) -> Result<&StateMachineUpdate> {
        self.entries.front().ok_or(Error::IndexOutOfRange)
    }

    pub fn back(&self) -> Result<&StateMachineUpdate> {
        self.entries.back().ok_or(Error::IndexOutOfRange)
    }

    /// Looks up an entry by its log index.
    pub fn get(&self, index: Index) -> Result<&StateMachineUpdate> {
        let first = self.first_index().ok_or(Error::IndexOutOfRange)?;
        let last = self.last_index().ok_or(Error::IndexOutOfRange)?;
        if index < first || index > last {
            return Err(Error::IndexOutOfRange);
        }
        self.entries
            .get((index - first) as usize)
            .ok_or(Error::IndexOutOfRange)
    }

    /// Removes all entries with indices above `index` and truncates the
    /// file to the envelope start of the first removed entry.
    pub fn prune_back(&mut self, index: Index) -> Result<()> {
        let (first, last) = self.index_bounds()?;
        if index < first || index > last {
            return Err(Error::InvalidArgument);
        }
        if index == last {
            return Ok(());
        }

        let mut truncate_at: FilePosition = 0;
        while let Some(back) = self.entries.back() {
            if back.index() <= index {
                break;
            }
            truncate_at = back.file_position();
            self.entries.pop_back();
        }
        match self.entries.back() {
            Some(back) if back.index() == index => {}
            _ => return Err(Error::StateNotRecoverable),
        }
        self.truncate(truncate_at)
    }

    /// Removes all entries with indices below `index` by rewriting the
    /// survivors to the temp file and renaming it over the primary. Each
    /// surviving entry's file position is restamped with its new offset.
    pub fn prune_front(&mut self, index: Index) -> Result<()> {
        let (first, last) = self.index_bounds()?;
        if index < first || index > last {
            return Err(Error::InvalidArgument);
        }
        if index == first {
            return Ok(());
        }

        while let Some(front) = self.entries.front() {
            if front.index() >= index {
                break;
            }
            self.entries.pop_front();
        }
        match self.entries.front() {
            Some(front) if front.index() == index => {}
            _ => return Err(Error::StateNotRecoverable),
        }

        tracing::info!(
            surviving = self.entries.len(),
            "rewriting log head at index {index}"
        );

        if let Some(writer) = self.writer.take() {
            writer.into_inner().close()?;
        }
        let file = FileOutBuf::open(&self.temp_path, OpenMode::Truncate)?;
        let mut writer = NumWriter::new(file);
        for entry in self.entries.iter_mut() {
            let pos = writer.position()?;
            entry.set_file_position(pos);
            Self::emit_frame(
                &mut writer,
                &mut self.frame_writer,
                FrameKind::StateMachineUpdate,
                &*entry,
                false,
            )?;
        }
        let pos = writer.position()?;
        self.state.set_file_position(pos);
        Self::emit_frame(
            &mut writer,
            &mut self.frame_writer,
            FrameKind::ReplicantState,
            &self.state,
            true,
        )?;
        self.state.clean();
        writer.into_inner().close()?;

        // a failed rename is fatal; the temp file is reclaimed on restart
        std::fs::rename(&self.temp_path, &self.path)?;

        let file = FileOutBuf::open(&self.path, OpenMode::Append)?;
        self.writer = Some(NumWriter::new(file));
        Ok(())
    }

    /// Writes the current replicant state and releases the append writer.
    pub fn close(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.write_state_frame()?;
            if let Some(writer) = self.writer.take() {
                writer.into_inner().close()?;
            }
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn index_bounds(&self) -> Result<(Index, Index)> {
        match (self.first_index(), self.last_index()) {
            (Some(first), Some(last)) => Ok((first, last)),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn remove_stale_temp(&self) -> Result<()> {
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => {
                tracing::debug!("removed stale temp file {:?}", self.temp_path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_state_frame(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::NotOpen)?;
        let pos = writer.position()?;
        self.state.set_file_position(pos);
        Self::emit_frame(
            writer,
            &mut self.frame_writer,
            FrameKind::ReplicantState,
            &self.state,
            true,
        )
    }

    /// Serializes `frame` through the reusable in-memory writer and wraps
    /// it in an envelope on `writer`.
    fn emit_frame(
        writer: &mut NumWriter<FileOutBuf>,
        scratch: &mut Encoder<bstream::MemOutBuf>,
        kind: FrameKind,
        frame: &impl Encode,
        flush: bool,
    ) -> Result<()> {
        scratch.clear();
        frame.encode(scratch)?;
        let payload = scratch.buffer()?;
        let pos = writer.position()?;
        tracing::trace!("writing {kind:?} frame of {} bytes at offset {pos}", payload.len());
        writer.put_u32(payload.len() as u32)?;
        writer.put_u32(kind as u32)?;
        writer.putn(payload.as_slice())?;
        writer.put_u32(payload.checksum())?;
        if flush {
            writer.flush()?;
        }
        Ok(())
    }

    /// Scans the file, rebuilding the entry deque and the current
    /// replicant state. Strict: a short read inside an envelope or a
    /// checksum mismatch aborts with [`Error::Checksum`], leaving in
    /// memory exactly the frames consumed so far.
    fn recover(&mut self) -> Result<()> {
        let mut reader = NumReader::new(FileInBuf::open(&self.path)?);
        let file_size = reader.size()? as i64;
        let mut saw_state = false;

        let mut frame_pos = reader.position()?;
        while frame_pos < file_size {
            let (kind, payload) = Self::read_envelope(&mut reader)?;
            let mut dec = Decoder::from_buffer(payload);
            match Frame::decode(kind, &mut dec)? {
                Frame::ReplicantState(state) => {
                    debug_assert_eq!(state.file_position(), frame_pos);
                    self.state.update_from(&state)?;
                    saw_state = true;
                }
                Frame::StateMachineUpdate(mut entry) => {
                    entry.set_file_position(frame_pos);
                    self.entries.push_back(entry);
                }
            }
            frame_pos = reader.position()?;
        }

        if !saw_state {
            return Err(Error::Recovery);
        }
        tracing::debug!(
            entries = self.entries.len(),
            term = self.state.term(),
            "log recovered"
        );
        Ok(())
    }

    fn read_envelope(reader: &mut NumReader<FileInBuf>) -> Result<(FrameKind, bstream::Buffer)> {
        let frame_size = Self::envelope_field(reader.get_u32())?;
        let kind_raw = Self::envelope_field(reader.get_u32())?;
        let kind = FrameKind::from_u32(kind_raw).ok_or(Error::FrameType)?;
        let payload = reader.getn(frame_size as usize)?;
        if payload.len() < frame_size as usize {
            return Err(Error::Checksum);
        }
        let stored = Self::envelope_field(reader.get_u32())?;
        if payload.checksum() != stored {
            return Err(Error::Checksum);
        }
        Ok((kind, payload))
    }

    /// A truncated envelope reads as corruption, not as end of stream.
    fn envelope_field(read: bstream::Result<u32>) -> Result<u32> {
        match read {
            Ok(v) => Ok(v),
            Err(e) if e.is_eof() => Err(Error::Checksum),
            Err(e) => Err(e.into()),
        }
    }

    fn truncate(&mut self, pos: FilePosition) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.into_inner().close()?;
        }
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(pos as u64)?;
        tracing::debug!("truncated log file at offset {pos}");
        let file = FileOutBuf::open(&self.path, OpenMode::Append)?;
        self.writer = Some(NumWriter::new(file));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
        temp_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("log");
            let temp_path = dir.path().join("log.tmp");
            Fixture {
                _dir: dir,
                path,
                temp_path,
            }
        }

        fn log(&self, self_id: ReplicantId) -> Log {
            Log::new(self_id, &self.path, &self.temp_path)
        }

        fn file_len(&self) -> u64 {
            std::fs::metadata(&self.path).unwrap().len()
        }
    }

    fn state_of(log: &Log) -> (u64, u64, u64) {
        let s = log.current_replicant_state();
        (s.self_id(), s.term(), s.vote())
    }

    #[test]
    fn single_append_and_recover() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.append(StateMachineUpdate::new(1, 1, Bytes::from_static(b"hello")))
            .unwrap();
        log.close().unwrap();

        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert_eq!(log.len(), 1);
        let front = log.front().unwrap();
        assert_eq!(front.term(), 1);
        assert_eq!(front.index(), 1);
        assert_eq!(front.payload().as_slice(), b"hello");
        assert_eq!(state_of(&log), (7, 1, 0));
    }

    #[test]
    fn replicant_state_update_survives_restart() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.update_replicant_state_parts(7, 2, 7).unwrap();
        log.close().unwrap();

        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert_eq!(log.len(), 0);
        assert_eq!(state_of(&log), (7, 2, 7));
    }

    #[test]
    fn restart_leaves_state_clean() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 2, 5).unwrap();
        log.close().unwrap();

        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert!(!log.current_replicant_state().is_dirty());
        // an unchanged update right after restart must not grow the file
        let before = fx.file_len();
        log.update_replicant_state_parts(7, 2, 5).unwrap();
        assert_eq!(fx.file_len(), before);
        log.update_replicant_state_parts(7, 3, 5).unwrap();
        assert!(fx.file_len() > before);
    }

    #[test]
    fn unchanged_state_is_not_rewritten() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 2, 1).unwrap();
        let before = fx.file_len();
        log.update_replicant_state_parts(7, 2, 1).unwrap();
        assert_eq!(fx.file_len(), before);
        log.update_replicant_state_parts(7, 3, 1).unwrap();
        assert!(fx.file_len() > before);
    }

    fn four_entries(fx: &Fixture) -> Log {
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        for (i, payload) in [b"a", b"b", b"c", b"d"].into_iter().enumerate() {
            log.append(StateMachineUpdate::new(1, (i + 1) as u64, &payload[..]))
                .unwrap();
        }
        log
    }

    #[test]
    fn prune_back_truncates_the_file() {
        let fx = Fixture::new();
        let mut log = four_entries(&fx);
        let cut_at = log.get(3).unwrap().file_position();

        log.prune_back(2).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.back().unwrap().index(), 2);
        assert_eq!(log.back().unwrap().payload().as_slice(), b"b");
        assert_eq!(fx.file_len(), cut_at as u64);

        log.close().unwrap();
        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.back().unwrap().payload().as_slice(), b"b");
    }

    #[test]
    fn append_after_prune_back_survives_restart() {
        let fx = Fixture::new();
        let mut log = four_entries(&fx);
        log.prune_back(2).unwrap();
        log.append(StateMachineUpdate::new(2, 3, &b"e"[..])).unwrap();
        log.close().unwrap();

        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.back().unwrap().term(), 2);
        assert_eq!(log.back().unwrap().payload().as_slice(), b"e");
    }

    #[test]
    fn prune_back_rejects_bad_indices() {
        let fx = Fixture::new();
        let mut log = four_entries(&fx);
        assert!(matches!(log.prune_back(0), Err(Error::InvalidArgument)));
        assert!(matches!(log.prune_back(5), Err(Error::InvalidArgument)));
        // pruning at the tail is a no-op
        log.prune_back(4).unwrap();
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn prune_front_rewrites_the_file() {
        let fx = Fixture::new();
        let mut log = four_entries(&fx);

        log.prune_front(3).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.front().unwrap().index(), 3);
        assert_eq!(log.front().unwrap().payload().as_slice(), b"c");
        assert_eq!(log.front().unwrap().file_position(), 0);
        assert!(!log.current_replicant_state().is_dirty());
        assert!(!fx.temp_path.exists());

        let positions: Vec<_> = (3..=4)
            .map(|i| log.get(i).unwrap().file_position())
            .collect();
        log.close().unwrap();

        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.front().unwrap().payload().as_slice(), b"c");
        assert_eq!(log.back().unwrap().payload().as_slice(), b"d");
        let recovered: Vec<_> = (3..=4)
            .map(|i| log.get(i).unwrap().file_position())
            .collect();
        assert_eq!(recovered, positions);
    }

    #[test]
    fn corruption_is_detected_on_restart() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.append(StateMachineUpdate::new(1, 1, &b"hello"[..]))
            .unwrap();
        let payload_at = log.front().unwrap().file_position() as u64 + 8;
        log.close().unwrap();

        let mut bytes = std::fs::read(&fx.path).unwrap();
        bytes[payload_at as usize + 2] ^= 0x40;
        std::fs::write(&fx.path, &bytes).unwrap();

        let mut log = fx.log(7);
        assert!(matches!(log.restart(7), Err(Error::Checksum)));
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn truncated_tail_is_corruption() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.append(StateMachineUpdate::new(1, 1, &b"hello"[..]))
            .unwrap();
        log.close().unwrap();

        let bytes = std::fs::read(&fx.path).unwrap();
        std::fs::write(&fx.path, &bytes[..bytes.len() - 2]).unwrap();

        let mut log = fx.log(7);
        assert!(matches!(log.restart(7), Err(Error::Checksum)));
    }

    #[test]
    fn subscript_is_range_checked() {
        let fx = Fixture::new();
        let log = four_entries(&fx);
        assert_eq!(log.get(2).unwrap().payload().as_slice(), b"b");
        assert!(matches!(log.get(0), Err(Error::IndexOutOfRange)));
        assert!(matches!(log.get(5), Err(Error::IndexOutOfRange)));

        let empty = fx.log(9);
        assert!(matches!(empty.front(), Err(Error::IndexOutOfRange)));
        assert!(matches!(empty.get(1), Err(Error::IndexOutOfRange)));
    }

    #[test]
    fn interleaved_state_frames_recover() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.append(StateMachineUpdate::new(1, 1, &b"a"[..])).unwrap();
        log.update_replicant_state_parts(7, 2, 5).unwrap();
        log.append(StateMachineUpdate::new(2, 2, &b"b"[..])).unwrap();
        log.close().unwrap();

        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap().term(), 1);
        assert_eq!(log.get(2).unwrap().term(), 2);
        assert_eq!(state_of(&log), (7, 2, 5));
    }

    #[test]
    fn restart_cleans_up_a_stale_temp_file() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.append(StateMachineUpdate::new(1, 1, &b"a"[..])).unwrap();
        log.close().unwrap();

        std::fs::write(&fx.temp_path, b"leftover from an interrupted prune").unwrap();
        let mut log = fx.log(7);
        log.restart(7).unwrap();
        assert!(!fx.temp_path.exists());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn mismatched_recovery_id_is_rejected() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        log.initialize(7, 1, 0).unwrap();
        log.close().unwrap();

        let mut log = fx.log(8);
        assert!(matches!(
            log.restart(8),
            Err(Error::ServerId {
                expected: 8,
                found: 7
            })
        ));
    }

    #[test]
    fn append_requires_an_open_log() {
        let fx = Fixture::new();
        let mut log = fx.log(7);
        assert!(matches!(
            log.append(StateMachineUpdate::new(1, 1, &b"a"[..])),
            Err(Error::NotOpen)
        ));
    }

    #[test]
    fn file_positions_match_envelope_starts() {
        let fx = Fixture::new();
        let log = four_entries(&fx);
        // each entry's stamped position must point at its length prefix
        for i in 1..=4u64 {
            let entry = log.get(i).unwrap();
            let bytes = std::fs::read(&fx.path).unwrap();
            let at = entry.file_position() as usize;
            let frame_size =
                u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
            let kind =
                u32::from_be_bytes([bytes[at + 4], bytes[at + 5], bytes[at + 6], bytes[at + 7]]);
            assert_eq!(kind, FrameKind::StateMachineUpdate as u32);
            let payload = &bytes[at + 8..at + 8 + frame_size as usize];
            let crc = u32::from_be_bytes([
                bytes[at + 8 + frame_size as usize],
                bytes[at + 9 + frame_size as usize],
                bytes[at + 10 + frame_size as usize],
                bytes[at + 11 + frame_size as usize],
            ]);
            assert_eq!(crc, bstream::CRC32.checksum(payload));
        }
    }
}
