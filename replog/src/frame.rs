use bstream::streambuf::{InStreamBuf, OutStreamBuf, INVALID_POSITION};
use bstream::{Buffer, Decoder, Encode, Encoder};

use crate::error::{Error, Result};

/// Identifies a replicant within the cluster.
pub type ReplicantId = u64;

/// Raft election term.
pub type Term = u64;

/// Position of an entry in the replicated sequence.
pub type Index = u64;

/// Byte offset of a frame's envelope from the beginning of the log file.
pub type FilePosition = i64;

/// Discriminates the frames that appear in a log file. The numeric value
/// is the `type` field of the on-disk envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameKind {
    Invalid = 0,
    ReplicantState = 1,
    StateMachineUpdate = 2,
}

impl FrameKind {
    pub fn from_u32(value: u32) -> Option<FrameKind> {
        match value {
            0 => Some(FrameKind::Invalid),
            1 => Some(FrameKind::ReplicantState),
            2 => Some(FrameKind::StateMachineUpdate),
            _ => None,
        }
    }
}

/// Persisted election state of one replicant: its id, current term and the
/// candidate it voted for in that term.
///
/// The dirty flag tracks whether the in-memory value has changed since it
/// was last durably written; it is not part of the encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicantState {
    pos: FilePosition,
    self_id: ReplicantId,
    term: Term,
    vote: ReplicantId,
    dirty: bool,
}

impl ReplicantState {
    pub fn new(self_id: ReplicantId, term: Term, vote: ReplicantId) -> ReplicantState {
        ReplicantState {
            pos: INVALID_POSITION,
            self_id,
            term,
            vote,
            dirty: false,
        }
    }

    pub fn self_id(&self) -> ReplicantId {
        self.self_id
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn vote(&self) -> ReplicantId {
        self.vote
    }

    pub fn file_position(&self) -> FilePosition {
        self.pos
    }

    pub fn set_file_position(&mut self, pos: FilePosition) {
        self.pos = pos;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the in-memory value as durably written.
    pub fn clean(&mut self) {
        self.dirty = false;
    }

    /// Resets to the initial state for `self_id`: term 1, no vote.
    pub fn clear(&mut self, self_id: ReplicantId) {
        self.self_id = self_id;
        self.term = 1;
        self.vote = 0;
        self.dirty = false;
    }

    pub fn set_term(&mut self, term: Term) {
        debug_assert!(term >= self.term, "term must not regress");
        if term != self.term {
            self.term = term;
            self.dirty = true;
        }
    }

    pub fn set_vote(&mut self, vote: ReplicantId) {
        if vote != self.vote {
            self.vote = vote;
            self.dirty = true;
        }
    }

    pub fn update(&mut self, term: Term, vote: ReplicantId) {
        self.set_term(term);
        self.set_vote(vote);
    }

    /// Folds another state for the same replicant into this one.
    pub fn update_from(&mut self, rhs: &ReplicantState) -> Result<()> {
        if rhs.self_id != self.self_id {
            return Err(Error::ServerId {
                expected: self.self_id,
                found: rhs.self_id,
            });
        }
        self.update(rhs.term, rhs.vote);
        Ok(())
    }
}

impl Encode for ReplicantState {
    fn encode<B: OutStreamBuf>(&self, enc: &mut Encoder<B>) -> bstream::Result<()> {
        enc.write_array_header(4)?;
        enc.write_i64(self.pos)?;
        enc.write_u64(self.self_id)?;
        enc.write_u64(self.term)?;
        enc.write_u64(self.vote)
    }
}

impl ReplicantState {
    pub fn decode<B: InStreamBuf>(dec: &mut Decoder<B>) -> Result<ReplicantState> {
        dec.expect_array_header(4)?;
        let pos = dec.read_i64()?;
        let self_id = dec.read_u64()?;
        let term = dec.read_u64()?;
        let vote = dec.read_u64()?;
        Ok(ReplicantState {
            pos,
            self_id,
            term,
            vote,
            dirty: false,
        })
    }
}

/// A state machine update: the payload the consensus layer applies at
/// `index`, stamped with the term it was appended under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachineUpdate {
    pos: FilePosition,
    term: Term,
    index: Index,
    payload: Buffer,
}

impl StateMachineUpdate {
    pub fn new(term: Term, index: Index, payload: impl Into<Buffer>) -> StateMachineUpdate {
        StateMachineUpdate {
            pos: INVALID_POSITION,
            term,
            index,
            payload: payload.into(),
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn index(&self) -> Index {
        self.index
    }

    pub fn payload(&self) -> &Buffer {
        &self.payload
    }

    pub fn file_position(&self) -> FilePosition {
        self.pos
    }

    pub fn set_file_position(&mut self, pos: FilePosition) {
        self.pos = pos;
    }
}

impl Encode for StateMachineUpdate {
    fn encode<B: OutStreamBuf>(&self, enc: &mut Encoder<B>) -> bstream::Result<()> {
        enc.write_array_header(4)?;
        enc.write_i64(self.pos)?;
        enc.write_u64(self.term)?;
        enc.write_u64(self.index)?;
        enc.write_blob(self.payload.as_slice())
    }
}

impl StateMachineUpdate {
    pub fn decode<B: InStreamBuf>(dec: &mut Decoder<B>) -> Result<StateMachineUpdate> {
        dec.expect_array_header(4)?;
        let pos = dec.read_i64()?;
        let term = dec.read_u64()?;
        let index = dec.read_u64()?;
        let payload = dec.read_blob()?;
        Ok(StateMachineUpdate {
            pos,
            term,
            index,
            payload,
        })
    }
}

/// A record written to the log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    ReplicantState(ReplicantState),
    StateMachineUpdate(StateMachineUpdate),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::ReplicantState(_) => FrameKind::ReplicantState,
            Frame::StateMachineUpdate(_) => FrameKind::StateMachineUpdate,
        }
    }

    pub fn file_position(&self) -> FilePosition {
        match self {
            Frame::ReplicantState(s) => s.file_position(),
            Frame::StateMachineUpdate(u) => u.file_position(),
        }
    }

    pub fn as_replicant_state(&self) -> Result<&ReplicantState> {
        match self {
            Frame::ReplicantState(s) => Ok(s),
            _ => Err(Error::FrameType),
        }
    }

    pub fn as_update(&self) -> Result<&StateMachineUpdate> {
        match self {
            Frame::StateMachineUpdate(u) => Ok(u),
            _ => Err(Error::FrameType),
        }
    }

    /// Rebuilds a frame from its encoded payload, dispatching on the
    /// envelope's kind field.
    pub fn decode<B: InStreamBuf>(kind: FrameKind, dec: &mut Decoder<B>) -> Result<Frame> {
        match kind {
            FrameKind::ReplicantState => Ok(Frame::ReplicantState(ReplicantState::decode(dec)?)),
            FrameKind::StateMachineUpdate => {
                Ok(Frame::StateMachineUpdate(StateMachineUpdate::decode(dec)?))
            }
            FrameKind::Invalid => Err(Error::FrameType),
        }
    }
}

impl Encode for Frame {
    fn encode<B: OutStreamBuf>(&self, enc: &mut Encoder<B>) -> bstream::Result<()> {
        match self {
            Frame::ReplicantState(s) => s.encode(enc),
            Frame::StateMachineUpdate(u) => u.encode(enc),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn replicant_state_round_trip() {
        let mut state = ReplicantState::new(7, 3, 2);
        state.set_file_position(128);
        let mut enc = Encoder::memory(64);
        state.encode(&mut enc).unwrap();
        let got =
            ReplicantState::decode(&mut Decoder::from_buffer(enc.buffer().unwrap())).unwrap();
        assert_eq!(got, state);
    }

    #[test]
    fn update_round_trip() {
        let mut update = StateMachineUpdate::new(2, 9, "payload");
        update.set_file_position(4096);
        let mut enc = Encoder::memory(64);
        update.encode(&mut enc).unwrap();
        let got =
            StateMachineUpdate::decode(&mut Decoder::from_buffer(enc.buffer().unwrap())).unwrap();
        assert_eq!(got, update);
        assert_eq!(got.payload().as_slice(), b"payload");
    }

    #[test]
    fn frame_dispatch() {
        let mut enc = Encoder::memory(64);
        StateMachineUpdate::new(1, 1, "x").encode(&mut enc).unwrap();
        let buf = enc.buffer().unwrap();

        let frame = Frame::decode(
            FrameKind::StateMachineUpdate,
            &mut Decoder::from_buffer(buf.clone()),
        )
        .unwrap();
        assert_eq!(frame.kind(), FrameKind::StateMachineUpdate);
        assert!(frame.as_update().is_ok());
        assert!(matches!(
            frame.as_replicant_state(),
            Err(Error::FrameType)
        ));

        assert!(matches!(
            Frame::decode(FrameKind::Invalid, &mut Decoder::from_buffer(buf)),
            Err(Error::FrameType)
        ));
    }

    #[test]
    fn state_change_tracking() {
        let mut state = ReplicantState::new(3, 1, 0);
        assert!(!state.is_dirty());
        state.update(1, 0);
        assert!(!state.is_dirty());
        state.update(2, 3);
        assert!(state.is_dirty());
        state.clean();
        assert!(!state.is_dirty());
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let mut state = ReplicantState::new(3, 1, 0);
        let other = ReplicantState::new(4, 2, 0);
        assert!(matches!(
            state.update_from(&other),
            Err(Error::ServerId {
                expected: 3,
                found: 4
            })
        ));
    }
}
