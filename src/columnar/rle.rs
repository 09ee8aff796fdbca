use super::encoding::{Decodable, DecodeError, Decoder, Encodable};
use core::fmt::Debug;
use std::mem;

/// Run length encoder.
///
/// The stream is a sequence of groups, each introduced by a signed control
/// integer: a positive `n` means "`n` copies of the next value", a negative
/// `n` means "`|n|` distinct literal values follow", and zero means "a null
/// run; the unsigned count follows". The encoder buffers one pending run or
/// literal group and flushes whenever the kind changes.
pub(crate) struct RleEncoder<T>
where
    T: Encodable + PartialEq + Clone,
{
    buf: Vec<u8>,
    state: RleState<T>,
}

enum RleState<T> {
    Empty,
    NullRun(usize),
    LiteralRun(T, Vec<T>),
    LoneVal(T),
    Run(T, usize),
}

impl<T> RleEncoder<T>
where
    T: Encodable + PartialEq + Clone,
{
    pub fn new() -> RleEncoder<T> {
        RleEncoder {
            buf: Vec::new(),
            state: RleState::Empty,
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        match self.take_state() {
            // this covers `only_nulls`
            RleState::NullRun(size) => {
                if !self.buf.is_empty() {
                    self.flush_null_run(size);
                }
            }
            RleState::LoneVal(value) => self.flush_lit_run(vec![value]),
            RleState::Run(value, len) => self.flush_run(value, len),
            RleState::LiteralRun(last, mut run) => {
                run.push(last);
                self.flush_lit_run(run);
            }
            RleState::Empty => {}
        }
        self.buf
    }

    fn flush_run(&mut self, val: T, len: usize) {
        self.encode(len as i64);
        self.encode(val);
    }

    fn flush_null_run(&mut self, len: usize) {
        self.encode(0_i64);
        self.encode(len);
    }

    fn flush_lit_run(&mut self, run: Vec<T>) {
        self.encode(-(run.len() as i64));
        for val in run {
            self.encode(val);
        }
    }

    fn take_state(&mut self) -> RleState<T> {
        let mut state = RleState::Empty;
        mem::swap(&mut self.state, &mut state);
        state
    }

    pub fn append_null(&mut self) {
        self.state = match self.take_state() {
            RleState::Empty => RleState::NullRun(1),
            RleState::NullRun(size) => RleState::NullRun(size + 1),
            RleState::LoneVal(other) => {
                self.flush_lit_run(vec![other]);
                RleState::NullRun(1)
            }
            RleState::Run(other, len) => {
                self.flush_run(other, len);
                RleState::NullRun(1)
            }
            RleState::LiteralRun(last, mut run) => {
                run.push(last);
                self.flush_lit_run(run);
                RleState::NullRun(1)
            }
        }
    }

    pub fn append_value(&mut self, value: T) {
        self.state = match self.take_state() {
            RleState::Empty => RleState::LoneVal(value),
            RleState::LoneVal(other) => {
                if other == value {
                    RleState::Run(value, 2)
                } else {
                    RleState::LiteralRun(value, vec![other])
                }
            }
            RleState::Run(other, len) => {
                if other == value {
                    RleState::Run(other, len + 1)
                } else {
                    self.flush_run(other, len);
                    RleState::LoneVal(value)
                }
            }
            RleState::LiteralRun(last, mut run) => {
                if last == value {
                    self.flush_lit_run(run);
                    RleState::Run(value, 2)
                } else {
                    run.push(last);
                    RleState::LiteralRun(value, run)
                }
            }
            RleState::NullRun(size) => {
                self.flush_null_run(size);
                RleState::LoneVal(value)
            }
        }
    }

    pub fn append(&mut self, value: Option<T>) {
        match value {
            Some(t) => self.append_value(t),
            None => self.append_null(),
        }
    }

    fn encode<V: Encodable>(&mut self, val: V) {
        val.encode_to_vec(&mut self.buf);
    }
}

/// Run length decoder.
///
/// Once the underlying stream is exhausted at a group boundary the decoder
/// keeps yielding nulls; this is what allows optional columns to be omitted
/// entirely from a chunk. Truncation inside a group is an error.
#[derive(Debug)]
pub(crate) struct RleDecoder<'a, T> {
    decoder: Decoder<'a>,
    last_value: Option<T>,
    count: isize,
    literal: bool,
}

impl<'a, T> From<&'a [u8]> for RleDecoder<'a, T> {
    fn from(bytes: &'a [u8]) -> Self {
        RleDecoder {
            decoder: Decoder::new(bytes),
            last_value: None,
            count: 0,
            literal: false,
        }
    }
}

impl<'a, T> RleDecoder<'a, T>
where
    T: Clone + Debug + Decodable,
{
    pub fn next(&mut self) -> Result<Option<T>, DecodeError> {
        while self.count == 0 {
            if self.decoder.done() {
                // exhausted column: everything else is null
                return Ok(None);
            }
            let control = self.decoder.read::<i64>()?;
            if control > 0 {
                self.count = control as isize;
                self.last_value = Some(self.decoder.read()?);
                self.literal = false;
            } else if control < 0 {
                self.count = control.unsigned_abs() as isize;
                self.literal = true;
            } else {
                self.count = self.decoder.read::<usize>()? as isize;
                self.last_value = None;
                self.literal = false;
            }
        }
        self.count -= 1;
        if self.literal {
            Ok(Some(self.decoder.read()?))
        } else {
            Ok(self.last_value.clone())
        }
    }

    pub fn done(&self) -> bool {
        self.count == 0 && self.decoder.done()
    }
}
