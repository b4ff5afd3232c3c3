//! Bit level file I/O
//!
//! Values of 1 to 64 bits are packed into a buffer of 64 bit words, least significant
//! bit first.  Words are moved to and from the file little endian, so that bit `n` of
//! the stream is always bit `n % 8` of byte `n / 8`, regardless of host.  For example
//! the word `0xFEDCBA9876543210` is stored as the bytes `10 32 54 76 98 BA DC FE`.
//!
//! A stream is opened either for reading or for writing, never both.

use std::fs::{File,OpenOptions};
use std::io::{Read,Write,ErrorKind};
use std::path::Path;
use std::str::FromStr;
use crate::{Error,EOS};

/// buffer size used by `BitStream::open`, in 64 bit words
pub const DEFAULT_BUFFER_WORDS: usize = 16;
const WORD_BITS: usize = 64;

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Mode {
    Read,
    Write
}

impl FromStr for Mode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "r" | "read" => Ok(Mode::Read),
            "w" | "write" => Ok(Mode::Write),
            _ => Err(Error::InvalidMode(s.to_string()))
        }
    }
}

/// Outcome of a successful read.
/// The end of stream code is reported separately from ordinary values.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Fetch {
    Value(u64),
    EndOfStream
}

impl Fetch {
    /// the raw value that was read, `EndOfStream` maps back to `EOS`
    pub fn value(&self) -> u64 {
        match self {
            Fetch::Value(v) => *v,
            Fetch::EndOfStream => EOS as u64
        }
    }
}

fn mask(width: usize) -> u64 {
    match width >= WORD_BITS {
        true => u64::MAX,
        false => (1 << width) - 1
    }
}

fn check_width(width: usize) -> Result<(),Error> {
    match width {
        1..=WORD_BITS => Ok(()),
        _ => Err(Error::BadWidth(width))
    }
}

/// Buffered bit reader or writer over a byte oriented resource.
/// `next` is the next bit to consume or produce, `end` is one past the last
/// valid bit: the full capacity when writing, the bits filled by the last refill
/// when reading.
pub struct BitStream<F: Read + Write> {
    inner: Option<F>,
    mode: Mode,
    buf: Vec<u64>,
    /// byte image of `buf` used for file transfers
    raw: Vec<u8>,
    next: usize,
    end: usize,
    /// bits read or written by callers so far
    bit_count: u64
}

impl BitStream<File> {
    /// Open a file with the default buffer size.
    /// Writing creates or truncates the file, reading requires it to exist.
    pub fn open<P: AsRef<Path>>(path: P,mode: Mode) -> Result<Self,Error> {
        Self::open_with_buffer(path,mode,DEFAULT_BUFFER_WORDS)
    }
    /// Open a file with a buffer of `buffer_words` 64 bit words
    pub fn open_with_buffer<P: AsRef<Path>>(path: P,mode: Mode,buffer_words: usize) -> Result<Self,Error> {
        // check before the file is touched, truncation is not undoable
        if buffer_words == 0 {
            return Err(Error::BadBufferSize);
        }
        let file = match mode {
            Mode::Read => File::open(path)?,
            Mode::Write => OpenOptions::new().write(true).create(true).truncate(true).open(path)?
        };
        Self::new(file,mode,buffer_words)
    }
}

impl <F: Read + Write> BitStream<F> {
    /// Wrap any byte resource, e.g. `std::fs::File` or `std::io::Cursor<Vec<u8>>`.
    /// Writing starts at the current position of `inner`.
    pub fn new(inner: F,mode: Mode,buffer_words: usize) -> Result<Self,Error> {
        if buffer_words == 0 {
            return Err(Error::BadBufferSize);
        }
        let capacity = buffer_words * WORD_BITS;
        Ok(Self {
            inner: Some(inner),
            mode,
            buf: vec![0;buffer_words],
            raw: vec![0;buffer_words * 8],
            next: 0,
            end: match mode {
                Mode::Read => 0,
                Mode::Write => capacity
            },
            bit_count: 0
        })
    }
    /// buffer capacity in bits
    pub fn capacity(&self) -> usize {
        self.buf.len() * WORD_BITS
    }
    /// number of bits the caller has read or written
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }
    /// Load the buffer with as many bytes as the resource will give, up to its capacity.
    /// Returns the number of bytes loaded, 0 means the resource is exhausted.
    fn refill(&mut self) -> Result<usize,Error> {
        let inner = self.inner.as_mut().ok_or(Error::StreamClosed)?;
        let mut filled = 0;
        while filled < self.raw.len() {
            match inner.read(&mut self.raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind()==ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e))
            }
        }
        self.raw[filled..].fill(0);
        for (word,bytes) in self.buf.iter_mut().zip(self.raw.chunks_exact(8)) {
            let mut le: [u8;8] = [0;8];
            le.copy_from_slice(bytes);
            *word = u64::from_le_bytes(le);
        }
        self.next = 0;
        self.end = filled * 8;
        log::trace!("refill {} bytes",filled);
        Ok(filled)
    }
    /// Write out the bytes covering the bits produced so far, rounding up to a whole byte,
    /// then start over with an empty zeroed buffer.
    fn flush_buffer(&mut self) -> Result<(),Error> {
        if self.mode != Mode::Write {
            return Err(Error::WrongMode(self.mode));
        }
        let inner = self.inner.as_mut().ok_or(Error::StreamClosed)?;
        for (word,bytes) in self.buf.iter().zip(self.raw.chunks_exact_mut(8)) {
            bytes.copy_from_slice(&word.to_le_bytes());
        }
        let len = (self.next + 7) / 8;
        inner.write_all(&self.raw[..len])?;
        log::trace!("flush {} bytes",len);
        self.next = 0;
        self.end = self.capacity();
        self.buf.fill(0);
        Ok(())
    }
    /// Read the next `width` bits as an unsigned value, the first bit read being the LSB.
    /// Running out of data in the middle of a value is an `UnexpectedEof` error.
    pub fn read(&mut self,width: usize) -> Result<Fetch,Error> {
        check_width(width)?;
        if self.mode != Mode::Read {
            return Err(Error::WrongMode(self.mode));
        }
        let mut value: u64 = 0;
        let mut got = 0;
        while got < width {
            if self.next == self.end && self.refill()? == 0 {
                return Err(Error::Io(std::io::Error::new(ErrorKind::UnexpectedEof,"bit stream ended inside a value")));
            }
            let offset = self.next % WORD_BITS;
            let take = (width - got).min(WORD_BITS - offset).min(self.end - self.next);
            let fragment = (self.buf[self.next / WORD_BITS] >> offset) & mask(take);
            // later fragments are the more significant part
            value |= fragment << got;
            got += take;
            self.next += take;
        }
        self.bit_count += width as u64;
        match value == EOS as u64 {
            true => Ok(Fetch::EndOfStream),
            false => Ok(Fetch::Value(value))
        }
    }
    /// Write the low `width` bits of `value`, LSB first.  Higher bits of `value` are ignored.
    pub fn write(&mut self,value: u64,width: usize) -> Result<(),Error> {
        check_width(width)?;
        if self.mode != Mode::Write {
            return Err(Error::WrongMode(self.mode));
        }
        let mut value = value & mask(width);
        let mut left = width;
        while left > 0 {
            if self.next == self.end {
                self.flush_buffer()?;
            }
            let offset = self.next % WORD_BITS;
            let put = left.min(WORD_BITS - offset);
            // bits that do not fit shift out, they go in the next word
            self.buf[self.next / WORD_BITS] |= value << offset;
            value = value.checked_shr(put as u32).unwrap_or(0);
            self.next += put;
            left -= put;
        }
        self.bit_count += width as u64;
        Ok(())
    }
    /// Flush pending bits if writing, and hand back the underlying resource.
    /// If the flush fails the resource is dropped before the error is returned.
    pub fn close(mut self) -> Result<F,Error> {
        let flushed = match self.mode {
            Mode::Write => self.flush_buffer(),
            Mode::Read => Ok(())
        };
        let mut inner = self.inner.take().ok_or(Error::StreamClosed)?;
        flushed?;
        if self.mode == Mode::Write {
            inner.flush()?;
        }
        Ok(inner)
    }
}

impl <F: Read + Write> Drop for BitStream<F> {
    fn drop(&mut self) {
        if self.inner.is_some() && self.mode == Mode::Write {
            if let Err(e) = self.flush_buffer() {
                log::warn!("bit stream dropped without close, pending bits lost: {}",e);
            }
        }
    }
}

/// Print every code up to and including the terminating `EOS` as zero padded hex,
/// 16 codes to a line.  Returns the number of codes printed.
pub fn dump_codes<F: Read + Write,W: Write>(stream: &mut BitStream<F>,width: usize,out: &mut W) -> Result<usize,Error> {
    let digits = (width + 3) / 4;
    let mut count = 0;
    loop {
        let fetch = stream.read(width)?;
        count += 1;
        write!(out,"{:0digits$x}",fetch.value(),digits=digits)?;
        if fetch == Fetch::EndOfStream {
            writeln!(out)?;
            return Ok(count);
        }
        match count % 16 {
            0 => writeln!(out)?,
            _ => write!(out," ")?
        }
    }
}

// *************** TESTS *****************

#[cfg(test)]
use std::io::Cursor;

#[cfg(test)]
fn writer(words: usize) -> BitStream<Cursor<Vec<u8>>> {
    BitStream::new(Cursor::new(Vec::new()),Mode::Write,words).expect("could not create stream")
}

#[cfg(test)]
fn reader(bytes: &[u8],words: usize) -> BitStream<Cursor<Vec<u8>>> {
    BitStream::new(Cursor::new(bytes.to_vec()),Mode::Read,words).expect("could not create stream")
}

/// xorshift, enough to scatter test values
#[cfg(test)]
fn pseudo_random(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

/// independent packer, builds the stream one bit at a time
#[cfg(test)]
fn oracle_lsb0(pairs: &[(u64,usize)]) -> Vec<u8> {
    let mut bits = bit_vec::BitVec::new();
    for (value,width) in pairs {
        for b in 0..*width {
            bits.push((value >> b) & 1 > 0);
        }
    }
    let mut ans = vec![0;(bits.len() + 7) / 8];
    for (i,bit) in bits.iter().enumerate() {
        ans[i / 8] |= (bit as u8) << (i % 8);
    }
    ans
}

#[test]
fn word_is_little_endian() {
    let mut stream = writer(DEFAULT_BUFFER_WORDS);
    stream.write(0xFEDCBA9876543210,64).expect("write failed");
    let bytes = stream.close().expect("close failed").into_inner();
    assert_eq!(bytes,hex::decode("1032547698BADCFE").unwrap());
}

#[test]
fn partial_byte_is_padded() {
    let mut stream = writer(DEFAULT_BUFFER_WORDS);
    stream.write(1,1).expect("write failed");
    assert_eq!(stream.close().expect("close failed").into_inner(),vec![1]);
    let mut stream = writer(DEFAULT_BUFFER_WORDS);
    stream.write(0x1ff,9).expect("write failed");
    assert_eq!(stream.close().expect("close failed").into_inner(),vec![0xff,0x01]);
}

#[test]
fn high_bits_are_ignored() {
    let mut stream = writer(1);
    stream.write(0xfff5,4).expect("write failed");
    stream.write(0,4).expect("write failed");
    assert_eq!(stream.close().expect("close failed").into_inner(),vec![0x05]);
}

#[test]
fn packing_matches_oracle() {
    let mut state = 0x9e3779b97f4a7c15;
    let mut pairs = Vec::new();
    for _i in 0..500 {
        let width = (pseudo_random(&mut state) % 64) as usize + 1;
        pairs.push((pseudo_random(&mut state) & mask(width),width));
    }
    // small buffer so that values straddle many flushes
    let mut stream = writer(2);
    for (value,width) in &pairs {
        stream.write(*value,*width).expect("write failed");
    }
    let bytes = stream.close().expect("close failed").into_inner();
    assert_eq!(bytes,oracle_lsb0(&pairs));
}

#[test]
fn fidelity_across_refills() {
    let mut state = 0x0123456789abcdef;
    let mut pairs = Vec::new();
    for _i in 0..2000 {
        let width = (pseudo_random(&mut state) % 64) as usize + 1;
        pairs.push((pseudo_random(&mut state) & mask(width),width));
    }
    for words in [1,2,3,DEFAULT_BUFFER_WORDS] {
        let mut stream = writer(words);
        for (value,width) in &pairs {
            stream.write(*value,*width).expect("write failed");
        }
        let bytes = stream.close().expect("close failed").into_inner();
        assert!(bytes.len() > words * 8);
        let mut stream = reader(&bytes,words);
        for (value,width) in &pairs {
            assert_eq!(stream.read(*width).expect("read failed").value(),*value);
        }
    }
}

#[test]
fn sentinel_is_reported() {
    let mut stream = writer(DEFAULT_BUFFER_WORDS);
    stream.write(65,9).expect("write failed");
    stream.write(EOS as u64,9).expect("write failed");
    let bytes = stream.close().expect("close failed").into_inner();
    let mut stream = reader(&bytes,DEFAULT_BUFFER_WORDS);
    assert_eq!(stream.read(9).expect("read failed"),Fetch::Value(65));
    assert_eq!(stream.read(9).expect("read failed"),Fetch::EndOfStream);
    assert_eq!(stream.bit_count(),18);
}

#[test]
fn bad_arguments() {
    let mut stream = writer(DEFAULT_BUFFER_WORDS);
    assert!(matches!(stream.write(1,0),Err(Error::BadWidth(0))));
    assert!(matches!(stream.write(1,65),Err(Error::BadWidth(65))));
    assert!(matches!(stream.read(8),Err(Error::WrongMode(Mode::Write))));
    let mut stream = reader(&[0],DEFAULT_BUFFER_WORDS);
    assert!(matches!(stream.read(0),Err(Error::BadWidth(0))));
    assert!(matches!(stream.write(1,8),Err(Error::WrongMode(Mode::Read))));
    assert!(matches!(BitStream::new(Cursor::new(Vec::<u8>::new()),Mode::Read,0),Err(Error::BadBufferSize)));
    assert!(matches!("rw".parse::<Mode>(),Err(Error::InvalidMode(_))));
    assert_eq!("r".parse::<Mode>().unwrap(),Mode::Read);
    assert_eq!("write".parse::<Mode>().unwrap(),Mode::Write);
}

#[test]
fn truncated_value_is_eof() {
    let mut stream = reader(&[0x41],DEFAULT_BUFFER_WORDS);
    match stream.read(9) {
        Err(Error::Io(e)) => assert_eq!(e.kind(),ErrorKind::UnexpectedEof),
        other => panic!("expected eof, got {:?}",other)
    }
}

#[test]
fn file_round_trip() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("codes.bin");
    let mut stream = BitStream::open(&path,Mode::Write).expect("open failed");
    for code in 0..300 {
        stream.write(code,12).expect("write failed");
    }
    stream.close().expect("close failed");
    assert_eq!(std::fs::metadata(&path).unwrap().len(),450);
    let mut stream = BitStream::open_with_buffer(&path,Mode::Read,3).expect("open failed");
    for code in 0..300 {
        assert_eq!(stream.read(12).expect("read failed").value(),code);
    }
    stream.close().expect("close failed");
    assert!(matches!(BitStream::open(dir.path().join("absent"),Mode::Read),Err(Error::Io(_))));
}

#[test]
fn drop_flushes() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let path = dir.path().join("dropped.bin");
    {
        let mut stream = BitStream::open(&path,Mode::Write).expect("open failed");
        stream.write(0x141,9).expect("write failed");
    }
    assert_eq!(std::fs::read(&path).unwrap(),vec![0x41,0x01]);
}

#[test]
fn dump_format() {
    let mut stream = writer(DEFAULT_BUFFER_WORDS);
    for code in 0..17 {
        stream.write(code,12).expect("write failed");
    }
    stream.write(EOS as u64,12).expect("write failed");
    let bytes = stream.close().expect("close failed").into_inner();
    let mut stream = reader(&bytes,DEFAULT_BUFFER_WORDS);
    let mut out: Vec<u8> = Vec::new();
    assert_eq!(dump_codes(&mut stream,12,&mut out).expect("dump failed"),18);
    let expected = "000 001 002 003 004 005 006 007 008 009 00a 00b 00c 00d 00e 00f\n010 100\n";
    assert_eq!(String::from_utf8(out).unwrap(),expected);
}
