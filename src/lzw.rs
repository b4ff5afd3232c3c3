//! LZW Compression
//!
//! Every code has the same width.  The dictionary is rebuilt whenever the code space is
//! used up, or the table is more than half full, which keeps probe sequences short.
//! The decoder applies the same rule at the same point in the stream, so there is no
//! clear code.  The stream is terminated by the code `EOS`.
//!
//! Nothing about the parameters is stored in the stream, both ends have to be given
//! the same `Options`.  Expanding with the wrong options produces garbage, or at best
//! an error, it is not detected in general.

use std::fs::File;
use std::io::{Cursor,Read,Write,BufReader,BufWriter};
use std::path::Path;
use crate::tools::bit_stream::{BitStream,Mode,Fetch,DEFAULT_BUFFER_WORDS};
use crate::tools::dictionary::{Dictionary,Metrics};
use crate::{Code,Symbol,Error,DYNERR,EOS,FIRST_CODE,ROOT_CODE,SYMBOLS};

/// smallest code width that leaves room for a learned code after `EOS`
pub const MIN_CODE_WIDTH: usize = 9;
pub const MAX_CODE_WIDTH: usize = Code::BITS as usize;

/// Options controlling compression
#[derive(Clone,Debug)]
pub struct Options {
    /// width in bits of every code
    pub bits: usize,
    /// number of dictionary slots, must exceed the 257 root entries
    pub capacity: usize,
    /// size of the bit stream buffer in 64 bit words, does not affect the format
    pub buffer_words: usize
}

pub const STD_OPTIONS: Options = Options {
    bits: 12,
    capacity: 4096,
    buffer_words: DEFAULT_BUFFER_WORDS
};

impl Options {
    /// Options for the given code width with the customary capacity of `2^bits`
    pub fn with_bits(bits: usize) -> Self {
        Self {
            bits,
            capacity: 1usize.checked_shl(bits as u32).unwrap_or(0),
            buffer_words: DEFAULT_BUFFER_WORDS
        }
    }
    pub fn validate(&self) -> Result<(),Error> {
        if self.bits < MIN_CODE_WIDTH || self.bits > MAX_CODE_WIDTH {
            return Err(Error::BadCodeWidth(self.bits));
        }
        if self.capacity <= SYMBOLS {
            return Err(Error::DictionaryTooSmall(self.capacity));
        }
        if self.buffer_words == 0 {
            return Err(Error::BadBufferSize);
        }
        Ok(())
    }
    fn max_code(&self) -> u64 {
        (1u64 << self.bits) - 1
    }
}

/// Accounting for one run
#[derive(Clone,Copy,Default,Debug)]
pub struct Stats {
    /// bytes consumed
    pub in_size: u64,
    /// bytes produced
    pub out_size: u64,
    /// codes written or read, including `EOS`
    pub codes: u64,
    /// dictionary rebuilds, not counting the initial one
    pub resets: u64,
    pub metrics: Metrics
}

/// Both ends test this after every insert, and rebuild the dictionary if it is true.
fn exhausted(next_code: Code,dict: &Dictionary,opt: &Options) -> bool {
    u64::from(next_code) > opt.max_code() || dict.count() > dict.capacity() / 2
}

fn put_code<F: Read + Write>(stream: &mut BitStream<F>,code: Code,opt: &Options,stats: &mut Stats) -> Result<(),Error> {
    log::trace!("code: {}",code);
    stream.write(u64::from(code),opt.bits)?;
    stats.codes += 1;
    Ok(())
}

/// next code from the stream, or `None` for `EOS`
fn get_code<F: Read + Write>(stream: &mut BitStream<F>,opt: &Options,stats: &mut Stats) -> Result<Option<Code>,Error> {
    let fetch = stream.read(opt.bits)?;
    stats.codes += 1;
    match fetch {
        Fetch::EndOfStream => Ok(None),
        Fetch::Value(v) => Ok(Some(Code::try_from(v).map_err(|_| Error::CorruptCode(v))?))
    }
}

/// Push the symbols of `code` onto `stack` by walking up to the root, so the last symbol goes first.
/// The dictionary must have been built by `reset_for_decode`.
fn push_string(dict: &Dictionary,stack: &mut Vec<Symbol>,code: Code) -> Result<(),Error> {
    let mut curr = code;
    let mut steps = 0;
    while curr != ROOT_CODE {
        let slot = curr as usize;
        if steps >= dict.capacity() || dict.is_unused(slot)? {
            return Err(Error::CorruptCode(u64::from(code)));
        }
        stack.push(dict.get_symbol(slot)?);
        curr = dict.get_parent(slot)?;
        steps += 1;
    }
    Ok(())
}

fn encode<R,F>(dict: &mut Dictionary,expanded_in: &mut R,stream: &mut BitStream<F>,opt: &Options,stats: &mut Stats) -> Result<(),Error>
where R: Read, F: Read + Write {
    dict.reset_for_encode(&mut stats.metrics)?;
    let mut next_code = FIRST_CODE;
    let mut bytes = BufReader::new(expanded_in).bytes();
    if let Some(first) = bytes.next() {
        let mut current_code = Code::from(first?);
        stats.in_size += 1;
        for byte in bytes {
            let symbol = Symbol::from(byte?);
            stats.in_size += 1;
            let slot = dict.lookup(current_code,symbol,&mut stats.metrics)?;
            if !dict.is_unused(slot)? {
                // keep matching
                current_code = dict.get_code(slot)?;
                continue;
            }
            put_code(stream,current_code,opt,stats)?;
            dict.insert(slot,current_code,next_code,symbol)?;
            next_code += 1;
            current_code = Code::from(symbol);
            if exhausted(next_code,dict,opt) {
                log::debug!("reset dictionary at code {} with {} entries",next_code,dict.count());
                dict.reset_for_encode(&mut stats.metrics)?;
                next_code = FIRST_CODE;
                stats.resets += 1;
            }
        }
        put_code(stream,current_code,opt,stats)?;
    }
    put_code(stream,Code::from(EOS),opt,stats)?;
    log::trace!("final dictionary:\n{}",dict);
    Ok(())
}

fn decode<F,W>(dict: &mut Dictionary,stream: &mut BitStream<F>,expanded_out: &mut W,opt: &Options,stats: &mut Stats) -> Result<(),Error>
where F: Read + Write, W: Write {
    dict.reset_for_decode()?;
    let mut next_code = FIRST_CODE;
    let mut old_code = match get_code(stream,opt,stats)? {
        Some(code) => code,
        None => {
            log::debug!("empty stream");
            return Ok(());
        }
    };
    let first = u8::try_from(old_code).map_err(|_| Error::CorruptCode(u64::from(old_code)))?;
    expanded_out.write_all(&[first])?;
    stats.out_size += 1;
    // first symbol of the most recent string
    let mut character = Symbol::from(first);
    let mut stack: Vec<Symbol> = Vec::new();
    stack.try_reserve_exact(dict.capacity()).map_err(|_| Error::OutOfMemory(dict.capacity()))?;
    while let Some(new_code) = get_code(stream,opt,stats)? {
        stack.clear();
        // the encoder can be at most one entry ahead
        if new_code > next_code {
            return Err(Error::CorruptCode(u64::from(new_code)));
        }
        if new_code < next_code {
            push_string(dict,&mut stack,new_code)?;
        } else {
            // The encoder used the entry it created while emitting the previous code,
            // which is the previous string extended by its own first symbol.
            stack.push(character);
            push_string(dict,&mut stack,old_code)?;
        }
        character = *stack.last().ok_or(Error::CorruptCode(u64::from(new_code)))?;
        for symbol in stack.iter().rev() {
            let byte = u8::try_from(*symbol).map_err(|_| Error::CorruptCode(u64::from(new_code)))?;
            expanded_out.write_all(&[byte])?;
        }
        stats.out_size += stack.len() as u64;
        log::trace!("  write {} as {} bytes",new_code,stack.len());
        dict.insert(next_code as usize,old_code,next_code,character)?;
        next_code += 1;
        if exhausted(next_code,dict,opt) {
            log::debug!("reset dictionary at code {} with {} entries",next_code,dict.count());
            dict.reset_for_decode()?;
            next_code = FIRST_CODE;
            stats.resets += 1;
        }
        old_code = new_code;
    }
    log::trace!("final dictionary:\n{}",dict);
    Ok(())
}

/// Encode and close, the dictionary is allocated by the caller before any I/O happens
fn compress_stream<R,F>(dict: &mut Dictionary,expanded_in: &mut R,mut stream: BitStream<F>,opt: &Options) -> Result<(F,Stats),Error>
where R: Read, F: Read + Write {
    let mut stats = Stats::default();
    log::debug!("compress with {} bit codes and {} slots",opt.bits,opt.capacity);
    encode(dict,expanded_in,&mut stream,opt,&mut stats)?;
    stats.out_size = (stream.bit_count() + 7) / 8;
    let compressed_out = stream.close()?;
    log::debug!("wrote {} codes with {} resets",stats.codes,stats.resets);
    Ok((compressed_out,stats))
}

fn expand_stream<F,W>(dict: &mut Dictionary,mut stream: BitStream<F>,expanded_out: &mut W,opt: &Options) -> Result<Stats,Error>
where F: Read + Write, W: Write {
    let mut stats = Stats::default();
    log::debug!("expand with {} bit codes and {} slots",opt.bits,opt.capacity);
    let mut writer = BufWriter::new(expanded_out);
    decode(dict,&mut stream,&mut writer,opt,&mut stats)?;
    writer.flush()?;
    stats.in_size = (stream.bit_count() + 7) / 8;
    stream.close()?;
    log::debug!("read {} codes with {} resets",stats.codes,stats.resets);
    Ok(stats)
}

/// Main compression function.
/// `expanded_in` is any reader.  `compressed_out` is usually `std::fs::File` or `std::io::Cursor<Vec<u8>>`,
/// it is handed back along with the statistics once the bit stream is closed.
pub fn compress<R,W>(expanded_in: &mut R,compressed_out: W,opt: &Options) -> Result<(W,Stats),DYNERR>
where R: Read, W: Read + Write {
    opt.validate()?;
    let mut dict = Dictionary::create(opt.capacity)?;
    let stream = BitStream::new(compressed_out,Mode::Write,opt.buffer_words)?;
    Ok(compress_stream(&mut dict,expanded_in,stream,opt)?)
}

/// Main decompression function.
/// `compressed_in` is usually `std::fs::File` or `std::io::Cursor<Vec<u8>>`, `expanded_out` is any writer.
/// Decoding stops at the `EOS` code, anything after it is ignored.
pub fn expand<R,W>(compressed_in: R,expanded_out: &mut W,opt: &Options) -> Result<Stats,DYNERR>
where R: Read + Write, W: Write {
    opt.validate()?;
    let mut dict = Dictionary::create(opt.capacity)?;
    let stream = BitStream::new(compressed_in,Mode::Read,opt.buffer_words)?;
    Ok(expand_stream(&mut dict,stream,expanded_out,opt)?)
}

/// Compress the file at `path_in` into `path_out`, which is created or truncated
pub fn compress_file<P,Q>(path_in: P,path_out: Q,opt: &Options) -> Result<Stats,DYNERR>
where P: AsRef<Path>, Q: AsRef<Path> {
    opt.validate()?;
    let mut dict = Dictionary::create(opt.capacity)?;
    let mut in_file = File::open(path_in)?;
    let stream = BitStream::open_with_buffer(path_out,Mode::Write,opt.buffer_words)?;
    let (_,stats) = compress_stream(&mut dict,&mut in_file,stream,opt)?;
    Ok(stats)
}

/// Expand the file at `path_in` into `path_out`, which is created or truncated
pub fn expand_file<P,Q>(path_in: P,path_out: Q,opt: &Options) -> Result<Stats,DYNERR>
where P: AsRef<Path>, Q: AsRef<Path> {
    opt.validate()?;
    let mut dict = Dictionary::create(opt.capacity)?;
    let stream = BitStream::open_with_buffer(path_in,Mode::Read,opt.buffer_words)?;
    let mut out_file = File::create(path_out)?;
    Ok(expand_stream(&mut dict,stream,&mut out_file,opt)?)
}

/// Convenience function, calls `compress` with a slice returning a Vec
pub fn compress_slice(slice: &[u8],opt: &Options) -> Result<Vec<u8>,DYNERR> {
    let mut src = Cursor::new(slice);
    let ans: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    let (ans,_) = compress(&mut src,ans,opt)?;
    Ok(ans.into_inner())
}

/// Convenience function, calls `expand` with a slice returning a Vec
pub fn expand_slice(slice: &[u8],opt: &Options) -> Result<Vec<u8>,DYNERR> {
    let src = Cursor::new(slice.to_vec());
    let mut ans: Vec<u8> = Vec::new();
    expand(src,&mut ans,opt)?;
    Ok(ans)
}

// *************** TESTS *****************

#[cfg(test)]
fn options(bits: usize,capacity: usize) -> Options {
    Options {
        bits,
        capacity,
        buffer_words: DEFAULT_BUFFER_WORDS
    }
}

/// word salad with irregular line breaks
#[cfg(test)]
fn sample_text(len: usize) -> Vec<u8> {
    let words = ["lorem","ipsum","dolor","sit","amet","consectetur","adipiscing","elit","sed","do","eiusmod","tempor"];
    let mut state: u32 = 12345;
    let mut ans = Vec::new();
    while ans.len() < len {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        ans.extend_from_slice(words[(state >> 16) as usize % words.len()].as_bytes());
        ans.push(match (state >> 8) % 7 {
            0 => b'\n',
            _ => b' '
        });
    }
    ans.truncate(len);
    ans
}

#[cfg(test)]
fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x2545f4914f6cdd1d;
    (0..len).map(|_| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 32) as u8
    }).collect()
}

#[test]
fn compression_works() {
    // Example adapted from wikipedia, with LSB first packing of 12 bit codes
    let test_data = "TOBEORNOTTOBEORTOBEORNOT#\n".as_bytes();
    let lzw_str = "54 F0 04 42 50 04 4F 20 05 4E F0 04 54 10 10 03 51 10 0A 41 10 06 81 10 23 A0 00 00 01";
    let compressed = compress_slice(test_data,&STD_OPTIONS).expect("compression failed");
    assert_eq!(compressed,hex::decode(lzw_str.replace(" ","")).unwrap());
    let expanded = expand_slice(&compressed,&STD_OPTIONS).expect("expansion failed");
    assert_eq!(expanded,test_data.to_vec());
}

#[test]
fn growing_match() {
    // codes 041 042 101 103 102 100
    let test_data = "ABABABABA".as_bytes();
    let opt = options(9,1024);
    let compressed = compress_slice(test_data,&opt).expect("compression failed");
    assert_eq!(compressed,hex::decode("4184041C281020").unwrap());
    let expanded = expand_slice(&compressed,&opt).expect("expansion failed");
    assert_eq!(expanded,test_data.to_vec());
}

#[test]
fn half_full_reset_every_insert() {
    // 257 root entries already fill half of 512 slots, so each insert forces a reset
    let test_data = "ABABABABA".as_bytes();
    let opt = options(9,512);
    let mut src = Cursor::new(test_data);
    let (ans,c_stats) = compress(&mut src,Cursor::new(Vec::<u8>::new()),&opt).expect("compression failed");
    let compressed = ans.into_inner();
    assert_eq!(compressed,hex::decode("418404111244481021410002").unwrap());
    assert_eq!(c_stats.resets,8);
    let mut expanded = Vec::new();
    let x_stats = expand(Cursor::new(compressed),&mut expanded,&opt).expect("expansion failed");
    assert_eq!(expanded,test_data.to_vec());
    assert_eq!(x_stats.resets,8);
}

#[test]
fn empty_input() {
    let compressed = compress_slice(&[],&STD_OPTIONS).expect("compression failed");
    assert_eq!(compressed,vec![0x00,0x01]);
    let expanded = expand_slice(&compressed,&STD_OPTIONS).expect("expansion failed");
    assert!(expanded.is_empty());
}

#[test]
fn single_byte() {
    let compressed = compress_slice(&[b'A'],&STD_OPTIONS).expect("compression failed");
    assert_eq!(compressed,hex::decode("410010").unwrap());
    assert_eq!(expand_slice(&compressed,&STD_OPTIONS).expect("expansion failed"),vec![b'A']);
}

#[test]
fn invertibility() {
    let test_data = "I am Sam. Sam I am. I do not like this Sam I am.\n".as_bytes();
    let compressed = compress_slice(test_data,&STD_OPTIONS).expect("compression failed");
    let expanded = expand_slice(&compressed,&STD_OPTIONS).expect("expansion failed");
    assert_eq!(test_data.to_vec(),expanded);
}

#[test]
fn invertibility_uniform() {
    // long runs exercise codes that are used before the decoder has defined them
    let test_data = vec![b'x';100_000];
    let compressed = compress_slice(&test_data,&STD_OPTIONS).expect("compression failed");
    assert!(compressed.len() < 1000);
    for opt in [STD_OPTIONS,options(9,512),options(15,32768)] {
        let compressed = compress_slice(&test_data,&opt).expect("compression failed");
        let expanded = expand_slice(&compressed,&opt).expect("expansion failed");
        assert_eq!(test_data,expanded);
    }
}

#[test]
fn invertibility_all_widths() {
    let test_data = [sample_text(60_000),noise(20_000),sample_text(20_000)].concat();
    for bits in MIN_CODE_WIDTH..=16 {
        let opt = Options::with_bits(bits);
        let compressed = compress_slice(&test_data,&opt).expect("compression failed");
        let expanded = expand_slice(&compressed,&opt).expect("expansion failed");
        assert_eq!(test_data,expanded,"round trip failed with {} bits",bits);
    }
}

#[test]
fn invertibility_odd_capacity() {
    let test_data = [noise(30_000),sample_text(30_000)].concat();
    for opt in [options(9,600),options(12,5000),options(12,300),options(20,100_000)] {
        let compressed = compress_slice(&test_data,&opt).expect("compression failed");
        let expanded = expand_slice(&compressed,&opt).expect("expansion failed");
        assert_eq!(test_data,expanded);
    }
}

#[test]
fn resets_stay_in_step() {
    let test_data = sample_text(300_000);
    for opt in [STD_OPTIONS,options(10,4096),options(12,1000)] {
        let mut src = Cursor::new(&test_data);
        let (ans,c_stats) = compress(&mut src,Cursor::new(Vec::<u8>::new()),&opt).expect("compression failed");
        let compressed = ans.into_inner();
        let mut expanded = Vec::new();
        let x_stats = expand(Cursor::new(compressed.clone()),&mut expanded,&opt).expect("expansion failed");
        assert_eq!(test_data,expanded);
        assert!(c_stats.resets > 1);
        assert_eq!(c_stats.resets,x_stats.resets);
        assert_eq!(c_stats.codes,x_stats.codes);
        assert_eq!(c_stats.in_size,x_stats.out_size);
        assert_eq!(c_stats.out_size,x_stats.in_size);
        assert_eq!(c_stats.out_size,compressed.len() as u64);
        assert!(c_stats.metrics.lookups >= c_stats.in_size - 1);
    }
}

#[test]
fn stats_are_counted() {
    let test_data = "TOBEORNOTTOBEORTOBEORNOT#\n".as_bytes();
    let mut src = Cursor::new(test_data);
    let (ans,stats) = compress(&mut src,Cursor::new(Vec::<u8>::new()),&STD_OPTIONS).expect("compression failed");
    assert_eq!(stats.in_size,26);
    assert_eq!(stats.out_size,29);
    assert_eq!(stats.codes,19);
    assert_eq!(stats.resets,0);
    let mut expanded = Vec::new();
    let stats = expand(Cursor::new(ans.into_inner()),&mut expanded,&STD_OPTIONS).expect("expansion failed");
    assert_eq!(stats.in_size,29);
    assert_eq!(stats.out_size,26);
    assert_eq!(stats.codes,19);
}

#[test]
fn bad_options() {
    let err = compress_slice(b"abc",&options(8,4096)).expect_err("width 8 accepted");
    assert!(matches!(err.downcast_ref::<Error>(),Some(Error::BadCodeWidth(8))));
    let err = compress_slice(b"abc",&options(33,4096)).expect_err("width 33 accepted");
    assert!(matches!(err.downcast_ref::<Error>(),Some(Error::BadCodeWidth(33))));
    let err = expand_slice(&[0,1],&options(12,257)).expect_err("capacity 257 accepted");
    assert!(matches!(err.downcast_ref::<Error>(),Some(Error::DictionaryTooSmall(257))));
    assert_eq!(Options::with_bits(12).capacity,4096);
}

#[test]
fn truncated_stream() {
    let compressed = compress_slice(&sample_text(5000),&STD_OPTIONS).expect("compression failed");
    let err = expand_slice(&compressed[0..compressed.len() / 2],&STD_OPTIONS).expect_err("truncation not detected");
    match err.downcast_ref::<Error>() {
        Some(Error::Io(e)) => assert_eq!(e.kind(),std::io::ErrorKind::UnexpectedEof),
        other => panic!("unexpected error {:?}",other)
    }
}

#[test]
fn corrupt_first_code() {
    // 9 bit code 0x12C followed by EOS
    let err = expand_slice(&hex::decode("2C0102").unwrap(),&options(9,512)).expect_err("bad code accepted");
    assert!(matches!(err.downcast_ref::<Error>(),Some(Error::CorruptCode(300))));
}

#[cfg(test)]
fn pack_codes(codes: &[Code],bits: usize) -> Vec<u8> {
    let mut stream = BitStream::new(Cursor::new(Vec::<u8>::new()),Mode::Write,DEFAULT_BUFFER_WORDS).expect("could not create stream");
    for code in codes {
        stream.write(u64::from(*code),bits).expect("write failed");
    }
    stream.close().expect("close failed").into_inner()
}

#[test]
fn code_ahead_of_dictionary() {
    // 0x1FF arrives when only 257 could be defined
    let compressed = pack_codes(&[0x41,0x1FF,0x100],9);
    let err = expand_slice(&compressed,&options(9,1024)).expect_err("bad code accepted");
    assert!(matches!(err.downcast_ref::<Error>(),Some(Error::CorruptCode(511))));
}

#[test]
fn stale_code_after_reset() {
    // every insert resets, so 257 is gone by the time the third code refers to it
    let compressed = pack_codes(&[0x41,0x101,0x101,0x100],9);
    let err = expand_slice(&compressed,&options(9,512)).expect_err("bad code accepted");
    assert!(matches!(err.downcast_ref::<Error>(),Some(Error::CorruptCode(257))));
}

#[test]
fn cyclic_chain() {
    let mut dict = Dictionary::create(300).expect("create failed");
    dict.reset_for_decode().expect("reset failed");
    dict.insert(257,258,257,b'A' as Symbol).expect("insert failed");
    dict.insert(258,257,258,b'B' as Symbol).expect("insert failed");
    let mut stack = Vec::new();
    assert!(matches!(push_string(&dict,&mut stack,257),Err(Error::CorruptCode(257))));
    assert_eq!(stack.len(),dict.capacity());
    stack.clear();
    push_string(&dict,&mut stack,b'A' as Code).expect("root walk failed");
    assert_eq!(stack,vec![b'A' as Symbol]);
}

#[test]
fn file_round_trip() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let plain = dir.path().join("plain.txt");
    let packed = dir.path().join("packed.lzw");
    let unpacked = dir.path().join("unpacked.txt");
    let test_data = sample_text(50_000);
    std::fs::write(&plain,&test_data).expect("write failed");
    let c_stats = compress_file(&plain,&packed,&STD_OPTIONS).expect("compression failed");
    assert_eq!(c_stats.out_size,std::fs::metadata(&packed).unwrap().len());
    let x_stats = expand_file(&packed,&unpacked,&STD_OPTIONS).expect("expansion failed");
    assert_eq!(x_stats.out_size,test_data.len() as u64);
    assert_eq!(std::fs::read(&unpacked).unwrap(),test_data);
    // a missing input must not clobber the output
    assert!(expand_file(dir.path().join("absent"),&unpacked,&STD_OPTIONS).is_err());
    assert_eq!(std::fs::read(&unpacked).unwrap(),test_data);
}
