//! Hashed LZW dictionary
//!
//! Entries are (parent,code,symbol) triples in a flat table whose index doubles as the
//! hash slot, collisions are resolved by linear probing.  A string is represented by the
//! code of its prefix (the parent) and its last symbol, so that the root level entries,
//! one per symbol, have the virtual parent `ROOT_CODE`.
//!
//! The encoder and decoder initialize the table differently.  The encoder places the root
//! entries by hashing, since it searches by (parent,symbol).  The decoder searches by code,
//! so it places every entry at the slot equal to its code.

use std::fmt;
use crate::{Code,Symbol,Error,ROOT_CODE,UNUSED,SYMBOLS};

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct Entry {
    pub parent: Code,
    pub code: Code,
    pub symbol: Symbol
}

const EMPTY: Entry = Entry {
    parent: ROOT_CODE,
    code: UNUSED,
    symbol: 0
};

/// Lookup statistics, the caller keeps one of these for the whole run
#[derive(Clone,Copy,Default,PartialEq,Eq,Debug)]
pub struct Metrics {
    pub lookups: u64,
    /// occupied slots probed past, summed over all lookups
    pub collisions: u64
}

impl Metrics {
    pub fn average_collisions(&self) -> f64 {
        match self.lookups {
            0 => 0.0,
            n => self.collisions as f64 / n as f64
        }
    }
}

#[derive(Clone,PartialEq,Eq,Debug)]
pub struct Dictionary {
    entries: Vec<Entry>,
    /// number of inserts since the last reset
    count: usize
}

impl Dictionary {
    /// Allocate `capacity` slots, all unused.  Allocation failure is reported rather than aborting.
    pub fn create(capacity: usize) -> Result<Self,Error> {
        if capacity == 0 {
            return Err(Error::DictionaryTooSmall(capacity));
        }
        let mut entries = Vec::new();
        entries.try_reserve_exact(capacity).map_err(|_| Error::OutOfMemory(capacity))?;
        entries.resize(capacity,EMPTY);
        Ok(Self {
            entries,
            count: 0
        })
    }
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
    pub fn count(&self) -> usize {
        self.count
    }
    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.count)
    }
    fn entry(&self,slot: usize) -> Result<&Entry,Error> {
        self.entries.get(slot).ok_or(Error::SlotOutOfRange { slot, capacity: self.capacity() })
    }
    pub fn get_code(&self,slot: usize) -> Result<Code,Error> {
        Ok(self.entry(slot)?.code)
    }
    pub fn get_parent(&self,slot: usize) -> Result<Code,Error> {
        Ok(self.entry(slot)?.parent)
    }
    pub fn get_symbol(&self,slot: usize) -> Result<Symbol,Error> {
        Ok(self.entry(slot)?.symbol)
    }
    pub fn is_unused(&self,slot: usize) -> Result<bool,Error> {
        Ok(self.entry(slot)?.code == UNUSED)
    }
    /// Starting slot for (parent,symbol).  The symbol forms the high half of a 32 bit key,
    /// the parent truncated to the symbol width forms the low half.  The key bytes, low
    /// byte first, go through the Bernstein hash with xor.
    pub fn hash(&self,parent: Code,symbol: Symbol) -> usize {
        let width = Symbol::BITS;
        let key: u32 = (u32::from(symbol) << width) | (parent & ((1 << width) - 1));
        let mut h: u32 = 5381;
        for byte in key.to_le_bytes() {
            h = h.wrapping_mul(33) ^ u32::from(byte);
        }
        h as usize % self.capacity()
    }
    /// Find the slot holding (parent,symbol), or else the unused slot where it belongs.
    /// Use `is_unused` on the result to tell which.
    pub fn lookup(&self,parent: Code,symbol: Symbol,metrics: &mut Metrics) -> Result<usize,Error> {
        metrics.lookups += 1;
        let mut slot = self.hash(parent,symbol);
        for _probe in 0..self.capacity() {
            let entry = &self.entries[slot];
            if entry.code == UNUSED || (entry.parent == parent && entry.symbol == symbol) {
                return Ok(slot);
            }
            slot = (slot + 1) % self.capacity();
            metrics.collisions += 1;
        }
        Err(Error::DictionaryFull)
    }
    /// Write the triple into `slot` whether or not it is in use
    pub fn insert(&mut self,slot: usize,parent: Code,code: Code,symbol: Symbol) -> Result<(),Error> {
        let capacity = self.capacity();
        let entry = self.entries.get_mut(slot).ok_or(Error::SlotOutOfRange { slot, capacity })?;
        *entry = Entry {
            parent,
            code,
            symbol
        };
        self.count += 1;
        Ok(())
    }
    fn clear(&mut self) -> Result<(),Error> {
        // room for every root entry plus the first learned code
        if self.capacity() <= SYMBOLS {
            return Err(Error::DictionaryTooSmall(self.capacity()));
        }
        self.entries.fill(EMPTY);
        self.count = 0;
        Ok(())
    }
    /// Empty the table and load the root entries at their hashed slots.
    /// `EOS` gets an entry too, though the encoder never searches for it.
    pub fn reset_for_encode(&mut self,metrics: &mut Metrics) -> Result<(),Error> {
        self.clear()?;
        for symbol in 0..SYMBOLS as Symbol {
            let slot = self.lookup(ROOT_CODE,symbol,metrics)?;
            self.insert(slot,ROOT_CODE,Code::from(symbol),symbol)?;
        }
        Ok(())
    }
    /// Empty the table and load the root entries at slot = code.
    pub fn reset_for_decode(&mut self) -> Result<(),Error> {
        self.clear()?;
        for symbol in 0..SYMBOLS as Symbol {
            self.insert(symbol as usize,ROOT_CODE,Code::from(symbol),symbol)?;
        }
        Ok(())
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f,"ENTRY\tCODE\tPARENT\tSYMBOL")?;
        for (slot,entry) in self.entries.iter().enumerate().filter(|(_,e)| e.code != UNUSED) {
            match entry.parent {
                ROOT_CODE => writeln!(f,"{}\t{}\troot\t0x{:02X}",slot,entry.code,entry.symbol)?,
                parent => writeln!(f,"{}\t{}\t{}\t0x{:02X}",slot,entry.code,parent,entry.symbol)?
            }
        }
        Ok(())
    }
}

// *************** TESTS *****************

#[test]
fn hash_values() {
    let dict = Dictionary::create(4096).expect("create failed");
    assert_eq!(dict.hash(ROOT_CODE,0),3493);
    assert_eq!(dict.hash(ROOT_CODE,1),3460);
    assert_eq!(dict.hash(65,66),870);
    // only the low 16 bits of the parent take part
    assert_eq!(dict.hash(0x10041,66),870);
}

#[test]
fn bad_capacity() {
    assert!(matches!(Dictionary::create(0),Err(Error::DictionaryTooSmall(0))));
    let mut dict = Dictionary::create(257).expect("create failed");
    assert!(matches!(dict.reset_for_decode(),Err(Error::DictionaryTooSmall(257))));
    assert!(matches!(dict.reset_for_encode(&mut Metrics::default()),Err(Error::DictionaryTooSmall(257))));
    assert!(matches!(dict.get_code(257),Err(Error::SlotOutOfRange { slot: 257, capacity: 257 })));
    assert!(matches!(dict.insert(300,0,0,0),Err(Error::SlotOutOfRange { slot: 300, capacity: 257 })));
}

#[test]
fn reset_is_deterministic() {
    let mut metrics = Metrics::default();
    let mut dict = Dictionary::create(1000).expect("create failed");
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    assert_eq!(metrics.lookups,257);
    let canonical = dict.clone();
    for i in 0..200 {
        let slot = dict.lookup(i,(i % 256) as Symbol,&mut metrics).expect("lookup failed");
        dict.insert(slot,i,257 + i,(i % 256) as Symbol).expect("insert failed");
    }
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    assert_eq!(dict,canonical);
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    assert_eq!(dict,canonical);
    assert_eq!(dict.count(),SYMBOLS);
    assert_eq!(dict.available(),1000 - SYMBOLS);

    dict.reset_for_decode().expect("reset failed");
    let canonical = dict.clone();
    dict.insert(257,65,257,66).expect("insert failed");
    dict.reset_for_decode().expect("reset failed");
    assert_eq!(dict,canonical);
    assert_eq!(dict.count(),SYMBOLS);
    for code in 0..SYMBOLS {
        assert_eq!(dict.get_code(code).unwrap(),code as Code);
        assert_eq!(dict.get_symbol(code).unwrap(),code as Symbol);
        assert_eq!(dict.get_parent(code).unwrap(),ROOT_CODE);
    }
    assert!(dict.is_unused(SYMBOLS).unwrap());
}

#[test]
fn root_entries_are_found() {
    let mut metrics = Metrics::default();
    let mut dict = Dictionary::create(4096).expect("create failed");
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    for symbol in 0..SYMBOLS as Symbol {
        let slot = dict.lookup(ROOT_CODE,symbol,&mut metrics).expect("lookup failed");
        assert!(!dict.is_unused(slot).unwrap());
        assert_eq!(dict.get_code(slot).unwrap(),Code::from(symbol));
    }
}

#[test]
fn lookup_consistency() {
    let mut metrics = Metrics::default();
    let mut dict = Dictionary::create(4096).expect("create failed");
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    let pairs: Vec<(Code,Symbol)> = (0..1000).map(|i| (i / 256,(i % 256) as Symbol)).collect();
    for (i,(parent,symbol)) in pairs.iter().enumerate() {
        let slot = dict.lookup(*parent,*symbol,&mut metrics).expect("lookup failed");
        assert!(dict.is_unused(slot).unwrap());
        dict.insert(slot,*parent,257 + i as Code,*symbol).expect("insert failed");
    }
    for (i,(parent,symbol)) in pairs.iter().enumerate() {
        let slot = dict.lookup(*parent,*symbol,&mut metrics).expect("lookup failed");
        assert!(!dict.is_unused(slot).unwrap());
        assert_eq!(dict.get_parent(slot).unwrap(),*parent);
        assert_eq!(dict.get_symbol(slot).unwrap(),*symbol);
        assert_eq!(dict.get_code(slot).unwrap(),257 + i as Code);
    }
    let slot = dict.lookup(9,1,&mut metrics).expect("lookup failed");
    assert!(dict.is_unused(slot).unwrap());
    assert_eq!(dict.count(),SYMBOLS + 1000);
}

#[test]
fn colliding_keys_are_probed() {
    let mut metrics = Metrics::default();
    let mut dict = Dictionary::create(4096).expect("create failed");
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    // first two keys that share a starting slot
    let mut owner: Vec<Option<(Code,Symbol)>> = vec![None;dict.capacity()];
    let mut found = None;
    'search: for parent in 257..1024 {
        for symbol in 0..256 {
            let h = dict.hash(parent,symbol);
            match owner[h] {
                Some(first) => {
                    found = Some((first,(parent,symbol),h));
                    break 'search;
                },
                None => owner[h] = Some((parent,symbol))
            }
        }
    }
    let ((pa,sa),(pb,sb),h) = found.expect("no colliding keys");
    let capacity = dict.capacity();
    let distance = |slot: usize| (slot + capacity - h) % capacity;

    let before = metrics.collisions;
    let slot_a = dict.lookup(pa,sa,&mut metrics).expect("lookup failed");
    let collisions_a = metrics.collisions - before;
    dict.insert(slot_a,pa,300,sa).expect("insert failed");

    let before = metrics.collisions;
    let slot_b = dict.lookup(pb,sb,&mut metrics).expect("lookup failed");
    assert!(dict.is_unused(slot_b).unwrap());
    assert!(distance(slot_b) > distance(slot_a));
    assert!(metrics.collisions - before > collisions_a);
    dict.insert(slot_b,pb,301,sb).expect("insert failed");

    // the second key is still found, past the first
    let before = metrics.collisions;
    assert_eq!(dict.lookup(pb,sb,&mut metrics).expect("lookup failed"),slot_b);
    assert!(metrics.collisions > before);
    assert_eq!(dict.get_code(slot_b).unwrap(),301);
    assert_eq!(dict.lookup(pa,sa,&mut metrics).expect("lookup failed"),slot_a);
    assert_eq!(dict.get_code(slot_a).unwrap(),300);
    assert!(metrics.average_collisions() > 0.0);
}

#[test]
fn full_table_is_an_error() {
    let mut metrics = Metrics::default();
    let mut dict = Dictionary::create(258).expect("create failed");
    dict.reset_for_encode(&mut metrics).expect("reset failed");
    let slot = dict.lookup(65,66,&mut metrics).expect("lookup failed");
    dict.insert(slot,65,257,66).expect("insert failed");
    assert_eq!(dict.available(),0);
    assert!(matches!(dict.lookup(66,65,&mut metrics),Err(Error::DictionaryFull)));
}

#[test]
fn table_display() {
    let mut dict = Dictionary::create(300).expect("create failed");
    dict.reset_for_decode().expect("reset failed");
    dict.insert(257,65,257,66).expect("insert failed");
    let table = dict.to_string();
    assert!(table.starts_with("ENTRY\tCODE\tPARENT\tSYMBOL\n0\t0\troot\t0x00\n"));
    assert!(table.contains("\n65\t65\troot\t0x41\n"));
    assert!(table.ends_with("257\t257\t65\t0x42\n"));
    assert_eq!(table.lines().count(),SYMBOLS + 2);
}
