use crate::columnar::{DecodeError, Decoder, Encodable};
use crate::ChangeHash;

// These parameters give roughly a 1% false positive rate. They can change
// without breaking protocol compatibility because every serialized filter
// carries its own parameters.
const BITS_PER_ENTRY: u32 = 10;
const NUM_PROBES: u32 = 7;

/// A Bloom filter over change hashes, used by the sync protocol to
/// summarise "everything I have since the last sync" in a few bytes.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
pub struct BloomFilter {
    num_entries: u32,
    num_bits_per_entry: u32,
    num_probes: u32,
    bits: Vec<u8>,
}

impl BloomFilter {
    pub fn from_hashes<I: ExactSizeIterator<Item = ChangeHash>>(hashes: I) -> Self {
        let num_entries = hashes.len() as u32;
        let mut filter = Self {
            num_entries,
            num_bits_per_entry: BITS_PER_ENTRY,
            num_probes: NUM_PROBES,
            bits: vec![0; bits_capacity(num_entries, BITS_PER_ENTRY)],
        };
        for hash in hashes {
            filter.add_hash(&hash);
        }
        filter
    }

    /// `LEB(entries) | LEB(bits per entry) | LEB(probes) | raw bits`; an
    /// empty filter serializes to no bytes at all.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.num_entries == 0 {
            return Vec::new();
        }
        let mut buf = Vec::with_capacity(self.bits.len() + 4);
        self.num_entries.encode_to_vec(&mut buf);
        self.num_bits_per_entry.encode_to_vec(&mut buf);
        self.num_probes.encode_to_vec(&mut buf);
        buf.extend(&self.bits);
        buf
    }

    // The probe positions for a hash: the first 12 bytes of the hash read
    // as three little-endian u32s seed an (x + y, y + z) walk modulo the
    // bit count.
    fn probes(&self, hash: &ChangeHash) -> Vec<u32> {
        let bytes = hash.0;
        let modulo = 8 * self.bits.len() as u32;

        let mut x = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % modulo;
        let mut y = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) % modulo;
        let z = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) % modulo;

        let mut probes = vec![x];
        for _ in 1..self.num_probes {
            x = (x + y) % modulo;
            y = (y + z) % modulo;
            probes.push(x);
        }
        probes
    }

    fn add_hash(&mut self, hash: &ChangeHash) {
        if self.bits.is_empty() {
            return;
        }
        for probe in self.probes(hash) {
            self.set_bit(probe as usize);
        }
    }

    fn set_bit(&mut self, probe: usize) {
        if let Some(byte) = self.bits.get_mut(probe >> 3) {
            *byte |= 1 << (probe & 7);
        }
    }

    fn get_bit(&self, probe: usize) -> Option<u8> {
        self.bits
            .get(probe >> 3)
            .map(|byte| byte & (1 << (probe & 7)))
    }

    pub fn contains_hash(&self, hash: &ChangeHash) -> bool {
        if self.num_entries == 0 || self.bits.is_empty() {
            return false;
        }
        for probe in self.probes(hash) {
            if let Some(0) = self.get_bit(probe as usize) {
                return false;
            }
        }
        true
    }
}

fn bits_capacity(num_entries: u32, num_bits_per_entry: u32) -> usize {
    let total_bits = num_entries as u64 * num_bits_per_entry as u64;
    ((total_bits + 7) / 8) as usize
}

impl TryFrom<&[u8]> for BloomFilter {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let mut decoder = Decoder::new(bytes);
        let num_entries = decoder.read()?;
        let num_bits_per_entry = decoder.read()?;
        let num_probes = decoder.read()?;
        let bits = decoder
            .read_bytes(bits_capacity(num_entries, num_bits_per_entry))?
            .to_vec();
        Ok(Self {
            num_entries,
            num_bits_per_entry,
            num_probes,
            bits,
        })
    }
}
