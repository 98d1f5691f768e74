//! Binary layout of the persisted backlog blob.
//!
//! Little-endian, count-prefixed, fixed-width records. The blob is only ever
//! read back by this crate, so the version byte is the only compatibility
//! guarantee.
//!
//! ```text
//! header (8 bytes)
//! ┌────────┬─────────┬──────────┬──────────────┐
//! │ Magic  │ Version │ Reserved │ Sample count │
//! │ 2 bytes│ 1 byte  │ 1 byte   │ 4 bytes      │
//! └────────┴─────────┴──────────┴──────────────┘
//!
//! record (33 bytes)
//! ┌──────────┬───────────┬──────────┬───────┬──────────┬───────┐
//! │ lat f64  │ lon f64   │ time i64 │ speed │ accuracy │ flags │
//! │ 8 bytes  │ 8 bytes   │ 8 bytes  │ f32   │ f32      │ u8    │
//! └──────────┴───────────┴──────────┴───────┴──────────┴───────┘
//! ```

use crate::error::CodecError;
use crate::sample::Sample;

/// "TB" for track backlog
pub const BLOB_MAGIC: u16 = 0x4254;
pub const BLOB_VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 8;
pub const RECORD_SIZE: usize = 33;

const FLAG_HAS_SPEED: u8 = 0b01;
const FLAG_HAS_ACCURACY: u8 = 0b10;

/// Encode samples in order
pub fn encode_samples<'a, I>(samples: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Sample>,
    I::IntoIter: ExactSizeIterator,
{
    let iter = samples.into_iter();
    let count = iter.len();
    let mut buf = vec![0u8; HEADER_SIZE + count * RECORD_SIZE];

    buf[0..2].copy_from_slice(&BLOB_MAGIC.to_le_bytes());
    buf[2] = BLOB_VERSION;
    buf[3] = 0;
    buf[4..8].copy_from_slice(&(count as u32).to_le_bytes());

    for (i, sample) in iter.enumerate() {
        let offset = HEADER_SIZE + i * RECORD_SIZE;
        write_record(sample, &mut buf[offset..offset + RECORD_SIZE]);
    }

    buf
}

/// Decode a blob produced by [`encode_samples`]
pub fn decode_samples(buf: &[u8]) -> Result<Vec<Sample>, CodecError> {
    if buf.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }

    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != BLOB_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    if buf[2] != BLOB_VERSION {
        return Err(CodecError::UnsupportedVersion(buf[2]));
    }

    let count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let needed = count
        .checked_mul(RECORD_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .unwrap_or(usize::MAX);
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    if buf.len() > needed {
        return Err(CodecError::TrailingBytes(buf.len() - needed));
    }

    Ok(buf[HEADER_SIZE..]
        .chunks_exact(RECORD_SIZE)
        .map(read_record)
        .collect())
}

fn write_record(sample: &Sample, buf: &mut [u8]) {
    let mut flags = 0u8;
    if sample.has_speed() {
        flags |= FLAG_HAS_SPEED;
    }
    if sample.has_accuracy() {
        flags |= FLAG_HAS_ACCURACY;
    }

    buf[0..8].copy_from_slice(&sample.latitude().to_le_bytes());
    buf[8..16].copy_from_slice(&sample.longitude().to_le_bytes());
    buf[16..24].copy_from_slice(&sample.timestamp_millis().to_le_bytes());
    buf[24..28].copy_from_slice(&sample.speed().unwrap_or(0.0).to_le_bytes());
    buf[28..32].copy_from_slice(&sample.accuracy().unwrap_or(0.0).to_le_bytes());
    buf[32] = flags;
}

fn read_record(buf: &[u8]) -> Sample {
    let latitude = f64::from_le_bytes(array8(&buf[0..8]));
    let longitude = f64::from_le_bytes(array8(&buf[8..16]));
    let timestamp = i64::from_le_bytes(array8(&buf[16..24]));
    let speed = f32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
    let accuracy = f32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]);
    let flags = buf[32];

    let mut sample = Sample::new(latitude, longitude, timestamp);
    if flags & FLAG_HAS_SPEED != 0 {
        sample = sample.with_speed(speed);
    }
    if flags & FLAG_HAS_ACCURACY != 0 {
        sample = sample.with_accuracy(accuracy);
    }
    sample
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}
