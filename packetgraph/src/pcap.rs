//! The pcap file codec: global header and per-packet record layout (§4.7).
//!
//! Only the bytes-on-the-wire logic is implemented here — the decision of which driver-owned mbuf
//! backs a given in-memory packet stays behind the [`crate::driver::PacketPool`] trait (§1, §6).
//! Little-endian throughout, per the classic pcap format (as opposed to pcapng).

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// `0xa1b2c3d4` identifies a little-endian, microsecond-resolution classic pcap file.
pub const MAGIC: u32 = 0xa1b2_c3d4;

/// The 24-byte header at the start of every pcap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub network: u32,
}

impl GlobalHeader {
    /// A header describing an Ethernet-link-type capture with no timezone correction, the
    /// defaults every pcap writer in this crate uses.
    pub fn ethernet(snaplen: u32) -> Self {
        GlobalHeader {
            magic: MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            network: 1, // LINKTYPE_ETHERNET
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u16::<LittleEndian>(self.version_major)?;
        w.write_u16::<LittleEndian>(self.version_minor)?;
        w.write_i32::<LittleEndian>(self.thiszone)?;
        w.write_u32::<LittleEndian>(self.sigfigs)?;
        w.write_u32::<LittleEndian>(self.snaplen)?;
        w.write_u32::<LittleEndian>(self.network)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(GlobalHeader {
            magic: r.read_u32::<LittleEndian>()?,
            version_major: r.read_u16::<LittleEndian>()?,
            version_minor: r.read_u16::<LittleEndian>()?,
            thiszone: r.read_i32::<LittleEndian>()?,
            sigfigs: r.read_u32::<LittleEndian>()?,
            snaplen: r.read_u32::<LittleEndian>()?,
            network: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// The 16-byte header preceding each packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub incl_len: u32,
    pub orig_len: u32,
}

impl RecordHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.ts_sec)?;
        w.write_u32::<LittleEndian>(self.ts_usec)?;
        w.write_u32::<LittleEndian>(self.incl_len)?;
        w.write_u32::<LittleEndian>(self.orig_len)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(RecordHeader {
            ts_sec: r.read_u32::<LittleEndian>()?,
            ts_usec: r.read_u32::<LittleEndian>()?,
            incl_len: r.read_u32::<LittleEndian>()?,
            orig_len: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Writes one packet record: header followed by `payload`. `incl_len` and `orig_len` both equal
/// `payload.len()` — this crate never truncates to a snaplen shorter than the captured bytes.
pub fn write_record<W: Write>(w: &mut W, ts_sec: u32, ts_usec: u32, payload: &[u8]) -> io::Result<()> {
    let header = RecordHeader { ts_sec, ts_usec, incl_len: payload.len() as u32, orig_len: payload.len() as u32 };
    header.write_to(w)?;
    w.write_all(payload)
}

/// Reads one packet record, returning `None` cleanly at EOF (as opposed to propagating an error),
/// since EOF between records is the ordinary way a pcap file ends.
pub fn read_record<R: Read>(r: &mut R) -> io::Result<Option<(RecordHeader, Vec<u8>)>> {
    let mut peek = [0u8; 1];
    match r.read(&mut peek) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e),
    }
    let mut rest = [0u8; 15];
    r.read_exact(&mut rest)?;
    let mut header_bytes = Vec::with_capacity(16);
    header_bytes.push(peek[0]);
    header_bytes.extend_from_slice(&rest);
    let mut cursor = io::Cursor::new(header_bytes);
    let header = RecordHeader::read_from(&mut cursor)?;
    let mut payload = vec![0u8; header.incl_len as usize];
    r.read_exact(&mut payload)?;
    Ok(Some((header, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = GlobalHeader::ethernet(65535);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 24);
        let read_back = GlobalHeader::read_from(&mut io::Cursor::new(buf)).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn record_round_trips() {
        let payload = b"hello packet".to_vec();
        let mut buf = Vec::new();
        write_record(&mut buf, 1, 2, &payload).unwrap();
        let (header, read_payload) = read_record(&mut io::Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(header.ts_sec, 1);
        assert_eq!(header.ts_usec, 2);
        assert_eq!(header.incl_len, payload.len() as u32);
        assert_eq!(read_payload, payload);
    }

    #[test]
    fn read_record_returns_none_at_clean_eof() {
        let buf: Vec<u8> = Vec::new();
        assert!(read_record(&mut io::Cursor::new(buf)).unwrap().is_none());
    }

    #[test]
    fn multi_record_stream_round_trips_in_order() {
        let mut buf = Vec::new();
        for i in 0..5u32 {
            write_record(&mut buf, i, 0, &[i as u8; 4]).unwrap();
        }
        let mut cursor = io::Cursor::new(buf);
        for i in 0..5u32 {
            let (header, payload) = read_record(&mut cursor).unwrap().unwrap();
            assert_eq!(header.ts_sec, i);
            assert_eq!(payload, vec![i as u8; 4]);
        }
        assert!(read_record(&mut cursor).unwrap().is_none());
    }
}
