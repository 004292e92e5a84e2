//! CARMEN road map files: a text comment block, a label/version id, a CREATOR chunk,
//! a GRIDMAP chunk and a dense payload of four u16 probability planes per cell.
//!
//! File layout (little-endian):
//!   ..  : comment block, lines starting with '#', each terminated by '\n'
//!   ..  : [u8;17] id = b"CARMENMAPFILEv020"
//!
//! CREATOR chunk:
//!   u8 type = 32, u32 size = 188, "CREATOR   " [u8;10] user, u64 unix time,
//!   [u8;80] origin, [u8;80] description (text fields space padded)
//!
//! GRIDMAP chunk:
//!   u8 type = 1, u32 size = 10 + 12 + w*h*4, "GRIDMAP   " u32 width u32 height
//!   f64 resolution (meters per cell)
//!   then for x in 0..w, for y in 0..h:
//!     u16 off_road, u16 solid_marking, u16 broken_marking, u16 lane_center
//!
//! The GRIDMAP size field is kept as downstream readers expect it even though it
//! does not describe the payload length; the reader never trusts it.

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, Utc};

pub const CARMEN_MAP_LABEL: [u8; 13] = *b"CARMENMAPFILE";
pub const CARMEN_MAP_VERSION: [u8; 4] = *b"v020";

pub const CARMEN_MAP_CREATOR_CHUNK: u8 = 32;
pub const CARMEN_MAP_GRIDMAP_CHUNK: u8 = 1;

/// Meters per cell used by the local grid mapper.
pub const LOCAL_GRIDMAP_RESOLUTION: f64 = 0.2;

/// Saturated probability value ("certainly").
pub const PROB_MAX: u16 = u16::MAX;

const CHUNK_DESCRIPTION_LEN: usize = 10;
const CREATOR_USER_LEN: usize = 10;
const CREATOR_TEXT_LEN: usize = 80;
const CELL_BYTES: usize = 8;

/// Probabilities of one map cell, in payload order.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RoadCell {
    pub off_road: u16,
    pub solid_marking: u16,
    pub broken_marking: u16,
    pub lane_center: u16,
}

impl Default for RoadCell {
    /// An untouched cell is certainly off the road.
    fn default() -> Self {
        Self {
            off_road: PROB_MAX,
            solid_marking: 0,
            broken_marking: 0,
            lane_center: 0,
        }
    }
}

/// Contents of the CREATOR chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapCreator {
    /// Login of whoever generated the map (10 bytes on disk).
    pub user: String,
    /// Unix time in seconds.
    pub timestamp: u64,
    pub origin: String,
    pub description: String,
}

impl MapCreator {
    /// Creator record stamped with the current user and time.
    pub fn now(origin: &str, description: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        Self {
            user,
            timestamp: Utc::now().timestamp().max(0) as u64,
            origin: origin.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoadMap {
    pub width: u32,
    pub height: u32,
    /// Meters per cell.
    pub resolution: f64,
    pub creator: MapCreator,
    /// Column-major cells: index = x * height + y.
    pub cells: Vec<RoadCell>,
}

impl RoadMap {
    /// A map where every cell is off the road.
    pub fn new(width: u32, height: u32, resolution: f64, creator: MapCreator) -> Self {
        Self {
            width,
            height,
            resolution,
            creator,
            cells: vec![RoadCell::default(); width as usize * height as usize],
        }
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(x as usize * self.height as usize + y as usize)
        } else {
            None
        }
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<&RoadCell> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    pub fn cell_mut(&mut self, x: u32, y: u32) -> Option<&mut RoadCell> {
        self.index(x, y).map(move |i| &mut self.cells[i])
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated CARMEN map"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_u64(buf: &mut &[u8]) -> io::Result<u64> {
    let b = take(buf, 8)?;
    Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    Ok(f64::from_bits(le_u64(buf)?))
}

/// Fixed-width text field with the trailing space padding removed.
fn text_field(buf: &mut &[u8], n: usize) -> io::Result<String> {
    let raw = take(buf, n)?;
    Ok(String::from_utf8_lossy(raw).trim_end_matches(' ').to_string())
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse a map from a contiguous byte slice.
pub fn parse_map_bytes(mut p: &[u8]) -> io::Result<RoadMap> {
    // Comment block
    while p.first() == Some(&b'#') {
        let end = p
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "unterminated comment line"))?;
        p = &p[end + 1..];
    }

    if take(&mut p, CARMEN_MAP_LABEL.len())? != CARMEN_MAP_LABEL {
        return Err(bad("bad CARMEN map label"));
    }
    if take(&mut p, CARMEN_MAP_VERSION.len())? != CARMEN_MAP_VERSION {
        return Err(bad("unsupported CARMEN map version"));
    }

    let mut creator = None;

    loop {
        if p.is_empty() {
            return Err(bad("missing GRIDMAP chunk"));
        }

        let chunk_type = le_u8(&mut p)?;
        let size = le_u32(&mut p)? as usize;

        match chunk_type {
            CARMEN_MAP_CREATOR_CHUNK => {
                take(&mut p, CHUNK_DESCRIPTION_LEN)?;
                creator = Some(MapCreator {
                    user: text_field(&mut p, CREATOR_USER_LEN)?,
                    timestamp: le_u64(&mut p)?,
                    origin: text_field(&mut p, CREATOR_TEXT_LEN)?,
                    description: text_field(&mut p, CREATOR_TEXT_LEN)?,
                });
            }
            CARMEN_MAP_GRIDMAP_CHUNK => {
                take(&mut p, CHUNK_DESCRIPTION_LEN)?;
                let width = le_u32(&mut p)?;
                let height = le_u32(&mut p)?;
                let resolution = le_f64(&mut p)?;

                let count = (width as usize)
                    .checked_mul(height as usize)
                    .ok_or_else(|| bad("gridmap size overflow"))?;
                let bytes = count
                    .checked_mul(CELL_BYTES)
                    .ok_or_else(|| bad("gridmap size overflow"))?;
                let raw = take(&mut p, bytes)?;

                let cells = raw
                    .chunks_exact(CELL_BYTES)
                    .map(|c| RoadCell {
                        off_road: u16::from_le_bytes([c[0], c[1]]),
                        solid_marking: u16::from_le_bytes([c[2], c[3]]),
                        broken_marking: u16::from_le_bytes([c[4], c[5]]),
                        lane_center: u16::from_le_bytes([c[6], c[7]]),
                    })
                    .collect();

                return Ok(RoadMap {
                    width,
                    height,
                    resolution,
                    creator: creator.unwrap_or_default(),
                    cells,
                });
            }
            _ => {
                // Chunk sizes count the bytes following the size field.
                take(&mut p, size)?;
            }
        }
    }
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<RoadMap> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_map_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<RoadMap> {
    let bytes = std::fs::read(path)?;
    parse_map_bytes(&bytes)
}

/// Human readable header; the creation date is the creator timestamp in local time.
pub fn comment_block(map: &RoadMap) -> String {
    let created = DateTime::<Utc>::from_timestamp(map.creator.timestamp as i64, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
        .format("%a %b %e %H:%M:%S %Y");

    let rule = "#####################################################\n";
    let mut out = String::new();
    out.push_str(rule);
    out.push_str("#\n");
    out.push_str("# Carnegie Mellon Robot Toolkit (CARMEN) map file\n");
    out.push_str("#\n");
    out.push_str(&format!("# Map author    : {}\n", map.creator.user));
    out.push_str(&format!("# Creation date : {}\n", created));
    out.push_str(&format!("# Map size      : {} x {}\n", map.width, map.height));
    out.push_str(&format!("# Resolution    : {:.1}\n", map.resolution));
    out.push_str(&format!("# Origin        : {}\n", map.creator.origin));
    out.push_str(&format!("# Description   : {}\n", map.creator.description));
    out.push_str("#\n");
    out.push_str(rule);
    out
}

/// Value of the GRIDMAP size field for a `width x height` map, or `None` when it
/// does not fit the u32 field. The field counts 4 bytes per cell.
pub fn gridmap_chunk_size(width: u32, height: u32) -> Option<u32> {
    (width as u64 * height as u64)
        .checked_mul(4)
        .and_then(|s| s.checked_add((CHUNK_DESCRIPTION_LEN + 12) as u64))
        .and_then(|s| u32::try_from(s).ok())
}

/// Serialize a full map file into `w`.
pub fn write_to<W: Write>(w: &mut W, map: &RoadMap) -> io::Result<()> {
    let expected = map.width as usize * map.height as usize;
    if map.cells.len() != expected {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "cells length != width * height",
        ));
    }

    let gridmap_size = gridmap_chunk_size(map.width, map.height)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "map too large for GRIDMAP size field"))?;

    w.write_all(comment_block(map).as_bytes())?;

    w.write_all(&CARMEN_MAP_LABEL)?;
    w.write_all(&CARMEN_MAP_VERSION)?;

    // CREATOR
    let creator_size = CHUNK_DESCRIPTION_LEN + CREATOR_USER_LEN + 8 + 2 * CREATOR_TEXT_LEN;
    w.write_all(&[CARMEN_MAP_CREATOR_CHUNK])?;
    write_u32(w, creator_size as u32)?;
    w.write_all(b"CREATOR   ")?;
    let user = if map.creator.user.is_empty() {
        "UNKNOWN"
    } else {
        map.creator.user.as_str()
    };
    write_text(w, user, CREATOR_USER_LEN)?;
    write_u64(w, map.creator.timestamp)?;
    write_text(w, &map.creator.origin, CREATOR_TEXT_LEN)?;
    write_text(w, &map.creator.description, CREATOR_TEXT_LEN)?;

    // GRIDMAP
    w.write_all(&[CARMEN_MAP_GRIDMAP_CHUNK])?;
    write_u32(w, gridmap_size)?;
    w.write_all(b"GRIDMAP   ")?;
    write_u32(w, map.width)?;
    write_u32(w, map.height)?;
    write_f64(w, map.resolution)?;

    #[cfg(target_endian = "little")]
    {
        // RoadCell is four packed u16 in payload order.
        w.write_all(bytemuck::cast_slice(&map.cells))?;
    }

    #[cfg(not(target_endian = "little"))]
    {
        for cell in &map.cells {
            write_u16(w, cell.off_road)?;
            write_u16(w, cell.solid_marking)?;
            write_u16(w, cell.broken_marking)?;
            write_u16(w, cell.lane_center)?;
        }
    }

    Ok(())
}

/// Write `map` to `path`. The bytes go to a sibling temporary file that is renamed
/// over `path` only once complete, so a failed write never leaves a partial map.
pub fn write_file<P: AsRef<Path>>(path: P, map: &RoadMap) -> io::Result<()> {
    let path = path.as_ref();
    let tmp = temp_path_for(path);

    let result = (|| {
        let mut out = BufWriter::new(File::create(&tmp)?);
        write_to(&mut out, map)?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }

    result
}

/// Sibling `<name>.<pid>.<n>.tmp`, unique per call so concurrent writers of the
/// same map never share a temporary file.
fn temp_path_for(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

#[inline]
fn write_text<W: Write + ?Sized>(w: &mut W, s: &str, len: usize) -> io::Result<()> {
    // Cut on a char boundary so the field stays valid UTF-8.
    let n = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= len)
        .last()
        .unwrap_or(0);
    w.write_all(&s.as_bytes()[..n])?;
    for _ in n..len {
        w.write_all(b" ")?;
    }
    Ok(())
}

#[cfg(not(target_endian = "little"))]
#[inline]
fn write_u16<W: Write + ?Sized>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_u32<W: Write + ?Sized>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_u64<W: Write + ?Sized>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f64<W: Write + ?Sized>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creator() -> MapCreator {
        MapCreator {
            user: "tester".to_string(),
            timestamp: 1_700_000_000,
            origin: "".to_string(),
            description: "unit test".to_string(),
        }
    }

    fn sample_map() -> RoadMap {
        let mut map = RoadMap::new(3, 2, LOCAL_GRIDMAP_RESOLUTION, creator());
        for x in 0..3 {
            for y in 0..2 {
                let cell = map.cell_mut(x, y).unwrap();
                cell.off_road = 0;
                cell.solid_marking = (x * 10 + y) as u16;
                cell.broken_marking = 32768;
                cell.lane_center = PROB_MAX - (x + y) as u16;
            }
        }
        map
    }

    /// Offset of the first byte after the comment block.
    fn header_end(bytes: &[u8]) -> usize {
        let mut i = 0;
        while bytes[i] == b'#' {
            i += bytes[i..].iter().position(|&b| b == b'\n').unwrap() + 1;
        }
        i
    }

    #[test]
    fn test_round_trip() {
        let map = sample_map();
        let mut bytes = Vec::new();
        write_to(&mut bytes, &map).unwrap();

        let back = parse_map_bytes(&bytes).unwrap();
        assert_eq!(back.width, 3);
        assert_eq!(back.height, 2);
        assert_eq!(back.resolution, LOCAL_GRIDMAP_RESOLUTION);
        assert_eq!(back.creator, map.creator);
        assert_eq!(back.cells, map.cells);
    }

    #[test]
    fn test_byte_layout() {
        let map = sample_map();
        let mut bytes = Vec::new();
        write_to(&mut bytes, &map).unwrap();

        let text = String::from_utf8_lossy(&bytes[..header_end(&bytes)]).into_owned();
        assert!(text.contains("# Map size      : 3 x 2\n"));
        assert!(text.contains("# Resolution    : 0.2\n"));
        assert!(text.contains("# Description   : unit test\n"));

        let mut p = &bytes[header_end(&bytes)..];
        assert_eq!(take(&mut p, 17).unwrap(), b"CARMENMAPFILEv020");

        assert_eq!(le_u8(&mut p).unwrap(), 32);
        assert_eq!(le_u32(&mut p).unwrap(), 188);
        assert_eq!(take(&mut p, 10).unwrap(), b"CREATOR   ");
        assert_eq!(take(&mut p, 10).unwrap(), b"tester    ");
        assert_eq!(le_u64(&mut p).unwrap(), 1_700_000_000);
        assert_eq!(take(&mut p, 80).unwrap(), &[b' '; 80][..]);
        take(&mut p, 80).unwrap();

        assert_eq!(le_u8(&mut p).unwrap(), 1);
        assert_eq!(le_u32(&mut p).unwrap(), 10 + 12 + 3 * 2 * 4);
        assert_eq!(take(&mut p, 10).unwrap(), b"GRIDMAP   ");
        assert_eq!(le_u32(&mut p).unwrap(), 3);
        assert_eq!(le_u32(&mut p).unwrap(), 2);
        assert_eq!(le_f64(&mut p).unwrap(), 0.2);

        // Column-major: (x=0,y=0), (x=0,y=1), (x=1,y=0) ...
        assert_eq!(p.len(), 3 * 2 * 8);
        let third = &p[16..24];
        assert_eq!(u16::from_le_bytes([third[0], third[1]]), 0);
        assert_eq!(u16::from_le_bytes([third[2], third[3]]), 10);
        assert_eq!(u16::from_le_bytes([third[4], third[5]]), 32768);
        assert_eq!(u16::from_le_bytes([third[6], third[7]]), PROB_MAX - 1);
    }

    #[test]
    fn test_text_fields_are_truncated() {
        let mut map = RoadMap::new(1, 1, LOCAL_GRIDMAP_RESOLUTION, creator());
        map.creator.user = "a_very_long_login_name".to_string();
        map.creator.origin = "o".repeat(120);

        let mut bytes = Vec::new();
        write_to(&mut bytes, &map).unwrap();
        let back = parse_map_bytes(&bytes).unwrap();

        assert_eq!(back.creator.user, "a_very_lon");
        assert_eq!(back.creator.origin.len(), 80);
    }

    #[test]
    fn test_text_fields_keep_whole_chars() {
        let mut map = RoadMap::new(1, 1, LOCAL_GRIDMAP_RESOLUTION, creator());
        // 'ã' is two bytes and would straddle the 10-byte user field.
        map.creator.user = "aaaaaaaaaã".to_string();
        map.creator.description = format!("x{}", "é".repeat(50));

        let mut bytes = Vec::new();
        write_to(&mut bytes, &map).unwrap();
        let back = parse_map_bytes(&bytes).unwrap();

        assert_eq!(back.creator.user, "aaaaaaaaa");
        assert_eq!(back.creator.description, format!("x{}", "é".repeat(39)));
        assert!(!back.creator.user.contains('\u{FFFD}'));
    }

    #[test]
    fn test_gridmap_chunk_size() {
        assert_eq!(gridmap_chunk_size(3, 2), Some(22 + 24));
        assert_eq!(gridmap_chunk_size(0, 0), Some(22));
        assert_eq!(gridmap_chunk_size(32768, 32767), Some(22 + 32768 * 32767 * 4));
        assert_eq!(gridmap_chunk_size(32768, 32768), None);
        assert_eq!(gridmap_chunk_size(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_unknown_chunk_is_skipped() {
        let map = RoadMap::new(2, 2, LOCAL_GRIDMAP_RESOLUTION, creator());
        let mut bytes = Vec::new();
        write_to(&mut bytes, &map).unwrap();

        // Splice an unknown chunk right after the id.
        let at = header_end(&bytes) + 17;
        let mut extra = vec![7u8];
        extra.extend_from_slice(&3u32.to_le_bytes());
        extra.extend_from_slice(b"abc");
        bytes.splice(at..at, extra);

        let back = parse_map_bytes(&bytes).unwrap();
        assert_eq!(back.cells.len(), 4);
        assert_eq!(back.creator.user, "tester");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_map_bytes(b"#comment\nNOTAMAPFILEv020").is_err());

        let map = sample_map();
        let mut bytes = Vec::new();
        write_to(&mut bytes, &map).unwrap();
        bytes.truncate(bytes.len() - 3);
        let err = parse_map_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        let mut broken = sample_map();
        broken.cells.pop();
        assert!(write_to(&mut Vec::new(), &broken).is_err());
    }

    #[test]
    fn test_write_file_leaves_no_temp() {
        let dir = std::env::temp_dir().join(format!("carmen_map_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("road.map");

        let map = sample_map();
        write_file(&path, &map).unwrap();

        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("road.map")]);
        assert_eq!(read_file(&path).unwrap().cells, map.cells);
        assert_ne!(temp_path_for(&path), temp_path_for(&path));

        // Writing into a missing directory fails without creating anything.
        let missing = dir.join("missing").join("road.map");
        assert!(write_file(&missing, &map).is_err());
        assert!(!missing.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_concurrent_writes_to_one_path() {
        let dir = std::env::temp_dir().join(format!("carmen_map_race_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("road.map");

        let maps: Vec<RoadMap> = (0..4u32)
            .map(|i| RoadMap::new(i + 1, 64, LOCAL_GRIDMAP_RESOLUTION, creator()))
            .collect();

        std::thread::scope(|s| {
            for map in &maps {
                let path = &path;
                s.spawn(move || write_file(path, map).unwrap());
            }
        });

        // One complete map wins; no temporary file is left behind.
        let back = read_file(&path).unwrap();
        assert!(maps.iter().any(|m| m.width == back.width && m.cells == back.cells));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }
}
