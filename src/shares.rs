//! Shared file listings exchanged via SharesRequest / SharesReply.
//!
//! The reply body is zlib data. Once inflated it is a flat stream with no
//! self-describing boundaries, so every field is consumed in order even when
//! its value is thrown away.

use bytes::{Buf, BufMut, BytesMut};

use crate::Result;
use crate::protocol::{
    ProtocolRead, ProtocolWrite, read_len, read_list, write_list, zlib_compress, zlib_decompress,
};

/// Per-file tag written before each entry. Its value carries no meaning.
const FILE_TAG: u8 = 1;

/// Shared file entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub name: String,
    pub size: i32,
}

impl SharedFile {
    pub fn new(name: impl Into<String>, size: i32) -> Self {
        SharedFile {
            name: name.into(),
            size,
        }
    }

    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        let _tag = u8::read_from(buf)?;
        let name = String::read_from(buf)?;
        let size = i32::read_from(buf)?;
        let _extension = String::read_from(buf)?;
        let _unknown = i32::read_from(buf)?;
        let attr_count = read_len(buf)?;
        for _ in 0..attr_count {
            let _attr_type = i32::read_from(buf)?;
            let _attr_value = i32::read_from(buf)?;
        }
        Ok(SharedFile { name, size })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        FILE_TAG.write_to(buf);
        self.name.write_to(buf);
        self.size.write_to(buf);
        "".write_to(buf); // extension
        0i32.write_to(buf); // unknown
        0i32.write_to(buf); // attribute count
    }
}

/// Directory with files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedDirectory {
    pub name: String,
    pub files: Vec<SharedFile>,
}

impl SharedDirectory {
    pub fn new(name: impl Into<String>, files: Vec<SharedFile>) -> Self {
        SharedDirectory {
            name: name.into(),
            files,
        }
    }

    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        let name = String::read_from(buf)?;
        let files = read_list(buf, SharedFile::read_from)?;
        Ok(SharedDirectory { name, files })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        self.name.write_to(buf);
        write_list(buf, &self.files, |b, f| f.write_to(b));
    }
}

/// A peer's parsed share inventory, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareListing {
    pub directories: Vec<SharedDirectory>,
}

impl ShareListing {
    pub fn new(directories: Vec<SharedDirectory>) -> Self {
        ShareListing { directories }
    }

    /// Inflate a SharesReply body and parse it.
    pub fn decompress(compressed: &[u8]) -> Result<Self> {
        let decompressed = zlib_decompress(compressed)?;
        Self::read_from(&mut &decompressed[..])
    }

    /// Serialize and deflate into a SharesReply body.
    pub fn compress(&self) -> Result<Vec<u8>> {
        let mut uncompressed = BytesMut::new();
        self.write_to(&mut uncompressed);
        zlib_compress(&uncompressed)
    }

    /// Parse an already-inflated listing.
    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        let directories = read_list(buf, SharedDirectory::read_from)?;
        Ok(ShareListing { directories })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        write_list(buf, &self.directories, |b, d| d.write_to(b));
    }

    pub fn folder_count(&self) -> usize {
        self.directories.len()
    }

    pub fn file_count(&self) -> usize {
        self.directories.iter().map(|d| d.files.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    /// A file entry the way a real peer writes it, with extension, the
    /// trailing integer and attributes all populated.
    fn write_full_file(buf: &mut BytesMut, name: &str, size: i32, attrs: &[(i32, i32)]) {
        7u8.write_to(buf);
        name.write_to(buf);
        size.write_to(buf);
        "mp3".write_to(buf);
        99i32.write_to(buf);
        (attrs.len() as i32).write_to(buf);
        for (kind, value) in attrs {
            kind.write_to(buf);
            value.write_to(buf);
        }
    }

    #[test]
    fn test_parse_two_directories() {
        let mut raw = BytesMut::new();
        2i32.write_to(&mut raw);
        "Music\\Empty".write_to(&mut raw);
        0i32.write_to(&mut raw);
        "Music\\Full".write_to(&mut raw);
        2i32.write_to(&mut raw);
        write_full_file(&mut raw, "a.mp3", 100, &[(0, 320), (1, 215)]);
        write_full_file(&mut raw, "b.mp3", 12345, &[]);

        let compressed = zlib_compress(&raw).unwrap();
        let listing = ShareListing::decompress(&compressed).unwrap();

        assert_eq!(
            listing,
            ShareListing::new(vec![
                SharedDirectory::new("Music\\Empty", vec![]),
                SharedDirectory::new(
                    "Music\\Full",
                    vec![SharedFile::new("a.mp3", 100), SharedFile::new("b.mp3", 12345)]
                ),
            ])
        );
        assert_eq!(listing.folder_count(), 2);
        assert_eq!(listing.file_count(), 2);
    }

    #[test]
    fn test_attributes_are_consumed() {
        // If attribute pairs were skipped the second file would be misread.
        let mut raw = BytesMut::new();
        1i32.write_to(&mut raw);
        "d".write_to(&mut raw);
        2i32.write_to(&mut raw);
        write_full_file(&mut raw, "x", 1, &[(0, 1), (1, 2), (2, 3)]);
        write_full_file(&mut raw, "y", 2, &[(4, 44100)]);

        let listing = ShareListing::read_from(&mut raw.freeze()).unwrap();
        let names: Vec<_> = listing.directories[0]
            .files
            .iter()
            .map(|f| (f.name.as_str(), f.size))
            .collect();
        assert_eq!(names, vec![("x", 1), ("y", 2)]);
    }

    #[test]
    fn test_compress_roundtrip() {
        let listing = ShareListing::new(vec![SharedDirectory::new(
            "Shared",
            vec![SharedFile::new("", 0)],
        )]);
        let compressed = listing.compress().unwrap();
        assert_eq!(ShareListing::decompress(&compressed).unwrap(), listing);
    }

    #[test]
    fn test_truncated_listing() {
        let mut raw = BytesMut::new();
        1i32.write_to(&mut raw);
        "d".write_to(&mut raw);
        3i32.write_to(&mut raw);
        let result = ShareListing::read_from(&mut raw.freeze());
        assert!(matches!(result, Err(Error::MalformedMessage { .. })));
    }

    #[test]
    fn test_not_compressed() {
        let result = ShareListing::decompress(&[0, 0, 0, 0]);
        assert!(matches!(result, Err(Error::Decompression(_))));
    }
}
