//! # Torrent Metadata
//!
//! This module decodes `.torrent` files into the [`TorrentMetadata`] the
//! download engine works from.
//!
//! ## Torrent File Format
//!
//! Torrent files contain metadata in bencoded format:
//!
//! - **announce**: Tracker URL for peer discovery
//! - **announce-list**: Tiers of tracker URLs (BEP 12), preferred when present
//! - **info**: Dictionary with file information and piece hashes
//!   - **pieces**: Concatenated SHA-1 hashes, one per piece
//!   - **piece length**: Size of each piece (the last one may be shorter)
//!   - **length**: Total size, for single-file torrents
//!   - **files**: List of `{length, path}`, for multi-file torrents
//!   - **name**: Suggested file or directory name
//!
//! The info hash identifying the swarm is the SHA-1 of the bencoded `info`
//! dictionary.

use crate::piece::PieceWork;

use anyhow::{anyhow, bail, Result};
use boring::sha::Sha1;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

// Size of SHA-1 hash in bytes
const SHA1_HASH_SIZE: usize = 20;

/// One output file, in the order files are laid out in the torrent data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path components relative to the output directory
    pub path: Vec<String>,
    /// Size of the file in bytes
    pub length: u64,
}

/// Everything the download engine needs to know about a torrent.
#[derive(Debug, Clone)]
pub struct TorrentMetadata {
    /// Tracker URLs, deduplicated, in the order they should be tried
    pub announce: Vec<String>,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// One 20-byte SHA-1 hash per piece
    pub pieces_hashes: Vec<[u8; 20]>,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u32,
    /// Total size of the content in bytes
    pub length: u64,
    /// Suggested name from torrent metadata
    pub name: String,
    /// Output files, their lengths summing to `length`
    pub files: Vec<FileEntry>,
}

/// BencodeFile structure.
#[derive(Debug, Deserialize, Serialize)]
struct BencodeFile {
    // Size of the file in bytes
    length: u64,
    // Path components, the last one being the file name
    path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5sum: Option<String>,
}

/// BencodeInfo structure.
#[derive(Debug, Deserialize, Serialize)]
struct BencodeInfo {
    // Files of a multi-file torrent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<BencodeFile>>,
    // Size of the file in bytes, single-file torrents only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5sum: Option<String>,
    // Suggested filename, or directory name for multi-file torrents
    name: String,
    // Size of each piece in bytes
    #[serde(rename = "piece length")]
    piece_length: u32,
    // Concatenation of all pieces 20-byte SHA-1 hashes
    pieces: ByteBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<u8>,
}

/// BencodeTorrent structure.
#[derive(Debug, Deserialize, Serialize)]
struct BencodeTorrent {
    // URL of the tracker
    #[serde(default)]
    announce: String,
    // Tiers of tracker URLs
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    // Informations about the content
    info: BencodeInfo,
}

impl BencodeInfo {
    /// Hash bencoded informations to uniquely identify the content.
    fn hash(&self) -> Result<[u8; 20]> {
        let buf: Vec<u8> = ser::to_bytes::<BencodeInfo>(self)?;

        let mut hasher = Sha1::new();
        hasher.update(&buf);

        Ok(hasher.finish())
    }

    /// Split bencoded pieces into SHA-1 hashes.
    fn split_pieces_hashes(&self) -> Result<Vec<[u8; 20]>> {
        if self.pieces.len() % SHA1_HASH_SIZE != 0 {
            bail!("received malformed pieces of length {}", self.pieces.len());
        }

        let hashes = self
            .pieces
            .chunks_exact(SHA1_HASH_SIZE)
            .map(|chunk| {
                let mut hash = [0; SHA1_HASH_SIZE];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Ok(hashes)
    }

    /// Output files in content order.
    fn files(&self) -> Result<Vec<FileEntry>> {
        match (&self.files, self.length) {
            (Some(files), None) => Ok(files
                .iter()
                .map(|file| {
                    let mut path = vec![self.name.clone()];
                    path.extend(file.path.iter().cloned());
                    FileEntry {
                        path,
                        length: file.length,
                    }
                })
                .collect()),
            (None, Some(length)) => Ok(vec![FileEntry {
                path: vec![self.name.clone()],
                length,
            }]),
            _ => Err(anyhow!("torrent must have exactly one of length or files")),
        }
    }
}

impl BencodeTorrent {
    /// Tracker URLs to try, tiers shuffled as per BEP 12, duplicates removed.
    fn announce_urls(&self) -> Vec<String> {
        let mut tiers = if !self.announce_list.is_empty() {
            self.announce_list.clone()
        } else if !self.announce.is_empty() {
            vec![vec![self.announce.clone()]]
        } else {
            vec![]
        };

        let mut rng = rand::thread_rng();
        for tier in &mut tiers {
            tier.shuffle(&mut rng);
        }

        let mut unique_urls = HashSet::new();
        tiers
            .into_iter()
            .flatten()
            .filter(|url| unique_urls.insert(url.clone()))
            .collect()
    }
}

impl TorrentMetadata {
    /// Open and decode a torrent file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the torrent.
    ///
    pub fn open(filepath: &Path) -> Result<Self> {
        let buf = fs::read(filepath)
            .map_err(|e| anyhow!("could not read torrent {}: {}", filepath.display(), e))?;

        TorrentMetadata::from_bytes(&buf)
    }

    /// Decode bencoded torrent content.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let bencode = de::from_bytes::<BencodeTorrent>(buf)
            .map_err(|e| anyhow!("could not decode torrent: {}", e))?;

        let torrent = TorrentMetadata {
            announce: bencode.announce_urls(),
            info_hash: bencode.info.hash()?,
            pieces_hashes: bencode.info.split_pieces_hashes()?,
            piece_length: bencode.info.piece_length,
            length: bencode.info.files()?.iter().map(|file| file.length).sum(),
            name: bencode.info.name.clone(),
            files: bencode.info.files()?,
        };
        torrent.validate()?;

        Ok(torrent)
    }

    /// Check the invariants the download engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.announce.is_empty() {
            bail!("torrent has no announce or announce-list");
        }
        if self.length == 0 {
            bail!("torrent has no content");
        }
        if self.piece_length == 0 {
            bail!("torrent has a piece length of 0");
        }

        let expected_pieces = self.length.div_ceil(self.piece_length as u64);
        if self.pieces_hashes.len() as u64 != expected_pieces {
            bail!(
                "torrent has {} piece hashes, {} expected for {} bytes",
                self.pieces_hashes.len(),
                expected_pieces,
                self.length
            );
        }

        let files_length: u64 = self.files.iter().map(|file| file.length).sum();
        if files_length != self.length {
            bail!(
                "torrent files add up to {} bytes instead of {}",
                files_length,
                self.length
            );
        }

        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.pieces_hashes.len()
    }

    /// Byte range `[begin, end)` of a piece within the content.
    pub fn piece_bounds(&self, index: u32) -> (u64, u64) {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);

        (begin.min(end), end)
    }

    /// Length of a piece, clipped for the last one.
    pub fn piece_size(&self, index: u32) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }

    /// One `PieceWork` per piece, in index order.
    pub fn piece_works(&self) -> Vec<PieceWork> {
        self.pieces_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| {
                let index = index as u32;
                PieceWork::new(index, *hash, self.piece_size(index))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use boring::sha::sha1;

    fn bytes_field(name: &str, value: &[u8]) -> Vec<u8> {
        let mut field = format!("{}:{}{}:", name.len(), name, value.len()).into_bytes();
        field.extend_from_slice(value);
        field
    }

    fn single_file_info() -> Vec<u8> {
        let mut info = b"d6:lengthi7e4:name8:file.txt12:piece lengthi4e".to_vec();
        info.extend(bytes_field("pieces", &[b'a'; 40]));
        info.push(b'e');
        info
    }

    fn torrent_with_info(info: &[u8]) -> Vec<u8> {
        let mut torrent = b"d8:announce31:http://tracker.example/announce4:info".to_vec();
        torrent.extend_from_slice(info);
        torrent.push(b'e');
        torrent
    }

    fn metadata(length: u64, piece_length: u32) -> TorrentMetadata {
        let pieces = length.div_ceil(piece_length as u64) as usize;
        TorrentMetadata {
            announce: vec!["udp://tracker.example:6969".into()],
            info_hash: [0; 20],
            pieces_hashes: vec![[0; 20]; pieces],
            piece_length,
            length,
            name: "data".into(),
            files: vec![FileEntry {
                path: vec!["data".into()],
                length,
            }],
        }
    }

    #[test]
    fn test_single_file_torrent() {
        let info = single_file_info();
        let torrent = TorrentMetadata::from_bytes(&torrent_with_info(&info)).unwrap();

        assert_eq!(torrent.announce, vec!["http://tracker.example/announce"]);
        assert_eq!(torrent.info_hash, sha1(&info));
        assert_eq!(torrent.pieces_hashes, vec![[b'a'; 20], [b'a'; 20]]);
        assert_eq!(torrent.piece_length, 4);
        assert_eq!(torrent.length, 7);
        assert_eq!(torrent.name, "file.txt");
        assert_eq!(
            torrent.files,
            vec![FileEntry {
                path: vec!["file.txt".into()],
                length: 7
            }]
        );
    }

    #[test]
    fn test_multi_file_torrent() {
        let mut info =
            b"d5:filesld6:lengthi3e4:pathl1:a5:b.txteed6:lengthi5e4:pathl5:c.binee4:name3:dir12:piece lengthi4e"
                .to_vec();
        info.extend(bytes_field("pieces", &[b'z'; 40]));
        info.push(b'e');

        let torrent = TorrentMetadata::from_bytes(&torrent_with_info(&info)).unwrap();

        assert_eq!(torrent.info_hash, sha1(&info));
        assert_eq!(torrent.length, 8);
        assert_eq!(
            torrent.files,
            vec![
                FileEntry {
                    path: vec!["dir".into(), "a".into(), "b.txt".into()],
                    length: 3
                },
                FileEntry {
                    path: vec!["dir".into(), "c.bin".into()],
                    length: 5
                },
            ]
        );
    }

    #[test]
    fn test_announce_list_deduplicated() {
        let mut torrent = b"d8:announce7:udp://a13:announce-listll7:udp://ael7:udp://b7:udp://aee4:info"
            .to_vec();
        torrent.extend(single_file_info());
        torrent.push(b'e');

        let torrent = TorrentMetadata::from_bytes(&torrent).unwrap();
        assert_eq!(torrent.announce.len(), 2);
        assert_eq!(torrent.announce[0], "udp://a");
        assert_eq!(torrent.announce[1], "udp://b");
    }

    #[test]
    fn test_invalid_torrents_rejected() {
        assert!(TorrentMetadata::from_bytes(b"not a torrent").is_err());

        // Hash count does not match the length
        let mut info = b"d6:lengthi9e4:name1:x12:piece lengthi4e".to_vec();
        info.extend(bytes_field("pieces", &[b'a'; 40]));
        info.push(b'e');
        assert!(TorrentMetadata::from_bytes(&torrent_with_info(&info)).is_err());

        // Pieces not a multiple of 20 bytes
        let mut info = b"d6:lengthi4e4:name1:x12:piece lengthi4e".to_vec();
        info.extend(bytes_field("pieces", &[b'a'; 21]));
        info.push(b'e');
        assert!(TorrentMetadata::from_bytes(&torrent_with_info(&info)).is_err());

        // No tracker
        let mut torrent = b"d4:info".to_vec();
        torrent.extend(single_file_info());
        torrent.push(b'e');
        assert!(TorrentMetadata::from_bytes(&torrent).is_err());
    }

    #[test]
    fn test_piece_sizes() {
        let torrent = metadata(7, 4);
        assert_eq!(torrent.piece_size(0), 4);
        assert_eq!(torrent.piece_size(1), 3);
        assert_eq!(torrent.piece_bounds(1), (4, 7));

        for (length, piece_length) in [(7, 4), (8, 4), (1, 16384), (1_000_001, 262144)] {
            let torrent = metadata(length, piece_length);
            let works = torrent.piece_works();
            let last = works.len() - 1;

            for work in &works[..last] {
                assert_eq!(work.length, piece_length);
            }
            assert_eq!(
                works[last].length as u64,
                length - piece_length as u64 * last as u64
            );
            assert_eq!(
                works.iter().map(|work| work.length as u64).sum::<u64>(),
                length
            );
        }
    }
}
