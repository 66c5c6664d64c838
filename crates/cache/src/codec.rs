//! Payload compression for cache values.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use tracing::debug;

/// Settings key under which the benchmark winner is persisted.
pub const SETTING_KEY: &str = "cache.compression";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    None,
    Zlib,
    Gzip,
    Bzip2,
    Lzma,
}

impl Codec {
    pub const CANDIDATES: [Codec; 4] = [Self::Lzma, Self::Zlib, Self::Gzip, Self::Bzip2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bz2",
            Self::Lzma => "lzma",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "zlib" => Some(Self::Zlib),
            "gzip" => Some(Self::Gzip),
            "bz2" => Some(Self::Bzip2),
            "lzma" => Some(Self::Lzma),
            _ => None,
        }
    }

    pub fn compress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Zlib => {
                let mut enc =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
            Self::Gzip => {
                let mut enc =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
            Self::Bzip2 => {
                let mut enc =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
            Self::Lzma => {
                let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
                enc.write_all(data)?;
                enc.finish()
            }
        }
    }

    pub fn decompress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::None => out.extend_from_slice(data),
            Self::Zlib => {
                flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
            }
            Self::Gzip => {
                flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
            }
            Self::Bzip2 => {
                bzip2::read::BzDecoder::new(data).read_to_end(&mut out)?;
            }
            Self::Lzma => {
                xz2::read::XzDecoder::new(data).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }

    /// Time every candidate on `sample` and return the one with the smallest
    /// output among those whose round trip is at most three times the fastest.
    pub fn benchmark(sample: &[u8]) -> Codec {
        let mut results: Vec<(Codec, usize, Duration)> = Vec::new();
        for codec in Self::CANDIDATES {
            let start = Instant::now();
            let Ok(packed) = codec.compress(sample) else {
                continue;
            };
            match codec.decompress(&packed) {
                Ok(unpacked) if unpacked == sample => {}
                _ => continue,
            }
            let elapsed = start.elapsed();
            debug!(
                codec = codec.as_str(),
                size = packed.len(),
                elapsed_us = elapsed.as_micros() as u64,
                "codec benchmark"
            );
            results.push((codec, packed.len(), elapsed));
        }

        let Some(fastest) = results.iter().map(|r| r.2).min() else {
            return Self::None;
        };
        results
            .into_iter()
            .filter(|r| r.2 <= fastest * 3)
            .min_by_key(|r| r.1)
            .map(|r| r.0)
            .unwrap_or(Self::None)
    }
}

/// A representative payload: a page of list items as JSON.
pub fn benchmark_sample() -> Vec<u8> {
    let items: Vec<serde_json::Value> = (0..200)
        .map(|i| {
            serde_json::json!({
                "title": format!("Title number {i}"),
                "year": 1990 + (i % 35),
                "ids": { "imdb": format!("tt{:07}", 100000 + i * 37), "tmdb": 500 + i * 11 },
                "genre": ["drama", "thriller", if i % 2 == 0 { "comedy" } else { "crime" }],
                "rating": (i % 100) as f64 / 10.0,
                "votes": i * 1234,
            })
        })
        .collect();
    serde_json::to_vec(&items).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_codec_restores_its_input() {
        let sample = benchmark_sample();
        for codec in Codec::CANDIDATES {
            let packed = codec.compress(&sample).unwrap();
            assert!(packed.len() < sample.len(), "{} did not shrink", codec.as_str());
            assert_eq!(codec.decompress(&packed).unwrap(), sample);
            assert_eq!(Codec::from_str(codec.as_str()), Some(codec));
        }
    }

    #[test]
    fn benchmark_picks_a_compressing_codec() {
        let winner = Codec::benchmark(&benchmark_sample());
        assert_ne!(winner, Codec::None);
    }
}
