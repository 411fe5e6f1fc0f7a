//! Decompression filter construction.
//!
//! Each filter wraps a compressed byte source in the matching streaming
//! decoder. Multi-member and multi-stream inputs (concatenated gzip members,
//! bzip2 streams, xz streams) decode as one continuous stream, matching what
//! a command-line `gunzip`/`bunzip2`/`unxz` would produce.

use std::io::{self, Read};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use xz2::read::XzDecoder;

use crate::detect::Filter;

/// Wraps `source` in the decoder for `filter`.
pub fn decoder<'a>(
    filter: Filter,
    source: Box<dyn Read + Send + 'a>,
) -> io::Result<Box<dyn Read + Send + 'a>> {
    Ok(match filter {
        Filter::Gzip => Box::new(MultiGzDecoder::new(source)),
        Filter::Bzip2 => Box::new(MultiBzDecoder::new(source)),
        Filter::Xz => Box::new(XzDecoder::new_multi_decoder(source)),
        Filter::Zstd => Box::new(zstd::stream::read::Decoder::new(source)?),
    })
}
