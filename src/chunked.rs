use error::Error;
use header_set::HeaderSet;
use line_reader::LineReader;

/// State of the RFC 7230 §4.1 chunked decoder (`§3` data model, `§4.4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Size,
    SizeEol,
    Data,
    DataEol,
    Trailer,
    End,
}

/// Maximum chunk size accepted, per `§4.4`: `2^31 - 1`.
const MAX_CHUNK_SIZE: u64 = (1u64 << 31) - 1;

/// RFC 7230 chunked transfer decoder with trailer support.
///
/// `Read(out, n)` in the spec is modeled here as [`ChunkDecoder::decode`]:
/// it is handed raw transport bytes and an output buffer, and it never
/// blocks on the transport itself — that is the caller's job
/// (`RequestStream`/`ChunkedRequestStream`, `§4.5`).
///
/// Grounded on the teacher's `chunked::State`, which tracked
/// `buffered`/`pending`/`done` over an already-in-memory `netbuf::Buf`.
/// That version neither exposed the phases named in the spec nor
/// collected trailers; both are implemented fully here, resolving Open
/// Question 1 in `§9` (the teacher's `ChunkedRequestStream` decoder-pull
/// path is a commented-out stub and must not be replicated).
#[derive(Debug)]
pub struct ChunkDecoder {
    phase: Phase,
    chunk_remaining: u64,
    line: LineReader,
    /// Once a `;` is seen in the size line, everything up to the CRLF is
    /// extension data and is discarded rather than accumulated.
    in_extension: bool,
    trailer_line: LineReader,
    trailers: HeaderSet,
    /// `want_more` is `false` exactly once the terminating zero-size
    /// chunk and its trailer block have both been fully consumed.
    want_more: bool,
}

impl ChunkDecoder {
    pub fn new() -> ChunkDecoder {
        ChunkDecoder {
            phase: Phase::None,
            chunk_remaining: 0,
            line: LineReader::new(),
            in_extension: false,
            trailer_line: LineReader::new(),
            trailers: HeaderSet::new(),
            want_more: true,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn want_more(&self) -> bool {
        self.want_more
    }

    pub fn trailers(&self) -> &HeaderSet {
        &self.trailers
    }

    /// Feed transport bytes starting at `input`, writing decoded body
    /// bytes into `out` (at most `out.len()`). Returns
    /// `(input_consumed, output_written)`. Never blocks; an empty
    /// `input` with `want_more() == true` simply means "no progress yet,
    /// not an error" per `§4.4`.
    pub fn decode(&mut self, input: &[u8], out: &mut [u8])
        -> Result<(usize, usize), Error>
    {
        if self.phase == Phase::None {
            self.phase = Phase::Size;
        }

        let mut consumed = 0;
        let mut written = 0;

        while consumed < input.len() && written < out.len() {
            match self.phase {
                Phase::End => break,
                Phase::Size => {
                    let byte = input[consumed];
                    consumed += 1;
                    match byte {
                        b';' => {
                            self.in_extension = true;
                        }
                        b'\r' | b'\n' => {
                            if let Some(line) = self.line.feed(byte) {
                                self.in_extension = false;
                                self.chunk_remaining = parse_chunk_size(&line)?;
                                self.phase = if self.chunk_remaining == 0 {
                                    Phase::Trailer
                                } else {
                                    Phase::Data
                                };
                            }
                        }
                        _ => {
                            if !self.in_extension {
                                self.line.feed(byte);
                            }
                        }
                    }
                }
                Phase::Data => {
                    let take = ::std::cmp::min(
                        self.chunk_remaining as usize,
                        ::std::cmp::min(input.len() - consumed,
                                         out.len() - written));
                    out[written..written + take]
                        .copy_from_slice(&input[consumed..consumed + take]);
                    consumed += take;
                    written += take;
                    self.chunk_remaining -= take as u64;
                    if self.chunk_remaining == 0 {
                        self.phase = Phase::DataEol;
                    }
                }
                Phase::DataEol => {
                    let byte = input[consumed];
                    consumed += 1;
                    if let Some(line) = self.line.feed(byte) {
                        if !line.is_empty() {
                            return Err(Error::PrematureEof);
                        }
                        self.phase = Phase::Size;
                    }
                }
                Phase::Trailer => {
                    let byte = input[consumed];
                    consumed += 1;
                    if let Some(line) = self.trailer_line.feed(byte) {
                        if line.is_empty() {
                            self.phase = Phase::End;
                            self.want_more = false;
                        } else {
                            add_trailer(&mut self.trailers, &line)?;
                        }
                    }
                }
                Phase::SizeEol | Phase::None => unreachable!(),
            }
        }
        Ok((consumed, written))
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    if line.is_empty() {
        return Err(Error::ChunkSize(bad_chunk_size()));
    }
    let mut value: u64 = 0;
    for &b in line {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u64,
            b'a'..=b'f' => (b - b'a' + 10) as u64,
            b'A'..=b'F' => (b - b'A' + 10) as u64,
            _ => return Err(Error::ChunkSize(bad_chunk_size())),
        };
        value = value.checked_mul(16)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| Error::ChunkSize(bad_chunk_size()))?;
        if value > MAX_CHUNK_SIZE {
            return Err(Error::ChunkSize(bad_chunk_size()));
        }
    }
    Ok(value)
}

fn bad_chunk_size() -> ::httparse::InvalidChunkSize {
    // `httparse::InvalidChunkSize` is a unit struct; this helper exists
    // purely so the error path above reads as one expression per branch.
    ::httparse::InvalidChunkSize
}

fn add_trailer(trailers: &mut HeaderSet, line: &[u8]) -> Result<(), Error> {
    let colon = line.iter().position(|&b| b == b':')
        .ok_or(Error::Parse(::httparse::Error::HeaderName))?;
    let name = ::std::str::from_utf8(&line[..colon])
        .map_err(|_| Error::Parse(::httparse::Error::HeaderName))?;
    let value = trim_ows(&line[colon + 1..]);
    trailers.add_unchecked(name, value.to_vec());
    Ok(())
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = bytes.len();
    while start < end && matches!(bytes[start], b' ' | b'\t') {
        start += 1;
    }
    while end > start && matches!(bytes[end - 1], b' ' | b'\t') {
        end -= 1;
    }
    &bytes[start..end]
}
