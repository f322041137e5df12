//! Bounded body readers (`§4.5`). Both types are transport-agnostic:
//! they are handed whatever bytes the transport produced and return
//! how many of those bytes belong to the body, leaving all blocking
//! and scheduling to `Connection`.
//!
//! Grounded on the teacher's `body_parser::BodyProgress`, which tracked
//! a similar fixed/chunked split over an in-memory `netbuf::Buf`; here
//! the preamble-carry window and the transport read are both modeled
//! as plain byte slices so the type has no dependency on `tk-bufstream`
//! internals.

use chunked::ChunkDecoder;
use error::Error;
use header_set::HeaderSet;

/// Fixed-length (or unbounded) body reader that first drains whatever
/// bytes were read past the blank line while parsing the preamble,
/// then clamps further transport reads to the remaining length.
pub struct RequestStream {
    carry: Vec<u8>,
    carry_pos: usize,
    remaining: Option<u64>,
}

impl RequestStream {
    /// `carry` is the slice of already-buffered bytes following the
    /// preamble's terminating blank line. `content_length` is `None`
    /// for an unbounded body (never produced by this crate's own
    /// parser, but kept for host code that constructs streams
    /// directly) and `Some(0)` for an empty one.
    pub fn new(carry: Vec<u8>, content_length: Option<u64>) -> RequestStream {
        RequestStream {
            carry: carry,
            carry_pos: 0,
            remaining: content_length,
        }
    }

    /// Whether a further `read` may yield more bytes without first
    /// receiving more transport input.
    pub fn has_buffered(&self) -> bool {
        self.carry_pos < self.carry.len()
    }

    /// Total bytes the body is still expected to produce, or `None`
    /// if unbounded.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Copy up to `out.len()` bytes of body into `out`, first
    /// draining the carry window, then `transport` (freshly read
    /// bytes the caller has on hand — it does not itself read from a
    /// socket). Returns `(from_carry, from_transport)` consumed counts
    /// and the number of bytes written into `out`.
    pub fn read(&mut self, transport: &[u8], out: &mut [u8])
        -> (usize, usize, usize)
    {
        let mut written = 0;
        let mut from_carry = 0;
        let mut from_transport = 0;

        if self.carry_pos < self.carry.len() && written < out.len() {
            let avail = self.clamp(self.carry.len() - self.carry_pos);
            let take = ::std::cmp::min(avail, out.len() - written);
            out[written..written + take].copy_from_slice(
                &self.carry[self.carry_pos..self.carry_pos + take]);
            self.carry_pos += take;
            written += take;
            from_carry = take;
            self.consume(take as u64);
        }

        if written < out.len() {
            let avail = self.clamp(transport.len());
            let take = ::std::cmp::min(avail, out.len() - written);
            out[written..written + take].copy_from_slice(&transport[..take]);
            written += take;
            from_transport = take;
            self.consume(take as u64);
        }

        (from_carry, from_transport, written)
    }

    fn clamp(&self, n: usize) -> usize {
        match self.remaining {
            Some(r) => ::std::cmp::min(n as u64, r) as usize,
            None => n,
        }
    }

    fn consume(&mut self, n: u64) {
        if let Some(ref mut r) = self.remaining {
            *r -= n;
        }
    }

    /// `true` once the advertised length has been fully delivered.
    pub fn is_eof(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Body reader that delegates framing to a [`ChunkDecoder`] (`§4.5`).
pub struct ChunkedRequestStream {
    carry: Vec<u8>,
    carry_pos: usize,
    decoder: ChunkDecoder,
    no_more_data: bool,
}

impl ChunkedRequestStream {
    pub fn new(carry: Vec<u8>) -> ChunkedRequestStream {
        ChunkedRequestStream {
            carry: carry,
            carry_pos: 0,
            decoder: ChunkDecoder::new(),
            no_more_data: false,
        }
    }

    pub fn trailers(&self) -> &HeaderSet {
        self.decoder.trailers()
    }

    /// Sticky once set: `§4.5`'s `noMoreData` flag.
    pub fn is_eof(&self) -> bool {
        self.no_more_data
    }

    /// Decode from the carry window first, then from freshly read
    /// `transport` bytes, writing decoded body bytes into `out`.
    /// Returns `(carry_consumed, transport_consumed, written)`.
    pub fn read(&mut self, transport: &[u8], out: &mut [u8])
        -> Result<(usize, usize, usize), Error>
    {
        if self.no_more_data {
            return Ok((0, 0, 0));
        }

        let mut written = 0;
        let mut carry_consumed = 0;
        let mut transport_consumed = 0;

        if self.carry_pos < self.carry.len() && written < out.len() {
            let (used, n) = self.decoder.decode(
                &self.carry[self.carry_pos..], &mut out[written..])?;
            self.carry_pos += used;
            carry_consumed = used;
            written += n;
            if !self.decoder.want_more() {
                self.no_more_data = true;
            }
        }

        if !self.no_more_data && written < out.len() && !transport.is_empty() {
            let (used, n) = self.decoder.decode(transport, &mut out[written..])?;
            transport_consumed = used;
            written += n;
            if !self.decoder.want_more() {
                self.no_more_data = true;
            }
        }

        Ok((carry_consumed, transport_consumed, written))
    }
}

#[cfg(test)]
mod test {
    use super::{RequestStream, ChunkedRequestStream};

    #[test]
    fn drains_carry_window_before_transport() {
        let mut s = RequestStream::new(b"he".to_vec(), Some(5));
        let mut out = [0u8; 10];
        let (fc, ft, w) = s.read(b"llo", &mut out);
        assert_eq!(fc, 2);
        assert_eq!(ft, 3);
        assert_eq!(w, 5);
        assert_eq!(&out[..5], b"hello");
        assert!(s.is_eof());
    }

    #[test]
    fn content_length_zero_is_immediate_eof() {
        let s = RequestStream::new(Vec::new(), Some(0));
        assert!(s.is_eof());
    }

    #[test]
    fn clamps_to_remaining_length() {
        let mut s = RequestStream::new(Vec::new(), Some(3));
        let mut out = [0u8; 10];
        let (_, ft, w) = s.read(b"hello", &mut out);
        assert_eq!(ft, 3);
        assert_eq!(w, 3);
        assert_eq!(&out[..3], b"hel");
        assert!(s.is_eof());
    }

    #[test]
    fn chunked_stream_reports_eof_once_decoder_ends() {
        let mut s = ChunkedRequestStream::new(b"5\r\nhello\r\n0\r\n\r\n".to_vec());
        let mut out = [0u8; 16];
        let (_, _, w) = s.read(b"", &mut out).unwrap();
        assert_eq!(&out[..w], b"hello");
        assert!(s.is_eof());
        let (_, _, w2) = s.read(b"", &mut out).unwrap();
        assert_eq!(w2, 0);
    }

    #[test]
    fn chunked_stream_continues_into_transport_bytes() {
        let mut s = ChunkedRequestStream::new(b"5\r\nhel".to_vec());
        let mut out = [0u8; 16];
        let (_, _, w) = s.read(b"lo\r\n0\r\n\r\n", &mut out).unwrap();
        assert_eq!(&out[..w], b"hello");
        assert!(s.is_eof());
    }
}
