use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Literal tag placed in front of every displayed identity.
pub const IDENTITY_TAG: &str = "cli-";
/// Reply to a `health` probe.
pub const HEALTH_REPLY: &str = "OK\n";
/// Closes a client-requested history replay.
pub const END_MARKER: &str = "<END>\n";
/// Rendered in place of an empty history listing.
pub const EMPTY_SENTINEL: &str = "(empty)";

/// Longest chunk read from a connection in one dispatch.
pub const MAX_LINE: usize = 1024;
/// Longest accepted handshake line.
pub const MAX_HANDSHAKE: usize = 64;

/// Displayed identity announced by a peer during the handshake.
///
/// Identities are not unique: two connections may claim the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{IDENTITY_TAG}{:04}", self.0)
    }
}

/// Parses the handshake line into an identity.
///
/// Accepts `cli-0042` and `42` alike. Anything without a leading numeral
/// yields identity zero, negative values clamp to zero and values past
/// `u32::MAX` saturate.
pub fn parse_handshake(line: &str) -> ClientId {
    let value = line
        .strip_prefix(IDENTITY_TAG)
        .and_then(leading_integer)
        .or_else(|| leading_integer(line))
        .unwrap_or(0);
    ClientId(value.clamp(0, i64::from(u32::MAX)) as u32)
}

fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit);
    let mut seen = false;
    let magnitude = digits.fold(0i64, |acc, digit| {
        seen = true;
        acc.saturating_mul(10)
            .saturating_add(i64::from(digit - b'0'))
    });

    seen.then_some(if negative { -magnitude } else { magnitude })
}

/// What a registered peer asked for with one line of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Health,
    ViewList,
    Chat(&'a [u8]),
}

impl<'a> Request<'a> {
    /// Classifies a raw line by prefix, as received (terminator included).
    pub fn classify(line: &'a [u8]) -> Self {
        if line.starts_with(b"health") {
            Request::Health
        } else if line.starts_with(b"viewlist") {
            Request::ViewList
        } else {
            Request::Chat(line)
        }
    }
}

/// Formats a broadcast line. The bytes of `line` are copied untouched,
/// including whatever terminator they arrived with.
pub fn format_broadcast(identity: ClientId, line: &[u8]) -> Vec<u8> {
    let mut message = format!("{identity} says: ").into_bytes();
    message.extend_from_slice(line);
    message
}

pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|byte| !matches!(byte, b'\n' | b'\r'))
        .map_or(0, |last| last + 1);
    &line[..end]
}

/// Reads one line of at most `limit` bytes.
///
/// Longer lines are returned in `limit`-sized chunks across calls, split on
/// byte boundaries. Returns `Ok(None)` once the peer has closed its write
/// side.
pub async fn read_bounded_line<R>(reader: &mut R, limit: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = Vec::new();
    let bytes = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut buffer)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }

    Ok(Some(buffer))
}
