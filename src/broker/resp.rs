//! Кодек RESP2: кодирование команд и разбор ответов брокера.
//!
//! Декодер не хранит состояния между вызовами: если во входном буфере нет
//! полного фрейма, он возвращает `Ok(None)` и ничего не потребляет.

use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vestnik_error::BrokerError;

/// Максимальная длина строки до CRLF (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
/// Максимальный размер BulkString (512 MiB).
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;
/// Максимальная вложенность массивов.
pub const MAX_ARRAY_DEPTH: usize = 32;

/// Фрейм RESP2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` означает null bulk string (`$-1`).
    Bulk(Option<Bytes>),
    /// `None` означает null array (`*-1`).
    Array(Option<Vec<RespFrame>>),
}

impl RespFrame {
    /// Содержимое Simple или Bulk как байты.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Simple(s) => Some(s.as_bytes()),
            Self::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

/// Кодирует команду как массив bulk-строк.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u8(b'*');
    out.put_slice(args.len().to_string().as_bytes());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        out.put_slice(arg.len().to_string().as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
    out.freeze()
}

/// Пытается извлечь один фрейм из начала `buf`.
///
/// При успехе потребляет байты фрейма. При неполных данных возвращает
/// `Ok(None)` и оставляет буфер как есть. Ошибка тоже ничего не потребляет:
/// после неё поток нельзя читать дальше.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespFrame>, BrokerError> {
    let mut cur = Cursor::new(&buf[..]);
    match parse_frame(&mut cur, 0)? {
        Some(frame) => {
            let consumed = cur.position() as usize;
            buf.advance(consumed);
            Ok(Some(frame))
        }
        None => Ok(None),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Внутренние методы и функции
////////////////////////////////////////////////////////////////////////////////

fn parse_frame(
    cur: &mut Cursor<&[u8]>,
    depth: usize,
) -> Result<Option<RespFrame>, BrokerError> {
    if !cur.has_remaining() {
        return Ok(None);
    }
    let tag = cur.get_u8();
    let Some(line) = read_line(cur)? else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some(RespFrame::Simple(to_utf8(line)?))),
        b'-' => Ok(Some(RespFrame::Error(to_utf8(line)?))),
        b':' => Ok(Some(RespFrame::Integer(parse_int(line)?))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some(RespFrame::Bulk(None)));
            }
            let len = usize::try_from(len)
                .map_err(|_| BrokerError::protocol(format!("invalid bulk length {len}")))?;
            if len > MAX_BULK_LENGTH {
                return Err(BrokerError::protocol(format!(
                    "bulk string too long ({len} > {MAX_BULK_LENGTH})"
                )));
            }
            if cur.remaining() < len + 2 {
                return Ok(None);
            }
            let start = cur.position() as usize;
            let data = Bytes::copy_from_slice(&cur.get_ref()[start..start + len]);
            cur.advance(len);
            if cur.get_u8() != b'\r' || cur.get_u8() != b'\n' {
                return Err(BrokerError::protocol("bulk string not terminated by CRLF"));
            }
            Ok(Some(RespFrame::Bulk(Some(data))))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some(RespFrame::Array(None)));
            }
            let len = usize::try_from(len)
                .map_err(|_| BrokerError::protocol(format!("invalid array length {len}")))?;
            if depth + 1 > MAX_ARRAY_DEPTH {
                return Err(BrokerError::protocol(format!(
                    "array nesting exceeds {MAX_ARRAY_DEPTH}"
                )));
            }
            // Длина приходит от сервера; ёмкость ограничена, чтобы мусор в
            // потоке не вызвал огромную аллокацию.
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                match parse_frame(cur, depth + 1)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(RespFrame::Array(Some(items))))
        }
        other => Err(BrokerError::protocol(format!(
            "unknown RESP type byte 0x{other:02x}"
        ))),
    }
}

/// Читает строку до CRLF. `Ok(None)`, если CRLF ещё не пришёл.
fn read_line<'a>(cur: &mut Cursor<&'a [u8]>) -> Result<Option<&'a [u8]>, BrokerError> {
    let start = cur.position() as usize;
    let data: &'a [u8] = *cur.get_ref();
    let rest = &data[start..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            if end > MAX_LINE_LENGTH {
                return Err(BrokerError::protocol("line too long"));
            }
            cur.set_position((start + end + 2) as u64);
            Ok(Some(&rest[..end]))
        }
        None if rest.len() > MAX_LINE_LENGTH => Err(BrokerError::protocol("line too long")),
        None => Ok(None),
    }
}

fn to_utf8(line: &[u8]) -> Result<String, BrokerError> {
    String::from_utf8(line.to_vec()).map_err(|_| BrokerError::protocol("line is not valid UTF-8"))
}

fn parse_int(line: &[u8]) -> Result<i64, BrokerError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            BrokerError::protocol(format!(
                "invalid integer '{}'",
                String::from_utf8_lossy(line)
            ))
        })
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
