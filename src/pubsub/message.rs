use std::fmt;

use bytes::Bytes;
use serde_json::Value;

/// Сообщение, публикуемое в канал.
///
/// Механизм рассылки не интерпретирует содержимое: оно важно только на
/// границе с брокером, где сообщение превращается в UTF-8 текст и обратно.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Обычный текст
    Text(String),
    /// Структурированные данные (map/array/scalar в JSON-модели)
    Structured(Value),
    /// Сырые байты
    Bytes(Bytes),
}

impl Message {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn structured(value: impl Into<Value>) -> Self {
        Self::Structured(value.into())
    }

    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Self::Bytes(b.into())
    }

    /// Короткое имя варианта для логов.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Structured(_) => "structured",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Кодирует сообщение в проводной вид брокера (всегда UTF-8 текст).
    ///
    /// - `Structured` → компактный JSON;
    /// - `Text` → передаётся как есть;
    /// - `Bytes` → как UTF-8, невалидные последовательности заменяются на
    ///   U+FFFD.
    ///
    /// Обратный путь не сохраняет вариант: получатель разбирает текст как
    /// JSON, поэтому `Text("42")` или `Text("{\"a\":1}")` приходит в другой
    /// процесс как `Structured`. Вариант `Bytes` на другой стороне не
    /// восстанавливается.
    pub fn encode_for_broker(&self) -> Bytes {
        match self {
            Self::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            // Сериализация `Value` в строку не может завершиться ошибкой:
            // ключи map всегда строки.
            Self::Structured(v) => Bytes::from(v.to_string()),
            Self::Bytes(b) => match std::str::from_utf8(b) {
                Ok(_) => b.clone(),
                Err(_) => Bytes::from(String::from_utf8_lossy(b).into_owned()),
            },
        }
    }

    /// Декодирует полезную нагрузку, пришедшую от брокера.
    ///
    /// Сначала байты превращаются в текст, затем делается попытка разобрать
    /// JSON. Если разбор не удался, сообщение доставляется как сырой текст.
    pub fn decode_from_broker(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Text(text.into_owned()),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Structured(v) => write!(f, "{v}"),
            Self::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Value> for Message {
    fn from(v: Value) -> Self {
        Self::Structured(v)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}
