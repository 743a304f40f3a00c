//! NMEA 0183 语句解析
//!
//! 只解析到网关需要的程度：地址字段（talker + 语句类型）、校验和、数据字段，
//! 以及已知语句类型的状态位。

use std::fmt;

/// 语句解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SentenceError {
    #[error("empty line")]
    Empty,
    #[error("missing start delimiter")]
    MissingStart,
    #[error("bad address field: {0:?}")]
    BadAddress(String),
    #[error("bad checksum field: {0:?}")]
    BadChecksum(String),
    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },
}

/// 订阅匹配键：talker + 语句类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SentenceKey {
    pub talker: String,
    pub sentence_type: String,
}

impl SentenceKey {
    pub fn new(talker: impl Into<String>, sentence_type: impl Into<String>) -> Self {
        Self {
            talker: talker.into(),
            sentence_type: sentence_type.into(),
        }
    }
}

impl fmt::Display for SentenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.talker, self.sentence_type)
    }
}

/// 已解析的语句
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub key: SentenceKey,
    /// 地址字段之后的数据字段
    pub fields: Vec<String>,
}

impl Sentence {
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// 已知语句类型的数据有效位（`A` 有效）；未知类型返回 `None`。
    pub fn data_valid(&self) -> Option<bool> {
        let index = match self.key.sentence_type.as_str() {
            "ROT" | "RMC" => 1,
            "MWV" => 4,
            "GLL" => 5,
            _ => return None,
        };
        Some(self.field(index).map(str::trim) == Some("A"))
    }
}

/// 解析单行语句，校验和存在时必须匹配。
pub fn parse_sentence(line: &str) -> Result<Sentence, SentenceError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(SentenceError::Empty);
    }
    let body = line
        .strip_prefix('$')
        .or_else(|| line.strip_prefix('!'))
        .ok_or(SentenceError::MissingStart)?;

    let data = match body.rsplit_once('*') {
        Some((data, checksum)) => {
            let expected = parse_checksum(checksum)?;
            let computed = data.bytes().fold(0u8, |acc, byte| acc ^ byte);
            if expected != computed {
                return Err(SentenceError::ChecksumMismatch { expected, computed });
            }
            data
        }
        None => body,
    };

    let mut parts = data.split(',');
    let address = parts.next().unwrap_or_default();
    let key = parse_address(address)?;
    let fields = parts.map(str::to_string).collect();
    Ok(Sentence { key, fields })
}

fn parse_checksum(field: &str) -> Result<u8, SentenceError> {
    if field.len() != 2 {
        return Err(SentenceError::BadChecksum(field.to_string()));
    }
    u8::from_str_radix(field, 16).map_err(|_| SentenceError::BadChecksum(field.to_string()))
}

fn parse_address(address: &str) -> Result<SentenceKey, SentenceError> {
    let well_formed = address.len() >= 3
        && address
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !well_formed {
        return Err(SentenceError::BadAddress(address.to_string()));
    }
    // 厂商私有语句：P + 厂商码 + 类型
    if let Some(rest) = address.strip_prefix('P') {
        return Ok(SentenceKey::new("P", rest));
    }
    if address.len() < 5 {
        return Err(SentenceError::BadAddress(address.to_string()));
    }
    let (talker, sentence_type) = address.split_at(2);
    Ok(SentenceKey::new(talker, sentence_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let checksum = body.bytes().fold(0u8, |acc, byte| acc ^ byte);
        format!("${}*{:02X}", body, checksum)
    }

    #[test]
    fn parses_rot_with_checksum() {
        let line = format!("{}\r\n", with_checksum("HEROT,-3.5,A"));
        let sentence = parse_sentence(&line).unwrap();
        assert_eq!(sentence.key, SentenceKey::new("HE", "ROT"));
        assert_eq!(sentence.fields, vec!["-3.5", "A"]);
        assert_eq!(sentence.data_valid(), Some(true));
    }

    #[test]
    fn parses_without_checksum() {
        let sentence = parse_sentence("$GPRMC,123519,V,4807.038,N").unwrap();
        assert_eq!(sentence.key.to_string(), "GPRMC");
        assert_eq!(sentence.data_valid(), Some(false));
    }

    #[test]
    fn unknown_type_has_no_validity_flag() {
        let sentence = parse_sentence("$HEHDT,274.07,T").unwrap();
        assert_eq!(sentence.data_valid(), None);
        assert_eq!(sentence.field(0), Some("274.07"));
        assert_eq!(sentence.field(5), None);
    }

    #[test]
    fn rejects_bad_checksum() {
        let valid = with_checksum("HEROT,1.0,A");
        assert!(parse_sentence(&valid).is_ok());

        let computed = "HEROT,1.0,A".bytes().fold(0u8, |acc, b| acc ^ b);
        let wrong = computed ^ 0xFF;
        let err = parse_sentence(&format!("$HEROT,1.0,A*{:02X}", wrong)).unwrap_err();
        assert_eq!(
            err,
            SentenceError::ChecksumMismatch {
                expected: wrong,
                computed,
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_sentence("   "), Err(SentenceError::Empty));
        assert_eq!(parse_sentence("HEROT,1.0,A"), Err(SentenceError::MissingStart));
        assert!(matches!(
            parse_sentence("$he,1"),
            Err(SentenceError::BadAddress(_))
        ));
        assert!(matches!(
            parse_sentence("$HEROT,1*Z"),
            Err(SentenceError::BadChecksum(_))
        ));
    }

    #[test]
    fn proprietary_sentence_key() {
        let sentence = parse_sentence("!PGRME,15.0,M").unwrap();
        assert_eq!(sentence.key, SentenceKey::new("P", "GRME"));
    }
}
